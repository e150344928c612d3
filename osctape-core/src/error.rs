//! Error types for value, file and wire parsing

use thiserror::Error;

/// Errors that can occur when parsing a data line of a recording file
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Line does not carry the three `timestamp, address, value` fields
    #[error("Line {line}: expected 3 fields, got {actual}")]
    MissingFields { line: usize, actual: usize },

    /// Timestamp field is not a number
    #[error("Line {line}: invalid timestamp '{value}'")]
    InvalidTimestamp { line: usize, value: String },

    /// Address field does not start with '/'
    #[error("Line {line}: invalid address '{value}'")]
    InvalidAddress { line: usize, value: String },

    /// The csv layer rejected the record
    #[error("Line {line}: {message}")]
    Csv { line: usize, message: String },
}

/// Errors that can occur when decoding or encoding an OSC packet
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    /// Packet is too short to contain required data
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Packet size is not a multiple of four
    #[error("Packet length {0} is not 32-bit aligned")]
    Misaligned(usize),

    /// OSC string is not null terminated
    #[error("Unterminated string at offset {0}")]
    UnterminatedString(usize),

    /// Invalid UTF-8 in string field
    #[error("Invalid string encoding")]
    InvalidString,

    /// Address does not start with '/'
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    /// Type tag string does not start with ','
    #[error("Missing type tag string")]
    MissingTypeTags,

    /// Type tag not recognized
    #[error("Unknown type tag '{0}'")]
    UnknownTypeTag(char),

    /// Bundle element size does not fit the packet
    #[error("Bundle element of {size} bytes exceeds remaining {remaining}")]
    BadBundleElement { size: usize, remaining: usize },

    /// Bundles nested deeper than the decoder accepts
    #[error("Bundle nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Errors converting between wire arguments and typed values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// Only zero or one argument is carried per message
    #[error("Messages with {0} arguments are not supported")]
    TooManyArguments(usize),

    /// Argument has no typed value counterpart
    #[error("Argument type '{0}' is not supported")]
    UnsupportedArgument(char),
}

impl From<std::str::Utf8Error> for WireError {
    fn from(_: std::str::Utf8Error) -> Self {
        WireError::InvalidString
    }
}
