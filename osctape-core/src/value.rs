//! Typed message values and their text and wire representations.
//!
//! A recording file stores each value as plain text, so the type is inferred
//! again on load. Decoding tries, in this order:
//!
//! 1. empty or whitespace only → [`TypedValue::Empty`]
//! 2. `true` / `false`, any case → [`TypedValue::Boolean`]
//! 3. an integer without `.`, `e` or `E` → [`TypedValue::Integer`]
//! 4. a number containing `.`, `e` or `E` → [`TypedValue::Float`]
//! 5. anything else → [`TypedValue::Text`]
//!
//! Floats are written with the shortest representation that parses back to
//! the same bits, and always carry a `.` or an exponent so they are never
//! read back as integers.

use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::protocol::WireArg;

/// The value carried by one recorded or replayed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TypedValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Empty,
}

impl TypedValue {
    /// Text form used in recording files
    pub fn encode(&self) -> String {
        match self {
            TypedValue::Empty => String::new(),
            TypedValue::Boolean(true) => "true".to_string(),
            TypedValue::Boolean(false) => "false".to_string(),
            TypedValue::Integer(v) => v.to_string(),
            // Debug is the shortest round-trip form and keeps ".0" / "e"
            TypedValue::Float(v) => format!("{:?}", v),
            TypedValue::Text(s) => s.clone(),
        }
    }

    /// Infer a value from its text form
    pub fn decode(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return TypedValue::Empty;
        }
        if text.eq_ignore_ascii_case("true") {
            return TypedValue::Boolean(true);
        }
        if text.eq_ignore_ascii_case("false") {
            return TypedValue::Boolean(false);
        }

        let looks_float = text.contains(['.', 'e', 'E']);
        if !looks_float {
            if let Ok(v) = text.parse::<i64>() {
                return TypedValue::Integer(v);
            }
            // integer literals past the i64 range stay numeric
            if is_integer_literal(text) {
                if let Ok(v) = text.parse::<f64>() {
                    return TypedValue::Float(v);
                }
            }
        } else if let Ok(v) = text.parse::<f64>() {
            return TypedValue::Float(v);
        }

        TypedValue::Text(text.to_string())
    }

    /// Arguments for an outgoing OSC message
    pub fn to_wire_args(&self) -> Vec<WireArg> {
        match self {
            TypedValue::Empty => Vec::new(),
            TypedValue::Integer(v) => match i32::try_from(*v) {
                Ok(small) => vec![WireArg::Int(small)],
                Err(_) => vec![WireArg::Long(*v)],
            },
            TypedValue::Float(v) => vec![WireArg::Double(*v)],
            TypedValue::Text(s) => vec![WireArg::String(s.clone())],
            TypedValue::Boolean(b) => vec![WireArg::Bool(*b)],
        }
    }

    /// Value of an incoming OSC message
    pub fn from_wire_args(args: &[WireArg]) -> Result<Self, ValueError> {
        match args {
            [] => Ok(TypedValue::Empty),
            [arg] => match arg {
                WireArg::Int(v) => Ok(TypedValue::Integer(*v as i64)),
                WireArg::Long(v) => Ok(TypedValue::Integer(*v)),
                WireArg::Float(v) => Ok(TypedValue::Float(*v as f64)),
                WireArg::Double(v) => Ok(TypedValue::Float(*v)),
                WireArg::String(s) | WireArg::Symbol(s) => Ok(TypedValue::Text(s.clone())),
                WireArg::Bool(b) => Ok(TypedValue::Boolean(*b)),
                WireArg::Nil | WireArg::Impulse => Ok(TypedValue::Empty),
                WireArg::Blob(_) => Err(ValueError::UnsupportedArgument('b')),
            },
            _ => Err(ValueError::TooManyArguments(args.len())),
        }
    }
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypedValue::Empty => write!(f, "(empty)"),
            other => write!(f, "{}", other.encode()),
        }
    }
}
