//! OSC 1.0 binary framing
//!
//! A message is laid out as:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Address "/a/b\0"         │  padded to a multiple of 4 bytes
//! ├──────────────────────────┤
//! │ Type tags ",if\0"        │  padded to a multiple of 4 bytes
//! ├──────────────────────────┤
//! │ Arguments                │  big-endian, each 4-byte aligned
//! └──────────────────────────┘
//! ```
//!
//! A bundle starts with `#bundle\0`, an 8 byte time tag and then a list of
//! size-prefixed elements, each either a message or another bundle.

use crate::error::WireError;

use super::{pad4, read_osc_string};

/// Marker at the start of a bundle
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Time tag meaning "immediately"
pub const TIME_TAG_IMMEDIATE: u64 = 1;

/// Deepest bundle nesting accepted by [`OscPacket::decode`]
pub const MAX_BUNDLE_DEPTH: usize = 16;

/// A single OSC argument as it travels on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireArg {
    /// `i`
    Int(i32),
    /// `h`
    Long(i64),
    /// `f`
    Float(f32),
    /// `d`
    Double(f64),
    /// `s`
    String(String),
    /// `S`
    Symbol(String),
    /// `T` / `F`
    Bool(bool),
    /// `N`
    Nil,
    /// `I`
    Impulse,
    /// `b`
    Blob(Vec<u8>),
}

impl WireArg {
    pub fn type_tag(&self) -> char {
        match self {
            WireArg::Int(_) => 'i',
            WireArg::Long(_) => 'h',
            WireArg::Float(_) => 'f',
            WireArg::Double(_) => 'd',
            WireArg::String(_) => 's',
            WireArg::Symbol(_) => 'S',
            WireArg::Bool(true) => 'T',
            WireArg::Bool(false) => 'F',
            WireArg::Nil => 'N',
            WireArg::Impulse => 'I',
            WireArg::Blob(_) => 'b',
        }
    }
}

impl std::fmt::Display for WireArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireArg::Int(v) => write!(f, "{}", v),
            WireArg::Long(v) => write!(f, "{}", v),
            WireArg::Float(v) => write!(f, "{}", v),
            WireArg::Double(v) => write!(f, "{}", v),
            WireArg::String(v) | WireArg::Symbol(v) => write!(f, "{:?}", v),
            WireArg::Bool(v) => write!(f, "{}", v),
            WireArg::Nil => write!(f, "nil"),
            WireArg::Impulse => write!(f, "impulse"),
            WireArg::Blob(v) => write!(f, "<{} byte blob>", v.len()),
        }
    }
}

/// An OSC message: address pattern plus arguments
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<WireArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<WireArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Encode the message into a datagram
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if !self.address.starts_with('/') {
            return Err(WireError::InvalidAddress(self.address.clone()));
        }

        let mut buf = Vec::with_capacity(64);
        write_osc_string(&mut buf, &self.address);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(arg.type_tag());
        }
        write_osc_string(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                WireArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
                WireArg::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
                WireArg::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
                WireArg::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
                WireArg::String(s) | WireArg::Symbol(s) => write_osc_string(&mut buf, s),
                WireArg::Blob(b) => {
                    buf.extend_from_slice(&(b.len() as i32).to_be_bytes());
                    buf.extend_from_slice(b);
                    buf.resize(pad4(buf.len()), 0);
                }
                WireArg::Bool(_) | WireArg::Nil | WireArg::Impulse => {}
            }
        }

        Ok(buf)
    }

    /// Decode a single message (not a bundle)
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() % 4 != 0 {
            return Err(WireError::Misaligned(data.len()));
        }

        let (address, mut offset) = read_osc_string(data, 0)?;
        if !address.starts_with('/') {
            return Err(WireError::InvalidAddress(address));
        }

        // Some senders omit the type tag string for messages without arguments
        if offset >= data.len() {
            return Ok(Self::new(address, Vec::new()));
        }

        let (tags, next) = read_osc_string(data, offset)?;
        offset = next;
        let tags = tags.strip_prefix(',').ok_or(WireError::MissingTypeTags)?;

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            let arg = match tag {
                'i' => WireArg::Int(i32::from_be_bytes(take::<4>(data, &mut offset)?)),
                'h' => WireArg::Long(i64::from_be_bytes(take::<8>(data, &mut offset)?)),
                'f' => WireArg::Float(f32::from_be_bytes(take::<4>(data, &mut offset)?)),
                'd' => WireArg::Double(f64::from_be_bytes(take::<8>(data, &mut offset)?)),
                's' | 'S' => {
                    let (s, next) = read_osc_string(data, offset)?;
                    offset = next;
                    if tag == 's' {
                        WireArg::String(s)
                    } else {
                        WireArg::Symbol(s)
                    }
                }
                'b' => {
                    let len = i32::from_be_bytes(take::<4>(data, &mut offset)?).max(0) as usize;
                    if offset + len > data.len() {
                        return Err(WireError::TooShort {
                            expected: offset + len,
                            actual: data.len(),
                        });
                    }
                    let blob = data[offset..offset + len].to_vec();
                    offset = pad4(offset + len);
                    WireArg::Blob(blob)
                }
                'T' => WireArg::Bool(true),
                'F' => WireArg::Bool(false),
                'N' => WireArg::Nil,
                'I' => WireArg::Impulse,
                other => return Err(WireError::UnknownTypeTag(other)),
            };
            args.push(arg);
        }

        Ok(Self::new(address, args))
    }
}

/// Top level contents of a datagram
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle { time_tag: u64, content: Vec<OscPacket> },
}

impl OscPacket {
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        Self::decode_nested(data, 0)
    }

    fn decode_nested(data: &[u8], depth: usize) -> Result<Self, WireError> {
        if data.starts_with(BUNDLE_TAG) {
            if depth >= MAX_BUNDLE_DEPTH {
                return Err(WireError::TooDeep(MAX_BUNDLE_DEPTH));
            }
            Self::decode_bundle(data, depth + 1)
        } else {
            OscMessage::decode(data).map(OscPacket::Message)
        }
    }

    fn decode_bundle(data: &[u8], depth: usize) -> Result<Self, WireError> {
        let mut offset = BUNDLE_TAG.len();
        let time_tag = u64::from_be_bytes(take::<8>(data, &mut offset)?);

        let mut content = Vec::new();
        while offset < data.len() {
            let size = i32::from_be_bytes(take::<4>(data, &mut offset)?).max(0) as usize;
            let remaining = data.len() - offset;
            if size > remaining {
                return Err(WireError::BadBundleElement { size, remaining });
            }
            content.push(Self::decode_nested(&data[offset..offset + size], depth)?);
            offset += size;
        }

        Ok(OscPacket::Bundle { time_tag, content })
    }

    /// Encode a packet, recursing into bundles
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match self {
            OscPacket::Message(msg) => msg.encode(),
            OscPacket::Bundle { time_tag, content } => {
                let mut buf = BUNDLE_TAG.to_vec();
                buf.extend_from_slice(&time_tag.to_be_bytes());
                for element in content {
                    let bytes = element.encode()?;
                    buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    buf.extend_from_slice(&bytes);
                }
                Ok(buf)
            }
        }
    }

    /// All messages in this packet, bundles flattened in order
    pub fn into_messages(self) -> Vec<OscMessage> {
        match self {
            OscPacket::Message(msg) => vec![msg],
            OscPacket::Bundle { content, .. } => {
                content.into_iter().flat_map(|p| p.into_messages()).collect()
            }
        }
    }
}

fn write_osc_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    // At least one terminating null, then pad
    buf.push(0);
    buf.resize(pad4(buf.len()), 0);
}

fn take<const N: usize>(data: &[u8], offset: &mut usize) -> Result<[u8; N], WireError> {
    let end = *offset + N;
    if end > data.len() {
        return Err(WireError::TooShort {
            expected: end,
            actual: data.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(out)
}
