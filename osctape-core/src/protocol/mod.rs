//! Wire protocol implementation.
//!
//! Parsing and formatting of OSC packets. All functions are pure (no I/O);
//! the server crate owns the sockets.
//!
//! # Example
//!
//! ```rust
//! use osctape_core::protocol::{OscMessage, OscPacket, WireArg};
//!
//! let msg = OscMessage::new("/playbackcsv", vec![WireArg::Int(1)]);
//! let datagram = msg.encode().unwrap();
//!
//! let packet = OscPacket::decode(&datagram).unwrap();
//! assert_eq!(packet.into_messages(), vec![msg]);
//! ```

pub mod osc;

pub use osc::{OscMessage, OscPacket, WireArg};

use crate::error::WireError;

/// Round up to the next multiple of four
pub(crate) fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Read a null-terminated, 4-byte padded OSC string starting at `offset`.
///
/// Returns the string and the offset just past its padding.
pub(crate) fn read_osc_string(data: &[u8], offset: usize) -> Result<(String, usize), WireError> {
    if offset >= data.len() {
        return Err(WireError::TooShort {
            expected: offset + 4,
            actual: data.len(),
        });
    }
    let null_pos = data[offset..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::UnterminatedString(offset))?;
    let s = std::str::from_utf8(&data[offset..offset + null_pos])?;
    let next = pad4(offset + null_pos + 1);
    if next > data.len() {
        return Err(WireError::TooShort {
            expected: next,
            actual: data.len(),
        });
    }
    Ok((s.to_string(), next))
}
