//! Control commands received on the control channel.
//!
//! Two fixed addresses each take one argument, `1` to start and `0` to stop:
//!
//! | Address        | Engine    |
//! |----------------|-----------|
//! | `/playbackcsv` | playback  |
//! | `/recordcsv`   | recording |

use serde::Serialize;

use crate::protocol::{OscMessage, WireArg};

pub const PLAYBACK_ADDRESS: &str = "/playbackcsv";
pub const RECORD_ADDRESS: &str = "/recordcsv";

/// Addresses that are never recorded
pub const CONTROL_ADDRESSES: [&str; 2] = [PLAYBACK_ADDRESS, RECORD_ADDRESS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlTarget {
    Playback,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlCommand {
    pub target: ControlTarget,
    pub action: ControlAction,
}

/// Why a message on a control address was not a command
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRejection {
    UnknownAddress(String),
    MissingArgument,
    UnknownValue(WireArg),
}

impl std::fmt::Display for ControlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlRejection::UnknownAddress(a) => write!(f, "unknown control address {}", a),
            ControlRejection::MissingArgument => write!(f, "missing argument (use 1 or 0)"),
            ControlRejection::UnknownValue(v) => {
                write!(f, "unknown command {} (use 1 to start, 0 to stop)", v)
            }
        }
    }
}

pub fn is_control_address(address: &str) -> bool {
    CONTROL_ADDRESSES.contains(&address)
}

impl ControlCommand {
    /// Decode a control message. Integer, float and boolean arguments are
    /// accepted as long as they equal 1 or 0.
    pub fn parse(msg: &OscMessage) -> Result<Self, ControlRejection> {
        let target = match msg.address.as_str() {
            PLAYBACK_ADDRESS => ControlTarget::Playback,
            RECORD_ADDRESS => ControlTarget::Recording,
            other => return Err(ControlRejection::UnknownAddress(other.to_string())),
        };

        let arg = msg.args.first().ok_or(ControlRejection::MissingArgument)?;
        let action = match arg {
            WireArg::Int(1) | WireArg::Long(1) | WireArg::Bool(true) => ControlAction::Start,
            WireArg::Int(0) | WireArg::Long(0) | WireArg::Bool(false) => ControlAction::Stop,
            WireArg::Float(v) if *v == 1.0 => ControlAction::Start,
            WireArg::Float(v) if *v == 0.0 => ControlAction::Stop,
            WireArg::Double(v) if *v == 1.0 => ControlAction::Start,
            WireArg::Double(v) if *v == 0.0 => ControlAction::Stop,
            other => return Err(ControlRejection::UnknownValue(other.clone())),
        };

        Ok(Self { target, action })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(address: &str, args: Vec<WireArg>) -> Result<ControlCommand, ControlRejection> {
        ControlCommand::parse(&OscMessage::new(address, args))
    }

    #[test]
    fn test_start_stop() {
        assert_eq!(
            parse(PLAYBACK_ADDRESS, vec![WireArg::Int(1)]),
            Ok(ControlCommand {
                target: ControlTarget::Playback,
                action: ControlAction::Start
            })
        );
        assert_eq!(
            parse(RECORD_ADDRESS, vec![WireArg::Int(0)]),
            Ok(ControlCommand {
                target: ControlTarget::Recording,
                action: ControlAction::Stop
            })
        );
    }

    #[test]
    fn test_float_arguments() {
        assert_eq!(
            parse(PLAYBACK_ADDRESS, vec![WireArg::Float(1.0)]).map(|c| c.action),
            Ok(ControlAction::Start)
        );
        assert_eq!(
            parse(PLAYBACK_ADDRESS, vec![WireArg::Double(0.0)]).map(|c| c.action),
            Ok(ControlAction::Stop)
        );
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            parse(PLAYBACK_ADDRESS, vec![]),
            Err(ControlRejection::MissingArgument)
        );
        assert_eq!(
            parse(PLAYBACK_ADDRESS, vec![WireArg::Int(2)]),
            Err(ControlRejection::UnknownValue(WireArg::Int(2)))
        );
        assert!(matches!(
            parse(RECORD_ADDRESS, vec![WireArg::String("1".into())]),
            Err(ControlRejection::UnknownValue(_))
        ));
        assert!(matches!(
            parse("/other", vec![WireArg::Int(1)]),
            Err(ControlRejection::UnknownAddress(_))
        ));
    }

    #[test]
    fn test_is_control_address() {
        assert!(is_control_address("/playbackcsv"));
        assert!(is_control_address("/recordcsv"));
        assert!(!is_control_address("/recordcsv/extra"));
    }
}
