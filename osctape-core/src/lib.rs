//! # osctape core
//!
//! Platform-independent building blocks for recording and replaying OSC
//! traffic as CSV files.
//!
//! This crate contains pure parsing and formatting logic with **no network
//! or async dependencies**. The `osctape-server` crate owns the sockets,
//! the timing loop and the control channel.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  osctape-core (no tokio, no sockets)                     │
//! │  ├── protocol/    (OSC message and bundle framing)       │
//! │  ├── value        (typed values, text and wire forms)    │
//! │  ├── event        (timestamped events, sequences)        │
//! │  ├── file_format  (CSV load, recording sessions)         │
//! │  └── control      (/playbackcsv and /recordcsv)          │
//! └──────────────────────────────────────────────────────────┘
//!                          ▲
//!             ┌────────────┴────────────┐
//!             │  osctape-server         │
//!             │  (tokio, UDP, timing)   │
//!             └─────────────────────────┘
//! ```
//!
//! ## Example: loading a recording
//!
//! ```rust
//! use osctape_core::file_format::{load_from_reader, LoadOptions};
//! use osctape_core::TypedValue;
//!
//! let text = "# AGAT OSC Recording\n# Started: x\n# Format: x\ntime,address,value\n\
//!             0.000000,/synth/freq,440\n0.500000,/synth/gate,true\n";
//! let report = load_from_reader(text.as_bytes(), LoadOptions::default()).unwrap();
//!
//! assert_eq!(report.sequence.len(), 2);
//! assert_eq!(report.sequence.events()[0].value, TypedValue::Integer(440));
//! ```

pub mod control;
pub mod error;
pub mod event;
pub mod file_format;
pub mod protocol;
pub mod state;
pub mod value;

// Re-export commonly used types
pub use control::{ControlAction, ControlCommand, ControlTarget};
pub use error::{FormatError, ValueError, WireError};
pub use event::{Event, EventSequence};
pub use file_format::{LoadOptions, LoadReport, RecordingSession};
pub use protocol::{OscMessage, OscPacket, WireArg};
pub use state::EngineState;
pub use value::TypedValue;
