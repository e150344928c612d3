//! Playback and recording engines.
//!
//! Both engines share the same lifecycle: `Idle` until started, `Running`
//! while their background task is alive, then back to `Idle` when stopped or
//! finished. Starting a running engine is rejected; stopping an idle engine
//! does nothing.
//!
//! ## File Format
//!
//! Recordings are plain CSV with a fixed four line header:
//!
//! ```text
//! # AGAT OSC Recording
//! # Started: Mon Oct 19 14:03:22 2026
//! # Format: timestamp,address,value
//! time,address,value
//! 0.000000,/synth/freq,440
//! 1.234000,/synth/label,hi
//!
//! # Duration: 1.3 seconds
//! ```

use thiserror::Error;

pub mod manager;
pub mod player;
pub mod recorder;

pub use manager::{RecordingInfo, RecordingManager};
pub use player::{PlaybackEngine, PlaybackStatus};
pub use recorder::{RecordingEngine, RecordingStatus};

/// Operation not allowed in the current engine state
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("Playback is already running")]
    PlaybackRunning,
    #[error("Recording is already running")]
    RecordingRunning,
}
