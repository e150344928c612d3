//! # osctape server
//!
//! Records OSC traffic arriving on a UDP port into CSV files, and plays
//! those files back with their original timing.
//!
//! ## Architecture
//!
//! The server is built on top of [`osctape_core`] for the wire format and
//! the file format, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     osctape-server                       │
//! │  ┌────────────────┐        ┌───────────────────────────┐ │
//! │  │ ControlChannel │──────► │ Session                   │ │
//! │  │ /playbackcsv   │        │  PlayerContext            │ │
//! │  │ /recordcsv     │        │  RecorderContext          │ │
//! │  └────────────────┘        └─────┬───────────────┬─────┘ │
//! │                                  ▼               ▼       │
//! │                     ┌────────────────┐ ┌────────────────┐│
//! │                     │ PlaybackEngine │ │ RecordingEngine││
//! │                     │ (OscSender)    │ │ (OscListener)  ││
//! │                     └────────────────┘ └────────────────┘│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`Session`] - owns both engines and their configuration
//! - [`recording::PlaybackEngine`] - timed replay of a CSV file
//! - [`recording::RecordingEngine`] - captures incoming messages
//! - [`control::ControlChannel`] - remote start/stop
//! - [`transport`] - UDP send, receive and address dispatch
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use osctape_server::Cli;
//! use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["osctape", "--file", "take1.csv", "--play"]);
//!
//!     Toplevel::new(|s| async move {
//!         s.start(SubsystemBuilder::new("osctape", |subsys| {
//!             osctape_server::run(subsys, args)
//!         }));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-f, --file` - CSV file to play back
//! - `-d, --destination` - where played back messages go (default: 127.0.0.1:8001)
//! - `-c, --control` - control channel address (default: 127.0.0.1:8000)
//! - `-l, --listen` - recording address (default: 127.0.0.1:8002)
//! - `--play` / `--record` - start an engine at launch
//! - `-v` - Increase verbosity (use multiple times)

use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};
use tokio_util::sync::CancellationToken;

use osctape_core::file_format::{self, LoadOptions};
use osctape_core::{EventSequence, TypedValue};

pub mod config;
pub mod control;
pub mod network;
pub mod recording;
pub mod transport;

use config::{default_addr, default_recordings_dir};
use control::ControlChannel;
use recording::{PlaybackEngine, RecordingEngine, RecordingInfo, RecordingManager, StateError};
use transport::TransportError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity of the status broadcast channel
const STATUS_CHANNEL_SIZE: usize = 256;

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// CSV file to play back
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Where played back messages are sent
    #[arg(short, long, default_value = config::DEFAULT_DESTINATION)]
    pub destination: SocketAddr,

    /// Address of the control channel (/playbackcsv, /recordcsv)
    #[arg(short, long, default_value = config::DEFAULT_CONTROL)]
    pub control: SocketAddr,

    /// Address the recorder listens on
    #[arg(short, long, default_value = config::DEFAULT_RECORD_LISTEN)]
    pub listen: SocketAddr,

    /// Recording name, used as the file name prefix
    #[arg(short, long, default_value = config::DEFAULT_NAME)]
    pub name: String,

    /// Directory recordings are written to [default: <data dir>/recordings]
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Start playback at launch
    #[arg(long, default_value_t = false)]
    pub play: bool,

    /// Start recording at launch
    #[arg(long, default_value_t = false)]
    pub record: bool,

    /// Write status events to stdout as JSON lines
    #[arg(long, default_value_t = false)]
    pub output: bool,

    /// List the recordings in the output directory and exit
    #[arg(long, default_value_t = false)]
    pub list: bool,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Cannot read {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cannot save recording to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No playback file configured")]
    NoPlaybackFile,
    #[error("No unsaved recording")]
    NothingToSave,
}

/// Status callbacks for whatever presents the session to a user
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StatusEvent {
    PlaybackStarted {
        file: Option<PathBuf>,
        events: usize,
        destination: SocketAddr,
    },
    MessageSent {
        address: String,
        value: TypedValue,
    },
    PlaybackFinished {
        sent: usize,
    },
    PlaybackStopped {
        sent: usize,
    },
    RecordingStarted {
        name: String,
        listen: SocketAddr,
    },
    MessageRecorded {
        timestamp: f64,
        address: String,
        value: TypedValue,
    },
    RecordingSaved {
        path: PathBuf,
        events: usize,
    },
    Error {
        message: String,
    },
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusEvent::PlaybackStarted {
                events,
                destination,
                ..
            } => write!(f, "Playback of {} events to {} started", events, destination),
            StatusEvent::MessageSent { address, value } => write!(f, "Sent {} {}", address, value),
            StatusEvent::PlaybackFinished { sent } => {
                write!(f, "Playback finished after {} messages", sent)
            }
            StatusEvent::PlaybackStopped { sent } => {
                write!(f, "Playback stopped after {} messages", sent)
            }
            StatusEvent::RecordingStarted { name, listen } => {
                write!(f, "Recording '{}' on {}", name, listen)
            }
            StatusEvent::MessageRecorded {
                timestamp,
                address,
                value,
            } => write!(f, "{:.6} {} {}", timestamp, address, value),
            StatusEvent::RecordingSaved { path, events } => {
                write!(f, "Saved {} events to {}", events, path.display())
            }
            StatusEvent::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// Playback configuration, used by every start
#[derive(Debug, Clone)]
pub struct PlayerContext {
    pub file: Option<PathBuf>,
    pub destination: SocketAddr,
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self {
            file: None,
            destination: default_addr(config::DEFAULT_DESTINATION),
        }
    }
}

/// Recording configuration, used by every start
#[derive(Debug, Clone)]
pub struct RecorderContext {
    pub name: String,
    pub listen: SocketAddr,
    pub output_dir: PathBuf,
}

impl Default for RecorderContext {
    fn default() -> Self {
        Self {
            name: config::DEFAULT_NAME.to_string(),
            listen: default_addr(config::DEFAULT_RECORD_LISTEN),
            output_dir: default_recordings_dir(),
        }
    }
}

/// Both engines and the configuration they start with
#[derive(Clone)]
pub struct Session {
    player: PlaybackEngine,
    recorder: RecordingEngine,
    player_ctx: Arc<RwLock<PlayerContext>>,
    recorder_ctx: Arc<RwLock<RecorderContext>>,
    status_tx: broadcast::Sender<StatusEvent>,
    /// Parent of every listener started for this session
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(player_ctx: PlayerContext, recorder_ctx: RecorderContext) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_SIZE);
        Self {
            player: PlaybackEngine::new(status_tx.clone()),
            recorder: RecordingEngine::new(status_tx.clone()),
            player_ctx: Arc::new(RwLock::new(player_ctx)),
            recorder_ctx: Arc::new(RwLock::new(recorder_ctx)),
            status_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_args(args: &Cli) -> Self {
        Self::new(
            PlayerContext {
                file: args.file.clone(),
                destination: args.destination,
            },
            RecorderContext {
                name: args.name.clone(),
                listen: args.listen,
                output_dir: args
                    .output_dir
                    .clone()
                    .unwrap_or_else(default_recordings_dir),
            },
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn player(&self) -> &PlaybackEngine {
        &self.player
    }

    pub fn recorder(&self) -> &RecordingEngine {
        &self.recorder
    }

    pub async fn player_context(&self) -> PlayerContext {
        self.player_ctx.read().await.clone()
    }

    pub async fn recorder_context(&self) -> RecorderContext {
        self.recorder_ctx.read().await.clone()
    }

    /// Replace the playback configuration; takes effect on the next start
    pub async fn configure_playback(&self, ctx: PlayerContext) {
        *self.player_ctx.write().await = ctx;
    }

    /// Replace the recording configuration; takes effect on the next start
    pub async fn configure_recording(&self, ctx: RecorderContext) {
        *self.recorder_ctx.write().await = ctx;
    }

    /// Check that `path` reads, then make it the playback file. Returns the
    /// number of events.
    pub async fn load_file(&self, path: &Path) -> Result<usize, SessionError> {
        let sequence = load_sequence(path)?;
        self.player_ctx.write().await.file = Some(path.to_path_buf());
        Ok(sequence.len())
    }

    /// Read the playback file and start sending it
    pub async fn start_playback(&self) -> Result<(), SessionError> {
        let ctx = self.player_context().await;
        let file = ctx.file.ok_or(SessionError::NoPlaybackFile)?;
        if self.player.is_running().await {
            return Err(StateError::PlaybackRunning.into());
        }
        let sequence = load_sequence(&file)?;
        self.player.start(sequence, ctx.destination, Some(file)).await
    }

    pub async fn stop_playback(&self) {
        self.player.stop().await;
    }

    /// Returns the address the recorder is bound to
    pub async fn start_recording(&self) -> Result<SocketAddr, SessionError> {
        let ctx = self.recorder_context().await;
        self.recorder
            .start(&ctx.name, ctx.listen, ctx.output_dir)
            .await
    }

    /// Returns the saved file, or `None` when nothing was recording
    pub async fn stop_recording(&self) -> Result<Option<PathBuf>, SessionError> {
        self.recorder.stop().await
    }

    /// Returns the files written, oldest recording first
    pub async fn retry_save(&self) -> Result<Vec<PathBuf>, SessionError> {
        self.recorder.retry_save().await
    }

    /// Recordings in the configured output directory, newest first
    pub async fn list_recordings(&self) -> Vec<RecordingInfo> {
        let output_dir = self.recorder_context().await.output_dir;
        RecordingManager::with_base_dir(output_dir).list_recordings()
    }

    /// Token cancelled by [`Session::shutdown`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Close the control channel and stop both engines, saving any
    /// recording in progress
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_playback().await;
        if let Err(e) = self.stop_recording().await {
            log::error!("{}", e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}

/// Load a CSV file and shift it so the first event is at 0.0
pub fn load_sequence(path: &Path) -> Result<EventSequence, SessionError> {
    let report =
        file_format::load(path, LoadOptions::default()).map_err(|source| SessionError::Load {
            path: path.to_path_buf(),
            source,
        })?;
    for skipped in &report.skipped {
        warn!("{}: {}", path.display(), skipped);
    }
    info!(
        "Loaded {} events from {} ({} lines skipped)",
        report.sequence.len(),
        path.display(),
        report.skipped.len()
    );
    Ok(report.sequence.normalize_baseline())
}

/// Start the control channel and the requested engines, then wait for
/// shutdown and save whatever is still recording.
pub async fn run(subsys: SubsystemHandle, args: Cli) -> Result<(), SessionError> {
    info!("osctape {} starting", VERSION);
    let session = Session::from_args(&args);

    if args.list {
        for recording in session.list_recordings().await {
            println!(
                "{}\t{} events\t{:.3}s\t{} bytes",
                recording.filename, recording.event_count, recording.duration, recording.size
            );
        }
        subsys.request_shutdown();
        return Ok(());
    }

    if let Some(file) = &args.file {
        session.load_file(file).await?;
    }

    if args.output {
        let rx = session.subscribe();
        subsys.start(SubsystemBuilder::new("StatusOutput", |s| {
            write_status_lines(s, rx)
        }));
    }

    let control = ControlChannel::start(session.clone(), args.control)?;
    subsys.start(SubsystemBuilder::new("Control", |s| control.run(s)));

    if args.play {
        session.start_playback().await?;
    }
    if args.record {
        session.start_recording().await?;
    }

    subsys.on_shutdown_requested().await;
    info!("Shutdown requested");
    session.shutdown().await;
    Ok(())
}

async fn write_status_lines(
    subsys: SubsystemHandle,
    mut rx: broadcast::Receiver<StatusEvent>,
) -> Result<(), serde_json::Error> {
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            r = rx.recv() => match r {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Status output fell behind, {} events dropped", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}
