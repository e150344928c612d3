//! CSV playback - sends each event to the destination at its recorded offset.

use log::{debug, info, trace, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use osctape_core::{EngineState, EventSequence};

use crate::transport::OscSender;
use crate::{SessionError, StatusEvent};

use super::StateError;

/// Wake up this long before an event and yield until it is due
const SPIN_MARGIN: Duration = Duration::from_millis(2);

/// Offsets beyond this are treated as "never"
const MAX_OFFSET: Duration = Duration::from_secs(86400 * 365 * 30);

/// Playback status information
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub state: EngineState,
    /// File the running (or last) sequence was loaded from
    pub source: Option<PathBuf>,
    pub destination: Option<SocketAddr>,
    pub events_sent: usize,
    pub total_events: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackOutcome {
    Finished,
    Stopped,
}

#[derive(Debug, Default)]
struct PlayerInner {
    state: EngineState,
    /// Bumped on every start
    generation: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    source: Option<PathBuf>,
    destination: Option<SocketAddr>,
    sent: Arc<AtomicUsize>,
    total: usize,
    started_at: Option<Instant>,
    finished_after: Option<Duration>,
}

/// Replays an [`EventSequence`] over UDP
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<Mutex<PlayerInner>>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl PlaybackEngine {
    pub fn new(status_tx: broadcast::Sender<StatusEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlayerInner::default())),
            status_tx,
        }
    }

    /// Start sending `sequence` to `destination`. Returns as soon as the
    /// scheduling task is spawned.
    pub async fn start(
        &self,
        sequence: EventSequence,
        destination: SocketAddr,
        source: Option<PathBuf>,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            return Err(StateError::PlaybackRunning.into());
        }

        let sender = OscSender::bind(destination)?;
        let cancel = CancellationToken::new();
        let sent = Arc::new(AtomicUsize::new(0));

        inner.generation += 1;
        let generation = inner.generation;
        inner.state = EngineState::Running;
        inner.cancel = Some(cancel.clone());
        inner.sent = sent.clone();
        inner.total = sequence.len();
        inner.source = source.clone();
        inner.destination = Some(destination);
        inner.started_at = Some(Instant::now());
        inner.finished_after = None;

        info!(
            "Playing {} events{} to {}",
            sequence.len(),
            source
                .as_ref()
                .map(|p| format!(" from {}", p.display()))
                .unwrap_or_default(),
            destination
        );
        let _ = self.status_tx.send(StatusEvent::PlaybackStarted {
            file: source,
            events: sequence.len(),
            destination,
        });

        let engine = self.clone();
        let status_tx = self.status_tx.clone();
        inner.task = Some(tokio::spawn(async move {
            let outcome = playback_task(sequence, sender, cancel, sent, status_tx).await;
            engine.finish(generation, outcome).await;
        }));

        Ok(())
    }

    /// Cancel the running playback and wait for its task. No-op when idle.
    pub async fn stop(&self) {
        let (cancel, task) = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_running() {
                debug!("Playback stop requested while idle");
                return;
            }
            (inner.cancel.take(), inner.task.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Playback task ended abnormally: {}", e);
                self.reset().await;
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.state.is_running()
    }

    pub async fn status(&self) -> PlaybackStatus {
        let inner = self.inner.lock().await;
        let elapsed = match (inner.finished_after, inner.started_at) {
            (Some(d), _) => d,
            (None, Some(t)) => t.elapsed(),
            (None, None) => Duration::ZERO,
        };
        PlaybackStatus {
            state: inner.state,
            source: inner.source.clone(),
            destination: inner.destination,
            events_sent: inner.sent.load(Ordering::Relaxed),
            total_events: inner.total,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Called by the task itself; ignored when a newer run has started
    async fn finish(&self, generation: u64, outcome: PlaybackOutcome) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.state = EngineState::Idle;
        inner.cancel = None;
        inner.task = None;
        inner.finished_after = inner.started_at.map(|t| t.elapsed());

        let sent = inner.sent.load(Ordering::Relaxed);
        let event = match outcome {
            PlaybackOutcome::Finished => {
                info!("Playback finished, {} of {} events sent", sent, inner.total);
                StatusEvent::PlaybackFinished { sent }
            }
            PlaybackOutcome::Stopped => {
                info!("Playback stopped, {} of {} events sent", sent, inner.total);
                StatusEvent::PlaybackStopped { sent }
            }
        };
        let _ = self.status_tx.send(event);
    }

    async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = EngineState::Idle;
        inner.cancel = None;
        inner.task = None;
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlaybackEngine {{ }}")
    }
}

/// Sleep until `target`, or return false as soon as `cancel` fires.
///
/// The coarse sleep ends a little early; the rest is spent yielding so the
/// event leaves within a fraction of a millisecond of its deadline.
async fn wait_until(target: Instant, cancel: &CancellationToken) -> bool {
    if let Some(wake) = target.checked_sub(SPIN_MARGIN) {
        if wake > Instant::now() {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    while Instant::now() < target {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::task::yield_now().await;
    }
    !cancel.is_cancelled()
}

/// Playback task that runs in the background
async fn playback_task(
    sequence: EventSequence,
    sender: OscSender,
    cancel: CancellationToken,
    sent: Arc<AtomicUsize>,
    status_tx: broadcast::Sender<StatusEvent>,
) -> PlaybackOutcome {
    debug!("Playback task started for {}", sender.destination());
    let t0 = Instant::now();

    for event in &sequence {
        let target = t0 + event.offset().min(MAX_OFFSET);

        if !wait_until(target, &cancel).await {
            return PlaybackOutcome::Stopped;
        }

        match sender.send(&event.address, &event.value).await {
            Ok(()) => {
                sent.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "{:>10.6}s {} {}",
                    t0.elapsed().as_secs_f64(),
                    event.address,
                    event.value
                );
                let _ = status_tx.send(StatusEvent::MessageSent {
                    address: event.address.clone(),
                    value: event.value.clone(),
                });
            }
            Err(e) => {
                warn!("{}", e);
                let _ = status_tx.send(StatusEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    PlaybackOutcome::Finished
}
