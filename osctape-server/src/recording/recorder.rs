//! OSC recorder - listens on a UDP port and writes every message to a CSV file.

use async_trait::async_trait;
use chrono::Local;
use log::{debug, error, info, trace, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use osctape_core::control::{is_control_address, RECORD_ADDRESS};
use osctape_core::protocol::OscMessage;
use osctape_core::{ControlAction, ControlCommand, EngineState, RecordingSession, TypedValue};

use crate::transport::{Dispatcher, MessageHandler, OscListener};
use crate::{SessionError, StatusEvent};

use super::manager::RecordingManager;
use super::StateError;

/// Recording status information
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: EngineState,
    /// Name prefix of the current (or last) recording
    pub name: Option<String>,
    /// Address the recorder is bound to
    pub listen: Option<SocketAddr>,
    pub events_recorded: usize,
    pub elapsed_ms: u64,
    /// Last file written
    pub last_saved: Option<PathBuf>,
    /// Finished recordings that failed to save and wait for `retry_save`
    pub unsaved: usize,
}

/// A stopped session whose file could not be written
#[derive(Debug)]
struct PendingSave {
    session: RecordingSession,
    duration: Duration,
}

#[derive(Debug, Default)]
struct RecorderInner {
    state: EngineState,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    session: Option<Arc<Mutex<RecordingSession>>>,
    name: Option<String>,
    listen: Option<SocketAddr>,
    started_at: Option<Instant>,
    recorded: Arc<AtomicUsize>,
    last_saved: Option<PathBuf>,
    /// Bumped on every start
    generation: u64,
    /// Oldest first
    pending: Vec<PendingSave>,
}

/// Appends every non-control message to the session
struct RecordHandler {
    session: Arc<Mutex<RecordingSession>>,
    started_at: Instant,
    recorded: Arc<AtomicUsize>,
    status_tx: broadcast::Sender<StatusEvent>,
}

#[async_trait]
impl MessageHandler for RecordHandler {
    async fn handle(&self, msg: OscMessage, from: SocketAddr) {
        let elapsed = self.started_at.elapsed();

        if is_control_address(&msg.address) {
            trace!("Not recording control message {} from {}", msg.address, from);
            return;
        }

        let value = match TypedValue::from_wire_args(&msg.args) {
            Ok(value) => value,
            Err(e) => {
                warn!("Not recording {} from {}: {}", msg.address, from, e);
                return;
            }
        };

        trace!(
            "{:>10.6}s {} {} from {}",
            elapsed.as_secs_f64(),
            msg.address,
            value,
            from
        );
        self.session
            .lock()
            .await
            .append(&msg.address, value.clone(), elapsed);
        self.recorded.fetch_add(1, Ordering::Relaxed);

        let _ = self.status_tx.send(StatusEvent::MessageRecorded {
            timestamp: elapsed.as_secs_f64(),
            address: msg.address,
            value,
        });
    }
}

/// `/recordcsv` arriving on the recording port itself
struct StopHandler {
    engine: RecordingEngine,
    generation: u64,
}

#[async_trait]
impl MessageHandler for StopHandler {
    async fn handle(&self, msg: OscMessage, from: SocketAddr) {
        match ControlCommand::parse(&msg) {
            Ok(command) if command.action == ControlAction::Stop => {
                debug!("Recording stop requested by {} on the recording port", from);
                // stop() joins the listener task that is running this handler
                let engine = self.engine.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    if let Err(e) = engine.stop_run(generation).await {
                        error!("{}", e);
                    }
                });
            }
            Ok(_) => debug!("Recording already running, ignoring start from {}", from),
            Err(rejection) => warn!("Ignoring {} from {}: {}", msg.address, from, rejection),
        }
    }
}

/// Records incoming OSC messages into CSV files
#[derive(Clone)]
pub struct RecordingEngine {
    inner: Arc<Mutex<RecorderInner>>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl RecordingEngine {
    pub fn new(status_tx: broadcast::Sender<StatusEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner::default())),
            status_tx,
        }
    }

    /// Bind `listen` and start recording into a new session. Returns the
    /// bound address.
    pub async fn start(
        &self,
        name: &str,
        listen: SocketAddr,
        output_dir: PathBuf,
    ) -> Result<SocketAddr, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            return Err(StateError::RecordingRunning.into());
        }

        let listener = OscListener::bind(listen)?;
        let local_addr = listener.local_addr();

        let started_at = Instant::now();
        let session = Arc::new(Mutex::new(RecordingSession::new(
            name,
            Local::now(),
            output_dir,
        )));
        let recorded = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(RecordHandler {
            session: session.clone(),
            started_at,
            recorded: recorded.clone(),
            status_tx: self.status_tx.clone(),
        });
        let cancel = CancellationToken::new();
        inner.generation += 1;
        let stopper = Arc::new(StopHandler {
            engine: self.clone(),
            generation: inner.generation,
        });
        let dispatcher = Dispatcher::new()
            .map(RECORD_ADDRESS, stopper)
            .wildcard(handler);

        inner.state = EngineState::Running;
        inner.cancel = Some(cancel.clone());
        inner.session = Some(session);
        inner.name = Some(name.to_string());
        inner.listen = Some(local_addr);
        inner.started_at = Some(started_at);
        inner.recorded = recorded;
        inner.task = Some(tokio::spawn(listener.run(dispatcher, cancel)));

        info!("Recording '{}' from {}", name, local_addr);
        let _ = self.status_tx.send(StatusEvent::RecordingStarted {
            name: name.to_string(),
            listen: local_addr,
        });

        Ok(local_addr)
    }

    /// Stop listening and write the file. Returns `None` when not recording.
    ///
    /// If writing fails the session is kept and the engine goes idle anyway;
    /// [`RecordingEngine::retry_save`] tries again.
    pub async fn stop(&self) -> Result<Option<PathBuf>, SessionError> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_running() {
            debug!("Recording stop requested while idle");
            return Ok(None);
        }
        self.finish(&mut inner).await
    }

    /// Stop only if run `generation` is still the one recording
    async fn stop_run(&self, generation: u64) -> Result<Option<PathBuf>, SessionError> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_running() || inner.generation != generation {
            return Ok(None);
        }
        self.finish(&mut inner).await
    }

    async fn finish(&self, inner: &mut RecorderInner) -> Result<Option<PathBuf>, SessionError> {
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = inner.task.take() {
            if let Err(e) = task.await {
                warn!("Recorder listener ended abnormally: {}", e);
            }
        }

        let duration = inner
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        inner.state = EngineState::Idle;

        let session = match inner.session.take() {
            Some(shared) => match Arc::try_unwrap(shared) {
                Ok(mutex) => mutex.into_inner(),
                Err(shared) => shared.lock().await.clone(),
            },
            None => return Ok(None),
        };

        self.save(inner, PendingSave { session, duration }).map(Some)
    }

    /// Write every session that failed to save, oldest first. Stops at the
    /// first failure; that session and the ones after it stay queued.
    pub async fn retry_save(&self) -> Result<Vec<PathBuf>, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.pending.is_empty() {
            return Err(SessionError::NothingToSave);
        }

        let mut queued = std::mem::take(&mut inner.pending).into_iter();
        let mut saved = Vec::new();
        while let Some(pending) = queued.next() {
            match self.save(&mut inner, pending) {
                Ok(path) => saved.push(path),
                Err(e) => {
                    inner.pending.extend(queued);
                    return Err(e);
                }
            }
        }
        Ok(saved)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.state.is_running()
    }

    pub async fn has_unsaved(&self) -> bool {
        !self.inner.lock().await.pending.is_empty()
    }

    pub async fn status(&self) -> RecordingStatus {
        let inner = self.inner.lock().await;
        let elapsed = match (inner.state, inner.started_at) {
            (EngineState::Running, Some(t)) => t.elapsed(),
            _ => inner
                .pending
                .last()
                .map(|p| p.duration)
                .unwrap_or_default(),
        };
        RecordingStatus {
            state: inner.state,
            name: inner.name.clone(),
            listen: inner.listen,
            events_recorded: inner.recorded.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
            last_saved: inner.last_saved.clone(),
            unsaved: inner.pending.len(),
        }
    }

    fn save(
        &self,
        inner: &mut RecorderInner,
        pending: PendingSave,
    ) -> Result<PathBuf, SessionError> {
        let manager = RecordingManager::with_base_dir(pending.session.output_dir().to_path_buf());
        let path = manager.path_for(&pending.session);

        let written = manager
            .ensure_dir()
            .and_then(|()| pending.session.save(&path, pending.duration));

        match written {
            Ok(()) => {
                let events = pending.session.len();
                info!(
                    "Saved {} events ({:.1}s) to {}",
                    events,
                    pending.duration.as_secs_f64(),
                    path.display()
                );
                inner.last_saved = Some(path.clone());
                let _ = self.status_tx.send(StatusEvent::RecordingSaved {
                    path: path.clone(),
                    events,
                });
                Ok(path)
            }
            Err(source) => {
                error!("Failed to save recording to {}: {}", path.display(), source);
                let _ = self.status_tx.send(StatusEvent::Error {
                    message: format!("Failed to save recording to {}: {}", path.display(), source),
                });
                inner.pending.push(pending);
                if inner.pending.len() > 1 {
                    warn!("{} recordings are waiting to be saved", inner.pending.len());
                }
                Err(SessionError::Save { path, source })
            }
        }
    }
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordingEngine {{ }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osctape_core::file_format::{self, LoadOptions};
    use osctape_core::protocol::WireArg;
    use tempfile::TempDir;
    use tokio::net::UdpSocket;

    fn engine() -> (RecordingEngine, broadcast::Receiver<StatusEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (RecordingEngine::new(tx), rx)
    }

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn send(socket: &UdpSocket, to: SocketAddr, address: &str, args: Vec<WireArg>) {
        let bytes = OscMessage::new(address, args).encode().unwrap();
        socket.send_to(&bytes, to).await.unwrap();
    }

    async fn wait_recorded(rx: &mut broadcast::Receiver<StatusEvent>, count: usize) {
        let mut seen = 0;
        while seen < count {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for recorded messages")
                .unwrap();
            if matches!(event, StatusEvent::MessageRecorded { .. }) {
                seen += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_record_and_save() {
        let dir = TempDir::new().unwrap();
        let (engine, mut rx) = engine();
        let addr = engine
            .start("Test Run!", any_port(), dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(engine.is_running().await);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&socket, addr, "/synth/freq", vec![WireArg::Int(42)]).await;
        send(&socket, addr, "/label", vec![WireArg::String("hi, there".into())]).await;
        send(&socket, addr, "/playbackcsv", vec![WireArg::Int(1)]).await;
        send(&socket, addr, "/blob", vec![WireArg::Blob(vec![1, 2, 3])]).await;
        send(&socket, addr, "/gate", vec![WireArg::Bool(true)]).await;
        send(&socket, addr, "/bang", vec![]).await;
        wait_recorded(&mut rx, 4).await;

        let path = engine.stop().await.unwrap().unwrap();
        assert!(!engine.is_running().await);
        let filename = path.file_name().unwrap().to_str().unwrap();
        assert!(filename.starts_with("TestRun_"), "{}", filename);
        assert!(filename.ends_with(".csv"));

        let report = file_format::load(&path, LoadOptions::default()).unwrap();
        assert!(report.skipped.is_empty());
        let events = report.sequence.events();
        let addresses: Vec<&str> = events.iter().map(|e| e.address.as_str()).collect();
        assert_eq!(addresses, vec!["/synth/freq", "/label", "/gate", "/bang"]);
        assert_eq!(events[0].value, TypedValue::Integer(42));
        assert_eq!(events[1].value, TypedValue::Text("hi, there".into()));
        assert_eq!(events[2].value, TypedValue::Boolean(true));
        assert_eq!(events[3].value, TypedValue::Empty);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let status = engine.status().await;
        assert_eq!(status.state, EngineState::Idle);
        assert_eq!(status.events_recorded, 4);
        assert_eq!(status.last_saved, Some(path));
        assert_eq!(status.unsaved, 0);
    }

    #[tokio::test]
    async fn test_empty_recording_is_saved() {
        let dir = TempDir::new().unwrap();
        let (engine, _rx) = engine();
        engine
            .start("agat", any_port(), dir.path().to_path_buf())
            .await
            .unwrap();

        let path = engine.stop().await.unwrap().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# AGAT OSC Recording\n"));
        assert!(text.contains("\n# Duration: "));
        let report = file_format::load(&path, LoadOptions::default()).unwrap();
        assert!(report.sequence.is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let (engine, _rx) = engine();
        assert!(engine.stop().await.unwrap().is_none());
        assert!(engine.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, _rx) = engine();
        engine
            .start("a", any_port(), dir.path().to_path_buf())
            .await
            .unwrap();

        let err = engine
            .start("b", any_port(), dir.path().to_path_buf())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::State(StateError::RecordingRunning)
        ));
        assert_eq!(engine.status().await.name.as_deref(), Some("a"));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_surfaces() {
        let dir = TempDir::new().unwrap();
        let (first, _rx1) = engine();
        let (second, _rx2) = engine();
        let addr = first
            .start("a", any_port(), dir.path().to_path_buf())
            .await
            .unwrap();

        let err = second
            .start("b", addr, dir.path().to_path_buf())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!second.is_running().await);
        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_failure_keeps_session() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "a file where a directory should be").unwrap();

        let (engine, mut rx) = engine();
        let addr = engine
            .start("agat", any_port(), blocker.join("out"))
            .await
            .unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&socket, addr, "/x", vec![WireArg::Float(0.5)]).await;
        wait_recorded(&mut rx, 1).await;

        let err = engine.stop().await.unwrap_err();
        assert!(matches!(err, SessionError::Save { .. }));
        assert!(!engine.is_running().await);
        assert!(engine.has_unsaved().await);
        assert_eq!(engine.status().await.unsaved, 1);

        std::fs::remove_file(&blocker).unwrap();
        let saved = engine.retry_save().await.unwrap();
        assert_eq!(saved.len(), 1);
        let path = &saved[0];
        assert!(path.starts_with(blocker.join("out")));
        assert!(!engine.has_unsaved().await);

        let report = file_format::load(path, LoadOptions::default()).unwrap();
        assert_eq!(report.sequence.len(), 1);
        assert_eq!(report.sequence.events()[0].value, TypedValue::Float(0.5));

        assert!(matches!(
            engine.retry_save().await,
            Err(SessionError::NothingToSave)
        ));
    }

    #[tokio::test]
    async fn test_every_failed_save_is_kept() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let output = blocker.join("out");

        let (engine, _rx) = engine();
        for name in ["first", "second"] {
            engine
                .start(name, any_port(), output.clone())
                .await
                .unwrap();
            assert!(engine.stop().await.is_err());
        }
        assert_eq!(engine.status().await.unsaved, 2);

        std::fs::remove_file(&blocker).unwrap();
        let saved = engine.retry_save().await.unwrap();
        let names: Vec<String> = saved
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("first_"), "{:?}", names);
        assert!(names[1].starts_with("second_"), "{:?}", names);
        assert!(!engine.has_unsaved().await);
    }

    #[tokio::test]
    async fn test_stop_from_recording_port() {
        let dir = TempDir::new().unwrap();
        let (engine, mut rx) = engine();
        let addr = engine
            .start("agat", any_port(), dir.path().to_path_buf())
            .await
            .unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&socket, addr, "/x", vec![WireArg::Int(1)]).await;
        wait_recorded(&mut rx, 1).await;
        send(&socket, addr, RECORD_ADDRESS, vec![WireArg::Int(1)]).await;
        send(&socket, addr, RECORD_ADDRESS, vec![WireArg::Int(0)]).await;

        let path = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(StatusEvent::RecordingSaved { path, .. }) = rx.recv().await {
                    return path;
                }
            }
        })
        .await
        .expect("recording was not saved");

        assert!(!engine.is_running().await);
        let report = file_format::load(&path, LoadOptions::default()).unwrap();
        let addresses: Vec<&str> = report
            .sequence
            .events()
            .iter()
            .map(|e| e.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["/x"]);
    }
}
