//! Control channel: start and stop the engines with `/playbackcsv` and
//! `/recordcsv` messages.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use osctape_core::control::{PLAYBACK_ADDRESS, RECORD_ADDRESS};
use osctape_core::protocol::OscMessage;
use osctape_core::{ControlAction, ControlCommand, ControlTarget};

use crate::transport::{Dispatcher, MessageHandler, OscListener, TransportError};
use crate::Session;

struct ControlHandler {
    session: Session,
}

impl ControlHandler {
    async fn execute(&self, command: ControlCommand) {
        match (command.target, command.action) {
            (ControlTarget::Playback, ControlAction::Start) => {
                if let Err(e) = self.session.start_playback().await {
                    warn!("Cannot start playback: {}", e);
                }
            }
            (ControlTarget::Playback, ControlAction::Stop) => {
                self.session.stop_playback().await;
            }
            (ControlTarget::Recording, ControlAction::Start) => {
                if let Err(e) = self.session.start_recording().await {
                    warn!("Cannot start recording: {}", e);
                }
            }
            (ControlTarget::Recording, ControlAction::Stop) => {
                if let Err(e) = self.session.stop_recording().await {
                    error!("{}", e);
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ControlHandler {
    async fn handle(&self, msg: OscMessage, from: SocketAddr) {
        match ControlCommand::parse(&msg) {
            Ok(command) => {
                debug!("Control {:?} {:?} from {}", command.target, command.action, from);
                self.execute(command).await;
            }
            Err(rejection) => warn!("Ignoring {} from {}: {}", msg.address, from, rejection),
        }
    }
}

/// Listener for control commands, bound until stopped or until the
/// session shuts down
pub struct ControlChannel {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ControlChannel {
    pub fn start(session: Session, bind: SocketAddr) -> Result<Self, TransportError> {
        let listener = OscListener::bind(bind)?;
        let local_addr = listener.local_addr();
        let cancel = session.shutdown_token().child_token();

        let handler: Arc<dyn MessageHandler> = Arc::new(ControlHandler { session });
        let dispatcher = Dispatcher::new()
            .map(PLAYBACK_ADDRESS, handler.clone())
            .map(RECORD_ADDRESS, handler);

        let task = tokio::spawn(listener.run(dispatcher, cancel.clone()));
        info!(
            "Control channel on {} ({} and {}, 1 = start, 0 = stop)",
            local_addr, PLAYBACK_ADDRESS, RECORD_ADDRESS
        );

        Ok(Self {
            local_addr,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Control channel ended abnormally: {}", e);
        }
    }

    /// Run as a subsystem until shutdown is requested
    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), TransportError> {
        subsys.on_shutdown_requested().await;
        info!("Control channel shutdown requested");
        self.stop().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PlayerContext, RecorderContext, StatusEvent};
    use osctape_core::protocol::WireArg;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::UdpSocket;

    const CSV: &str = "# T OSC Recording\n# Started: x\n# Format: x\ntime,address,value\n\
                       10.0,/a,1\n10.3,/b,2\n";

    struct Fixture {
        _dir: TempDir,
        session: Session,
        control: ControlChannel,
        out: UdpSocket,
        remote: UdpSocket,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("in.csv");
        std::fs::write(&file, CSV).unwrap();

        let out = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session = Session::new(
            PlayerContext {
                file: Some(file),
                destination: out.local_addr().unwrap(),
            },
            RecorderContext {
                name: "ctl".to_string(),
                listen: "127.0.0.1:0".parse().unwrap(),
                output_dir: dir.path().join("rec"),
            },
        );
        let control = ControlChannel::start(session.clone(), "127.0.0.1:0".parse().unwrap())
            .unwrap();
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        Fixture {
            _dir: dir,
            session,
            control,
            out,
            remote,
        }
    }

    impl Fixture {
        async fn command(&self, address: &str, arg: WireArg) {
            let bytes = OscMessage::new(address, vec![arg]).encode().unwrap();
            self.remote
                .send_to(&bytes, self.control.local_addr())
                .await
                .unwrap();
        }

        async fn received(&self, wait: Duration) -> usize {
            let mut buf = [0u8; 512];
            let mut count = 0;
            while let Ok(Ok(_)) = tokio::time::timeout(wait, self.out.recv(&mut buf)).await {
                count += 1;
            }
            count
        }
    }

    async fn next_matching<F>(rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>, f: F)
    where
        F: Fn(&StatusEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(event) = rx.recv().await {
                    if f(&event) {
                        return;
                    }
                }
            }
        })
        .await
        .expect("status event not seen");
    }

    #[tokio::test]
    async fn test_playback_started_once() {
        let fx = fixture().await;
        let mut rx = fx.session.subscribe();

        fx.command(PLAYBACK_ADDRESS, WireArg::Int(1)).await;
        fx.command(PLAYBACK_ADDRESS, WireArg::Int(1)).await;
        next_matching(&mut rx, |e| matches!(e, StatusEvent::PlaybackFinished { .. })).await;

        // a second loop would have doubled the count
        assert_eq!(fx.received(Duration::from_millis(300)).await, 2);
        fx.control.stop().await;
    }

    #[tokio::test]
    async fn test_playback_stop_command() {
        let fx = fixture().await;
        let mut rx = fx.session.subscribe();

        fx.command(PLAYBACK_ADDRESS, WireArg::Float(1.0)).await;
        next_matching(&mut rx, |e| matches!(e, StatusEvent::MessageSent { .. })).await;
        fx.command(PLAYBACK_ADDRESS, WireArg::Int(0)).await;
        next_matching(&mut rx, |e| matches!(e, StatusEvent::PlaybackStopped { sent: 1 })).await;

        assert!(!fx.session.player().is_running().await);
        fx.control.stop().await;
    }

    #[tokio::test]
    async fn test_record_commands() {
        let fx = fixture().await;
        let mut rx = fx.session.subscribe();

        fx.command(RECORD_ADDRESS, WireArg::Bool(true)).await;
        next_matching(&mut rx, |e| matches!(e, StatusEvent::RecordingStarted { .. })).await;
        fx.command(RECORD_ADDRESS, WireArg::Int(0)).await;
        next_matching(&mut rx, |e| matches!(e, StatusEvent::RecordingSaved { .. })).await;

        assert!(!fx.session.recorder().is_running().await);
        fx.control.stop().await;
    }

    #[tokio::test]
    async fn test_session_shutdown_closes_channel() {
        let fx = fixture().await;
        fx.session.shutdown().await;

        fx.command(PLAYBACK_ADDRESS, WireArg::Int(1)).await;
        assert_eq!(fx.received(Duration::from_millis(300)).await, 0);
        assert!(!fx.session.player().is_running().await);

        // the port is free again once the listener is gone
        let addr = fx.control.local_addr();
        tokio::time::timeout(Duration::from_secs(1), fx.control.stop())
            .await
            .expect("control channel did not stop");
        UdpSocket::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_values_ignored() {
        let fx = fixture().await;

        fx.command(PLAYBACK_ADDRESS, WireArg::Int(7)).await;
        fx.command(PLAYBACK_ADDRESS, WireArg::String("go".into())).await;
        fx.command("/elsewhere", WireArg::Int(1)).await;

        assert_eq!(fx.received(Duration::from_millis(200)).await, 0);
        assert!(!fx.session.player().is_running().await);
        fx.control.stop().await;
    }
}
