//! OSC over UDP: sending, receiving and dispatching by address.
//!
//! ```text
//!   datagram ──► OscPacket::decode ──► messages ──► Dispatcher
//!                                                   ├── "/exact/address" ► handler
//!                                                   └── wildcard         ► handler
//! ```

use async_trait::async_trait;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use osctape_core::protocol::{OscMessage, OscPacket};
use osctape_core::{TypedValue, WireError};

use crate::network;

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 65536;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Cannot bind UDP socket {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Cannot send to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Cannot encode message: {0}")]
    Encode(#[from] WireError),
}

/// Receives decoded messages from an [`OscListener`]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: OscMessage, from: SocketAddr);
}

/// Routes messages to handlers by exact address, falling back to a wildcard
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    wildcard: Option<Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, address: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(address.to_string(), handler);
        self
    }

    /// Handler for every address without its own entry
    pub fn wildcard(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.wildcard = Some(handler);
        self
    }

    /// Returns false when no handler took the message
    pub async fn dispatch(&self, msg: OscMessage, from: SocketAddr) -> bool {
        let handler = self
            .handlers
            .get(&msg.address)
            .or(self.wildcard.as_ref())
            .cloned();
        match handler {
            Some(handler) => {
                handler.handle(msg, from).await;
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("addresses", &self.handlers.keys().collect::<Vec<_>>())
            .field("wildcard", &self.wildcard.is_some())
            .finish()
    }
}

/// Fire-and-forget sender bound to one destination
#[derive(Debug)]
pub struct OscSender {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl OscSender {
    pub fn bind(destination: SocketAddr) -> Result<Self, TransportError> {
        let socket =
            network::create_udp_send(&destination).map_err(|source| TransportError::Bind {
                addr: destination,
                source,
            })?;
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub async fn send_message(&self, msg: &OscMessage) -> Result<(), TransportError> {
        let datagram = msg.encode()?;
        self.socket
            .send_to(&datagram, self.destination)
            .await
            .map_err(|source| TransportError::Send {
                addr: self.destination,
                source,
            })?;
        trace!("Sent {} bytes for {} to {}", datagram.len(), msg.address, self.destination);
        Ok(())
    }

    pub async fn send(&self, address: &str, value: &TypedValue) -> Result<(), TransportError> {
        self.send_message(&OscMessage::new(address, value.to_wire_args()))
            .await
    }
}

/// A bound UDP socket that feeds a [`Dispatcher`]
#[derive(Debug)]
pub struct OscListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl OscListener {
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = network::create_udp_listen(&addr)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self { socket, local_addr })
    }

    /// Address actually bound, differs from the requested one for port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive and dispatch until `cancel` fires. Messages are handled one
    /// at a time, in arrival order.
    pub async fn run(self, dispatcher: Dispatcher, cancel: CancellationToken) {
        debug!("Listening on {} ({:?})", self.local_addr, dispatcher);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, from) = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Listener on {} cancelled", self.local_addr);
                    break;
                }
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok(r) => r,
                    Err(e) => {
                        // ICMP port unreachable from earlier sends shows up here on some platforms
                        warn!("Receive error on {}: {}", self.local_addr, e);
                        continue;
                    }
                }
            };

            let packet = match OscPacket::decode(&buf[..len]) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Dropping malformed datagram from {}: {}", from, e);
                    continue;
                }
            };

            for msg in packet.into_messages() {
                if cancel.is_cancelled() {
                    break;
                }
                let address = msg.address.clone();
                if !dispatcher.dispatch(msg, from).await {
                    trace!("No handler for {} from {}", address, from);
                }
            }
        }
    }
}
