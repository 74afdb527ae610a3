//! Message-oriented transport seam
//!
//! Sessions speak to the network only through these traits, so the same
//! session runs over a WebSocket client, an accepted server socket or the
//! in-memory loopback used by tests.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::NetworkError;
use crate::protocol::ControlMessage;

/// One transport message
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Encoded audio packet
    Binary(Bytes),
    /// JSON control message
    Text(String),
}

impl WireMessage {
    pub fn control(msg: &ControlMessage) -> Result<Self, NetworkError> {
        Ok(Self::Text(msg.to_json()?))
    }
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, msg: WireMessage) -> Result<(), NetworkError>;

    async fn close(&mut self) -> Result<(), NetworkError>;
}

#[async_trait]
pub trait FrameStream: Send {
    /// Next message, `Ok(None)` once the peer closed cleanly
    async fn recv(&mut self) -> Result<Option<WireMessage>, NetworkError>;
}

/// Both halves of an established connection
pub type Transport = (Box<dyn FrameSink>, Box<dyn FrameStream>);

/// Dials new connections for an outbound session
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, NetworkError>;
}

pub struct MemorySink {
    tx: Option<mpsc::Sender<WireMessage>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, msg: WireMessage) -> Result<(), NetworkError> {
        let tx = self.tx.as_ref().ok_or(NetworkError::Closed)?;
        tx.send(msg).await.map_err(|_| NetworkError::Closed)
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        self.tx = None;
        Ok(())
    }
}

pub struct MemoryStream {
    rx: mpsc::Receiver<WireMessage>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<WireMessage>, NetworkError> {
        Ok(self.rx.recv().await)
    }
}

/// Two connected in-memory endpoints
pub fn memory_pair(capacity: usize) -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));

    let a: Transport = (
        Box::new(MemorySink { tx: Some(a_tx) }),
        Box::new(MemoryStream { rx: b_rx }),
    );
    let b: Transport = (
        Box::new(MemorySink { tx: Some(b_tx) }),
        Box::new(MemoryStream { rx: a_rx }),
    );
    (a, b)
}

/// Connector whose connections land on a paired [`MemoryListener`]
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Transport>,
    capacity: usize,
}

pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<Transport>,
}

impl MemoryListener {
    /// Server half of the next connection, `None` once every connector is gone
    pub async fn accept(&mut self) -> Option<Transport> {
        self.accept_rx.recv().await
    }
}

pub fn memory_listener(capacity: usize) -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { accept_tx, capacity },
        MemoryListener { accept_rx },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Transport, NetworkError> {
        let (client, server) = memory_pair(self.capacity);
        self.accept_tx
            .send(server)
            .map_err(|_| NetworkError::ConnectionFailed("listener dropped".into()))?;
        Ok(client)
    }
}
