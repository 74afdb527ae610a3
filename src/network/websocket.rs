//! WebSocket transport
//!
//! Audio packets ride binary frames, control messages ride text frames.
//! The same adapters wrap the client side (`tokio-tungstenite`) and sockets
//! accepted by the axum server.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::marker::PhantomData;
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage};

use super::transport::{Connector, FrameSink, FrameStream, Transport, WireMessage};
use crate::error::NetworkError;

/// What an incoming WebSocket frame means to a session
pub enum Inbound {
    Data(WireMessage),
    Close,
    /// Ping, pong and other housekeeping
    Skip,
}

/// Conversion between a WebSocket library's message type and [`WireMessage`]
pub trait WsFrame: Send + Sized + 'static {
    fn from_wire(msg: WireMessage) -> Self;
    fn into_inbound(self) -> Inbound;
}

impl WsFrame for TungsteniteMessage {
    fn from_wire(msg: WireMessage) -> Self {
        match msg {
            WireMessage::Binary(data) => Self::Binary(data.to_vec().into()),
            WireMessage::Text(text) => Self::Text(text.into()),
        }
    }

    fn into_inbound(self) -> Inbound {
        match self {
            Self::Binary(data) => Inbound::Data(WireMessage::Binary(Bytes::from(data))),
            Self::Text(text) => Inbound::Data(WireMessage::Text(text.to_string())),
            Self::Close(_) => Inbound::Close,
            _ => Inbound::Skip,
        }
    }
}

impl WsFrame for axum::extract::ws::Message {
    fn from_wire(msg: WireMessage) -> Self {
        match msg {
            WireMessage::Binary(data) => Self::Binary(data.to_vec().into()),
            WireMessage::Text(text) => Self::Text(text.into()),
        }
    }

    fn into_inbound(self) -> Inbound {
        match self {
            Self::Binary(data) => Inbound::Data(WireMessage::Binary(Bytes::from(data))),
            Self::Text(text) => Inbound::Data(WireMessage::Text(text.to_string())),
            Self::Close(_) => Inbound::Close,
            _ => Inbound::Skip,
        }
    }
}

pub struct WsSink<S, M> {
    inner: S,
    _frame: PhantomData<fn(M)>,
}

#[async_trait]
impl<S, M> FrameSink for WsSink<S, M>
where
    S: Sink<M> + Unpin + Send,
    S::Error: Display,
    M: WsFrame,
{
    async fn send(&mut self, msg: WireMessage) -> Result<(), NetworkError> {
        self.inner
            .send(M::from_wire(msg))
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        self.inner
            .close()
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }
}

pub struct WsStream<S> {
    inner: S,
}

#[async_trait]
impl<S, M, E> FrameStream for WsStream<S>
where
    S: Stream<Item = Result<M, E>> + Unpin + Send,
    M: WsFrame,
    E: Display + Send,
{
    async fn recv(&mut self) -> Result<Option<WireMessage>, NetworkError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(NetworkError::ReceiveFailed(e.to_string())),
                Some(Ok(frame)) => match frame.into_inbound() {
                    Inbound::Data(msg) => return Ok(Some(msg)),
                    Inbound::Close => return Ok(None),
                    Inbound::Skip => continue,
                },
            }
        }
    }
}

/// Split a duplex WebSocket into session transport halves
pub fn split_socket<W, M, E>(socket: W) -> Transport
where
    W: Sink<M> + Stream<Item = Result<M, E>> + Unpin + Send + 'static,
    <W as Sink<M>>::Error: Display,
    M: WsFrame + Unpin,
    E: Display + Send + 'static,
{
    let (sink, stream) = socket.split::<M>();
    (
        Box::new(WsSink {
            inner: sink,
            _frame: PhantomData,
        }),
        Box::new(WsStream { inner: stream }),
    )
}

/// Dials a WebSocket server
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, NetworkError> {
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", self.url, e)))?;
        tracing::info!("Connected to {}", self.url);
        Ok(split_socket(socket))
    }
}
