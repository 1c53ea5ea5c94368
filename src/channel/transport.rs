//! Socket transport seam and its WebSocket implementation.

use async_trait::async_trait;
use derive_more::{Display, Error};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, instrument};
use url::Url;

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame.
    Text(String),
    /// The peer closed the socket.
    Closed {
        /// Whether the close was a normal closure.
        clean: bool,
    },
}

/// Opens connections to live-game endpoints.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection type produced by this transport.
    type Connection: Connection;

    /// Opens a socket to `url`, completing the handshake.
    async fn connect(&self, url: &Url) -> Result<Self::Connection, TransportError>;
}

/// An open socket.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Sends a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next frame. `None` means the stream ended without a
    /// close frame.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    /// Starts a normal closure.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connection produced by [`TungsteniteTransport`].
pub struct TungsteniteConnection {
    stream: WsStream,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    type Connection = TungsteniteConnection;

    #[instrument(skip(self, url), fields(url = %url))]
    async fn connect(&self, url: &Url) -> Result<Self::Connection, TransportError> {
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(TungsteniteConnection { stream })
    }
}

#[async_trait]
impl Connection for TungsteniteConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            match message {
                Message::Text(text) => return Some(Ok(InboundFrame::Text(text.to_string()))),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(InboundFrame::Text(text))),
                    Err(e) => return Some(Err(TransportError::new(e.to_string()))),
                },
                Message::Close(frame) => {
                    let clean = frame.is_some_and(|frame| frame.code == CloseCode::Normal);
                    debug!(clean, "Close frame received");
                    return Some(Ok(InboundFrame::Closed { clean }));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Socket failure.
#[derive(Debug, Clone, Display, Error)]
#[display("Transport error: {} at {}:{}", message, file, line)]
pub struct TransportError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl TransportError {
    /// Creates a new error with caller location tracking.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    #[track_caller]
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::new(err.to_string())
    }
}
