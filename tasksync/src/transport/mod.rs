//! Streaming transport abstraction for push events.
//!
//! Defines the [`Connector`] trait the connection manager uses to open its
//! one persistent connection. Concrete implementations:
//! - [`websocket::WebSocketConnector`]: WebSocket client (tokio-tungstenite)
//! - [`loopback::LoopbackConnector`]: in-process scripted connections for
//!   tests and offline use

pub mod loopback;
pub mod websocket;

use futures_util::stream::BoxStream;

/// Stream of inbound text frames from one open connection.
///
/// The stream ending (or yielding an error) means the connection closed.
pub type FrameStream = BoxStream<'static, Result<String, ConnectionError>>;

/// Errors raised while opening or reading a streaming connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection closed, or was refused before it opened.
    #[error("connection closed")]
    Closed,

    /// Opening the connection did not finish in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// The server answered the upgrade with something other than 101.
    #[error("handshake rejected with HTTP status {0}")]
    Handshake(u16),

    /// An underlying I/O or protocol error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens persistent connections that deliver text frames.
///
/// Implementations only move frames; decoding and dispatch happen in the
/// connection manager.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection to `url`.
    ///
    /// Resolves once the connection is open. The returned stream yields
    /// every inbound text frame in receipt order and ends when the
    /// connection closes.
    fn connect(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<FrameStream, ConnectionError>> + Send;
}
