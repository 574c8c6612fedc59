//! WebSocket connector for the push-event endpoint.
//!
//! Opens a client WebSocket with tokio-tungstenite and exposes the inbound
//! side as a [`FrameStream`]. Text frames are passed through; binary frames
//! are accepted when they hold valid UTF-8, so a server that sends JSON in
//! binary frames still works, and are dropped otherwise. Ping/pong is
//! handled by tungstenite. A close frame, a read error or the end of the
//! TCP stream ends the frame stream.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::ready;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{ConnectionError, Connector, FrameStream};

/// Default timeout for opening the WebSocket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Connector`] backed by a real WebSocket client.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketConnector {
    /// Creates a connector that gives up opening after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// The configured open timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Connector for WebSocketConnector {
    /// Open a WebSocket to `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Timeout`] if the handshake does not finish in time.
    /// - [`ConnectionError::Unreachable`] if nothing is listening.
    /// - [`ConnectionError::Handshake`] if the server refuses the upgrade.
    /// - [`ConnectionError::Io`] for everything else.
    async fn connect(&self, url: &str) -> Result<FrameStream, ConnectionError> {
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "WebSocket connect timed out");
                ConnectionError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "WebSocket connect failed");
                map_ws_connect_error(url, e)
            })?;

        tracing::debug!(url, "WebSocket open");

        let frames = ws_stream
            .take_while(|msg| ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => Some(Ok(text)),
                        Err(e) => {
                            tracing::warn!(err = %e, len = data.len(), "dropping non-UTF-8 binary frame");
                            None
                        }
                    },
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => {
                        None
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "WebSocket read error");
                        Some(Err(ConnectionError::Io(std::io::Error::other(e))))
                    }
                })
            });

        Ok(frames.boxed())
    }
}

/// Map a `tokio_tungstenite` connection error to a [`ConnectionError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> ConnectionError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                ConnectionError::Unreachable(url.to_string())
            } else {
                ConnectionError::Io(io_err)
            }
        }
        WsError::Http(response) => ConnectionError::Handshake(response.status().as_u16()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionError::Closed,
        other => ConnectionError::Io(std::io::Error::other(format!(
            "WebSocket connection error: {other}"
        ))),
    }
}
