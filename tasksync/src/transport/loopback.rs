//! Loopback connector for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a network
//! connection. The test side holds a clone of the [`LoopbackConnector`] and
//! pushes frames into, or closes, every connection the manager has opened.
//! It can also refuse new connections to simulate an unreachable endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionError, Connector, FrameStream};

/// In-process [`Connector`] whose connections are driven by the caller.
///
/// Clones share state: frames sent through any clone reach every
/// connection opened through any clone.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    /// Senders for the currently open connections.
    live: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    /// When set, every connect attempt fails immediately.
    refusing: AtomicBool,
    /// Number of connect attempts seen, successful or not.
    attempts: AtomicUsize,
}

impl LoopbackConnector {
    /// Creates a connector that accepts connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector that refuses every connection.
    #[must_use]
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.set_refusing(true);
        connector
    }

    /// Start or stop refusing new connections. Open ones are unaffected.
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Number of connections that are still open on the reading side.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        let mut live = self.inner.live.lock();
        live.retain(|tx| !tx.is_closed());
        live.len()
    }

    /// Deliver a frame to every open connection.
    ///
    /// Returns how many connections received it.
    pub fn send(&self, frame: impl Into<String>) -> usize {
        let frame = frame.into();
        let mut live = self.inner.live.lock();
        live.retain(|tx| tx.send(frame.clone()).is_ok());
        live.len()
    }

    /// Close every open connection, as if the server went away.
    pub fn close_all(&self) {
        self.inner.live.lock().clear();
    }
}

impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, ConnectionError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refusing.load(Ordering::SeqCst) {
            tracing::debug!(url, "loopback refusing connection");
            return Err(ConnectionError::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.live.lock().push(tx);

        let frames = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(frames.boxed())
    }
}
