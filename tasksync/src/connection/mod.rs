//! Shared push-event connection with automatic reconnection.
//!
//! [`ConnectionManager`] owns the single streaming connection every
//! consumer of push events shares. Consumers register handlers with
//! [`ConnectionManager::on_message`] and release them through the returned
//! [`Subscription`]; the connection itself lives until
//! [`ConnectionManager::disconnect`] is called, independent of any one
//! consumer.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Connected
//!      ▲                          │                    │
//!      └──── close / failure ◄────┴────────────────────┘
//!                 │
//!                 └─► reconnect after policy delay, until the budget is spent
//! ```
//!
//! Every open or close is tagged with a generation number. `disconnect()`
//! and each new `connect()` bump the generation, so a late completion from
//! an abandoned attempt never changes the state.

pub mod policy;

pub use policy::ReconnectPolicy;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use tasksync_proto::event::{self, DecodeError, PushEvent};

use crate::transport::{Connector, FrameStream};

/// Capacity of the lifecycle event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A registered push-event handler.
pub type MessageHandler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Where the shared connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no open in progress.
    Disconnected,
    /// An open is in progress.
    Connecting,
    /// The connection is open and delivering events.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Snapshot of the connection, suitable for a status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Reconnects made since the last successful open.
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    /// Whether events are currently being delivered.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
        }
    }
}

/// Lifecycle notifications, mostly useful for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An open was started; `attempt` is the reconnect count (0 for a
    /// first or manual connect).
    Connecting {
        /// Reconnect count at the time of the open.
        attempt: u32,
    },
    /// The connection opened.
    Connected,
    /// The connection closed or an open failed.
    Closed,
    /// A reconnect was scheduled.
    ReconnectScheduled {
        /// 1-based number of this reconnect.
        attempt: u32,
        /// How long until it fires.
        delay: Duration,
    },
}

/// Handle to the shared push-event connection.
///
/// Cloning is cheap; all clones drive the same connection and the same
/// handler list. Dropping handles does not close the connection; call
/// [`disconnect`](Self::disconnect).
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    connector: C,
    url: String,
    policy: ReconnectPolicy,
    lifecycle: Mutex<Lifecycle>,
    handlers: Arc<HandlerRegistry>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    generation: u64,
    /// Task running the open and the read loop.
    connection: Option<JoinHandle<()>>,
    /// Pending reconnect timer.
    reconnect: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, MessageHandler)>>,
}

impl HandlerRegistry {
    fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager for `url`. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(connector: C, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                url: url.into(),
                policy,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    generation: 0,
                    connection: None,
                    reconnect: None,
                }),
                handlers: Arc::new(HandlerRegistry::default()),
                status_tx,
                events_tx,
            }),
        }
    }

    /// Open the connection unless it is already open or opening.
    ///
    /// Calling this while connected or connecting is a no-op. A pending
    /// reconnect timer is cancelled and replaced by an immediate open.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(&self) {
        let mut life = self.inner.lifecycle.lock();
        Inner::start_locked(&self.inner, &mut life);
    }

    /// Close the connection if present, cancel any scheduled reconnect and
    /// reset the reconnect counter.
    pub fn disconnect(&self) {
        let mut life = self.inner.lifecycle.lock();
        life.generation += 1;
        if let Some(timer) = life.reconnect.take() {
            timer.abort();
        }
        if let Some(connection) = life.connection.take() {
            connection.abort();
        }
        let previous = life.state;
        life.state = ConnectionState::Disconnected;
        life.attempts = 0;
        self.inner.publish(&life);
        if previous != ConnectionState::Disconnected {
            tracing::info!(url = %self.inner.url, "push connection closed by client");
            self.inner.emit(ConnectionEvent::Closed);
        }
    }

    /// Register a handler for every decoded push event, in receipt order.
    ///
    /// The handler runs on the connection's reader task and should return
    /// quickly. A panicking handler is logged and does not affect delivery
    /// to other handlers.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let registry = &self.inner.handlers;
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        registry.handlers.lock().push((id, Arc::new(handler)));
        tracing::debug!(handler = id, "push handler registered");
        Subscription {
            id,
            registry: Some(Arc::downgrade(registry)),
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.handlers.lock().len()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Receiver for lifecycle events emitted from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

}

impl<C: Connector> Inner<C> {
    fn start_locked(this: &Arc<Self>, life: &mut Lifecycle) {
        if matches!(
            life.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::debug!(state = %life.state, "connect ignored");
            return;
        }
        if let Some(timer) = life.reconnect.take() {
            timer.abort();
        }

        life.generation += 1;
        life.state = ConnectionState::Connecting;
        let generation = life.generation;
        this.publish(life);
        this.emit(ConnectionEvent::Connecting {
            attempt: life.attempts,
        });
        tracing::debug!(url = %this.url, attempt = life.attempts, "opening push connection");

        let task = Arc::clone(this);
        life.connection = Some(tokio::spawn(async move {
            task.run(generation).await;
        }));
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let frames = match self.connector.connect(&self.url).await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(url = %self.url, err = %e, "push connection attempt failed");
                self.handle_close(generation);
                return;
            }
        };

        {
            let mut life = self.lifecycle.lock();
            if life.generation != generation {
                tracing::debug!("discarding push connection opened after disconnect");
                return;
            }
            life.state = ConnectionState::Connected;
            life.attempts = 0;
            self.publish(&life);
            self.emit(ConnectionEvent::Connected);
        }
        tracing::info!(url = %self.url, "push connection open");

        self.read_loop(frames).await;
        tracing::info!(url = %self.url, "push connection closed");
        self.handle_close(generation);
    }

    async fn read_loop(&self, mut frames: FrameStream) {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => self.dispatch_frame(&text),
                Err(e) => {
                    tracing::warn!(err = %e, "push connection read failed");
                    break;
                }
            }
        }
    }

    fn dispatch_frame(&self, text: &str) {
        match event::decode(text.as_bytes()) {
            Ok(event) => self.dispatch(&event),
            Err(DecodeError::UnknownType(kind)) => {
                tracing::warn!(kind = %kind, "ignoring push event of unknown type");
            }
            Err(e @ DecodeError::Malformed(_)) => {
                tracing::warn!(err = %e, "dropping malformed push event");
            }
        }
    }

    fn dispatch(&self, event: &PushEvent) {
        // Snapshot so handlers can (un)register from inside a callback.
        let handlers = self.handlers.handlers.lock().clone();
        tracing::debug!(
            kind = event.kind(),
            task_id = %event.task_id(),
            handlers = handlers.len(),
            "dispatching push event"
        );
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(handler = id, kind = event.kind(), "push event handler panicked");
            }
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        let mut life = self.lifecycle.lock();
        if life.generation != generation {
            return;
        }
        life.state = ConnectionState::Disconnected;
        life.connection = None;
        self.emit(ConnectionEvent::Closed);

        match self.policy.delay_for(life.attempts) {
            Some(delay) => {
                let attempt = life.attempts + 1;
                tracing::info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling push reconnect"
                );
                self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });
                let task = Arc::clone(self);
                life.reconnect = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    task.fire_reconnect(generation);
                }));
            }
            None => {
                tracing::info!(
                    attempts = life.attempts,
                    "push reconnect budget spent; staying disconnected"
                );
            }
        }
        self.publish(&life);
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut life = self.lifecycle.lock();
        if life.generation != generation || life.state != ConnectionState::Disconnected {
            return;
        }
        // Detach our own handle so start_locked does not abort this task.
        drop(life.reconnect.take());
        life.attempts += 1;
        Self::start_locked(self, &mut life);
    }

    fn publish(&self, life: &Lifecycle) {
        self.status_tx.send_replace(ConnectionStatus {
            state: life.state,
            reconnect_attempts: life.attempts,
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }
}

/// Registration of one push-event handler.
///
/// Call [`unsubscribe`](Self::unsubscribe) or drop the value to stop
/// delivery. The shared connection is not affected.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: u64,
    registry: Option<Weak<HandlerRegistry>>,
}

impl Subscription {
    /// Stop delivering events to this handler.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade())
            && registry.remove(self.id)
        {
            tracing::debug!(handler = self.id, "push handler unregistered");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.registry.is_some())
            .finish()
    }
}
