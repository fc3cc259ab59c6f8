//! Sessions and their push channels.

use cellstream_core::protocol::Callback;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque identity of a registered client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Generates a new process-unique session id.
    #[must_use]
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Why a push to a session failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The session's outbound queue is full.
    #[error("push queue full")]
    Full,
    /// The receiving side of the channel is gone.
    #[error("push channel closed")]
    Closed,
}

impl PushError {
    /// Short label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// Server-to-client push channel of one session.
///
/// Implementations must never block: a push either succeeds immediately or
/// fails, and a failure is treated as a broken channel.
pub trait CallbackSink: Send + Sync {
    /// Queues `callback` for delivery.
    fn try_push(&self, callback: Callback) -> Result<(), PushError>;

    /// Called when the server drops the session after a failed push, so the
    /// transport can be torn down. Later pushes fail with [`PushError::Closed`].
    fn revoke(&self) {}
}

/// [`CallbackSink`] backed by a bounded tokio channel.
///
/// Clones share the same sender; [`CallbackSink::revoke`] drops it, so the
/// receiver yields `None` once drained.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Arc<Mutex<Option<mpsc::Sender<Callback>>>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver draining it.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Callback>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }
}

impl CallbackSink for ChannelSink {
    fn try_push(&self, callback: Callback) -> Result<(), PushError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(PushError::Closed)?;
        tx.try_send(callback).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    fn revoke(&self) {
        self.tx.lock().take();
    }
}

/// Server-side record of one registered client.
///
/// The session's subscription set is held by the server's subscription index
/// so both directions of the mapping change under the same lock.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    sink: Arc<dyn CallbackSink>,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session with a fresh id.
    #[must_use]
    pub fn new(sink: Arc<dyn CallbackSink>) -> Self {
        Self {
            id: SessionId::generate(),
            sink,
            connected_at: Utc::now(),
        }
    }

    /// Returns the session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the push channel.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn CallbackSink> {
        &self.sink
    }

    /// Returns when the session registered.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
