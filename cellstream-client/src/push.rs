//! Delivery of pushed values to application code.

use cellstream_core::key::SystemProperty;
use cellstream_core::protocol::Callback;
use cellstream_core::types::{CellValue, ServiceStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event raised to application code.
///
/// Each pushed callback is raised as exactly one event of its category.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A position cell changed.
    PositionValue {
        /// Position id
        id: i32,
        /// Column name
        column: String,
        /// New value
        value: CellValue,
    },
    /// A portfolio cell changed.
    PortfolioValue {
        /// Portfolio id
        id: i32,
        /// Column name
        column: String,
        /// New value
        value: CellValue,
    },
    /// A system property changed.
    SystemValue {
        /// The property
        property: SystemProperty,
        /// New value
        value: CellValue,
    },
    /// The server's service status changed.
    ServiceStatus(ServiceStatus),
    /// The client opened or closed a connection. Read the client's state for
    /// details.
    ConnectionStatusChanged,
}

impl From<Callback> for ClientEvent {
    fn from(callback: Callback) -> Self {
        match callback {
            Callback::PositionValue { id, column, value } => Self::PositionValue { id, column, value },
            Callback::PortfolioValue { id, column, value } => {
                Self::PortfolioValue { id, column, value }
            }
            Callback::SystemValue { property, value } => Self::SystemValue { property, value },
            Callback::ServiceStatus { status } => Self::ServiceStatus(status),
        }
    }
}

#[derive(Debug, Default)]
struct Binding {
    generation: u64,
    pump: Option<JoinHandle<()>>,
}

/// Forwards callbacks from the current session to application subscribers.
///
/// Only one session is bound at a time. Once [`unbind`](Self::unbind) (or a
/// new [`bind`](Self::bind)) returns, no callback from the previous session
/// is raised.
#[derive(Debug)]
pub struct PushChannel {
    events: broadcast::Sender<ClientEvent>,
    binding: Arc<Mutex<Binding>>,
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl PushChannel {
    /// Creates an unbound channel buffering up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            binding: Arc::new(Mutex::new(Binding::default())),
        }
    }

    /// Returns a receiver of application events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Starts raising callbacks from `callbacks`, replacing any previous
    /// binding. Must be called within a tokio runtime.
    pub fn bind(&self, mut callbacks: mpsc::Receiver<Callback>) {
        let mut binding = self.binding.lock();
        if let Some(pump) = binding.pump.take() {
            pump.abort();
        }
        binding.generation += 1;
        let generation = binding.generation;

        let shared = Arc::clone(&self.binding);
        let events = self.events.clone();
        binding.pump = Some(tokio::spawn(async move {
            while let Some(callback) = callbacks.recv().await {
                // Checked under the binding lock so unbind cannot race a raise.
                let current = shared.lock();
                if current.generation != generation {
                    break;
                }
                trace!(?callback, "Raising callback");
                let _ = events.send(ClientEvent::from(callback));
            }
            debug!(generation, "Callback pump finished");
        }));
    }

    /// Stops raising callbacks from the bound session.
    pub fn unbind(&self) {
        let mut binding = self.binding.lock();
        binding.generation += 1;
        if let Some(pump) = binding.pump.take() {
            pump.abort();
        }
    }

    /// Returns true if a session is bound and its callback stream is open.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding
            .lock()
            .pump
            .as_ref()
            .is_some_and(|pump| !pump.is_finished())
    }

    pub(crate) fn raise(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn price(value: f64) -> Callback {
        Callback::PositionValue {
            id: 5,
            column: "Price".to_string(),
            value: CellValue::Number(value),
        }
    }

    async fn next(rx: &mut broadcast::Receiver<ClientEvent>) -> Option<ClientEvent> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .and_then(Result::ok)
    }

    #[tokio::test]
    async fn test_callbacks_raised_in_order() {
        let push = PushChannel::default();
        let mut events = push.subscribe();
        let (tx, rx) = mpsc::channel(8);
        push.bind(rx);

        for v in [1.0, 2.0, 3.0] {
            tx.send(price(v)).await.unwrap();
        }
        tx.send(Callback::ServiceStatus {
            status: ServiceStatus::Degraded,
        })
        .await
        .unwrap();

        for v in [1.0, 2.0, 3.0] {
            assert_eq!(
                next(&mut events).await,
                Some(ClientEvent::PositionValue {
                    id: 5,
                    column: "Price".to_string(),
                    value: CellValue::Number(v),
                })
            );
        }
        assert_eq!(
            next(&mut events).await,
            Some(ClientEvent::ServiceStatus(ServiceStatus::Degraded))
        );
    }

    #[tokio::test]
    async fn test_unbind_silences_old_session() {
        let push = PushChannel::default();
        let mut events = push.subscribe();
        let (tx, rx) = mpsc::channel(8);
        push.bind(rx);
        push.unbind();
        assert!(!push.is_bound());

        let _ = tx.send(price(1.0)).await;
        assert_eq!(next(&mut events).await, None);
    }

    #[tokio::test]
    async fn test_rebind_replaces_previous() {
        let push = PushChannel::default();
        let mut events = push.subscribe();
        let (old_tx, old_rx) = mpsc::channel(8);
        let (new_tx, new_rx) = mpsc::channel(8);
        push.bind(old_rx);
        push.bind(new_rx);

        let _ = old_tx.send(price(1.0)).await;
        new_tx.send(price(2.0)).await.unwrap();

        assert_eq!(
            next(&mut events).await,
            Some(ClientEvent::PositionValue {
                id: 5,
                column: "Price".to_string(),
                value: CellValue::Number(2.0),
            })
        );
        assert_eq!(next(&mut events).await, None);
    }
}
