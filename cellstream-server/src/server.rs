//! Distribution server.
//!
//! [`DataServer`] owns every registered session and the subscription index.
//! Sessions, index and the hooks into the value provider all change under
//! one coarse lock. Fan-out copies the subscriber list under the lock and
//! pushes after releasing it; pushes never block, and a session whose push
//! fails is dropped without affecting delivery to the others.

use cellstream_core::key::{KeyCategory, SubscriptionKey};
use cellstream_core::protocol::{Call, Callback, RemoteFault, Reply};
use cellstream_core::types::{CellValue, ServiceStatus, ValueUpdate};
use cellstream_telemetry::metrics::DistributionMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::DistributionConfig;
use crate::index::{Membership, SubscriptionIndex};
use crate::provider::ValueProvider;
use crate::session::{CallbackSink, PushError, Session, SessionId};

const EVENT_CAPACITY: usize = 256;

/// Why a session left the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client called Unregister.
    Unregistered,
    /// The client's transport closed.
    TransportClosed,
    /// A push to the session's channel failed.
    PushFailed(PushError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::PushFailed(e) => write!(f, "push failed: {e}"),
        }
    }
}

/// Notification about server state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A session registered.
    ClientConnected {
        /// The new session
        session: SessionId,
    },
    /// A session was removed.
    ClientDisconnected {
        /// The removed session
        session: SessionId,
        /// Why it was removed
        reason: DisconnectReason,
    },
    /// The subscriber count of a key changed.
    SubscriptionChanged {
        /// The key
        key: SubscriptionKey,
        /// Subscribers after the change
        subscribers: usize,
    },
    /// A key gained its first subscriber.
    KeyLive {
        /// The key
        key: SubscriptionKey,
    },
    /// A key lost its last subscriber.
    KeyIdle {
        /// The key
        key: SubscriptionKey,
    },
}

/// Snapshot of server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Registered sessions
    pub sessions: usize,
    /// Position keys with at least one subscriber
    pub position_keys: usize,
    /// Portfolio keys with at least one subscriber
    pub portfolio_keys: usize,
    /// System keys with at least one subscriber
    pub system_keys: usize,
}

/// Errors from session-scoped server operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionError {
    /// The session is not registered (never was, or was removed).
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),
}

impl From<DistributionError> for RemoteFault {
    fn from(_: DistributionError) -> Self {
        Self::NotRegistered
    }
}

#[derive(Default)]
struct ServerState {
    sessions: HashMap<SessionId, Session>,
    index: SubscriptionIndex,
}

/// The distribution server.
///
/// Construct one per process and share it behind an [`Arc`]. A new server
/// is stopped: it tracks sessions and subscriptions but drops published
/// updates until [`start`](Self::start) is called.
pub struct DataServer {
    state: Mutex<ServerState>,
    provider: Arc<dyn ValueProvider>,
    config: DistributionConfig,
    running: AtomicBool,
    events: broadcast::Sender<ServerEvent>,
}

impl fmt::Debug for DataServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataServer")
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DataServer {
    /// Creates a stopped server backed by `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn ValueProvider>, config: DistributionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(ServerState::default()),
            provider,
            config,
            running: AtomicBool::new(false),
            events,
        }
    }

    /// Starts distributing values and tells every session the new status.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Distribution started");
            self.broadcast_status(self.service_status());
        }
    }

    /// Stops distributing values and tells every session the new status.
    ///
    /// Sessions and subscriptions are kept.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Distribution stopped");
            self.broadcast_status(ServiceStatus::NotReady);
        }
    }

    /// Returns whether published updates are distributed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns a receiver of server events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Returns whether the source can serve data.
    #[must_use]
    pub fn service_status(&self) -> ServiceStatus {
        if self.is_running() {
            self.provider.service_status()
        } else {
            ServiceStatus::NotReady
        }
    }

    /// Registers a new session pushing to `sink`.
    pub fn register(&self, sink: Arc<dyn CallbackSink>) -> SessionId {
        let session = Session::new(sink);
        let id = session.id();

        let count = {
            let mut state = self.state.lock();
            state.sessions.insert(id, session);
            self.emit(ServerEvent::ClientConnected { session: id });
            state.sessions.len()
        };

        DistributionMetrics::sessions(count);
        info!(session = %id, sessions = count, "Client registered");

        if self.config.auto_start {
            self.start();
        }
        id
    }

    /// Removes a session at the client's request.
    ///
    /// Returns false if the session was not registered.
    pub fn unregister(&self, session: SessionId) -> bool {
        self.remove_session(session, DisconnectReason::Unregistered)
    }

    /// Removes a session whose transport closed.
    pub fn disconnect(&self, session: SessionId) -> bool {
        self.remove_session(session, DisconnectReason::TransportClosed)
    }

    /// Adds `key` to the session's subscriptions.
    ///
    /// Returns `Ok(false)` if the session already held the key. If the
    /// placeholder cannot be pushed, the session is removed and the call
    /// fails with [`DistributionError::UnknownSession`].
    pub fn subscribe(
        &self,
        session: SessionId,
        key: &SubscriptionKey,
    ) -> Result<bool, DistributionError> {
        let mut state = self.state.lock();
        let sink = state
            .sessions
            .get(&session)
            .map(|s| Arc::clone(s.sink()))
            .ok_or(DistributionError::UnknownSession(session))?;

        let membership = state.index.subscribe(session, key);
        if !membership.changed {
            return Ok(false);
        }
        self.on_membership_changed(&state.index, key, membership);

        // Pushed under the lock so it cannot overtake a real value.
        if let Some(text) = &self.config.placeholder {
            let placeholder = Callback::from_update(ValueUpdate::new(
                key.clone(),
                CellValue::Text(text.clone()),
            ));
            if let Err(e) = sink.try_push(placeholder) {
                warn!(%session, %key, error = %e, "Placeholder push failed");
                self.drop_session_locked(&mut state, session, DisconnectReason::PushFailed(e));
                return Err(DistributionError::UnknownSession(session));
            }
        }
        Ok(true)
    }

    /// Removes `key` from the session's subscriptions.
    ///
    /// Returns `Ok(false)` if the session did not hold the key.
    pub fn unsubscribe(
        &self,
        session: SessionId,
        key: &SubscriptionKey,
    ) -> Result<bool, DistributionError> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&session) {
            return Err(DistributionError::UnknownSession(session));
        }

        let membership = state.index.unsubscribe(session, key);
        if membership.changed {
            self.on_membership_changed(&state.index, key, membership);
        }
        Ok(membership.changed)
    }

    /// Pushes `update` to every session subscribed to its key.
    ///
    /// Returns the number of sessions the update was queued to. Sessions
    /// whose push fails are removed. Nothing is delivered while stopped.
    #[instrument(level = "trace", skip(self, update), fields(key = %update.key))]
    pub fn publish_update(&self, update: ValueUpdate) -> usize {
        if !self.is_running() {
            trace!("Server stopped, update dropped");
            return 0;
        }

        let category = update.key.category().as_str();
        let targets: Vec<(SessionId, Arc<dyn CallbackSink>)> = {
            let state = self.state.lock();
            state
                .index
                .subscribers(&update.key)
                .filter_map(|id| state.sessions.get(&id).map(|s| (id, Arc::clone(s.sink()))))
                .collect()
        };

        DistributionMetrics::update_published(category);
        if targets.is_empty() {
            return 0;
        }

        let delivered = self.push_all(&targets, &Callback::from_update(update));
        DistributionMetrics::callbacks_pushed(category, delivered);
        delivered
    }

    /// Pushes a service status callback to every session.
    ///
    /// Returns the number of sessions it was queued to.
    pub fn broadcast_status(&self, status: ServiceStatus) -> usize {
        let targets: Vec<(SessionId, Arc<dyn CallbackSink>)> = {
            let state = self.state.lock();
            state
                .sessions
                .values()
                .map(|s| (s.id(), Arc::clone(s.sink())))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }
        debug!(%status, sessions = targets.len(), "Broadcasting service status");
        self.push_all(&targets, &Callback::ServiceStatus { status })
    }

    /// Serves a call from a registered session.
    ///
    /// Register and Unregister are connection-level and handled by
    /// [`ServerConnection`](crate::connection::ServerConnection); here they
    /// are accepted as no-ops and an unregister respectively.
    pub async fn handle_call(&self, session: SessionId, call: Call) -> Result<Reply, RemoteFault> {
        let name = call.name();
        let result = self.dispatch(session, call).await;
        DistributionMetrics::call_handled(name, result.is_ok());
        if let Err(fault) = &result {
            debug!(%session, call = name, %fault, "Call failed");
        }
        result
    }

    async fn dispatch(&self, session: SessionId, call: Call) -> Result<Reply, RemoteFault> {
        if let Some((key, add)) = call.subscription() {
            if add {
                self.subscribe(session, &key)?;
            } else {
                self.unsubscribe(session, &key)?;
            }
            return Ok(Reply::Unit);
        }

        if !self.has_session(session) {
            return Err(RemoteFault::NotRegistered);
        }

        let provider = &self.provider;
        match call {
            Call::Register => Ok(Reply::Unit),
            Call::Unregister => {
                self.unregister(session);
                Ok(Reply::Unit)
            }
            Call::LoadPositions => {
                provider.load_positions().await;
                Ok(Reply::Unit)
            }
            Call::RequestCalculate => {
                provider.request_calculate().await;
                Ok(Reply::Unit)
            }
            Call::GetServiceStatus => Ok(Reply::Status(self.service_status())),
            Call::GetPositions {
                portfolio_id,
                filter,
            } => provider
                .get_positions(portfolio_id, filter)
                .await
                .map(Reply::Positions)
                .map_err(RemoteFault::Query),
            Call::GetPriceHistory {
                instrument,
                start,
                end,
            } => provider
                .get_price_history(&instrument, start, end)
                .await
                .map(Reply::PriceHistory)
                .map_err(RemoteFault::Query),
            Call::GetCurvePoints {
                currency,
                family,
                reference,
            } => provider
                .get_curve_points(&currency, &family, &reference)
                .await
                .map(Reply::CurvePoints)
                .map_err(RemoteFault::Query),
            Call::SubscribeToPosition { .. }
            | Call::UnsubscribeToPosition { .. }
            | Call::SubscribeToPortfolio { .. }
            | Call::UnsubscribeToPortfolio { .. }
            | Call::SubscribeToSystemValue { .. }
            | Call::UnsubscribeToSystemValue { .. } => Ok(Reply::Unit),
        }
    }

    /// Returns true if `session` is registered.
    #[must_use]
    pub fn has_session(&self, session: SessionId) -> bool {
        self.state.lock().sessions.contains_key(&session)
    }

    /// Returns the number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Returns the sessions subscribed to `key`.
    #[must_use]
    pub fn subscribers(&self, key: &SubscriptionKey) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.state.lock().index.subscribers(key).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the keys held by `session`, or `None` if it is not registered.
    #[must_use]
    pub fn session_subscriptions(&self, session: SessionId) -> Option<Vec<SubscriptionKey>> {
        let state = self.state.lock();
        if !state.sessions.contains_key(&session) {
            return None;
        }
        let mut keys: Vec<_> = state.index.keys_of(session).cloned().collect();
        keys.sort();
        Some(keys)
    }

    /// Returns session and subscription counts.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let state = self.state.lock();
        let counts = state.index.counts();
        ServerStats {
            sessions: state.sessions.len(),
            position_keys: counts.position,
            portfolio_keys: counts.portfolio,
            system_keys: counts.system,
        }
    }

    fn push_all(&self, targets: &[(SessionId, Arc<dyn CallbackSink>)], callback: &Callback) -> usize {
        let mut failed = Vec::new();
        for (id, sink) in targets {
            if let Err(e) = sink.try_push(callback.clone()) {
                warn!(session = %id, error = %e, "Push failed, dropping session");
                failed.push((*id, e));
            }
        }

        if !failed.is_empty() {
            let mut state = self.state.lock();
            for (id, e) in &failed {
                self.drop_session_locked(&mut state, *id, DisconnectReason::PushFailed(*e));
            }
        }

        targets.len() - failed.len()
    }

    fn remove_session(&self, session: SessionId, reason: DisconnectReason) -> bool {
        let mut state = self.state.lock();
        self.drop_session_locked(&mut state, session, reason)
    }

    fn drop_session_locked(
        &self,
        state: &mut ServerState,
        session: SessionId,
        reason: DisconnectReason,
    ) -> bool {
        let Some(removed) = state.sessions.remove(&session) else {
            return false;
        };

        for (key, subscribers) in state.index.remove_session(session) {
            let membership = Membership {
                changed: true,
                added: false,
                subscribers,
            };
            self.on_membership_changed(&state.index, &key, membership);
        }

        if let DisconnectReason::PushFailed(e) = reason {
            removed.sink().revoke();
            DistributionMetrics::push_failed(e.as_str());
        }

        self.emit(ServerEvent::ClientDisconnected { session, reason });
        DistributionMetrics::sessions(state.sessions.len());
        info!(%session, %reason, sessions = state.sessions.len(), "Client removed");
        true
    }

    fn on_membership_changed(
        &self,
        index: &SubscriptionIndex,
        key: &SubscriptionKey,
        membership: Membership,
    ) {
        if membership.became_live() {
            self.provider.on_key_live(key);
            self.emit(ServerEvent::KeyLive { key: key.clone() });
            record_key_count(index, key.category());
        } else if membership.became_idle() {
            self.provider.on_key_idle(key);
            self.emit(ServerEvent::KeyIdle { key: key.clone() });
            record_key_count(index, key.category());
        }
        self.emit(ServerEvent::SubscriptionChanged {
            key: key.clone(),
            subscribers: membership.subscribers,
        });
    }

    fn emit(&self, event: ServerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

fn record_key_count(index: &SubscriptionIndex, category: KeyCategory) {
    let counts = index.counts();
    let count = match category {
        KeyCategory::Position => counts.position,
        KeyCategory::Portfolio => counts.portfolio,
        KeyCategory::System => counts.system,
    };
    DistributionMetrics::subscribed_keys(category.as_str(), count);
}
