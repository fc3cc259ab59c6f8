//! Client connection lifecycle.
//!
//! [`DataServiceClient`] drives one connection at a time through
//! `Closed -> Opening -> Opened -> Closing -> Closed`. Opening registers with
//! the server and replays the [`SubscriptionRegistry`]; closing tears the
//! session down best-effort and never fails.
//!
//! The client does not reconnect by itself. Call [`open`](DataServiceClient::open)
//! again, or run a [`ConnectionMonitor`](crate::monitor::ConnectionMonitor).

use cellstream_core::key::SubscriptionKey;
use cellstream_core::protocol::{Call, Reply};
use cellstream_core::types::{
    CurvePoint, InstrumentRef, PositionFilter, PricePoint, ServiceStatus,
};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::push::{ClientEvent, PushChannel};
use crate::registry::{SubscriptionRegistry, Teardown};
use crate::session::{Connector, Endpoint, Established, ServerSession};
use crate::state::ConnectionState;
use crate::ws::WsConnector;

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    session: Option<Arc<dyn ServerSession>>,
    endpoint: Option<Endpoint>,
}

/// Client of a cellstream distribution server.
///
/// Subscriptions are desired state: they can be added while closed and are
/// sent to the server on the next successful [`open`](Self::open).
///
/// ```rust,ignore
/// let client = DataServiceClient::websocket(ClientConfig::default());
/// client.subscribe(SubscriptionKey::position(5, "Price")).await;
/// client.open(Endpoint::parse("ws://127.0.0.1:8765/cellstream")?).await?;
///
/// let mut events = client.events();
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
pub struct DataServiceClient {
    connector: Arc<dyn Connector>,
    registry: SubscriptionRegistry,
    push: PushChannel,
    inner: Mutex<Inner>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for DataServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServiceClient")
            .field("state", &self.state())
            .field("connection", &self.connection())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DataServiceClient {
    /// Creates a closed client opening sessions through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_push_channel(connector, PushChannel::default())
    }

    /// Creates a closed client buffering up to `capacity` events per
    /// event subscriber.
    #[must_use]
    pub fn with_event_capacity(connector: Arc<dyn Connector>, capacity: usize) -> Self {
        Self::with_push_channel(connector, PushChannel::new(capacity))
    }

    /// Creates a closed client connecting over WebSocket with `config`.
    #[must_use]
    pub fn websocket(config: ClientConfig) -> Self {
        let capacity = config.queue_capacity;
        Self::with_event_capacity(Arc::new(WsConnector::new(config)), capacity)
    }

    fn with_push_channel(connector: Arc<dyn Connector>, push: PushChannel) -> Self {
        Self {
            connector,
            registry: SubscriptionRegistry::new(),
            push,
            inner: Mutex::new(Inner::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the connection state.
    ///
    /// An open connection whose transport broke reports
    /// [`ConnectionState::Faulted`].
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        let inner = self.inner.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Opened, Some(session)) if !session.state().is_opened() => {
                ConnectionState::Faulted
            }
            (state, _) => *state,
        }
    }

    /// Returns the endpoint of the open connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<Endpoint> {
        self.inner.lock().endpoint.clone()
    }

    /// Returns the `host:port` label of the open connection, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .lock()
            .endpoint
            .as_ref()
            .map(Endpoint::connection_id)
    }

    /// Returns a receiver of pushed values and connection status changes.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.push.subscribe()
    }

    /// Returns the subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Opens a session to `endpoint`, closing any current one first.
    ///
    /// On success the session is registered, every desired subscription has
    /// been replayed and one [`ClientEvent::ConnectionStatusChanged`] is
    /// raised. On failure the client is left closed.
    pub async fn open(&self, endpoint: Endpoint) -> Result<(), ClientError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_session().await;

        self.inner.lock().state = ConnectionState::Opening;
        info!(%endpoint, "Opening connection");

        let Established { session, callbacks } = match self.connector.connect(&endpoint).await {
            Ok(established) => established,
            Err(e) => {
                self.inner.lock().state = ConnectionState::Closed;
                warn!(%endpoint, error = %e, "Connection failed");
                return Err(e.into());
            }
        };

        self.push.bind(callbacks);
        if let Err(e) = session.call(Call::Register).await {
            self.push.unbind();
            session.abort();
            self.inner.lock().state = ConnectionState::Closed;
            warn!(%endpoint, error = %e, "Register failed");
            return Err(e);
        }

        let replay = self.registry.on_connect(Arc::clone(&session)).await;

        {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Opened;
            inner.session = Some(session);
            inner.endpoint = Some(endpoint.clone());
        }
        info!(
            %endpoint,
            replayed = replay.subscribed,
            replay_failures = replay.failed,
            "Connection opened"
        );
        self.push.raise(ClientEvent::ConnectionStatusChanged);
        Ok(())
    }

    /// Closes the current session. Desired subscriptions are kept.
    ///
    /// Never fails. Does nothing if no session is open; otherwise raises one
    /// [`ClientEvent::ConnectionStatusChanged`].
    pub async fn close(&self) -> Teardown {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_session().await
    }

    /// Unsubscribes everything, clears the desired set and closes.
    pub async fn release(&self) -> Teardown {
        let _lifecycle = self.lifecycle.lock().await;
        let mut teardown = self.registry.release().await;
        teardown.merge(self.close_session().await);
        teardown
    }

    async fn close_session(&self) -> Teardown {
        let (session, was_opened) = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.session.take() else {
                inner.state = ConnectionState::Closed;
                inner.endpoint = None;
                return Teardown::default();
            };
            let was_opened = inner.state == ConnectionState::Opened;
            inner.state = ConnectionState::Closing;
            (session, was_opened)
        };

        self.push.unbind();
        self.registry.on_disconnect();

        let mut teardown = Teardown::default();
        let transport = session.state();
        if was_opened && transport.is_opened() {
            teardown = self.registry.unsubscribe_remote(session.as_ref()).await;
            let unregistered = session.call(Call::Unregister).await;
            if let Err(e) = &unregistered {
                debug!(error = %e, "Unregister failed, ignored");
            }
            teardown.record(unregistered.is_ok());
        }

        if transport == ConnectionState::Faulted {
            session.abort();
        } else if let Err(e) = session.close().await {
            warn!(error = %e, "Graceful close failed, aborting");
            session.abort();
        }

        let endpoint = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Closed;
            inner.endpoint.take()
        };
        info!(
            endpoint = ?endpoint.map(|e| e.to_string()),
            teardown_failures = teardown.failed,
            "Connection closed"
        );
        self.push.raise(ClientEvent::ConnectionStatusChanged);
        teardown
    }

    /// Adds a desired subscription. Returns false if it was already desired.
    pub async fn subscribe(&self, key: SubscriptionKey) -> bool {
        self.registry.subscribe(key).await
    }

    /// Removes a desired subscription. Returns false if it was not desired.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        self.registry.unsubscribe(key).await
    }

    /// Returns the desired subscriptions, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.registry.keys()
    }

    /// Returns the server's service status, or
    /// [`ServiceStatus::NotConnected`] without a call when no session is
    /// open.
    pub async fn service_status(&self) -> Result<ServiceStatus, ClientError> {
        match self.call(Call::GetServiceStatus).await {
            Ok(Reply::Status(status)) => Ok(status),
            Ok(other) => Err(unexpected("get_service_status", &other)),
            Err(ClientError::NotConnected) => Ok(ServiceStatus::NotConnected),
            Err(e) => Err(e),
        }
    }

    /// Asks the server to load positions.
    pub async fn load_positions(&self) -> Result<(), ClientError> {
        self.call_unit(Call::LoadPositions).await
    }

    /// Asks the server to recompute values.
    pub async fn request_calculate(&self) -> Result<(), ClientError> {
        self.call_unit(Call::RequestCalculate).await
    }

    /// Lists the positions of a portfolio.
    ///
    /// Fails with [`QueryError::PortfolioNotFound`] or
    /// [`QueryError::PortfolioNotLoaded`].
    ///
    /// [`QueryError::PortfolioNotFound`]: cellstream_core::error::QueryError::PortfolioNotFound
    /// [`QueryError::PortfolioNotLoaded`]: cellstream_core::error::QueryError::PortfolioNotLoaded
    pub async fn get_positions(
        &self,
        portfolio_id: i32,
        filter: PositionFilter,
    ) -> Result<Vec<i32>, ClientError> {
        match self
            .call(Call::GetPositions {
                portfolio_id,
                filter,
            })
            .await?
        {
            Reply::Positions(ids) => Ok(ids),
            other => Err(unexpected("get_positions", &other)),
        }
    }

    /// Returns the price history of an instrument, by code or reference.
    pub async fn get_price_history(
        &self,
        instrument: impl Into<InstrumentRef>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, ClientError> {
        let call = Call::GetPriceHistory {
            instrument: instrument.into(),
            start,
            end,
        };
        match self.call(call).await? {
            Reply::PriceHistory(points) => Ok(points),
            other => Err(unexpected("get_price_history", &other)),
        }
    }

    /// Returns the points of an interest rate curve.
    pub async fn get_curve_points(
        &self,
        currency: &str,
        family: &str,
        reference: &str,
    ) -> Result<Vec<CurvePoint>, ClientError> {
        let call = Call::GetCurvePoints {
            currency: currency.to_string(),
            family: family.to_string(),
            reference: reference.to_string(),
        };
        match self.call(call).await? {
            Reply::CurvePoints(points) => Ok(points),
            other => Err(unexpected("get_curve_points", &other)),
        }
    }

    async fn call_unit(&self, call: Call) -> Result<(), ClientError> {
        let name = call.name();
        match self.call(call).await? {
            Reply::Unit => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    async fn call(&self, call: Call) -> Result<Reply, ClientError> {
        let session = self
            .inner
            .lock()
            .session
            .clone()
            .ok_or(ClientError::NotConnected)?;
        session.call(call).await
    }
}

impl Drop for DataServiceClient {
    fn drop(&mut self) {
        self.push.unbind();
        if let Some(session) = self.inner.get_mut().session.take() {
            session.abort();
        }
    }
}

fn unexpected(operation: &str, reply: &Reply) -> ClientError {
    ClientError::Remote(format!(
        "unexpected '{}' reply to {operation}",
        reply.kind()
    ))
}
