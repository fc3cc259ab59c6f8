//! WebSocket connector and session.

use async_trait::async_trait;
use cellstream_core::error::NetworkError;
use cellstream_core::protocol::{Call, Callback, ClientFrame, RemoteFault, Reply, ServerFrame};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::session::{Connector, Endpoint, Established, ServerSession};
use crate::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type Pending = DashMap<u64, oneshot::Sender<Result<Reply, RemoteFault>>>;

/// Opens [`WsSession`]s.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: ClientConfig,
}

impl WsConnector {
    /// Creates a connector with the given timeouts and queue sizes.
    #[must_use]
    pub const fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Established, NetworkError> {
        let (ws_stream, _) = timeout(
            self.config.connect_timeout(),
            connect_async(endpoint.url().as_str()),
        )
        .await
        .map_err(|_| NetworkError::Timeout {
            timeout_ms: self.config.connect_timeout_ms,
        })?
        .map_err(|e| NetworkError::ConnectionFailed {
            reason: e.to_string(),
        })?;

        let (sink, source) = ws_stream.split();
        let capacity = self.config.queue_capacity.max(1);
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (callbacks_tx, callbacks) = mpsc::channel(capacity);

        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Opened),
            pending: DashMap::new(),
            closing: AtomicBool::new(false),
        });
        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(source, Arc::clone(&shared), callbacks_tx));

        info!(connection = %endpoint.connection_id(), "WebSocket connected");

        let session = WsSession {
            shared,
            outbound,
            next_id: AtomicU64::new(1),
            call_timeout: self.config.call_timeout(),
            close_timeout: self.config.connect_timeout(),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        };
        Ok(Established {
            session: Arc::new(session),
            callbacks,
        })
    }
}

struct Shared {
    state: RwLock<ConnectionState>,
    pending: Pending,
    closing: AtomicBool,
}

impl Shared {
    fn finish(&self, state: ConnectionState) {
        *self.state.write() = state;
        // Dropping the senders fails every waiting call.
        self.pending.clear();
    }
}

/// One WebSocket connection to a distribution server.
pub struct WsSession {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    next_id: AtomicU64,
    call_timeout: Duration,
    close_timeout: Duration,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("state", &*self.shared.state.read())
            .field("pending", &self.shared.pending.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServerSession for WsSession {
    async fn call(&self, call: Call) -> Result<Reply, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let operation = call.name();
        let text = serde_json::to_string(&ClientFrame::Request { id, call })
            .map_err(|e| NetworkError::protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);
        // Checked after inserting so a concurrent finish() either sees the
        // entry or is seen here.
        if !self.state().is_opened() {
            self.shared.pending.remove(&id);
            return Err(NetworkError::closed("session is not open").into());
        }

        trace!(id, operation, "Sending request");
        if self.outbound.send(Message::Text(text)).await.is_err() {
            self.shared.pending.remove(&id);
            return Err(NetworkError::closed("writer stopped").into());
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(ClientError::from),
            Ok(Err(_)) => Err(NetworkError::closed("connection lost before reply").into()),
            Err(_) => {
                self.shared.pending.remove(&id);
                warn!(id, operation, "Call timed out");
                Err(NetworkError::Timeout {
                    timeout_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    async fn close(&self) -> Result<(), NetworkError> {
        self.shared.closing.store(true, Ordering::SeqCst);
        *self.shared.state.write() = ConnectionState::Closing;

        self.outbound
            .send(Message::Close(None))
            .await
            .map_err(|_| NetworkError::closed("writer stopped"))?;

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if timeout(self.close_timeout, reader).await.is_err() {
                return Err(NetworkError::Timeout {
                    timeout_ms: u64::try_from(self.close_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
        }
        self.shared.finish(ConnectionState::Closed);
        debug!("WebSocket closed");
        Ok(())
    }

    fn abort(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        for task in [&self.writer, &self.reader] {
            if let Some(handle) = task.lock().take() {
                handle.abort();
            }
        }
        self.shared.finish(ConnectionState::Closed);
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn write_loop(mut sink: WsSink, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "Failed to send frame");
            break;
        }
        if closing {
            break;
        }
    }
    trace!("Writer finished");
}

async fn read_loop(mut source: WsSource, shared: Arc<Shared>, callbacks: mpsc::Sender<Callback>) {
    let mut reason = None;
    while let Some(result) = source.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                Ok(ServerFrame::Response { id, outcome }) => {
                    match shared.pending.remove(&id) {
                        Some((_, tx)) => {
                            let _ = tx.send(outcome);
                        }
                        None => debug!(id, "Response to unknown request"),
                    }
                }
                Ok(ServerFrame::Callback { callback }) => {
                    if callbacks.send(callback).await.is_err() {
                        trace!("Callback receiver gone");
                    }
                }
                Err(e) => warn!(error = %e, "Undecodable frame ignored"),
            },
            Ok(Message::Close(frame)) => {
                reason = frame.map(|f| f.reason.to_string());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                reason = Some(e.to_string());
                break;
            }
        }
    }

    if shared.closing.load(Ordering::SeqCst) {
        shared.finish(ConnectionState::Closed);
    } else {
        warn!(reason = ?reason, "WebSocket connection lost");
        shared.finish(ConnectionState::Faulted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstream_core::types::{CellValue, ServiceStatus};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn fast_config() -> ClientConfig {
        ClientConfig {
            connect_timeout_ms: 1000,
            call_timeout_ms: 200,
            ..ClientConfig::default()
        }
    }

    /// Serves one connection, answering each request with `answer`.
    /// `None` drops the connection instead.
    async fn serve_one<F>(answer: F) -> Endpoint
    where
        F: Fn(u64, Call) -> Option<Vec<ServerFrame>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let ClientFrame::Request { id, call } = serde_json::from_str(&text).unwrap();
                let Some(frames) = answer(id, call) else {
                    return;
                };
                for frame in frames {
                    let text = serde_json::to_string(&frame).unwrap();
                    if ws.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
            }
        });
        Endpoint::parse(&format!("ws://{address}/cellstream")).unwrap()
    }

    fn unit(id: u64) -> ServerFrame {
        ServerFrame::Response {
            id,
            outcome: Ok(Reply::Unit),
        }
    }

    #[tokio::test]
    async fn test_call_and_callback() {
        let endpoint = serve_one(|id, call| match call {
            Call::GetServiceStatus => Some(vec![ServerFrame::Response {
                id,
                outcome: Ok(Reply::Status(ServiceStatus::Degraded)),
            }]),
            Call::SubscribeToPosition { id: position, column } => Some(vec![
                unit(id),
                ServerFrame::callback(Callback::PositionValue {
                    id: position,
                    column,
                    value: CellValue::Number(101.5),
                }),
            ]),
            _ => Some(vec![unit(id)]),
        })
        .await;

        let connector = WsConnector::new(fast_config());
        let Established {
            session,
            mut callbacks,
        } = connector.connect(&endpoint).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Opened);

        assert_eq!(session.call(Call::Register).await, Ok(Reply::Unit));
        assert_eq!(
            session.call(Call::GetServiceStatus).await,
            Ok(Reply::Status(ServiceStatus::Degraded))
        );

        let key = cellstream_core::key::SubscriptionKey::position(5, "Price");
        session.call(Call::subscribe(&key)).await.unwrap();
        let pushed = timeout(Duration::from_secs(1), callbacks.recv()).await.unwrap();
        assert_eq!(
            pushed,
            Some(Callback::PositionValue {
                id: 5,
                column: "Price".to_string(),
                value: CellValue::Number(101.5),
            })
        );
    }

    #[tokio::test]
    async fn test_remote_fault_is_typed() {
        use cellstream_core::error::QueryError;

        let endpoint = serve_one(|id, _| {
            Some(vec![ServerFrame::Response {
                id,
                outcome: Err(RemoteFault::Query(QueryError::PortfolioNotFound {
                    portfolio_id: 99,
                })),
            }])
        })
        .await;

        let Established { session, .. } = WsConnector::new(fast_config())
            .connect(&endpoint)
            .await
            .unwrap();
        let result = session
            .call(Call::GetPositions {
                portfolio_id: 99,
                filter: cellstream_core::types::PositionFilter::All,
            })
            .await;
        assert_eq!(
            result,
            Err(ClientError::Query(QueryError::PortfolioNotFound {
                portfolio_id: 99
            }))
        );
        assert!(session.state().is_opened());
    }

    #[tokio::test]
    async fn test_dropped_connection_faults_session() {
        let endpoint = serve_one(|_, _| None).await;
        let Established { session, .. } = WsConnector::new(fast_config())
            .connect(&endpoint)
            .await
            .unwrap();

        let result = session.call(Call::Register).await;
        assert!(matches!(result, Err(ClientError::Network(_))));

        // The reader notices the dropped socket shortly after.
        for _ in 0..50 {
            if session.state() == ConnectionState::Faulted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.state(), ConnectionState::Faulted);
        assert!(matches!(
            session.call(Call::Register).await,
            Err(ClientError::Network(NetworkError::ConnectionClosed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out() {
        let endpoint = serve_one(|_, _| Some(Vec::new())).await;
        let Established { session, .. } = WsConnector::new(fast_config())
            .connect(&endpoint)
            .await
            .unwrap();

        let result = session.call(Call::RequestCalculate).await;
        assert_eq!(
            result,
            Err(ClientError::Network(NetworkError::Timeout { timeout_ms: 200 }))
        );
        assert!(session.state().is_opened());
    }

    #[tokio::test]
    async fn test_close_is_graceful() {
        let endpoint = serve_one(|id, _| Some(vec![unit(id)])).await;
        let Established { session, .. } = WsConnector::new(fast_config())
            .connect(&endpoint)
            .await
            .unwrap();

        session.call(Call::Register).await.unwrap();
        assert!(session.close().await.is_ok());
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("ws://{address}/cellstream")).unwrap();
        let result = WsConnector::new(fast_config()).connect(&endpoint).await;
        assert!(matches!(
            result,
            Err(NetworkError::ConnectionFailed { .. })
        ));
    }
}
