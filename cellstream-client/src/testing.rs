//! In-memory sessions and connector for unit tests.

use async_trait::async_trait;
use cellstream_core::error::NetworkError;
use cellstream_core::key::SubscriptionKey;
use cellstream_core::protocol::{Call, Callback, RemoteFault, Reply};
use cellstream_core::types::ServiceStatus;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::session::{Connector, Endpoint, Established, ServerSession};
use crate::state::ConnectionState;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Session that records every call and answers with canned replies.
pub(crate) struct RecordingSession {
    calls: Mutex<Vec<Call>>,
    succeed: Option<usize>,
    faults: Mutex<HashMap<&'static str, RemoteFault>>,
    state: Mutex<ConnectionState>,
    hook: Mutex<Option<Hook>>,
    closed_gracefully: AtomicBool,
    fail_close: AtomicBool,
}

impl RecordingSession {
    fn build(succeed: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            succeed,
            faults: Mutex::new(HashMap::new()),
            state: Mutex::new(ConnectionState::Opened),
            hook: Mutex::new(None),
            closed_gracefully: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Every call fails with a transport error.
    pub(crate) fn failing() -> Arc<Self> {
        Self::build(Some(0))
    }

    /// The first `n` calls succeed, later ones fail.
    pub(crate) fn failing_after(n: usize) -> Arc<Self> {
        Self::build(Some(n))
    }

    /// Answers calls named `operation` with `fault`.
    pub(crate) fn fault(&self, operation: &'static str, fault: RemoteFault) {
        self.faults.lock().insert(operation, fault);
    }

    /// Runs `hook` to completion inside the first call.
    pub(crate) fn on_first_call<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.hook.lock() = Some(Box::new(move || hook().boxed()));
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn closed_gracefully(&self) -> bool {
        self.closed_gracefully.load(Ordering::SeqCst)
    }

    /// Keys subscribed on this session after applying every recorded call
    /// in order, sorted.
    pub(crate) fn net_subscriptions(&self) -> Vec<SubscriptionKey> {
        let mut live = BTreeSet::new();
        for call in self.calls.lock().iter() {
            match call.subscription() {
                Some((key, true)) => {
                    live.insert(key);
                }
                Some((key, false)) => {
                    live.remove(&key);
                }
                None => {}
            }
        }
        live.into_iter().collect()
    }

    /// True if no key was subscribed while already subscribed.
    pub(crate) fn has_no_duplicate_subscribes(&self) -> bool {
        let mut live = BTreeSet::new();
        for call in self.calls.lock().iter() {
            match call.subscription() {
                Some((key, true)) => {
                    if !live.insert(key) {
                        return false;
                    }
                }
                Some((key, false)) => {
                    live.remove(&key);
                }
                None => {}
            }
        }
        true
    }

    fn canned_reply(call: &Call) -> Reply {
        match call {
            Call::GetServiceStatus => Reply::Status(ServiceStatus::Ready),
            Call::GetPositions { portfolio_id, .. } => {
                Reply::Positions(vec![portfolio_id * 1000, portfolio_id * 1000 + 1])
            }
            Call::GetPriceHistory { .. } => Reply::PriceHistory(Vec::new()),
            Call::GetCurvePoints { .. } => Reply::CurvePoints(Vec::new()),
            _ => Reply::Unit,
        }
    }
}

#[async_trait]
impl ServerSession for RecordingSession {
    async fn call(&self, call: Call) -> Result<Reply, ClientError> {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook().await;
        }

        let index = {
            let mut calls = self.calls.lock();
            calls.push(call.clone());
            calls.len() - 1
        };

        if self.succeed.is_some_and(|n| index >= n) || !self.state.lock().is_opened() {
            return Err(ClientError::Network(NetworkError::closed("session broken")));
        }
        if let Some(fault) = self.faults.lock().get(call.name()).cloned() {
            return Err(fault.into());
        }
        Ok(Self::canned_reply(&call))
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<(), NetworkError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(NetworkError::closed("close failed"));
        }
        self.closed_gracefully.store(true, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Closed;
        Ok(())
    }

    fn abort(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }
}

/// Connector handing out [`RecordingSession`]s.
#[derive(Default)]
pub(crate) struct FakeConnector {
    opened: Mutex<Vec<(Arc<RecordingSession>, mpsc::Sender<Callback>)>>,
    refuse: AtomicBool,
    register_fault: Mutex<Option<RemoteFault>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn reject_register(&self, fault: RemoteFault) {
        *self.register_fault.lock() = Some(fault);
    }

    pub(crate) fn connections(&self) -> usize {
        self.opened.lock().len()
    }

    pub(crate) fn session(&self, index: usize) -> Arc<RecordingSession> {
        Arc::clone(&self.opened.lock()[index].0)
    }

    pub(crate) fn last(&self) -> Arc<RecordingSession> {
        let opened = self.opened.lock();
        Arc::clone(&opened[opened.len() - 1].0)
    }

    pub(crate) async fn push(&self, index: usize, callback: Callback) {
        let tx = self.opened.lock()[index].1.clone();
        let _ = tx.send(callback).await;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Established, NetworkError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionFailed {
                reason: format!("{} refused", endpoint.connection_id()),
            });
        }
        let session = RecordingSession::new();
        if let Some(fault) = self.register_fault.lock().clone() {
            session.fault("register", fault);
        }
        let (tx, callbacks) = mpsc::channel(64);
        self.opened.lock().push((Arc::clone(&session), tx));
        Ok(Established {
            session,
            callbacks,
        })
    }
}
