//! Client subscription registry.
//!
//! The registry is the authority on what the application wants. It survives
//! reconnects, and on every new session it replays the whole set before the
//! application's own calls go straight to the server again.

use cellstream_core::key::SubscriptionKey;
use cellstream_core::protocol::Call;
use cellstream_telemetry::metrics::DistributionMetrics;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::session::ServerSession;

/// Outcome of a best-effort teardown. Teardown never fails; failed calls are
/// counted here and logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Calls attempted
    pub attempted: usize,
    /// Calls that failed and were ignored
    pub failed: usize,
}

impl Teardown {
    /// Returns true if every attempted call succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub(crate) fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if !ok {
            self.failed += 1;
        }
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.failed += other.failed;
    }
}

/// Outcome of replaying the registry on a new session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Replay {
    /// Subscribe calls issued
    pub subscribed: usize,
    /// Unsubscribe calls issued for keys dropped during the replay
    pub unsubscribed: usize,
    /// Calls that failed
    pub failed: usize,
}

#[derive(Default)]
enum Link {
    #[default]
    Detached,
    /// Replay in progress; application calls are stored and reconciled.
    Replaying,
    Attached(Arc<dyn ServerSession>),
}

#[derive(Default)]
struct RegistryState {
    desired: HashSet<SubscriptionKey>,
    link: Link,
}

/// Desired subscriptions of one client, kept in sync with the server while
/// a session is attached.
///
/// Application subscribes and unsubscribes take turns on `sequencer`, held
/// from the desired-set change until the server has answered, so the server
/// sees them in the order they were applied locally.
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    sequencer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("desired", &state.desired.len())
            .field("attached", &matches!(state.link, Link::Attached(_)))
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty, detached registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` to the desired set.
    ///
    /// Returns false if it was already there, in which case nothing is sent.
    /// When attached, the new key is sent to the server; a failed send is
    /// logged and the key stays desired for the next replay.
    pub async fn subscribe(&self, key: SubscriptionKey) -> bool {
        let _turn = self.sequencer.lock().await;
        let session = {
            let mut state = self.state.lock();
            if !state.desired.insert(key.clone()) {
                return false;
            }
            attached(&state.link)
        };

        debug!(%key, attached = session.is_some(), "Subscribed");
        if let Some(session) = session {
            if let Err(e) = session.call(Call::subscribe(&key)).await {
                warn!(%key, error = %e, "Subscribe failed, will replay on reconnect");
            }
        }
        true
    }

    /// Removes `key` from the desired set.
    ///
    /// Returns false if it was not there, in which case nothing is sent.
    /// When attached, the removal is sent to the server and failures are
    /// ignored.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let _turn = self.sequencer.lock().await;
        let session = {
            let mut state = self.state.lock();
            if !state.desired.remove(key) {
                return false;
            }
            attached(&state.link)
        };

        debug!(%key, attached = session.is_some(), "Unsubscribed");
        if let Some(session) = session {
            if let Err(e) = session.call(Call::unsubscribe(key)).await {
                debug!(%key, error = %e, "Unsubscribe failed, ignored");
            }
        }
        true
    }

    /// Replays the desired set on a freshly registered session, then
    /// attaches it.
    ///
    /// Keys added or removed by the application during the replay are
    /// reconciled before attaching, so each desired key is subscribed once.
    pub async fn on_connect(&self, session: Arc<dyn ServerSession>) -> Replay {
        self.state.lock().link = Link::Replaying;

        let mut sent: HashSet<SubscriptionKey> = HashSet::new();
        let mut replay = Replay::default();
        loop {
            let (to_add, to_remove) = {
                let mut state = self.state.lock();
                let to_add: Vec<_> = state.desired.difference(&sent).cloned().collect();
                let to_remove: Vec<_> = sent.difference(&state.desired).cloned().collect();
                if to_add.is_empty() && to_remove.is_empty() {
                    state.link = Link::Attached(Arc::clone(&session));
                    break;
                }
                (to_add, to_remove)
            };

            for key in to_add {
                if let Err(e) = session.call(Call::subscribe(&key)).await {
                    warn!(%key, error = %e, "Replay subscribe failed");
                    replay.failed += 1;
                }
                replay.subscribed += 1;
                sent.insert(key);
            }
            for key in to_remove {
                if let Err(e) = session.call(Call::unsubscribe(&key)).await {
                    debug!(%key, error = %e, "Replay unsubscribe failed");
                    replay.failed += 1;
                }
                replay.unsubscribed += 1;
                sent.remove(&key);
            }
        }

        info!(
            subscribed = replay.subscribed,
            failed = replay.failed,
            "Subscriptions replayed"
        );
        replay
    }

    /// Detaches from the current session. The desired set is kept.
    ///
    /// Returns the session that was attached, if any.
    pub fn on_disconnect(&self) -> Option<Arc<dyn ServerSession>> {
        match std::mem::take(&mut self.state.lock().link) {
            Link::Attached(session) => Some(session),
            Link::Detached | Link::Replaying => None,
        }
    }

    /// Best-effort unsubscribes every desired key on `session`, keeping the
    /// desired set.
    pub async fn unsubscribe_remote(&self, session: &dyn ServerSession) -> Teardown {
        let mut teardown = Teardown::default();
        for key in self.keys() {
            let result = session.call(Call::unsubscribe(&key)).await;
            if let Err(e) = &result {
                debug!(%key, error = %e, "Teardown unsubscribe failed");
            }
            teardown.record(result.is_ok());
        }
        if !teardown.is_clean() {
            warn!(
                failed = teardown.failed,
                attempted = teardown.attempted,
                "Teardown completed with ignored failures"
            );
            DistributionMetrics::teardown_failures(teardown.failed);
        }
        teardown
    }

    /// Releases the registry: detaches, best-effort unsubscribes every key
    /// on the attached session, then clears the desired set.
    pub async fn release(&self) -> Teardown {
        let teardown = match self.on_disconnect() {
            Some(session) => self.unsubscribe_remote(session.as_ref()).await,
            None => Teardown::default(),
        };
        self.state.lock().desired.clear();
        teardown
    }

    /// Returns true if `key` is desired.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.state.lock().desired.contains(key)
    }

    /// Returns the number of desired keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().desired.len()
    }

    /// Returns true if nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().desired.is_empty()
    }

    /// Returns true if a session is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        matches!(self.state.lock().link, Link::Attached(_))
    }

    /// Returns a sorted snapshot of the desired keys.
    #[must_use]
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.state.lock().desired.iter().cloned().collect();
        keys.sort();
        keys
    }
}

fn attached(link: &Link) -> Option<Arc<dyn ServerSession>> {
    match link {
        Link::Attached(session) => Some(Arc::clone(session)),
        Link::Detached | Link::Replaying => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;
    use cellstream_core::key::SystemProperty;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn price() -> SubscriptionKey {
        SubscriptionKey::position(5, "Price")
    }

    fn date() -> SubscriptionKey {
        SubscriptionKey::system(SystemProperty::PortfolioDate)
    }

    #[tokio::test]
    async fn test_detached_subscribe_is_local_only() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(price()).await);
        assert!(!registry.subscribe(price()).await);
        assert_eq!(registry.keys(), vec![price()]);
        assert!(!registry.is_attached());
    }

    #[tokio::test]
    async fn test_attached_subscribe_sends_once() {
        let registry = SubscriptionRegistry::new();
        let session = RecordingSession::new();
        registry.on_connect(session.clone()).await;

        registry.subscribe(price()).await;
        registry.subscribe(price()).await;
        assert_eq!(session.calls(), vec![Call::subscribe(&price())]);
    }

    #[tokio::test]
    async fn test_unsubscribe_non_member_sends_nothing() {
        let registry = SubscriptionRegistry::new();
        let session = RecordingSession::new();
        registry.on_connect(session.clone()).await;

        assert!(!registry.unsubscribe(&price()).await);
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_subscribe_stays_desired() {
        let registry = SubscriptionRegistry::new();
        let broken = RecordingSession::failing();
        registry.on_connect(broken.clone()).await;
        registry.subscribe(price()).await;
        assert!(registry.contains(&price()));

        registry.on_disconnect();
        let fresh = RecordingSession::new();
        let replay = registry.on_connect(fresh.clone()).await;
        assert_eq!(replay.subscribed, 1);
        assert_eq!(fresh.calls(), vec![Call::subscribe(&price())]);
    }

    #[tokio::test]
    async fn test_replay_after_reconnect() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(price()).await;
        registry.subscribe(date()).await;

        let first = RecordingSession::new();
        registry.on_connect(first.clone()).await;
        assert_eq!(first.calls().len(), 2);

        assert!(registry.on_disconnect().is_some());
        assert_eq!(registry.len(), 2);

        let second = RecordingSession::new();
        let replay = registry.on_connect(second.clone()).await;
        assert_eq!(replay, Replay { subscribed: 2, unsubscribed: 0, failed: 0 });
        let mut calls = second.calls();
        calls.sort_by_key(|c| c.subscription().map(|(k, _)| k));
        assert_eq!(calls, vec![Call::subscribe(&price()), Call::subscribe(&date())]);
    }

    #[tokio::test]
    async fn test_changes_during_replay_are_reconciled() {
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.subscribe(price()).await;

        let session = RecordingSession::new();
        // The first replayed call adds one key and removes another.
        let hook_registry = Arc::clone(&registry);
        session.on_first_call(move || {
            let registry = Arc::clone(&hook_registry);
            async move {
                registry.subscribe(date()).await;
                registry.unsubscribe(&price()).await;
            }
        });

        let replay = registry.on_connect(session.clone()).await;
        assert!(registry.is_attached());
        assert_eq!(registry.keys(), vec![date()]);
        assert_eq!(replay.subscribed, 2);
        assert_eq!(replay.unsubscribed, 1);
        assert_eq!(session.net_subscriptions(), vec![date()]);
    }

    #[tokio::test]
    async fn test_interleaved_subscribe_unsubscribe_reach_server_in_order() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let session = RecordingSession::new();
        registry.on_connect(session.clone()).await;

        // The subscribe call stalls until `release` fires.
        let (release, gate) = oneshot::channel::<()>();
        session.on_first_call(move || async move {
            let _ = gate.await;
        });

        let subscriber = Arc::clone(&registry);
        let subscribe = tokio::spawn(async move { subscriber.subscribe(price()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let unsubscriber = Arc::clone(&registry);
        let unsubscribe = tokio::spawn(async move { unsubscriber.unsubscribe(&price()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.calls().is_empty());

        release.send(()).unwrap();
        assert!(subscribe.await.unwrap());
        assert!(unsubscribe.await.unwrap());

        assert!(registry.keys().is_empty());
        assert_eq!(
            session.calls(),
            vec![Call::subscribe(&price()), Call::unsubscribe(&price())]
        );
        assert_eq!(session.net_subscriptions(), registry.keys());
    }

    #[tokio::test]
    async fn test_release_unsubscribes_and_clears() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(price()).await;
        registry.subscribe(date()).await;
        let session = RecordingSession::failing_after(1);
        registry.on_connect(session.clone()).await;

        let teardown = registry.release().await;
        assert_eq!(teardown.attempted, 2);
        assert!(!teardown.is_clean());
        assert!(registry.is_empty());
        assert!(!registry.is_attached());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn key_strategy() -> impl Strategy<Value = SubscriptionKey> {
            prop_oneof![
                (0..4i32, prop::sample::select(vec!["Price", "Delta"]))
                    .prop_map(|(id, c)| SubscriptionKey::position(id, c)),
                (0..3i32).prop_map(|id| SubscriptionKey::portfolio(id, "Result")),
                Just(SubscriptionKey::system(SystemProperty::PortfolioDate)),
            ]
        }

        proptest! {
            #[test]
            fn prop_server_view_matches_desired_set(
                ops in prop::collection::vec((any::<bool>(), key_strategy()), 0..40),
                reconnect_at in 0usize..40,
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let registry = SubscriptionRegistry::new();
                    let mut session = RecordingSession::new();
                    registry.on_connect(session.clone()).await;

                    for (i, (add, key)) in ops.iter().enumerate() {
                        if i == reconnect_at {
                            registry.on_disconnect();
                            session = RecordingSession::new();
                            registry.on_connect(session.clone()).await;
                        }
                        if *add {
                            registry.subscribe(key.clone()).await;
                        } else {
                            registry.unsubscribe(key).await;
                        }
                    }

                    let desired = registry.keys();
                    prop_assert_eq!(session.net_subscriptions(), desired);
                    prop_assert!(session.has_no_duplicate_subscribes());
                    Ok(())
                })?;
            }
        }
    }
}
