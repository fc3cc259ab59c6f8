//! Subscription index.
//!
//! Tracks which sessions are subscribed to which keys, in both directions:
//! - forward: key -> sessions subscribed to it (used for fan-out)
//! - reverse: session -> keys it holds (used for session removal)
//!
//! A session appears under key K in the forward map iff K is in that
//! session's entry of the reverse map. Empty sets are never stored.

use cellstream_core::key::{KeyCategory, SubscriptionKey};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::session::SessionId;

/// Result of a subscribe or unsubscribe on the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    /// Whether the index changed.
    pub changed: bool,
    /// Whether the change was an addition.
    pub added: bool,
    /// Number of sessions subscribed to the key afterwards.
    pub subscribers: usize,
}

impl Membership {
    /// True if the change made this session the key's first subscriber.
    #[must_use]
    pub const fn became_live(&self) -> bool {
        self.changed && self.added && self.subscribers == 1
    }

    /// True if the change removed the key's last subscriber.
    #[must_use]
    pub const fn became_idle(&self) -> bool {
        self.changed && !self.added && self.subscribers == 0
    }
}

/// Number of live keys per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    /// Position keys with at least one subscriber
    pub position: usize,
    /// Portfolio keys with at least one subscriber
    pub portfolio: usize,
    /// System keys with at least one subscriber
    pub system: usize,
}

/// Two-way mapping between sessions and subscription keys.
///
/// Not synchronized; the server keeps it under the same lock as its sessions.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_key: HashMap<SubscriptionKey, HashSet<SessionId>>,
    by_session: HashMap<SessionId, HashSet<SubscriptionKey>>,
}

impl SubscriptionIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` to the session's set. A no-op if already present.
    pub fn subscribe(&mut self, session: SessionId, key: &SubscriptionKey) -> Membership {
        let keys = self.by_session.entry(session).or_default();
        if !keys.insert(key.clone()) {
            return Membership {
                changed: false,
                added: false,
                subscribers: self.by_key.get(key).map_or(0, HashSet::len),
            };
        }

        let sessions = self.by_key.entry(key.clone()).or_default();
        sessions.insert(session);
        debug!(%session, %key, subscribers = sessions.len(), "Added subscription");

        Membership {
            changed: true,
            added: true,
            subscribers: sessions.len(),
        }
    }

    /// Removes `key` from the session's set. A no-op if absent.
    pub fn unsubscribe(&mut self, session: SessionId, key: &SubscriptionKey) -> Membership {
        let removed = match self.by_session.get_mut(&session) {
            Some(keys) => {
                let removed = keys.remove(key);
                if keys.is_empty() {
                    self.by_session.remove(&session);
                }
                removed
            }
            None => false,
        };

        if !removed {
            return Membership {
                changed: false,
                added: false,
                subscribers: self.by_key.get(key).map_or(0, HashSet::len),
            };
        }

        let subscribers = self.detach(session, key);
        debug!(%session, %key, subscribers, "Removed subscription");

        Membership {
            changed: true,
            added: false,
            subscribers,
        }
    }

    /// Removes every subscription of `session`.
    ///
    /// Returns each key the session held with its remaining subscriber count.
    pub fn remove_session(&mut self, session: SessionId) -> Vec<(SubscriptionKey, usize)> {
        let Some(keys) = self.by_session.remove(&session) else {
            return Vec::new();
        };

        keys.into_iter()
            .map(|key| {
                let remaining = self.detach(session, &key);
                (key, remaining)
            })
            .collect()
    }

    fn detach(&mut self, session: SessionId, key: &SubscriptionKey) -> usize {
        let Some(sessions) = self.by_key.get_mut(key) else {
            return 0;
        };
        sessions.remove(&session);
        let remaining = sessions.len();
        if remaining == 0 {
            self.by_key.remove(key);
        }
        remaining
    }

    /// Returns the sessions subscribed to `key`.
    pub fn subscribers(&self, key: &SubscriptionKey) -> impl Iterator<Item = SessionId> + '_ {
        self.by_key.get(key).into_iter().flatten().copied()
    }

    /// Returns the number of sessions subscribed to `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.by_key.get(key).map_or(0, HashSet::len)
    }

    /// Returns the keys held by `session`.
    pub fn keys_of(&self, session: SessionId) -> impl Iterator<Item = &SubscriptionKey> + '_ {
        self.by_session.get(&session).into_iter().flatten()
    }

    /// Returns true if `session` holds `key`.
    #[must_use]
    pub fn is_subscribed(&self, session: SessionId, key: &SubscriptionKey) -> bool {
        self.by_session
            .get(&session)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Returns the number of keys with at least one subscriber.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Counts live keys per category.
    #[must_use]
    pub fn counts(&self) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for key in self.by_key.keys() {
            match key.category() {
                KeyCategory::Position => counts.position += 1,
                KeyCategory::Portfolio => counts.portfolio += 1,
                KeyCategory::System => counts.system += 1,
            }
        }
        counts
    }

    /// Checks that both directions of the mapping agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.by_key.iter().all(|(key, sessions)| {
            !sessions.is_empty()
                && sessions.iter().all(|s| {
                    self.by_session
                        .get(s)
                        .is_some_and(|keys| keys.contains(key))
                })
        });
        let reverse_ok = self.by_session.iter().all(|(session, keys)| {
            !keys.is_empty()
                && keys.iter().all(|k| {
                    self.by_key
                        .get(k)
                        .is_some_and(|sessions| sessions.contains(session))
                })
        });
        forward_ok && reverse_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstream_core::key::SystemProperty;

    fn price() -> SubscriptionKey {
        SubscriptionKey::position(5, "Price")
    }

    #[test]
    fn test_subscribe_twice_is_single_entry() {
        let mut index = SubscriptionIndex::new();
        let s = SessionId::generate();

        let first = index.subscribe(s, &price());
        assert!(first.changed);
        assert!(first.became_live());

        let second = index.subscribe(s, &price());
        assert!(!second.changed);
        assert_eq!(second.subscribers, 1);

        assert_eq!(index.subscriber_count(&price()), 1);
        assert_eq!(index.keys_of(s).count(), 1);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_unsubscribe_non_member_is_noop() {
        let mut index = SubscriptionIndex::new();
        let a = SessionId::generate();
        let b = SessionId::generate();
        index.subscribe(a, &price());

        let result = index.unsubscribe(b, &price());
        assert!(!result.changed);
        assert_eq!(result.subscribers, 1);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_last_unsubscribe_goes_idle() {
        let mut index = SubscriptionIndex::new();
        let a = SessionId::generate();
        let b = SessionId::generate();
        index.subscribe(a, &price());
        index.subscribe(b, &price());

        let first = index.unsubscribe(a, &price());
        assert!(!first.became_idle());
        assert!(!first.became_live());
        assert!(index.unsubscribe(b, &price()).became_idle());
        assert_eq!(index.key_count(), 0);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_remove_session_reports_remaining() {
        let mut index = SubscriptionIndex::new();
        let a = SessionId::generate();
        let b = SessionId::generate();
        let date = SubscriptionKey::system(SystemProperty::PortfolioDate);
        index.subscribe(a, &price());
        index.subscribe(a, &date);
        index.subscribe(b, &date);

        let mut removed = index.remove_session(a);
        removed.sort();
        assert_eq!(removed, vec![(price(), 0), (date.clone(), 1)]);
        assert_eq!(index.subscribers(&date).collect::<Vec<_>>(), vec![b]);
        assert!(index.remove_session(a).is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn test_counts_by_category() {
        let mut index = SubscriptionIndex::new();
        let s = SessionId::generate();
        index.subscribe(s, &price());
        index.subscribe(s, &SubscriptionKey::position(6, "Price"));
        index.subscribe(s, &SubscriptionKey::portfolio(1, "Result"));
        index.subscribe(s, &SubscriptionKey::system(SystemProperty::PortfolioDate));

        assert_eq!(
            index.counts(),
            CategoryCounts {
                position: 2,
                portfolio: 1,
                system: 1
            }
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        #[derive(Debug, Clone)]
        enum Op {
            Subscribe(usize, SubscriptionKey),
            Unsubscribe(usize, SubscriptionKey),
            Remove(usize),
        }

        fn key() -> impl Strategy<Value = SubscriptionKey> {
            prop_oneof![
                (0..4i32).prop_map(|id| SubscriptionKey::position(id, "Price")),
                (0..3i32).prop_map(|id| SubscriptionKey::portfolio(id, "Result")),
                Just(SubscriptionKey::system(SystemProperty::PortfolioDate)),
            ]
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (0..4usize, key()).prop_map(|(s, k)| Op::Subscribe(s, k)),
                3 => (0..4usize, key()).prop_map(|(s, k)| Op::Unsubscribe(s, k)),
                1 => (0..4usize).prop_map(Op::Remove),
            ]
        }

        proptest! {
            #[test]
            fn index_matches_set_model(ops in prop::collection::vec(op(), 0..64)) {
                let sessions: Vec<SessionId> = (0..4).map(|_| SessionId::generate()).collect();
                let mut index = SubscriptionIndex::new();
                let mut model: Vec<BTreeSet<SubscriptionKey>> = vec![BTreeSet::new(); 4];

                for op in ops {
                    match op {
                        Op::Subscribe(s, k) => {
                            let changed = model[s].insert(k.clone());
                            prop_assert_eq!(index.subscribe(sessions[s], &k).changed, changed);
                        }
                        Op::Unsubscribe(s, k) => {
                            let changed = model[s].remove(&k);
                            prop_assert_eq!(index.unsubscribe(sessions[s], &k).changed, changed);
                        }
                        Op::Remove(s) => {
                            let held = std::mem::take(&mut model[s]);
                            prop_assert_eq!(index.remove_session(sessions[s]).len(), held.len());
                        }
                    }
                    prop_assert!(index.is_consistent());
                }

                for (s, keys) in model.iter().enumerate() {
                    let actual: BTreeSet<_> = index.keys_of(sessions[s]).cloned().collect();
                    prop_assert_eq!(&actual, keys);
                    for k in keys {
                        let expected = model.iter().filter(|m| m.contains(k)).count();
                        prop_assert_eq!(index.subscriber_count(k), expected);
                    }
                }
            }
        }
    }
}
