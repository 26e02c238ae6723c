//! Subscription registry: destination → set of (connection, id) pairs.
//!
//! Registry mutations are synchronous (spec §5: "all other operations are
//! expected to be non-blocking"), so this is guarded by a plain
//! `std::sync::RwLock` rather than an async one — no handler ever awaits
//! while holding it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::connection::ConnectionHandle;

/// A (connection, subscription-id) pair identifying one logical
/// subscription (spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub connection: ConnectionHandle,
    pub id: String,
}

impl Subscription {
    pub fn new(connection: ConnectionHandle, id: impl Into<String>) -> Self {
        Subscription {
            connection,
            id: id.into(),
        }
    }
}

/// Maps destination name to the set of subscriptions currently attached to
/// it. No empty buckets are retained: a destination key exists iff it has
/// at least one subscriber (spec §3, §4.3).
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<String, HashSet<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        SubscriptionRegistry {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `(connection, id)` to `destination`'s set. Idempotent on
    /// duplicate.
    pub fn subscribe(&self, connection: ConnectionHandle, destination: &str, id: &str) {
        let subscription = Subscription::new(connection, id);
        let mut subscriptions = self.subscriptions.write().unwrap();
        subscriptions
            .entry(destination.to_string())
            .or_default()
            .insert(subscription);
    }

    /// Removes the exact `(connection, id)` entry from `destination`; the
    /// destination key is dropped if the set becomes empty. Silent no-op if
    /// not present.
    pub fn unsubscribe(&self, connection: &ConnectionHandle, destination: &str, id: &str) {
        let mut subscriptions = self.subscriptions.write().unwrap();
        if let Some(set) = subscriptions.get_mut(destination) {
            set.retain(|s| !(&s.connection == connection && s.id == id));
            if set.is_empty() {
                subscriptions.remove(destination);
            }
        }
    }

    /// Removes every subscription belonging to `connection`, across all
    /// destinations.
    pub fn disconnect(&self, connection: &ConnectionHandle) {
        let mut subscriptions = self.subscriptions.write().unwrap();
        subscriptions.retain(|_, set| {
            set.retain(|s| &s.connection != connection);
            !set.is_empty()
        });
    }

    /// Returns a snapshot of the current subscriber set for `destination`.
    pub fn subscribers(&self, destination: &str) -> HashSet<Subscription> {
        let subscriptions = self.subscriptions.read().unwrap();
        subscriptions.get(destination).cloned().unwrap_or_default()
    }

    /// Returns the subscriber count, globally or for one destination.
    pub fn subscriber_count(&self, destination: Option<&str>) -> usize {
        let subscriptions = self.subscriptions.read().unwrap();
        match destination {
            Some(dest) => subscriptions.get(dest).map(|s| s.len()).unwrap_or(0),
            None => subscriptions.values().map(|s| s.len()).sum(),
        }
    }

    /// Every `(destination, subscriber set)` pair currently registered.
    /// Ported from the original source's `all_destinations_subscribers`
    /// (spec §3 of SPEC_FULL.md); used by diagnostic/management code.
    pub fn all_destinations(&self) -> Vec<(String, HashSet<Subscription>)> {
        let subscriptions = self.subscriptions.read().unwrap();
        subscriptions
            .iter()
            .map(|(dest, set)| (dest.clone(), set.clone()))
            .collect()
    }
}
