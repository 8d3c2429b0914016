//! Cached destination entries

use std::sync::Arc;

use super::subscription::Subscription;
use crate::session::SessionId;

/// Subscribers resolved for one concrete destination name
///
/// Entries are built on first use and then kept up to date as
/// subscriptions come and go. They are never evicted.
#[derive(Debug, Clone)]
pub struct DestinationEntry {
    name: String,
    subscribers: Vec<Arc<Subscription>>,
}

impl DestinationEntry {
    /// Resolve `name` against a subscription table
    pub(super) fn resolve<'a, I>(name: &str, subscriptions: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Subscription>>,
    {
        let subscribers = subscriptions
            .into_iter()
            .filter(|s| s.matches(name))
            .cloned()
            .collect();

        Self {
            name: name.to_string(),
            subscribers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribers in subscription order
    pub fn subscribers(&self) -> &[Arc<Subscription>] {
        &self.subscribers
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Add `subscription` if its pattern covers this destination
    pub(super) fn offer(&mut self, subscription: &Arc<Subscription>) -> bool {
        if subscription.matches(&self.name) {
            self.subscribers.push(Arc::clone(subscription));
            true
        } else {
            false
        }
    }

    /// Drop every subscriber identified by `(session, destination, id)`
    pub(super) fn prune(&mut self, session: &SessionId, destination: &str, id: Option<&str>) {
        self.subscribers.retain(|s| !s.is(session, destination, id));
    }
}
