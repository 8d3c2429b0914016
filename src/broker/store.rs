//! Subscription store and message fan-out
//!
//! The broker owns the subscription table and a cache of resolved
//! destinations. Both live behind one lock so that subscribe, unsubscribe,
//! destination lookup and the subscriber snapshot taken by a publish are
//! atomic with respect to each other.
//!
//! ```text
//!   SEND /topic/a.b ──► destination cache ──hit──► [sub 1, sub 3]
//!                              │                        │
//!                            miss                  snapshot, unlock
//!                              ▼                        ▼
//!                    scan subscription table     MESSAGE per subscriber
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::entry::DestinationEntry;
use super::stages::{SendRecv, SubscribeRecv};
use super::subscription::Subscription;
use crate::error::{DeliveryFailure, Error, Result};
use crate::pipeline::middleware::{self, Timestamp};
use crate::protocol::constants::{
    CUSTOM_HEADER_PREFIX, DEFAULT_ACK_MODE, HEADER_DESTINATION, HEADER_ID, HEADER_REPLY_TO,
    HEADER_TIMESTAMP,
};
use crate::protocol::{Command, Frame, Headers};
use crate::server::{ConnectionEvent, ConnectionObserver, ConnectionRegistry};
use crate::session::{Connection, SessionId};

#[derive(Debug, Default)]
struct BrokerState {
    /// Subscription table in registration order
    subscriptions: Vec<Arc<Subscription>>,
    /// Resolved destinations by concrete name
    destinations: HashMap<String, DestinationEntry>,
}

impl BrokerState {
    fn destination(&mut self, name: &str) -> &DestinationEntry {
        if !self.destinations.contains_key(name) {
            let entry = DestinationEntry::resolve(name, &self.subscriptions);
            self.destinations.insert(name.to_string(), entry);
        }
        &self.destinations[name]
    }

    /// Remove the last subscription of `session` matching the UNSUBSCRIBE criteria
    fn remove(
        &mut self,
        session: &SessionId,
        destination: Option<&str>,
        id: Option<&str>,
    ) -> Option<Arc<Subscription>> {
        let idx = self
            .subscriptions
            .iter()
            .rposition(|s| s.session_id() == session && unsubscribe_matches(s, destination, id))?;

        let removed = self.subscriptions.remove(idx);
        for entry in self.destinations.values_mut() {
            entry.prune(session, removed.destination(), removed.id());
        }
        Some(removed)
    }
}

/// UNSUBSCRIBE selection rule
///
/// With an id: equal id, and equal destination if one was given. Without
/// an id: equal destination and no id on the subscription. With neither,
/// anything matches.
fn unsubscribe_matches(sub: &Subscription, destination: Option<&str>, id: Option<&str>) -> bool {
    match (id, destination) {
        (Some(id), dest) => sub.id() == Some(id) && dest.map_or(true, |d| d == sub.destination()),
        (None, Some(dest)) => sub.destination() == dest && sub.id().is_none(),
        (None, None) => true,
    }
}

/// Whether a SEND header is copied onto outgoing MESSAGE frames
fn is_forwarded(key: &str) -> bool {
    matches!(key, HEADER_REPLY_TO | HEADER_DESTINATION | HEADER_TIMESTAMP)
        || key.starts_with(CUSTOM_HEADER_PREFIX)
}

/// Subscription table, destination cache and publisher
#[derive(Debug, Default)]
pub struct Broker {
    state: Mutex<BrokerState>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add routing to a registry
    ///
    /// Inserts the subscribe, timestamp and send stages in front of the
    /// `disconnect` stage and removes a connection's subscriptions when it
    /// closes.
    pub fn install(self: &Arc<Self>, registry: &ConnectionRegistry) {
        let timestamps = registry.config().timestamp_frames;
        let broker = Arc::clone(self);

        registry.update_recv_pipeline(|pipeline| {
            pipeline.insert_before(
                middleware::DISCONNECT,
                Arc::new(SubscribeRecv::new(Arc::clone(&broker))),
            );
            if timestamps {
                pipeline.insert_before(middleware::DISCONNECT, Arc::new(Timestamp));
            }
            pipeline.insert_before(middleware::DISCONNECT, Arc::new(SendRecv::new(broker)));
        });

        registry.add_observer(Arc::clone(self) as Arc<dyn ConnectionObserver>);
    }

    /// Register a subscription
    ///
    /// Fails if `connection` already holds a subscription with the same id
    /// (two subscriptions without an id count as the same). Cached
    /// destinations the new pattern covers start receiving immediately;
    /// nothing published earlier is replayed.
    pub fn subscribe(
        &self,
        connection: &Arc<Connection>,
        destination: &str,
        id: Option<&str>,
        ack: Option<&str>,
    ) -> Result<Arc<Subscription>> {
        let mut state = self.state.lock();

        let duplicate = state
            .subscriptions
            .iter()
            .any(|s| s.session_id() == connection.id() && s.id() == id);
        if duplicate {
            return Err(Error::protocol("Duplicate SUBSCRIBE"));
        }

        let subscription = Arc::new(Subscription::new(
            Arc::clone(connection),
            destination,
            id.map(str::to_string),
            ack.unwrap_or(DEFAULT_ACK_MODE),
        )?);
        state.subscriptions.push(Arc::clone(&subscription));

        let mut cached = 0;
        for entry in state.destinations.values_mut() {
            if entry.offer(&subscription) {
                cached += 1;
            }
        }

        tracing::info!(
            session_id = %connection.id(),
            destination = %destination,
            id = ?id,
            ack = subscription.ack(),
            cached_destinations = cached,
            "Subscription added"
        );

        Ok(subscription)
    }

    /// Remove one subscription of `connection`
    ///
    /// When several subscriptions match, the most recently added one is
    /// removed. Passing neither `destination` nor `id` removes the most
    /// recent subscription of the connection.
    pub fn unsubscribe(
        &self,
        connection: &Connection,
        destination: Option<&str>,
        id: Option<&str>,
    ) -> Result<Arc<Subscription>> {
        let removed = self
            .state
            .lock()
            .remove(connection.id(), destination, id)
            .ok_or_else(|| Error::protocol("No SUBSCRIBE matches given UNSUBSCRIBE"))?;

        tracing::info!(
            session_id = %connection.id(),
            destination = %removed.destination(),
            id = ?removed.id(),
            "Subscription removed"
        );

        Ok(removed)
    }

    /// Remove every subscription held by `session`
    pub fn unsubscribe_all(&self, session: &SessionId) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0;
        while state.remove(session, None, None).is_some() {
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(session_id = %session, removed = removed, "Subscriptions purged");
        }
        removed
    }

    /// Resolve a destination, caching it on first use
    pub fn get_destination(&self, name: &str) -> DestinationEntry {
        self.state.lock().destination(name).clone()
    }

    /// Fan a SEND frame out to every subscriber of its destination
    ///
    /// Each subscriber gets a MESSAGE carrying the body and the forwarded
    /// headers, plus its own subscription id. Every subscriber is tried;
    /// if any could not be reached the failures are returned together as
    /// [`Error::Delivery`]. Returns the number of messages queued.
    pub fn publish(&self, registry: &ConnectionRegistry, frame: &Frame) -> Result<usize> {
        let destination = frame
            .header(HEADER_DESTINATION)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::protocol("SEND requires a destination header"))?;

        let subscribers = self
            .state
            .lock()
            .destination(destination)
            .subscribers()
            .to_vec();

        let headers: Headers = frame.headers.iter().filter(|(k, _)| is_forwarded(k)).collect();

        let mut delivered = 0;
        let mut failures = Vec::new();

        for subscription in &subscribers {
            let mut message = Frame::new(Command::Message, headers.clone(), frame.body.clone());
            if let Some(id) = subscription.id() {
                message.headers.set(HEADER_ID, id);
            }

            match registry.send_frame(subscription.connection(), message) {
                Ok(()) => {
                    delivered += 1;
                    registry.stats().message_delivered();
                }
                Err(err) => {
                    registry.stats().delivery_failed();
                    tracing::warn!(
                        session_id = %subscription.session_id(),
                        destination = %destination,
                        error = %err,
                        "Delivery failed"
                    );
                    failures.push(DeliveryFailure {
                        session_id: subscription.session_id().clone(),
                        subscription_id: subscription.id().map(str::to_string),
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            destination = %destination,
            subscribers = subscribers.len(),
            delivered = delivered,
            "Message published"
        );

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(Error::Delivery {
                destination: destination.to_string(),
                failures,
            })
        }
    }

    /// Snapshot of the subscription table
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.state.lock().subscriptions.clone()
    }

    /// Snapshot of the destination cache, sorted by name
    pub fn destinations(&self) -> Vec<DestinationEntry> {
        let mut entries: Vec<_> = self.state.lock().destinations.values().cloned().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn destination_count(&self) -> usize {
        self.state.lock().destinations.len()
    }
}

impl ConnectionObserver for Broker {
    fn on_event(&self, connection: &Arc<Connection>, event: &ConnectionEvent) {
        if let ConnectionEvent::Closed { .. } = event {
            self.unsubscribe_all(connection.id());
        }
    }
}
