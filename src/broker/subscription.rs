//! Subscription records

use std::sync::Arc;

use super::pattern::DestinationPattern;
use crate::error::Result;
use crate::session::{Connection, SessionId};

/// A (connection, pattern, id) binding created by SUBSCRIBE
#[derive(Debug)]
pub struct Subscription {
    pattern: DestinationPattern,
    id: Option<String>,
    connection: Arc<Connection>,
    ack: String,
}

impl Subscription {
    /// Compile `destination` and bind it to `connection`
    pub fn new(
        connection: Arc<Connection>,
        destination: &str,
        id: Option<String>,
        ack: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            pattern: DestinationPattern::compile(destination)?,
            id,
            connection,
            ack: ack.into(),
        })
    }

    /// Destination string as the client sent it
    pub fn destination(&self) -> &str {
        self.pattern.as_str()
    }

    /// Compiled destination
    pub fn pattern(&self) -> &DestinationPattern {
        &self.pattern
    }

    /// Client-supplied subscription id
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Requested ack mode; recorded, not enforced
    pub fn ack(&self) -> &str {
        &self.ack
    }

    /// Subscribing connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn session_id(&self) -> &SessionId {
        self.connection.id()
    }

    /// Whether this subscription should receive messages sent to `destination`
    pub fn matches(&self, destination: &str) -> bool {
        self.pattern.matches(destination)
    }

    /// Whether this is the subscription `(session, destination, id)` names
    pub(crate) fn is(&self, session: &SessionId, destination: &str, id: Option<&str>) -> bool {
        self.session_id() == session && self.destination() == destination && self.id() == id
    }
}
