//! Connection lifecycle events

use std::sync::Arc;

use crate::protocol::Frame;
use crate::session::Connection;

/// Something that happened on a connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Transport accepted, session id assigned
    Connected,
    /// Transport reported itself secure
    Secure,
    /// Nothing was received within the idle timeout
    Timeout,
    /// Connection closed
    Closed { had_error: bool },
    /// A fault no pipeline stage recovered from
    Error(String),
    /// A frame that made it through the whole receive pipeline
    Frame(Frame),
}

/// Receives lifecycle events from a [`ConnectionRegistry`](super::ConnectionRegistry)
///
/// Called synchronously from the connection's task; implementations must
/// not block.
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, connection: &Arc<Connection>, event: &ConnectionEvent);
}

impl<F> ConnectionObserver for F
where
    F: Fn(&Arc<Connection>, &ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, connection: &Arc<Connection>, event: &ConnectionEvent) {
        self(connection, event)
    }
}
