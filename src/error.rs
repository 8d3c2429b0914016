//! Error types for the broker
//!
//! All faults raised while decoding, routing or delivering frames are
//! represented by [`Error`]. Pipeline stages return it, the terminal
//! error stage turns it into an ERROR frame, and the connection driver
//! uses [`Error::is_fatal`] to decide whether the connection survives.

use std::fmt;

use crate::protocol::ring_buffer::BufferError;
use crate::session::SessionId;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Broker error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client sent more unparsed bytes than the decode buffer holds
    #[error("Buffer overflow: {0}")]
    BufferOverflow(BufferError),

    /// A frame declares a body that can never fit the decode buffer
    #[error("Frame too large: {0}")]
    FrameTooLarge(BufferError),

    /// Structural violation of the wire format
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Command not allowed in this direction
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Sequencing or validation violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// One or more subscribers could not be reached during fan-out
    #[error("Delivery to {destination} failed for {} subscriber(s)", failures.len())]
    Delivery {
        destination: String,
        failures: Vec<DeliveryFailure>,
    },

    /// The connection's outbound queue is gone
    #[error("Connection closed: {0}")]
    ConnectionClosed(SessionId),

    /// The connection's outbound queue is full
    #[error("Outbound queue full: {0}")]
    QueueFull(SessionId),
}

impl Error {
    pub(crate) fn protocol(description: impl Into<String>) -> Self {
        Error::Protocol(description.into())
    }

    pub(crate) fn invalid(description: impl Into<String>) -> Self {
        Error::InvalidFrame(description.into())
    }

    pub(crate) fn malformed(description: impl Into<String>) -> Self {
        Error::MalformedFrame(description.into())
    }

    /// Whether this error must close the connection it occurred on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::BufferOverflow(_) | Error::FrameTooLarge(_)
        )
    }

    /// Short description suitable for an ERROR frame's `message` header
    pub fn summary(&self) -> &'static str {
        match self {
            Error::Io(_) => "I/O error",
            Error::BufferOverflow(_) => "Buffer overflow",
            Error::FrameTooLarge(_) => "Frame too large",
            Error::MalformedFrame(_) => "Malformed frame",
            Error::InvalidFrame(_) => "Invalid frame",
            Error::Protocol(_) => "Protocol error",
            Error::Delivery { .. } => "Delivery failed",
            Error::ConnectionClosed(_) => "Connection closed",
            Error::QueueFull(_) => "Outbound queue full",
        }
    }
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Overflow { .. } => Error::BufferOverflow(err),
            BufferError::RequestTooLarge { .. } => Error::FrameTooLarge(err),
        }
    }
}

/// A single subscriber that could not be reached during fan-out
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Session of the subscriber
    pub session_id: SessionId,
    /// Subscription id, if the client supplied one
    pub subscription_id: Option<String>,
    /// Why the delivery failed
    pub reason: String,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subscription_id {
            Some(ref id) => write!(f, "{} (subscription {}): {}", self.session_id, id, self.reason),
            None => write!(f, "{}: {}", self.session_id, self.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let overflow = Error::from(BufferError::Overflow {
            requested: 10,
            available: 2,
        });
        assert!(overflow.is_fatal());
        assert!(matches!(overflow, Error::BufferOverflow(_)));

        let too_large = Error::from(BufferError::RequestTooLarge {
            requested: 100,
            capacity: 16,
        });
        assert!(too_large.is_fatal());

        assert!(!Error::protocol("Client must CONNECT").is_fatal());
        assert!(!Error::malformed("Invalid header: x").is_fatal());
        assert!(!Error::invalid("Invalid client command").is_fatal());
    }

    #[test]
    fn test_display() {
        let err = Error::protocol("Duplicate SUBSCRIBE");
        assert_eq!(err.to_string(), "Protocol error: Duplicate SUBSCRIBE");
        assert_eq!(err.summary(), "Protocol error");

        let err = Error::Delivery {
            destination: "/queue/a".into(),
            failures: vec![DeliveryFailure {
                session_id: SessionId::from("abc"),
                subscription_id: Some("1".into()),
                reason: "gone".into(),
            }],
        };
        assert_eq!(err.to_string(), "Delivery to /queue/a failed for 1 subscriber(s)");
    }
}
