//! Broker configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::{DEFAULT_BUFFER_LIMIT, DEFAULT_PORT};

/// Broker configuration options
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Per-connection decode buffer capacity in bytes
    ///
    /// A client with more unparsed bytes than this outstanding is
    /// disconnected.
    pub buffer_limit: usize,

    /// Largest single socket read
    pub read_buffer_size: usize,

    /// Frames that may wait in a connection's outbound queue
    pub outbound_queue_capacity: usize,

    /// Close connections that send nothing for this long (None = never)
    pub idle_timeout: Option<Duration>,

    /// Close a connection on the first malformed frame
    pub strict: bool,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Log every frame at debug level
    pub trace_frames: bool,

    /// Stamp inbound frames with a `timestamp` header
    pub timestamp_frames: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_connections: 0, // Unlimited
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            read_buffer_size: 16 * 1024,
            outbound_queue_capacity: 1024,
            idle_timeout: None,
            strict: false,
            tcp_nodelay: true,
            trace_frames: false,
            timestamp_frames: true,
        }
    }
}

impl BrokerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the decode buffer capacity
    pub fn buffer_limit(mut self, bytes: usize) -> Self {
        self.buffer_limit = bytes.max(2);
        self
    }

    /// Set the socket read size
    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes.max(1);
        self
    }

    /// Set the outbound queue depth
    pub fn outbound_queue_capacity(mut self, frames: usize) -> Self {
        self.outbound_queue_capacity = frames.max(1);
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Close connections on malformed frames
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Log frames at debug level
    pub fn trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    /// Disable the `timestamp` header on inbound frames
    pub fn disable_timestamps(mut self) -> Self {
        self.timestamp_frames = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();

        assert_eq!(config.bind_addr.port(), 61613);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.buffer_limit, 65536);
        assert!(config.idle_timeout.is_none());
        assert!(!config.strict);
        assert!(config.tcp_nodelay);
        assert!(config.timestamp_frames);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:61614".parse().unwrap();
        let config = BrokerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 61614);
    }

    #[test]
    fn test_buffer_limit_floor() {
        let config = BrokerConfig::default().buffer_limit(0);
        assert_eq!(config.buffer_limit, 2);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:61613".parse().unwrap();
        let config = BrokerConfig::default()
            .bind(addr)
            .max_connections(50)
            .buffer_limit(4096)
            .outbound_queue_capacity(8)
            .idle_timeout(Duration::from_secs(30))
            .strict(true)
            .trace_frames(true)
            .disable_timestamps();

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.buffer_limit, 4096);
        assert_eq!(config.outbound_queue_capacity, 8);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert!(config.strict);
        assert!(config.trace_frames);
        assert!(!config.timestamp_frames);
    }
}
