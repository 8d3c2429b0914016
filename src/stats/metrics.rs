//! Statistics for the broker

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters, updated from every connection task
#[derive(Debug)]
pub struct BrokerStats {
    started_at: Instant,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    bytes_received: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    messages_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    error_replies: AtomicU64,
    unresolved_errors: AtomicU64,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            error_replies: AtomicU64::new(0),
            unresolved_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn bytes_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error_reply(&self) {
        self.error_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unresolved_error(&self) {
        self.unresolved_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            error_replies: self.error_replies.load(Ordering::Relaxed),
            unresolved_errors: self.unresolved_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker-wide statistics
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// Time since the registry was created
    pub uptime: Duration,
    /// Connections ever accepted
    pub connections_total: u64,
    /// Connections currently open
    pub connections_active: u64,
    /// Raw bytes read from clients
    pub bytes_received: u64,
    /// Frames decoded from clients
    pub frames_received: u64,
    /// Frames queued to clients
    pub frames_sent: u64,
    /// MESSAGE frames queued to subscribers
    pub messages_delivered: u64,
    /// Subscribers that could not be reached during fan-out
    pub delivery_failures: u64,
    /// ERROR frames sent
    pub error_replies: u64,
    /// Errors no pipeline stage recovered from
    pub unresolved_errors: u64,
}

impl StatsSnapshot {
    /// Average inbound rate over the uptime, in bits per second
    pub fn inbound_bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}
