//! Per-connection handle
//!
//! A [`Connection`] is the shared side of one client session: its id, its
//! handshake and security flags, and the sending end of its outbound queue.
//! Subscriptions and pipeline stages hold it behind an `Arc`; the transport
//! task that owns the socket drains the queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use super::id::SessionId;
use crate::error::{Error, Result};
use crate::protocol::{codec, Frame};

/// Item on a connection's outbound queue
#[derive(Debug)]
pub enum Outgoing {
    /// Encoded frame bytes
    Data(Bytes),
    /// Flush what came before, then shut the stream down
    Close,
}

/// Shared handle to one client connection
#[derive(Debug)]
pub struct Connection {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    connected: AtomicBool,
    secure: AtomicBool,
    closing: AtomicBool,
    strict: bool,
    opened_at: Instant,
    outbound: mpsc::Sender<Outgoing>,
    shutdown: Notify,
}

impl Connection {
    /// Create a connection writing into `outbound`
    pub fn new(
        id: SessionId,
        peer_addr: Option<SocketAddr>,
        strict: bool,
        outbound: mpsc::Sender<Outgoing>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            connected: AtomicBool::new(false),
            secure: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            strict,
            opened_at: Instant::now(),
            outbound,
            shutdown: Notify::new(),
        }
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Remote address, if the transport has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the CONNECT handshake has completed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Whether the transport reported itself secure
    pub fn is_secure(&self) -> bool {
        self.secure.load(Ordering::Acquire)
    }

    pub fn mark_secure(&self) {
        self.secure.store(true, Ordering::Release);
    }

    /// Whether malformed input closes this connection
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Serialize a frame onto the outbound queue
    ///
    /// Never waits: a full queue is reported as [`Error::QueueFull`] so a
    /// slow reader cannot stall whoever is sending to it.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.send_bytes(codec::encode(frame))
    }

    /// Queue already-encoded bytes
    pub fn send_bytes(&self, data: Bytes) -> Result<()> {
        self.outbound
            .try_send(Outgoing::Data(data))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull(self.id.clone()),
                mpsc::error::TrySendError::Closed(_) => Error::ConnectionClosed(self.id.clone()),
            })
    }

    /// Ask the transport task to close this connection
    ///
    /// Frames already queued are still written before the stream is shut.
    pub fn request_close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    /// Whether a close has been requested
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Resolves once [`request_close`](Self::request_close) has been called
    pub async fn close_requested(&self) {
        if self.is_closing() {
            return;
        }
        self.shutdown.notified().await;
    }

    /// Queue the final close marker, waiting for room if needed
    pub(crate) async fn finish(&self) {
        let _ = self.outbound.send(Outgoing::Close).await;
    }
}
