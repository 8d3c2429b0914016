//! Connection registry
//!
//! The registry mints connections, owns the receive and send pipelines, and
//! drives each transport:
//!
//! ```text
//!   socket ──read──► FrameReader ──frame──► receive pipeline ──► observers
//!                                                  │
//!                                         send_frame(conn, frame)
//!                                                  ▼
//!   socket ◄─write── outbound queue ◄──encode── send pipeline
//! ```
//!
//! Frames from one connection are decoded and run through the pipeline one
//! at a time on that connection's task, so per-connection order is kept
//! end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::config::BrokerConfig;
use super::events::{ConnectionEvent, ConnectionObserver};
use crate::error::{Error, Result};
use crate::pipeline::middleware::{self, error_frame};
use crate::pipeline::{Flow, Outcome, Pipeline, StageContext};
use crate::protocol::Frame;
use crate::session::{Connection, FrameReader, Outgoing, SessionId, SessionIdGenerator};
use crate::stats::{BrokerStats, StatsSnapshot};

/// How long a closing connection gets to flush its outbound queue
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates connections and routes their frames through the pipelines
pub struct ConnectionRegistry {
    config: BrokerConfig,
    ids: SessionIdGenerator,
    recv_pipeline: RwLock<Arc<Pipeline>>,
    send_pipeline: RwLock<Arc<Pipeline>>,
    connections: RwLock<HashMap<SessionId, Arc<Connection>>>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    stats: BrokerStats,
}

impl ConnectionRegistry {
    /// Create a registry running only the protocol stages
    pub fn new(config: BrokerConfig) -> Self {
        let recv = middleware::core_recv_pipeline(config.trace_frames);
        let send = middleware::core_send_pipeline(config.trace_frames);

        Self {
            config,
            ids: SessionIdGenerator::new(),
            recv_pipeline: RwLock::new(Arc::new(recv)),
            send_pipeline: RwLock::new(Arc::new(send)),
            connections: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            stats: BrokerStats::new(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Live counters
    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Point-in-time statistics
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current receive pipeline
    pub fn recv_pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.recv_pipeline.read())
    }

    /// Current send pipeline
    pub fn send_pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.send_pipeline.read())
    }

    /// Replace the receive pipeline; runs already in progress finish on the old one
    pub fn set_recv_pipeline(&self, pipeline: Pipeline) {
        *self.recv_pipeline.write() = Arc::new(pipeline);
    }

    pub fn set_send_pipeline(&self, pipeline: Pipeline) {
        *self.send_pipeline.write() = Arc::new(pipeline);
    }

    /// Edit a copy of the receive pipeline and swap it in
    pub fn update_recv_pipeline(&self, f: impl FnOnce(&mut Pipeline)) {
        let mut guard = self.recv_pipeline.write();
        let mut pipeline = Pipeline::clone(&guard);
        f(&mut pipeline);
        *guard = Arc::new(pipeline);
    }

    pub fn update_send_pipeline(&self, f: impl FnOnce(&mut Pipeline)) {
        let mut guard = self.send_pipeline.write();
        let mut pipeline = Pipeline::clone(&guard);
        f(&mut pipeline);
        *guard = Arc::new(pipeline);
    }

    /// Register a lifecycle observer
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.write().push(observer);
    }

    /// Look up a live connection
    pub fn connection(&self, id: &SessionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// All live connections
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Ask a connection to close; false if it is not live
    pub fn disconnect(&self, id: &SessionId) -> bool {
        match self.connection(id) {
            Some(conn) => {
                conn.request_close();
                true
            }
            None => false,
        }
    }

    /// Mint a new connection
    ///
    /// Returns the connection and the receiving end of its outbound queue.
    pub fn register(
        &self,
        peer_addr: Option<SocketAddr>,
    ) -> (Arc<Connection>, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity.max(1));
        let id = self.ids.next_id();
        let conn = Arc::new(Connection::new(id.clone(), peer_addr, self.config.strict, tx));

        self.connections.write().insert(id, Arc::clone(&conn));
        self.stats.connection_opened();

        tracing::info!(session_id = %conn.id(), peer = ?peer_addr, "New connection");
        self.emit(&conn, &ConnectionEvent::Connected);

        (conn, rx)
    }

    /// Remove a connection and announce its close
    ///
    /// Calling this more than once for the same connection is a no-op.
    pub fn unregister(&self, conn: &Arc<Connection>, had_error: bool) {
        if self.connections.write().remove(conn.id()).is_none() {
            return;
        }

        conn.set_connected(false);
        self.stats.connection_closed();

        tracing::info!(
            session_id = %conn.id(),
            had_error = had_error,
            age_ms = conn.age().as_millis() as u64,
            "Connection closed"
        );
        self.emit(conn, &ConnectionEvent::Closed { had_error });
    }

    /// Mark a connection secure and announce it
    pub fn mark_secure(&self, conn: &Arc<Connection>) {
        conn.mark_secure();
        self.emit(conn, &ConnectionEvent::Secure);
    }

    /// Run a decoded frame through the receive pipeline
    pub fn dispatch_frame(&self, conn: &Arc<Connection>, frame: Frame) {
        self.stats.frame_received();
        self.run_recv(conn, Flow::Frame(frame));
    }

    /// Run a decode error through the receive pipeline's error path
    pub fn dispatch_error(&self, conn: &Arc<Connection>, error: Error) {
        self.run_recv(conn, Flow::Error(error));
    }

    fn run_recv(&self, conn: &Arc<Connection>, start: Flow) {
        let pipeline = self.recv_pipeline();
        let cx = StageContext::new(self, conn);

        match pipeline.run(&cx, start) {
            Outcome::Delivered(frame) => {
                if !frame.handled {
                    tracing::debug!(
                        session_id = %conn.id(),
                        command = %frame.command,
                        "Frame not handled by any stage"
                    );
                }
                self.emit(conn, &ConnectionEvent::Frame(frame));
            }
            Outcome::Consumed => {}
            Outcome::Failed(err) => {
                self.stats.unresolved_error();
                tracing::warn!(session_id = %conn.id(), error = %err, "Unresolved pipeline error");
                self.emit(conn, &ConnectionEvent::Error(err.to_string()));
                if conn.is_strict() {
                    conn.request_close();
                }
            }
        }
    }

    /// Run a frame through the send pipeline and queue it on `conn`
    pub fn send_frame(&self, conn: &Arc<Connection>, frame: Frame) -> Result<()> {
        let pipeline = self.send_pipeline();
        let cx = StageContext::new(self, conn);

        match pipeline.run(&cx, Flow::Frame(frame)) {
            Outcome::Delivered(frame) => {
                conn.send(&frame)?;
                self.stats.frame_sent();
                Ok(())
            }
            Outcome::Consumed => Ok(()),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Drive one transport until it closes
    ///
    /// Registers a connection for the stream, decodes everything it sends
    /// and writes everything queued for it. Returns once the stream is done
    /// and the connection has been unregistered.
    pub async fn serve<S>(&self, stream: S, peer_addr: Option<SocketAddr>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (conn, outbound) = self.register(peer_addr);
        let (read_half, write_half) = tokio::io::split(stream);
        let writer = tokio::spawn(write_loop(Arc::clone(&conn), write_half, outbound));
        let abort = writer.abort_handle();

        let mut result = self.read_loop(&conn, read_half).await;

        if let Err(ref err) = result {
            if err.is_fatal() {
                // Best effort, the client may already be gone
                let _ = self.send_frame(&conn, error_frame(err));
            }
        }

        let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async {
            conn.finish().await;
            writer.await
        })
        .await;

        match flushed {
            Ok(Ok(Err(io))) if result.is_ok() => result = Err(Error::Io(io)),
            Err(_) => {
                tracing::debug!(session_id = %conn.id(), "Outbound flush timed out");
                abort.abort();
            }
            _ => {}
        }

        if let Err(ref err) = result {
            tracing::debug!(session_id = %conn.id(), error = %err, "Connection error");
            self.emit(&conn, &ConnectionEvent::Error(err.to_string()));
        }
        self.unregister(&conn, result.is_err());

        result
    }

    async fn read_loop<R>(&self, conn: &Arc<Connection>, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FrameReader::new(self.config.buffer_limit);
        let mut scratch = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            if conn.is_closing() {
                return Ok(());
            }

            // Never read more than fits; a full buffer surfaces as overflow on push
            let chunk = frames.free_space().clamp(1, scratch.len());
            let idle = self.config.idle_timeout;

            let read = async {
                match idle {
                    Some(limit) => tokio::time::timeout(limit, reader.read(&mut scratch[..chunk]))
                        .await
                        .ok(),
                    None => Some(reader.read(&mut scratch[..chunk]).await),
                }
            };

            let n = tokio::select! {
                _ = conn.close_requested() => return Ok(()),
                read = read => match read {
                    Some(res) => res?,
                    None => {
                        tracing::debug!(session_id = %conn.id(), "Idle timeout");
                        self.emit(conn, &ConnectionEvent::Timeout);
                        return Ok(());
                    }
                },
            };

            if n == 0 {
                return Ok(());
            }

            self.stats.bytes_received(n);
            frames.push(&scratch[..n])?;

            while !conn.is_closing() {
                match frames.next_frame() {
                    Ok(Some(frame)) => self.dispatch_frame(conn, frame),
                    Ok(None) => break,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::warn!(session_id = %conn.id(), error = %err, "Malformed frame");
                        self.dispatch_error(conn, err);
                        if conn.is_strict() {
                            conn.request_close();
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, conn: &Arc<Connection>, event: &ConnectionEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_event(conn, event);
        }
    }
}

async fn write_loop<W>(
    conn: Arc<Connection>,
    mut writer: W,
    mut outbound: mpsc::Receiver<Outgoing>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outgoing::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    conn.request_close();
                    return Err(e);
                }
            }
            Outgoing::Close => break,
        }
    }

    writer.flush().await?;
    writer.shutdown().await
}
