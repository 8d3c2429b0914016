//! Protocol stages
//!
//! The stages every broker runs regardless of routing:
//!
//! | Stage            | Pipeline | Role                                        |
//! |------------------|----------|---------------------------------------------|
//! | `trace`          | both     | Log frames at debug level (optional)        |
//! | `validate-recv`  | receive  | Reject non-client commands; errors → ERROR  |
//! | `handshake`      | receive  | Require CONNECT first, reply CONNECTED      |
//! | `disconnect`     | receive  | Close the connection after DISCONNECT       |
//! | `auto-receipt`   | receive  | Answer `receipt` headers with RECEIPT       |
//! | `error-reply`    | receive  | Turn any remaining error into ERROR         |
//! | `validate-send`  | send     | Reject non-server commands                  |
//!
//! Routing stages are inserted by [`Broker::install`](crate::broker::Broker::install)
//! between `handshake` and `disconnect`.

use std::time::{SystemTime, UNIX_EPOCH};

use super::stage::{Stage, StageContext};
use super::Pipeline;
use crate::error::{Error, Result};
use crate::protocol::constants::{
    HEADER_MESSAGE, HEADER_RECEIPT, HEADER_RECEIPT_ID, HEADER_SESSION, HEADER_TIMESTAMP,
};
use crate::protocol::{Command, Frame, Headers};

pub const TRACE: &str = "trace";
pub const VALIDATE_RECV: &str = "validate-recv";
pub const VALIDATE_SEND: &str = "validate-send";
pub const HANDSHAKE: &str = "handshake";
pub const TIMESTAMP: &str = "timestamp";
pub const DISCONNECT: &str = "disconnect";
pub const AUTO_RECEIPT: &str = "auto-receipt";
pub const ERROR_REPLY: &str = "error-reply";

/// Receive pipeline without any routing stages
pub fn core_recv_pipeline(trace: bool) -> Pipeline {
    let mut pipeline = Pipeline::new();
    if trace {
        pipeline.push(TraceFrames::inbound());
    }
    pipeline
        .push(ValidateRecv)
        .push(Handshake)
        .push(DisconnectRecv)
        .push(AutoReceipt)
        .push(ErrorReply);
    pipeline
}

/// Send pipeline
pub fn core_send_pipeline(trace: bool) -> Pipeline {
    let mut pipeline = Pipeline::new();
    if trace {
        pipeline.push(TraceFrames::outbound());
    }
    pipeline.push(ValidateSend);
    pipeline
}

/// ERROR frame describing `error`
pub fn error_frame(error: &Error) -> Frame {
    let mut headers = Headers::new();
    headers.set(HEADER_MESSAGE, error.summary());
    Frame::new(Command::Error, headers, error.to_string())
}

/// Send an ERROR frame describing `error` and consume it
fn reply_with_error(cx: &StageContext<'_>, error: Error) -> Result<Option<Frame>> {
    tracing::warn!(
        session_id = %cx.connection().id(),
        error = %error,
        "Replying with ERROR"
    );

    cx.reply(error_frame(&error))?;

    cx.registry().stats().error_reply();
    Ok(None)
}

/// Logs every frame passing through
#[derive(Debug)]
pub struct TraceFrames {
    direction: &'static str,
}

impl TraceFrames {
    pub fn inbound() -> Self {
        Self { direction: "recv" }
    }

    pub fn outbound() -> Self {
        Self { direction: "send" }
    }
}

impl Stage for TraceFrames {
    fn name(&self) -> &str {
        TRACE
    }

    fn on_frame(&self, cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
        let headers: Vec<String> = frame
            .headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        tracing::debug!(
            session_id = %cx.connection().id(),
            direction = self.direction,
            command = %frame.command,
            headers = ?headers,
            body_len = frame.body.len(),
            "Frame"
        );
        Ok(Some(frame))
    }
}

/// Only client commands may be received; also converts upstream errors
#[derive(Debug)]
pub struct ValidateRecv;

impl Stage for ValidateRecv {
    fn name(&self) -> &str {
        VALIDATE_RECV
    }

    fn handles_errors(&self) -> bool {
        true
    }

    fn on_frame(&self, _cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
        if frame.command.is_client_command() {
            Ok(Some(frame))
        } else {
            Err(Error::invalid(format!(
                "Invalid client command: {}",
                frame.command
            )))
        }
    }

    fn on_error(&self, cx: &StageContext<'_>, error: Error) -> Result<Option<Frame>> {
        reply_with_error(cx, error)
    }
}

/// Only server commands may be sent
#[derive(Debug)]
pub struct ValidateSend;

impl Stage for ValidateSend {
    fn name(&self) -> &str {
        VALIDATE_SEND
    }

    fn on_frame(&self, _cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
        if frame.command.is_server_command() {
            Ok(Some(frame))
        } else {
            Err(Error::invalid(format!(
                "Invalid server command: {}",
                frame.command
            )))
        }
    }
}

/// Enforces CONNECT before anything else and accepts every CONNECT
#[derive(Debug)]
pub struct Handshake;

impl Stage for Handshake {
    fn name(&self) -> &str {
        HANDSHAKE
    }

    fn on_frame(&self, cx: &StageContext<'_>, mut frame: Frame) -> Result<Option<Frame>> {
        let conn = cx.connection();
        if conn.is_connected() {
            return Ok(Some(frame));
        }

        if frame.command != Command::Connect {
            return Err(Error::protocol("Client must CONNECT"));
        }

        cx.reply(Frame::empty(Command::Connected).with_header(HEADER_SESSION, conn.id().as_str()))?;
        conn.set_connected(true);
        frame.handled = true;

        tracing::info!(
            session_id = %conn.id(),
            peer = ?conn.peer_addr(),
            "Client connected"
        );

        Ok(Some(frame))
    }
}

/// Stamps inbound frames with the receive time in epoch milliseconds
#[derive(Debug)]
pub struct Timestamp;

impl Stage for Timestamp {
    fn name(&self) -> &str {
        TIMESTAMP
    }

    fn on_frame(&self, _cx: &StageContext<'_>, mut frame: Frame) -> Result<Option<Frame>> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        frame.headers.set(HEADER_TIMESTAMP, millis.to_string());
        Ok(Some(frame))
    }
}

/// Flags the connection for a graceful close on DISCONNECT
///
/// The transport task closes it once the current frame has finished its
/// run, so a RECEIPT queued by a later stage is still written.
#[derive(Debug)]
pub struct DisconnectRecv;

impl Stage for DisconnectRecv {
    fn name(&self) -> &str {
        DISCONNECT
    }

    fn on_frame(&self, cx: &StageContext<'_>, mut frame: Frame) -> Result<Option<Frame>> {
        if frame.command == Command::Disconnect {
            tracing::debug!(session_id = %cx.connection().id(), "Client disconnecting");
            cx.connection().request_close();
            frame.handled = true;
        }
        Ok(Some(frame))
    }
}

/// Answers any frame carrying a `receipt` header
#[derive(Debug)]
pub struct AutoReceipt;

impl Stage for AutoReceipt {
    fn name(&self) -> &str {
        AUTO_RECEIPT
    }

    fn on_frame(&self, cx: &StageContext<'_>, frame: Frame) -> Result<Option<Frame>> {
        if let Some(receipt) = frame.header(HEADER_RECEIPT) {
            cx.reply(Frame::empty(Command::Receipt).with_header(HEADER_RECEIPT_ID, receipt))?;
        }
        Ok(Some(frame))
    }
}

/// Terminal error recovery
#[derive(Debug)]
pub struct ErrorReply;

impl Stage for ErrorReply {
    fn name(&self) -> &str {
        ERROR_REPLY
    }

    fn handles_frames(&self) -> bool {
        false
    }

    fn handles_errors(&self) -> bool {
        true
    }

    fn on_error(&self, cx: &StageContext<'_>, error: Error) -> Result<Option<Frame>> {
        reply_with_error(cx, error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::pipeline::{Flow, Outcome};
    use crate::protocol::{codec, RingBuffer};
    use crate::server::{BrokerConfig, ConnectionRegistry};
    use crate::session::{Connection, Outgoing};

    fn setup() -> (ConnectionRegistry, Arc<Connection>, mpsc::Receiver<Outgoing>) {
        let registry = ConnectionRegistry::new(BrokerConfig::default());
        let (conn, rx) = registry.register(None);
        (registry, conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outgoing>) -> Vec<Frame> {
        let mut ring = RingBuffer::new(4096);
        let mut frames = Vec::new();
        while let Ok(Outgoing::Data(bytes)) = rx.try_recv() {
            ring.write(&bytes).unwrap();
            while let Some(frame) = codec::decode(&mut ring).unwrap() {
                frames.push(frame);
            }
        }
        frames
    }

    fn run_recv(registry: &ConnectionRegistry, conn: &Arc<Connection>, frame: Frame) -> Outcome {
        let cx = StageContext::new(registry, conn);
        core_recv_pipeline(false).run(&cx, Flow::Frame(frame))
    }

    #[test]
    fn test_core_pipeline_order() {
        assert_eq!(
            core_recv_pipeline(true).stage_names(),
            vec![TRACE, VALIDATE_RECV, HANDSHAKE, DISCONNECT, AUTO_RECEIPT, ERROR_REPLY]
        );
        assert_eq!(core_send_pipeline(false).stage_names(), vec![VALIDATE_SEND]);
    }

    #[test]
    fn test_connect_replies_connected() {
        let (registry, conn, mut rx) = setup();

        let outcome = run_recv(&registry, &conn, Frame::empty(Command::Connect));
        assert!(matches!(outcome, Outcome::Delivered(ref f) if f.handled));
        assert!(conn.is_connected());

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].header("session"), Some(conn.id().as_str()));
    }

    #[test]
    fn test_command_before_connect_is_error_frame() {
        let (registry, conn, mut rx) = setup();

        let frame = Frame::empty(Command::Send).with_header("receipt", "r1");
        let outcome = run_recv(&registry, &conn, frame);
        assert!(matches!(outcome, Outcome::Consumed));
        assert!(!conn.is_connected());

        let frames = drain(&mut rx);
        // No RECEIPT for a rejected frame
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Error);
        assert_eq!(frames[0].header("message"), Some("Protocol error"));
        assert_eq!(&frames[0].body[..], b"Protocol error: Client must CONNECT");
    }

    #[test]
    fn test_invalid_client_command() {
        let (registry, conn, mut rx) = setup();

        run_recv(&registry, &conn, Frame::empty(Command::Message));
        let frames = drain(&mut rx);
        assert_eq!(frames[0].command, Command::Error);
        assert_eq!(frames[0].header("message"), Some("Invalid frame"));
    }

    #[test]
    fn test_malformed_error_becomes_error_frame() {
        let (registry, conn, mut rx) = setup();
        let cx = StageContext::new(&registry, &conn);

        let outcome = core_recv_pipeline(false).run(&cx, Flow::Error(Error::malformed("Invalid header: x")));
        assert!(matches!(outcome, Outcome::Consumed));

        let frames = drain(&mut rx);
        assert_eq!(frames[0].command, Command::Error);
        assert_eq!(frames[0].header("message"), Some("Malformed frame"));
    }

    #[test]
    fn test_auto_receipt() {
        let (registry, conn, mut rx) = setup();
        run_recv(&registry, &conn, Frame::empty(Command::Connect));
        drain(&mut rx);

        run_recv(&registry, &conn, Frame::empty(Command::Begin).with_header("receipt", "77"));
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[0].header("receipt-id"), Some("77"));
    }

    #[test]
    fn test_disconnect_requests_close() {
        let (registry, conn, mut rx) = setup();
        run_recv(&registry, &conn, Frame::empty(Command::Connect));

        let outcome = run_recv(
            &registry,
            &conn,
            Frame::empty(Command::Disconnect).with_header("receipt", "bye"),
        );
        assert!(matches!(outcome, Outcome::Delivered(ref f) if f.handled));
        assert!(conn.is_closing());

        let frames = drain(&mut rx);
        assert_eq!(frames.last().unwrap().command, Command::Receipt);
    }

    #[test]
    fn test_send_pipeline_rejects_client_command() {
        let (registry, conn, _rx) = setup();
        let err = registry
            .send_frame(&conn, Frame::empty(Command::Send))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_timestamp_stage() {
        let (registry, conn, _rx) = setup();
        let cx = StageContext::new(&registry, &conn);

        let frame = Timestamp.on_frame(&cx, Frame::empty(Command::Send)).unwrap().unwrap();
        let stamp: u128 = frame.header("timestamp").unwrap().parse().unwrap();
        assert!(stamp > 0);
    }
}
