//! STOMP message broker
//!
//! A broker for a STOMP-style text protocol: clients CONNECT, SUBSCRIBE to
//! destinations, SEND messages, and receive MESSAGE, RECEIPT and ERROR
//! frames.
//!
//! ```text
//!   bytes ─► FrameReader ─► receive pipeline ─────────────► Broker
//!                           validate, handshake,            subscribe / publish
//!                           route, receipt, error-reply          │
//!                                                                ▼
//!   bytes ◄─ outbound queue ◄─ encode ◄─ send pipeline ◄─── MESSAGE per subscriber
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stomp_broker::{BrokerConfig, StompServer};
//!
//! # async fn run() -> stomp_broker::Result<()> {
//! let config = BrokerConfig::default().strict(true);
//! let server = StompServer::new(config);
//! server.run().await
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use broker::{Broker, DestinationPattern};
pub use error::{Error, Result};
pub use protocol::{Command, Frame, Headers};
pub use server::{BrokerConfig, ConnectionEvent, ConnectionObserver, ConnectionRegistry, StompServer};
pub use session::{Connection, SessionId};
pub use stats::StatsSnapshot;
