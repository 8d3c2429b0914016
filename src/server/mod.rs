//! STOMP server implementation
//!
//! This module provides:
//! - [`BrokerConfig`], the builder-style configuration
//! - [`ConnectionRegistry`], which owns connections and drives their pipelines
//! - [`StompServer`], the TCP accept loop
//! - Connection lifecycle events and observers

pub mod config;
pub mod events;
pub mod listener;
pub mod registry;

pub use config::BrokerConfig;
pub use events::{ConnectionEvent, ConnectionObserver};
pub use listener::StompServer;
pub use registry::ConnectionRegistry;
