//! Client session handling
//!
//! This module provides:
//! - Session id minting
//! - The shared [`Connection`] handle and its outbound queue
//! - [`FrameReader`], the buffered decoder a connection's transport task drives

pub mod connection;
pub mod id;
pub mod reader;

pub use connection::{Connection, Outgoing};
pub use id::{SessionId, SessionIdGenerator};
pub use reader::FrameReader;
