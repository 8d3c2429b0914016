//! Subscription routing
//!
//! This module provides:
//! - [`DestinationPattern`], the wildcard matcher for subscription destinations
//! - [`Broker`], the subscription table, destination cache and fan-out
//! - The SUBSCRIBE/UNSUBSCRIBE and SEND pipeline stages

pub mod entry;
pub mod pattern;
pub mod stages;
pub mod store;
pub mod subscription;

pub use entry::DestinationEntry;
pub use pattern::DestinationPattern;
pub use stages::{SendRecv, SubscribeRecv};
pub use store::Broker;
pub use subscription::Subscription;
