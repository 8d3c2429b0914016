//! Session identifiers
//!
//! Ids are the hex SHA-256 of a per-registry random seed followed by a
//! counter. They only need to be unique within one registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Opaque identifier assigned to a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Mints session ids for one registry
#[derive(Debug)]
pub struct SessionIdGenerator {
    seed: String,
    counter: AtomicU64,
}

impl SessionIdGenerator {
    /// Create a generator with a fresh random seed
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let material = format!("{}{}{}", nanos, std::process::id(), rand::random::<u64>());

        Self {
            seed: hex::encode(Sha256::digest(material.as_bytes())),
            counter: AtomicU64::new(0),
        }
    }

    /// Next unique id
    pub fn next_id(&self) -> SessionId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(format!("{}{}", self.seed, n).as_bytes());
        SessionId(hex::encode(digest))
    }

    /// Number of ids minted so far
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
