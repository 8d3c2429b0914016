//! STOMP frame type
//!
//! A frame is a command, an ordered set of unique headers, and a body.
//! Header insertion order is preserved so frames serialize the way they
//! were built.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::constants::HEADER_CONTENT_LENGTH;

/// Frame command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    // Client commands
    Connect,
    Subscribe,
    Unsubscribe,
    Send,
    Begin,
    Commit,
    Abort,
    Ack,
    Disconnect,
    // Server commands
    Connected,
    Message,
    Receipt,
    Error,
    /// Anything else seen on the wire
    Other(String),
}

impl Command {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Command::Connect => "CONNECT",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Other(s) => s,
        }
    }

    /// Whether a client may send this command
    pub fn is_client_command(&self) -> bool {
        matches!(
            self,
            Command::Connect
                | Command::Subscribe
                | Command::Unsubscribe
                | Command::Begin
                | Command::Commit
                | Command::Abort
                | Command::Ack
                | Command::Disconnect
                | Command::Send
        )
    }

    /// Whether the server may send this command
    pub fn is_server_command(&self) -> bool {
        matches!(
            self,
            Command::Connected | Command::Message | Command::Receipt | Command::Error
        )
    }
}

impl FromStr for Command {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => Command::Other(other.to_string()),
        })
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(cmd) => cmd,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header map with unique keys
///
/// Setting an existing key replaces its value in place, keeping the
/// original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, overwriting any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}

/// One protocol message unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command
    pub command: Command,
    /// Headers in serialization order
    pub headers: Headers,
    /// Frame body (may be empty)
    pub body: Bytes,
    /// Set by a stage that fully processed the frame
    ///
    /// Later stages still see the frame; the flag only tells them it was
    /// routed.
    pub handled: bool,
}

impl Frame {
    /// Create a frame; `content-length` is set from the body
    pub fn new(command: impl Into<Command>, headers: Headers, body: impl Into<Bytes>) -> Self {
        let mut frame = Self {
            command: command.into(),
            headers,
            body: body.into(),
            handled: false,
        };
        frame.update_content_length();
        frame
    }

    /// Create a frame with no headers and an empty body
    pub fn empty(command: impl Into<Command>) -> Self {
        Self::new(command, Headers::new(), Bytes::new())
    }

    /// Builder-style header setter
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Replace the body, keeping `content-length` in step
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.update_content_length();
    }

    /// Set `content-length` to the current body length
    pub fn update_content_length(&mut self) {
        self.headers
            .set(HEADER_CONTENT_LENGTH, self.body.len().to_string());
    }
}

impl From<Command> for Frame {
    fn from(command: Command) -> Self {
        Frame::empty(command)
    }
}
