//! Destination patterns
//!
//! A subscription's destination is compiled into an anchored regex matched
//! against concrete destination names. Two wildcard tokens exist, and only
//! the first occurrence of each is special:
//!
//! | Token | Matches                                   | Example                       |
//! |-------|-------------------------------------------|-------------------------------|
//! | `.*`  | a dot and exactly one non-dot segment     | `/q/a.*` matches `/q/a.b`     |
//! | `>`   | one or more `.segment` groups             | `/t/a.>` matches `/t/a.b.c`   |
//!
//! A dot written directly in front of `>` belongs to the first group, so
//! `/t/a.>` and `/t/a>` compile to the same regex. Everything else,
//! including a bare `*` and any later wildcard token, matches itself
//! literally.

use std::fmt;

use regex::Regex;

use crate::error::{Error, Result};

/// Escaped form of `.*`
const ESCAPED_SEGMENT: &str = r"\.\*";
/// Escaped form of a literal dot
const ESCAPED_DOT: &str = r"\.";

const SEGMENT: &str = r"\.[^.]+";
const SUBTREE: &str = r"(?:\.[^.]+)+";

/// Compiled destination pattern
#[derive(Debug, Clone)]
pub struct DestinationPattern {
    source: String,
    regex: Regex,
    wildcard: bool,
}

impl DestinationPattern {
    /// Compile a destination string
    pub fn compile(source: &str) -> Result<Self> {
        let mut pattern = regex::escape(source);
        let mut wildcard = false;

        if pattern.contains(ESCAPED_SEGMENT) {
            pattern = pattern.replacen(ESCAPED_SEGMENT, SEGMENT, 1);
            wildcard = true;
        }

        if let Some(idx) = pattern.find('>') {
            let start = if pattern[..idx].ends_with(ESCAPED_DOT) {
                idx - ESCAPED_DOT.len()
            } else {
                idx
            };
            pattern.replace_range(start..idx + 1, SUBTREE);
            wildcard = true;
        }

        let regex = Regex::new(&format!("^{}$", pattern)).map_err(|e| {
            Error::protocol(format!("Invalid destination pattern {}: {}", source, e))
        })?;

        Ok(Self {
            source: source.to_string(),
            regex,
            wildcard,
        })
    }

    /// The destination string this pattern was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Whether `destination` matches the whole pattern
    pub fn matches(&self, destination: &str) -> bool {
        self.regex.is_match(destination)
    }
}

impl PartialEq for DestinationPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for DestinationPattern {}

impl fmt::Display for DestinationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
