//! Dotted version identifiers and their ordering.
//!
//! Versions are sequences of unsigned integers ("1.10.2"). A leading
//! non-numeric prefix such as `v` is ignored, and the shorter of two
//! versions is padded with zeros, so `1.2` and `1.2.0` are the same release.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,

    #[error("invalid segment '{segment}' in version '{input}'")]
    InvalidSegment { input: String, segment: String },
}

/// Outcome of comparing `a` against `b`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Greater,
    Less,
    Equal,
}

impl From<Ordering> for Comparison {
    fn from(ord: Ordering) -> Self {
        match ord {
            Ordering::Greater => Comparison::Greater,
            Ordering::Less => Comparison::Less,
            Ordering::Equal => Comparison::Equal,
        }
    }
}

/// Parsed dotted version
#[derive(Debug, Clone)]
pub struct VersionIdentifier {
    segments: Vec<u64>,
}

impl VersionIdentifier {
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let numeric = trimmed.trim_start_matches(|c: char| !c.is_ascii_digit());
        if numeric.is_empty() {
            return Err(if trimmed.is_empty() {
                VersionParseError::Empty
            } else {
                VersionParseError::InvalidSegment {
                    input: input.to_string(),
                    segment: trimmed.to_string(),
                }
            });
        }

        let segments = numeric
            .split('.')
            .map(|seg| {
                seg.parse::<u64>()
                    .map_err(|_| VersionParseError::InvalidSegment {
                        input: input.to_string(),
                        segment: seg.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    fn padded_cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for VersionIdentifier {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl PartialEq for VersionIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.padded_cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionIdentifier {}

impl PartialOrd for VersionIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.padded_cmp(other)
    }
}

/// Compare two version strings, failing if either does not parse
pub fn compare_strict(a: &str, b: &str) -> Result<Comparison, VersionParseError> {
    let a = VersionIdentifier::parse(a)?;
    let b = VersionIdentifier::parse(b)?;
    Ok(a.cmp(&b).into())
}

/// Compare two version strings, best effort.
///
/// When either side is not a dotted-integer version the result is `Equal`
/// for identical strings and `Greater` otherwise. That fallback is not an
/// order: only use it to answer "is `a` newer than `b`".
pub fn compare(a: &str, b: &str) -> Comparison {
    match compare_strict(a, b) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("Falling back to string comparison ({}): '{}' vs '{}'", e, a, b);
            if a == b {
                Comparison::Equal
            } else {
                Comparison::Greater
            }
        }
    }
}
