//! Object key construction.
//!
//! Every stored object lives under `{tenant}/{company}/{category}/{file_id}`.
//! Tenant isolation comes entirely from that prefix, so segments are validated
//! here rather than trusted to callers.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

pub const DELIMITER: char = '/';

const SEGMENT_NAMES: [&str; 4] = ["tenant_id", "company", "category", "file_id"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Invalid key segment '{segment}': {reason}")]
    InvalidKeySegment {
        segment: &'static str,
        reason: &'static str,
    },
    #[error("Object key must have exactly 4 segments, got {0}")]
    SegmentCount(usize),
}

/// Canonical, validated object key.
///
/// Keys are derived on demand and never persisted on their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    path: String,
}

impl ObjectKey {
    pub fn build(
        tenant_id: &str,
        company: &str,
        category: &str,
        file_id: &str,
    ) -> Result<Self, KeyError> {
        let segments = [tenant_id, company, category, file_id];
        for (name, value) in SEGMENT_NAMES.into_iter().zip(segments) {
            validate_segment(name, value)?;
        }

        Ok(Self {
            path: segments.join("/"),
        })
    }

    /// Parse a slash-delimited key, applying the same rules as [`ObjectKey::build`].
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let segments: Vec<&str> = raw.split(DELIMITER).collect();
        match segments.as_slice() {
            [tenant_id, company, category, file_id] => {
                Self::build(tenant_id, company, category, file_id)
            }
            _ => Err(KeyError::SegmentCount(segments.len())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(DELIMITER)
    }

    pub fn tenant_id(&self) -> &str {
        self.segment(0)
    }

    pub fn company(&self) -> &str {
        self.segment(1)
    }

    pub fn category(&self) -> &str {
        self.segment(2)
    }

    pub fn file_id(&self) -> &str {
        self.segment(3)
    }

    /// True if this key sits under `prefix` (a plain string prefix, as object stores treat it).
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.path.starts_with(prefix)
    }

    fn segment(&self, index: usize) -> &str {
        // Validated at construction: exactly four segments.
        self.segments().nth(index).unwrap_or_default()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

impl Serialize for ObjectKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

fn validate_segment(segment: &'static str, value: &str) -> Result<(), KeyError> {
    let invalid = |reason| Err(KeyError::InvalidKeySegment { segment, reason });

    if value.is_empty() {
        return invalid("must not be empty");
    }
    if value.contains(DELIMITER) {
        return invalid("must not contain '/'");
    }
    if value.contains('\\') {
        return invalid("must not contain '\\'");
    }
    if value.trim() != value {
        return invalid("must not have leading or trailing whitespace");
    }
    if value.chars().any(char::is_control) {
        return invalid("must not contain control characters");
    }
    if value == "." || value == ".." {
        return invalid("must not be a relative path component");
    }

    Ok(())
}
