use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, str::FromStr};
use uuid::Uuid;

const TEMPORARY_PREFIX: &str = "temp-";

/// Identifier of a cached record.
///
/// Server-assigned identifiers are plain integers. Rows synthesized by an
/// optimistic create carry a [`RecordId::Temporary`] until the list is
/// refetched; the temporary id is never sent to the backend as if it were real.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum RecordId {
    /// Identifier assigned by the backend.
    Assigned(i64),
    /// Client-side placeholder rendered as `temp-<n>`.
    Temporary(u64),
}

impl RecordId {
    /// Returns true for client-side placeholders.
    #[must_use]
    pub const fn is_temporary(self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Server identifier, if assigned.
    #[must_use]
    pub const fn assigned(self) -> Option<i64> {
        match self {
            Self::Assigned(id) => Some(id),
            Self::Temporary(_) => None,
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Assigned(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned(id) => write!(f, "{id}"),
            Self::Temporary(n) => write!(f, "{TEMPORARY_PREFIX}{n}"),
        }
    }
}

/// Error returned when a record identifier cannot be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid record id '{0}'")]
pub struct ParseRecordIdError(String);

impl FromStr for RecordId {
    type Err = ParseRecordIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(counter) = trimmed.strip_prefix(TEMPORARY_PREFIX) {
            return counter
                .parse()
                .map(Self::Temporary)
                .map_err(|_| ParseRecordIdError(s.to_owned()));
        }
        trimmed
            .parse()
            .map(Self::Assigned)
            .map_err(|_| ParseRecordIdError(s.to_owned()))
    }
}

impl Serialize for RecordId {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Assigned(id) => s.serialize_i64(*id),
            Self::Temporary(_) => s.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Number(id) => Ok(Self::Assigned(id)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Monotonic allocator for temporary record identifiers.
#[derive(Debug)]
pub struct TemporaryIds {
    next: AtomicU64,
}

impl Default for TemporaryIds {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl TemporaryIds {
    /// Allocate the next `temp-<n>` identifier.
    pub fn next_id(&self) -> RecordId {
        RecordId::Temporary(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of a single mutation run (UUID v7).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct MutationId(pub Uuid);

impl MutationId {
    #[must_use]
    /// Generate a fresh mutation identifier.
    pub fn new() -> Self {
        // UUID version 7 keeps log lines for one session sortable by start time.
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
