//! Vote-bearing proposal records.
//!
//! A [`Proposal`] is the unit the aggregator counts.  Identifiers are not
//! unique: every repetition of an identifier is one more vote for it.  The
//! payload is opaque and the timestamp is carried for record-keeping only.

use serde::{Deserialize, Serialize};

/// A single vote: an identifier, an opaque payload and a creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proposal<T> {
    /// Identifier the vote is cast for.
    pub id: u64,
    /// Payload returned when this proposal triggers quorum.
    pub value: T,
    /// Milliseconds since a fixed epoch.  Never consulted by the tally.
    pub timestamp_ms: u64,
}

impl<T> Proposal<T> {
    /// Creates a proposal.
    pub fn new(id: u64, value: T, timestamp_ms: u64) -> Self {
        Self {
            id,
            value,
            timestamp_ms,
        }
    }

    /// Borrows the payload, keeping identifier and timestamp.
    pub fn borrowed(&self) -> Proposal<&T> {
        Proposal {
            id: self.id,
            value: &self.value,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Maps the payload while keeping identifier and timestamp.
    pub fn map<U, F>(self, f: F) -> Proposal<U>
    where
        F: FnOnce(T) -> U,
    {
        Proposal {
            id: self.id,
            value: f(self.value),
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Consumes the proposal and returns its payload.
    pub fn into_value(self) -> T {
        self.value
    }
}
