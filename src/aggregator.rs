//! Quorum vote aggregation.
//!
//! This module tallies votes over a pre-collected batch of proposals and
//! returns the first value whose identifier accumulates `quorum` votes.
//! Despite the consensus vocabulary it is purely local: one ordered pass,
//! one fresh tally per call, no message exchange between nodes.
//!
//! The scan stops at the proposal whose vote brings its identifier to the
//! threshold, and that proposal's value is the result.  Earlier proposals
//! sharing the identifier may carry different values; they are not returned.

use crate::{proposal::Proposal, scan::TallyScan, tally::VoteTally};
use serde::Serialize;
use std::{fmt, num::NonZeroUsize};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised when configuring an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("invalid quorum size {0}: at least one vote is required")]
    /// The requested threshold was zero.
    InvalidQuorum(usize),
}

/// A validated, strictly positive vote threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quorum(NonZeroUsize);

impl Quorum {
    /// Validates `size`, rejecting zero.
    pub fn new(size: usize) -> Result<Self, QuorumError> {
        NonZeroUsize::new(size)
            .map(Self)
            .ok_or(QuorumError::InvalidQuorum(size))
    }

    /// Returns the threshold as a plain count.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Returns `true` once `votes` meets or exceeds the threshold.
    pub fn is_reached(self, votes: usize) -> bool {
        votes >= self.get()
    }
}

impl TryFrom<usize> for Quorum {
    type Error = QuorumError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<Quorum> for usize {
    fn from(quorum: Quorum) -> usize {
        quorum.get()
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Outcome of a scan, with enough context to explain where it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision<T> {
    /// An identifier reached quorum.
    Reached {
        /// Zero-based position of the triggering proposal.
        position: usize,
        /// Identifier that reached quorum.
        id: u64,
        /// Vote count at the moment quorum was reached.
        votes: usize,
        /// Timestamp carried by the triggering proposal.
        timestamp_ms: u64,
        /// Value carried by the triggering proposal.
        value: T,
    },
    /// The batch was exhausted without any identifier reaching quorum.
    NoQuorum {
        /// Number of proposals scanned.
        scanned: usize,
        /// Number of distinct identifiers seen.
        distinct_ids: usize,
        /// Identifier with the most votes and its count, if any were cast.
        leader: Option<(u64, usize)>,
    },
}

impl<T> Decision<T> {
    /// Returns `true` when quorum was reached.
    pub fn is_reached(&self) -> bool {
        matches!(self, Decision::Reached { .. })
    }

    /// Returns the winning value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Decision::Reached { value, .. } => Some(value),
            Decision::NoQuorum { .. } => None,
        }
    }
}

/// Single-pass quorum aggregator bound to a validated threshold.
///
/// # Examples
///
/// ```
/// use quorum_tally::{Proposal, QuorumAggregator};
///
/// let aggregator = QuorumAggregator::new(2).unwrap();
/// let votes = vec![
///     Proposal::new(1, "A", 0),
///     Proposal::new(2, "B", 1),
///     Proposal::new(1, "A", 2),
/// ];
/// assert_eq!(aggregator.aggregate_ref(&votes), Some(&"A"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumAggregator {
    quorum: Quorum,
}

impl QuorumAggregator {
    /// Creates an aggregator, failing fast on a zero threshold.
    pub fn new(quorum_size: usize) -> Result<Self, QuorumError> {
        Quorum::new(quorum_size).map(Self::from_quorum)
    }

    /// Creates an aggregator from an already validated threshold.
    pub fn from_quorum(quorum: Quorum) -> Self {
        Self { quorum }
    }

    /// Returns the configured threshold.
    pub fn quorum(&self) -> Quorum {
        self.quorum
    }

    /// Consumes proposals in order and returns the value of the proposal that
    /// first brings its identifier to quorum.
    ///
    /// Proposals after the triggering one are never pulled from the iterator.
    pub fn aggregate<T, I>(&self, proposals: I) -> Option<T>
    where
        I: IntoIterator<Item = Proposal<T>>,
    {
        self.run(proposals).into_value()
    }

    /// Borrowing form of [`aggregate`](Self::aggregate).
    pub fn aggregate_ref<'a, T>(&self, proposals: &'a [Proposal<T>]) -> Option<&'a T> {
        self.aggregate(proposals.iter().map(Proposal::borrowed))
    }

    /// Like [`aggregate_ref`](Self::aggregate_ref) but reports where the scan
    /// stopped.
    pub fn decide<'a, T>(&self, proposals: &'a [Proposal<T>]) -> Decision<&'a T> {
        self.run(proposals.iter().map(Proposal::borrowed))
    }

    /// Returns a lazy scan yielding one step per consumed proposal.
    pub fn scan<T, I>(&self, proposals: I) -> TallyScan<I::IntoIter>
    where
        I: IntoIterator<Item = Proposal<T>>,
    {
        TallyScan::new(proposals.into_iter(), self.quorum)
    }

    fn run<T, I>(&self, proposals: I) -> Decision<T>
    where
        I: IntoIterator<Item = Proposal<T>>,
    {
        let mut tally = VoteTally::new();
        let mut scanned = 0;
        for proposal in proposals {
            let position = scanned;
            scanned += 1;
            let votes = tally.record(proposal.id);
            trace!(position, id = proposal.id, votes, "vote recorded");
            if self.quorum.is_reached(votes) {
                debug!(
                    position,
                    id = proposal.id,
                    votes,
                    quorum = self.quorum.get(),
                    "quorum reached"
                );
                return Decision::Reached {
                    position,
                    id: proposal.id,
                    votes,
                    timestamp_ms: proposal.timestamp_ms,
                    value: proposal.value,
                };
            }
        }
        debug!(
            scanned,
            distinct_ids = tally.distinct(),
            quorum = self.quorum.get(),
            "no identifier reached quorum"
        );
        Decision::NoQuorum {
            scanned,
            distinct_ids: tally.distinct(),
            leader: tally.leader(),
        }
    }
}

/// Aggregates `proposals` against `quorum_size`.
///
/// Returns `Ok(None)` for an empty batch or when votes are split so that no
/// identifier reaches the threshold.  A zero threshold is rejected before any
/// proposal is consumed.
///
/// # Examples
///
/// ```
/// use quorum_tally::{aggregate, Proposal};
///
/// let split = vec![Proposal::new(1, "A", 0), Proposal::new(2, "B", 1)];
/// assert_eq!(aggregate(split, 2).unwrap(), None);
/// assert!(aggregate(Vec::<Proposal<&str>>::new(), 0).is_err());
/// ```
pub fn aggregate<T, I>(proposals: I, quorum_size: usize) -> Result<Option<T>, QuorumError>
where
    I: IntoIterator<Item = Proposal<T>>,
{
    Ok(QuorumAggregator::new(quorum_size)?.aggregate(proposals))
}

/// Borrowing form of [`aggregate`]; the batch is left untouched.
pub fn aggregate_ref<T>(
    proposals: &[Proposal<T>],
    quorum_size: usize,
) -> Result<Option<&T>, QuorumError> {
    Ok(QuorumAggregator::new(quorum_size)?.aggregate_ref(proposals))
}
