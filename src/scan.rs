//! Incremental quorum scan.
//!
//! [`TallyScan`] performs the same ordered pass as
//! [`QuorumAggregator::aggregate`](crate::QuorumAggregator::aggregate) but
//! yields a [`ScanStep`] for every proposal it consumes, so a caller can
//! observe partial results or spread a very large batch over several turns
//! of an outer loop.
use crate::{aggregator::Quorum, proposal::Proposal, tally::VoteTally};
use serde::Serialize;
use std::fmt;
use std::iter::FusedIterator;

/// Partial result produced after one proposal has been counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStep<T> {
    /// Zero-based position of the proposal in the batch.
    pub position: usize,
    /// Identifier the vote was cast for.
    pub id: u64,
    /// Running vote count for `id` including this proposal.
    pub votes: usize,
    /// Timestamp carried by the proposal.
    pub timestamp_ms: u64,
    /// Payload carried by the proposal.
    pub value: T,
    /// Whether this vote brought `id` to quorum.
    pub reached: bool,
}

/// Lazy scan over a proposal iterator.
///
/// The scan ends after the step that reaches quorum; nothing further is
/// pulled from the underlying iterator.
pub struct TallyScan<I> {
    inner: I,
    quorum: Quorum,
    tally: VoteTally,
    position: usize,
    finished: bool,
}

impl<I> fmt::Debug for TallyScan<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TallyScan")
            .field("quorum", &self.quorum)
            .field("position", &self.position)
            .field("distinct_ids", &self.tally.distinct())
            .field("finished", &self.finished)
            .finish()
    }
}

impl<I> TallyScan<I> {
    pub(crate) fn new(inner: I, quorum: Quorum) -> Self {
        Self {
            inner,
            quorum,
            tally: VoteTally::new(),
            position: 0,
            finished: false,
        }
    }

    /// Votes counted so far for `id`.
    pub fn votes(&self, id: u64) -> usize {
        self.tally.votes(id)
    }

    /// Number of proposals consumed so far.
    pub fn consumed(&self) -> usize {
        self.position
    }

    /// Returns `true` once quorum was reached or the input ran out.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<T, I> Iterator for TallyScan<I>
where
    I: Iterator<Item = Proposal<T>>,
{
    type Item = ScanStep<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(proposal) = self.inner.next() else {
            self.finished = true;
            return None;
        };
        let votes = self.tally.record(proposal.id);
        let reached = self.quorum.is_reached(votes);
        let step = ScanStep {
            position: self.position,
            id: proposal.id,
            votes,
            timestamp_ms: proposal.timestamp_ms,
            value: proposal.value,
            reached,
        };
        self.position += 1;
        self.finished = reached;
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, self.inner.size_hint().1)
        }
    }
}

impl<T, I> FusedIterator for TallyScan<I> where I: Iterator<Item = Proposal<T>> {}

#[cfg(test)]
mod tests {
    use crate::{Proposal, QuorumAggregator};
    use proptest::prelude::*;

    #[test]
    fn test_steps_report_running_counts() {
        let aggregator = QuorumAggregator::new(2).unwrap();
        let votes = vec![
            Proposal::new(1, 'a', 10),
            Proposal::new(2, 'b', 11),
            Proposal::new(1, 'c', 12),
            Proposal::new(2, 'd', 13),
        ];
        let steps: Vec<_> = aggregator.scan(votes).collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps.iter().map(|s| (s.id, s.votes)).collect::<Vec<_>>(),
            vec![(1, 1), (2, 1), (1, 2)]
        );
        assert!(!steps[0].reached && !steps[1].reached);
        assert!(steps[2].reached);
        assert_eq!(steps[2].value, 'c');
        assert_eq!(steps[2].timestamp_ms, 12);
    }

    #[test]
    fn test_scan_is_fused_after_quorum() {
        let aggregator = QuorumAggregator::new(1).unwrap();
        let votes = vec![Proposal::new(3, (), 0), Proposal::new(4, (), 0)];
        let mut scan = aggregator.scan(votes);
        assert!(scan.next().unwrap().reached);
        assert!(scan.is_finished());
        assert_eq!(scan.consumed(), 1);
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());
        assert_eq!(scan.size_hint(), (0, Some(0)));
    }

    #[test]
    fn test_scan_exposes_partial_tally() {
        let aggregator = QuorumAggregator::new(5).unwrap();
        let votes = vec![
            Proposal::new(8, 0u8, 0),
            Proposal::new(8, 1u8, 0),
            Proposal::new(2, 2u8, 0),
        ];
        let mut scan = aggregator.scan(votes);
        scan.next();
        scan.next();
        assert_eq!(scan.votes(8), 2);
        assert_eq!(scan.votes(2), 0);
        assert!(!scan.is_finished());
        scan.next();
        assert!(scan.next().is_none());
        assert!(scan.is_finished());
        assert_eq!(scan.consumed(), 3);
    }

    proptest! {
        #[test]
        fn prop_scan_agrees_with_aggregate(
            votes in prop::collection::vec((0u64..5, any::<i16>()), 0..48),
            quorum in 1usize..6,
        ) {
            let aggregator = QuorumAggregator::new(quorum).unwrap();
            let proposals: Vec<_> = votes
                .iter()
                .map(|&(id, value)| Proposal::new(id, value, 0))
                .collect();
            let steps: Vec<_> = aggregator.scan(proposals.clone()).collect();
            let from_scan = steps.iter().find(|s| s.reached).map(|s| s.value);
            prop_assert_eq!(from_scan, aggregator.aggregate(proposals));
            prop_assert!(steps.iter().filter(|s| s.reached).count() <= 1);
            if from_scan.is_some() {
                prop_assert!(steps.last().unwrap().reached);
            } else {
                prop_assert_eq!(steps.len(), votes.len());
            }
        }
    }
}
