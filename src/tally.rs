use std::collections::HashMap;

/// Running vote counts keyed by proposal identifier.
///
/// A tally belongs to exactly one aggregation call or scan and is dropped
/// with it.
#[derive(Debug, Default, Clone)]
pub(crate) struct VoteTally {
    counts: HashMap<u64, usize>,
}

impl VoteTally {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records one vote for `id` and returns its updated count.
    pub(crate) fn record(&mut self, id: u64) -> usize {
        let count = self.counts.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn votes(&self, id: u64) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Identifier with the most votes; ties go to the smaller identifier.
    pub(crate) fn leader(&self) -> Option<(u64, usize)> {
        self.counts
            .iter()
            .map(|(&id, &votes)| (id, votes))
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}
