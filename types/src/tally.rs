//! Vote tallies.

use serde::{Deserialize, Serialize};

use crate::candidate::CandidateName;

/// Whether a tally is advisory or authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TallyKind {
    /// Polled while the election is active. Operator visibility only.
    Live,
    /// Read once from the frozen ledger state after close.
    Final,
}

/// Per-candidate vote counts, in ledger candidate order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    kind: TallyKind,
    entries: Vec<(CandidateName, u64)>,
}

impl VoteTally {
    pub fn new(kind: TallyKind, entries: Vec<(CandidateName, u64)>) -> Self {
        Self { kind, entries }
    }

    pub fn live(entries: Vec<(CandidateName, u64)>) -> Self {
        Self::new(TallyKind::Live, entries)
    }

    pub fn final_tally(entries: Vec<(CandidateName, u64)>) -> Self {
        Self::new(TallyKind::Final, entries)
    }

    pub fn kind(&self) -> TallyKind {
        self.kind
    }

    pub fn is_final(&self) -> bool {
        self.kind == TallyKind::Final
    }

    /// Votes for a candidate, or `None` if the candidate is not in the tally.
    pub fn votes_for(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.as_str() == name)
            .map(|(_, votes)| *votes)
    }

    pub fn entries(&self) -> &[(CandidateName, u64)] {
        &self.entries
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, votes)| votes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> CandidateName {
        CandidateName::from_ledger(s)
    }

    #[test]
    fn lookup_and_total() {
        let tally = VoteTally::final_tally(vec![(name("Alice"), 3), (name("Bob"), 1)]);
        assert_eq!(tally.votes_for("Alice"), Some(3));
        assert_eq!(tally.votes_for("Carol"), None);
        assert_eq!(tally.total(), 4);
        assert!(tally.is_final());
    }

    #[test]
    fn preserves_ledger_order() {
        let tally = VoteTally::live(vec![(name("Zed"), 0), (name("Amy"), 2)]);
        let order: Vec<_> = tally.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, ["Zed", "Amy"]);
    }
}
