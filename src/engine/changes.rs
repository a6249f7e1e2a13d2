//! Aggregate change counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::deploy::StepOp;

/// Number of counted steps per operation kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceChanges(BTreeMap<StepOp, usize>);

impl ResourceChanges {
    /// Creates an empty summary.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Counts one more step of the given kind.
    pub fn increment(&mut self, op: StepOp) {
        *self.0.entry(op).or_insert(0) += 1;
    }

    /// Returns the count for an operation kind.
    #[must_use]
    pub fn get(&self, op: StepOp) -> usize {
        self.0.get(&op).copied().unwrap_or(0)
    }

    /// Returns the sum of all counts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// Returns true if any step other than `Same` was counted.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.0
            .iter()
            .filter(|(op, _)| **op != StepOp::Same)
            .map(|(_, count)| count)
            .sum::<usize>()
            > 0
    }

    /// Returns true if nothing was counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(op, count)` pairs in operation order.
    pub fn iter(&self) -> impl Iterator<Item = (StepOp, usize)> + '_ {
        self.0.iter().map(|(op, count)| (*op, *count))
    }
}

impl From<BTreeMap<StepOp, usize>> for ResourceChanges {
    fn from(counts: BTreeMap<StepOp, usize>) -> Self {
        Self(counts)
    }
}

impl FromIterator<(StepOp, usize)> for ResourceChanges {
    fn from_iter<I: IntoIterator<Item = (StepOp, usize)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
