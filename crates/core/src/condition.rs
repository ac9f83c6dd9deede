//! Range conditions for 2D queries
//!
//! A 2D query selects intervals by a set of quarks and a set of times. Both
//! sets are expressed as a condition that is either a continuous inclusive
//! range or a discrete sorted set of points.

use crate::types::{Quark, Timestamp};

/// Condition over timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeCondition {
    /// Every time in `[min, max]`
    Continuous {
        /// Lower bound (inclusive)
        min: Timestamp,
        /// Upper bound (inclusive)
        max: Timestamp,
    },
    /// The listed times only (sorted, de-duplicated, non-empty)
    Discrete(Vec<Timestamp>),
}

impl TimeCondition {
    /// Continuous condition over `[a, b]` in either order
    pub fn continuous(a: Timestamp, b: Timestamp) -> Self {
        TimeCondition::Continuous {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Discrete condition over the given times
    ///
    /// Returns `None` if `times` is empty.
    pub fn discrete(times: impl IntoIterator<Item = Timestamp>) -> Option<Self> {
        let mut times: Vec<_> = times.into_iter().collect();
        if times.is_empty() {
            return None;
        }
        times.sort_unstable();
        times.dedup();
        Some(TimeCondition::Discrete(times))
    }

    /// Lowest time accepted
    pub fn min(&self) -> Timestamp {
        match self {
            TimeCondition::Continuous { min, .. } => *min,
            TimeCondition::Discrete(times) => times[0],
        }
    }

    /// Highest time accepted
    pub fn max(&self) -> Timestamp {
        match self {
            TimeCondition::Continuous { max, .. } => *max,
            TimeCondition::Discrete(times) => times[times.len() - 1],
        }
    }

    /// Whether `t` is accepted
    pub fn test(&self, t: Timestamp) -> bool {
        match self {
            TimeCondition::Continuous { min, max } => *min <= t && t <= *max,
            TimeCondition::Discrete(times) => times.binary_search(&t).is_ok(),
        }
    }

    /// Whether any accepted time lies inside `[from, to]`
    pub fn intersects(&self, from: Timestamp, to: Timestamp) -> bool {
        if from > to {
            return false;
        }
        match self {
            TimeCondition::Continuous { min, max } => *min <= to && from <= *max,
            TimeCondition::Discrete(times) => {
                let idx = times.partition_point(|t| *t < from);
                idx < times.len() && times[idx] <= to
            }
        }
    }
}

/// Condition over quarks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarkCondition {
    /// Every quark in `[min, max]`
    Continuous {
        /// Lower bound (inclusive)
        min: Quark,
        /// Upper bound (inclusive)
        max: Quark,
    },
    /// The listed quarks only (sorted, de-duplicated, non-empty)
    Discrete(Vec<Quark>),
}

impl QuarkCondition {
    /// Discrete condition over the given quarks
    ///
    /// Returns `None` if `quarks` is empty.
    pub fn discrete(quarks: impl IntoIterator<Item = Quark>) -> Option<Self> {
        let mut quarks: Vec<_> = quarks.into_iter().collect();
        if quarks.is_empty() {
            return None;
        }
        quarks.sort_unstable();
        quarks.dedup();
        Some(QuarkCondition::Discrete(quarks))
    }

    /// Lowest quark accepted
    pub fn min(&self) -> Quark {
        match self {
            QuarkCondition::Continuous { min, .. } => *min,
            QuarkCondition::Discrete(quarks) => quarks[0],
        }
    }

    /// Highest quark accepted
    pub fn max(&self) -> Quark {
        match self {
            QuarkCondition::Continuous { max, .. } => *max,
            QuarkCondition::Discrete(quarks) => quarks[quarks.len() - 1],
        }
    }

    /// Whether `quark` is accepted
    pub fn test(&self, quark: Quark) -> bool {
        match self {
            QuarkCondition::Continuous { min, max } => *min <= quark && quark <= *max,
            QuarkCondition::Discrete(quarks) => quarks.binary_search(&quark).is_ok(),
        }
    }
}
