//! State intervals
//!
//! An [`Interval`] records that one attribute held one value over a closed
//! time range. Intervals are immutable once created.

use crate::error::{Error, Result};
use crate::types::{Quark, Timestamp};
use crate::value::StateValue;
use serde::{Deserialize, Serialize};

/// Immutable `(quark, start, end, value)` record with `start <= end`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    start: Timestamp,
    end: Timestamp,
    quark: Quark,
    value: StateValue,
}

impl Interval {
    /// Create an interval
    ///
    /// # Errors
    ///
    /// `InvalidInterval` if `start > end`.
    pub fn new(start: Timestamp, end: Timestamp, quark: Quark, value: StateValue) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            quark,
            value,
        })
    }

    /// Start time (inclusive)
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End time (inclusive)
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Attribute this interval belongs to
    pub fn quark(&self) -> Quark {
        self.quark
    }

    /// Value held over the interval
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Consume the interval, keeping only its value
    pub fn into_value(self) -> StateValue {
        self.value
    }

    /// Whether `t` lies inside `[start, end]`
    pub fn intersects(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    /// Whether this interval overlaps `[from, to]`
    pub fn overlaps(&self, from: Timestamp, to: Timestamp) -> bool {
        self.start <= to && from <= self.end
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}], quark {}, value {}",
            self.start, self.end, self.quark, self.value
        )
    }
}
