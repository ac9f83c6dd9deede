//! Backend trait for interval storage
//!
//! The state system hands every finished interval to a
//! [`StateHistoryBackend`] and asks it for intervals that are no longer
//! ongoing. Backends are shared between the writer and any number of
//! readers, so every method takes `&self` and implementations use interior
//! mutability.

use crate::condition::{QuarkCondition, TimeCondition};
use crate::error::Result;
use crate::interval::Interval;
use crate::types::{Quark, Timestamp};
use std::path::PathBuf;

/// Storage for completed intervals
///
/// ## Contract
///
/// - Intervals arrive in non-decreasing order of end time per quark
/// - `end_time()` never decreases
/// - After `dispose()` every query fails with `Disposed`
///
/// ## Error Handling
///
/// | Condition | Error |
/// |-----------|-------|
/// | Query time outside `[start_time, end_time]` | `TimeRange` |
/// | Backend disposed | `Disposed` |
/// | Persisted block fails validation | `Corruption` |
/// | Underlying read/write failure | `Io` |
pub trait StateHistoryBackend: Send + Sync {
    /// Identifier of the state system this backend belongs to
    fn ssid(&self) -> &str;

    /// Earliest time covered
    fn start_time(&self) -> Timestamp;

    /// Latest time covered so far
    fn end_time(&self) -> Timestamp;

    /// Store one completed interval
    fn insert_past_state(&self, interval: Interval) -> Result<()>;

    /// Raise the end time to at least `t` without inserting anything
    fn extend_end_time(&self, t: Timestamp);

    /// Seal the backend at `end`
    ///
    /// No insertion is accepted afterwards.
    fn finished_building(&self, end: Timestamp) -> Result<()>;

    /// Find the interval of `quark` that covers `t`
    fn do_singular_query(&self, t: Timestamp, quark: Quark) -> Result<Option<Interval>>;

    /// Fill `buffer[quark]` with every stored interval covering `t`
    ///
    /// Slots already filled by the caller are overwritten only by a stored
    /// interval for the same quark.
    fn do_query(&self, buffer: &mut [Option<Interval>], t: Timestamp) -> Result<()>;

    /// Stored intervals matching both conditions, ordered by start time
    /// (descending when `reverse`)
    fn query_2d(
        &self,
        quarks: &QuarkCondition,
        times: &TimeCondition,
        reverse: bool,
    ) -> Result<Vec<Interval>>;

    /// Where the attribute tree snapshot should be written, as a file and a
    /// byte offset
    ///
    /// `None` for backends without a file.
    fn attribute_tree_location(&self) -> Option<(PathBuf, u64)>;

    /// Where an existing attribute tree snapshot can be read from
    fn attribute_tree_reader(&self) -> Option<(PathBuf, u64)>;

    /// Delete any files owned by the backend
    fn remove_files(&self) -> Result<()>;

    /// Release every resource held by the backend
    ///
    /// Idempotent.
    fn dispose(&self);

    /// Whether [`dispose`](Self::dispose) was called
    fn is_disposed(&self) -> bool;
}
