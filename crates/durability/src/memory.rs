//! In-memory interval backend
//!
//! Keeps every interval in per-quark vectors sorted by end time. Used for
//! ephemeral stores that never need to be reopened.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracestate_core::{
    Error, Interval, Quark, QuarkCondition, Result, StateHistoryBackend, TimeCondition, Timestamp,
};

#[derive(Debug, Default)]
struct MemoryHistory {
    by_quark: FxHashMap<Quark, Vec<Interval>>,
    end: Timestamp,
    finished: bool,
}

impl MemoryHistory {
    fn find(&self, t: Timestamp, quark: Quark) -> Option<&Interval> {
        let intervals = self.by_quark.get(&quark)?;
        let first = intervals.partition_point(|i| i.end() < t);
        intervals[first..].iter().find(|i| i.start() <= t)
    }
}

/// Interval backend without files
#[derive(Debug)]
pub struct InMemoryBackend {
    ssid: String,
    start: Timestamp,
    inner: RwLock<MemoryHistory>,
    disposed: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend covering times from `start`
    pub fn new(ssid: impl Into<String>, start: Timestamp) -> Self {
        Self {
            ssid: ssid.into(),
            start,
            inner: RwLock::new(MemoryHistory {
                end: start,
                ..Default::default()
            }),
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of stored intervals
    pub fn interval_count(&self) -> usize {
        self.inner.read().by_quark.values().map(Vec::len).sum()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn check_time(&self, t: Timestamp, end: Timestamp) -> Result<()> {
        if t < self.start || t > end {
            return Err(Error::TimeRange {
                time: t,
                start: self.start,
                end,
            });
        }
        Ok(())
    }
}

impl StateHistoryBackend for InMemoryBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> Timestamp {
        self.start
    }

    fn end_time(&self) -> Timestamp {
        self.inner.read().end
    }

    fn insert_past_state(&self, interval: Interval) -> Result<()> {
        self.ensure_live()?;
        if interval.start() < self.start {
            return Err(Error::TimeRange {
                time: interval.start(),
                start: self.start,
                end: self.end_time(),
            });
        }
        let mut inner = self.inner.write();
        if inner.finished {
            return Err(Error::Internal(
                "history is finished, insertion refused".to_string(),
            ));
        }
        inner.end = inner.end.max(interval.end());
        let intervals = inner.by_quark.entry(interval.quark()).or_default();
        let pos = intervals.partition_point(|i| i.end() <= interval.end());
        intervals.insert(pos, interval);
        Ok(())
    }

    fn extend_end_time(&self, t: Timestamp) {
        let mut inner = self.inner.write();
        inner.end = inner.end.max(t);
    }

    fn finished_building(&self, end: Timestamp) -> Result<()> {
        self.ensure_live()?;
        let mut inner = self.inner.write();
        inner.end = inner.end.max(end);
        inner.finished = true;
        Ok(())
    }

    fn do_singular_query(&self, t: Timestamp, quark: Quark) -> Result<Option<Interval>> {
        self.ensure_live()?;
        let inner = self.inner.read();
        self.check_time(t, inner.end)?;
        Ok(inner.find(t, quark).cloned())
    }

    fn do_query(&self, buffer: &mut [Option<Interval>], t: Timestamp) -> Result<()> {
        self.ensure_live()?;
        let inner = self.inner.read();
        self.check_time(t, inner.end)?;
        for (quark, slot) in buffer.iter_mut().enumerate() {
            if let Some(found) = inner.find(t, Quark::from_index(quark)) {
                *slot = Some(found.clone());
            }
        }
        Ok(())
    }

    fn query_2d(
        &self,
        quarks: &QuarkCondition,
        times: &TimeCondition,
        reverse: bool,
    ) -> Result<Vec<Interval>> {
        self.ensure_live()?;
        let inner = self.inner.read();
        let mut out: Vec<Interval> = inner
            .by_quark
            .iter()
            .filter(|(quark, _)| quarks.test(**quark))
            .flat_map(|(_, intervals)| {
                let first = intervals.partition_point(|i| i.end() < times.min());
                intervals[first..]
                    .iter()
                    .filter(move |i| times.intersects(i.start(), i.end()))
            })
            .cloned()
            .collect();
        out.sort_by_key(|i| (i.start(), i.quark(), i.end()));
        if reverse {
            out.reverse();
        }
        Ok(out)
    }

    fn attribute_tree_location(&self) -> Option<(PathBuf, u64)> {
        None
    }

    fn attribute_tree_reader(&self) -> Option<(PathBuf, u64)> {
        None
    }

    fn remove_files(&self) -> Result<()> {
        self.dispose();
        Ok(())
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.inner.write().by_quark.clear();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
