//! File-backed interval backend
//!
//! [`HistoryTreeBackend`] wraps a [`HistoryTree`] behind a mutex so the
//! single writer and any number of readers can share it.
//!
//! ## Disposal
//!
//! `dispose()` releases the file handle. Every later operation fails with
//! `Disposed`, and an I/O error raised by a read racing with disposal is
//! reported as `Disposed` too.

use crate::history_tree::{HistoryTree, TreeConfig};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracestate_core::{
    Error, Interval, Quark, QuarkCondition, Result, StateHistoryBackend, TimeCondition, Timestamp,
};
use tracing::info;

/// Interval backend stored in a history tree file
#[derive(Debug)]
pub struct HistoryTreeBackend {
    ssid: String,
    start: Timestamp,
    path: PathBuf,
    tree: Mutex<HistoryTree>,
    disposed: AtomicBool,
}

impl HistoryTreeBackend {
    /// Create a new history file
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an unusable block layout, `Io` if the file cannot
    /// be created.
    pub fn create(ssid: impl Into<String>, config: &TreeConfig) -> Result<Self> {
        let tree = HistoryTree::create(config)?;
        Ok(Self::wrap(ssid.into(), tree))
    }

    /// Open a finished history file read-only
    ///
    /// # Errors
    ///
    /// `Corruption` if the file is not a history file or was built by another
    /// provider version.
    pub fn open_existing(
        ssid: impl Into<String>,
        path: &Path,
        provider_version: u32,
        node_cache_capacity: usize,
    ) -> Result<Self> {
        let tree = HistoryTree::open_existing(path, provider_version, node_cache_capacity)?;
        Ok(Self::wrap(ssid.into(), tree))
    }

    fn wrap(ssid: String, tree: HistoryTree) -> Self {
        Self {
            ssid,
            start: tree.start(),
            path: tree.path().to_path_buf(),
            tree: Mutex::new(tree),
            disposed: AtomicBool::new(false),
        }
    }

    /// File holding the history
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of node blocks allocated
    pub fn node_count(&self) -> usize {
        self.tree.lock().node_count()
    }

    /// Intervals dropped because they did not fit in a block
    pub fn skipped_intervals(&self) -> u64 {
        self.tree.lock().skipped_intervals()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Report I/O failures after disposal as `Disposed`
    fn settle<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(Error::Io(_)) if self.is_disposed() => Err(Error::Disposed),
            other => other,
        }
    }
}

impl StateHistoryBackend for HistoryTreeBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> Timestamp {
        self.start
    }

    fn end_time(&self) -> Timestamp {
        self.tree.lock().end()
    }

    fn insert_past_state(&self, interval: Interval) -> Result<()> {
        self.ensure_live()?;
        let result = self.tree.lock().insert(interval);
        self.settle(result)
    }

    fn extend_end_time(&self, t: Timestamp) {
        self.tree.lock().extend_end(t);
    }

    fn finished_building(&self, end: Timestamp) -> Result<()> {
        self.ensure_live()?;
        let result = self.tree.lock().finish(end);
        self.settle(result)
    }

    fn do_singular_query(&self, t: Timestamp, quark: Quark) -> Result<Option<Interval>> {
        self.ensure_live()?;
        let result = self.tree.lock().singular_query(t, quark);
        self.settle(result)
    }

    fn do_query(&self, buffer: &mut [Option<Interval>], t: Timestamp) -> Result<()> {
        self.ensure_live()?;
        let result = self.tree.lock().full_query(buffer, t);
        self.settle(result)
    }

    fn query_2d(
        &self,
        quarks: &QuarkCondition,
        times: &TimeCondition,
        reverse: bool,
    ) -> Result<Vec<Interval>> {
        self.ensure_live()?;
        let result = self.tree.lock().range_query(quarks, times, reverse);
        self.settle(result)
    }

    fn attribute_tree_location(&self) -> Option<(PathBuf, u64)> {
        if self.is_disposed() {
            return None;
        }
        let tree = self.tree.lock();
        Some((self.path.clone(), tree.tree_end_offset()))
    }

    fn attribute_tree_reader(&self) -> Option<(PathBuf, u64)> {
        let tree = self.tree.lock();
        if !tree.is_finished() || self.is_disposed() {
            return None;
        }
        Some((self.path.clone(), tree.tree_end_offset()))
    }

    fn remove_files(&self) -> Result<()> {
        self.dispose();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tree.lock().release();
        info!("Disposed history tree backend {} ({})", self.ssid, self.path.display());
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
