//! History tree construction and traversal
//!
//! The tree is built append-mostly. Only the latest branch (root down to the
//! current leaf) is open and held in memory; every other node is closed,
//! written to its block and only read back on demand through a bounded
//! cache.
//!
//! ## Insertion
//!
//! 1. Start at the current leaf
//! 2. Climb the latest branch until a node starts at or before the interval
//! 3. If that node is full, split: close the nodes below its parent at the
//!    current tree end and open fresh siblings starting right after it
//! 4. If the root has no room for another child, grow a new root above it

use super::header::{FileHeader, HEADER_SIZE};
use super::node::{interval_size, HistoryNode, NodeKind, NodeLayout, NO_PARENT};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracestate_core::{
    Error, Interval, Quark, QuarkCondition, Result, TimeCondition, Timestamp,
};
use tracing::{debug, info, warn};

/// Parameters of a new history tree
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// File holding the tree
    pub path: PathBuf,
    /// Size of one node block in bytes
    pub block_size: u32,
    /// Maximum children per core node
    pub max_children: u32,
    /// Version of the state provider building the tree
    pub provider_version: u32,
    /// Earliest time the tree covers
    pub start_time: Timestamp,
    /// Number of closed nodes kept decoded in memory
    pub node_cache_capacity: usize,
}

impl TreeConfig {
    /// Configuration with the default block size (64 KiB) and fan-out (50)
    pub fn new(path: impl Into<PathBuf>, start_time: Timestamp) -> Self {
        Self {
            path: path.into(),
            block_size: 64 * 1024,
            max_children: 50,
            provider_version: 0,
            start_time,
            node_cache_capacity: 256,
        }
    }

    fn layout(&self) -> NodeLayout {
        NodeLayout {
            block_size: self.block_size as usize,
            max_children: self.max_children as usize,
        }
    }
}

// ============================================================================
// Node cache
// ============================================================================

/// Bounded FIFO cache of decoded closed nodes
#[derive(Debug)]
struct NodeCache {
    capacity: usize,
    nodes: FxHashMap<i32, Arc<HistoryNode>>,
    order: VecDeque<i32>,
}

impl NodeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: FxHashMap::default(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, seq: i32) -> Option<Arc<HistoryNode>> {
        self.nodes.get(&seq).cloned()
    }

    fn insert(&mut self, node: Arc<HistoryNode>) {
        if self.capacity == 0 {
            return;
        }
        while self.nodes.len() >= self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.nodes.remove(&old);
                }
                None => break,
            }
        }
        self.order.push_back(node.seq());
        self.nodes.insert(node.seq(), node);
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.order.clear();
    }
}

/// Borrowed branch node or shared stored node
pub(crate) enum NodeRef<'a> {
    Branch(&'a HistoryNode),
    Stored(Arc<HistoryNode>),
}

impl Deref for NodeRef<'_> {
    type Target = HistoryNode;

    fn deref(&self) -> &HistoryNode {
        match self {
            NodeRef::Branch(node) => node,
            NodeRef::Stored(node) => node,
        }
    }
}

// ============================================================================
// HistoryTree
// ============================================================================

/// Block-structured interval tree stored in one file
#[derive(Debug)]
pub struct HistoryTree {
    path: PathBuf,
    file: Option<File>,
    layout: NodeLayout,
    provider_version: u32,
    start: Timestamp,
    end: Timestamp,
    /// Root first, current leaf last; empty once the tree is finished
    latest_branch: Vec<HistoryNode>,
    root_seq: i32,
    node_count: i32,
    finished: bool,
    skipped: u64,
    cache: NodeCache,
}

impl HistoryTree {
    /// Create a new tree, truncating any file at `config.path`
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the block cannot hold a core node and one interval
    /// - `Io` if the file cannot be created
    pub fn create(config: &TreeConfig) -> Result<Self> {
        let layout = config.layout();
        layout.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&config.path)?;

        let root = HistoryNode::new(NodeKind::Leaf, 0, NO_PARENT, config.start_time);
        let mut tree = Self {
            path: config.path.clone(),
            file: Some(file),
            layout,
            provider_version: config.provider_version,
            start: config.start_time,
            end: config.start_time,
            latest_branch: vec![root],
            root_seq: 0,
            node_count: 1,
            finished: false,
            skipped: 0,
            cache: NodeCache::new(config.node_cache_capacity),
        };
        tree.write_header()?;
        info!(
            "Created history tree at {} (block size {}, max children {})",
            config.path.display(),
            layout.block_size,
            layout.max_children
        );
        Ok(tree)
    }

    /// Open a finished tree read-only
    ///
    /// # Errors
    ///
    /// `Corruption` if the header is invalid or was written by a different
    /// provider version.
    pub fn open_existing(path: &Path, provider_version: u32, cache_capacity: usize) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = FileHeader::read_from(&mut file)?;
        if header.provider_version != provider_version {
            return Err(Error::Corruption(format!(
                "history file built by provider version {}, expected {}",
                header.provider_version, provider_version
            )));
        }
        let layout = NodeLayout {
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
        };
        layout.validate().map_err(|e| Error::Corruption(e.to_string()))?;
        if header.node_count == 0 || header.root_seq >= header.node_count {
            return Err(Error::Corruption(format!(
                "root node {} outside of {} nodes",
                header.root_seq, header.node_count
            )));
        }

        info!(
            "Opened history tree at {} ({} nodes, [{}, {}])",
            path.display(),
            header.node_count,
            header.start,
            header.end
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            layout,
            provider_version,
            start: header.start,
            end: header.end,
            latest_branch: Vec::new(),
            root_seq: header.root_seq as i32,
            node_count: header.node_count as i32,
            finished: true,
            skipped: 0,
            cache: NodeCache::new(cache_capacity),
        })
    }

    /// File holding the tree
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Earliest time covered
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Latest time covered
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Number of nodes allocated so far
    pub fn node_count(&self) -> usize {
        self.node_count as usize
    }

    /// Depth of the latest branch (0 once finished)
    pub fn branch_depth(&self) -> usize {
        self.latest_branch.len()
    }

    /// Intervals dropped because they could not fit in any node
    pub fn skipped_intervals(&self) -> u64 {
        self.skipped
    }

    /// Whether building is over
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Byte offset right after the last node block
    pub fn tree_end_offset(&self) -> u64 {
        HEADER_SIZE + self.node_count as u64 * self.layout.block_size as u64
    }

    /// Raise the tree end without inserting anything
    pub fn extend_end(&mut self, t: Timestamp) {
        self.end = self.end.max(t);
    }

    /// Release the file; later reads fail with `Disposed`
    pub fn release(&mut self) {
        self.file = None;
        self.cache.clear();
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert one interval
    ///
    /// Intervals too large for an empty node are skipped with a warning.
    ///
    /// # Errors
    ///
    /// - `TimeRange` if the interval starts before the tree
    /// - `Internal` if the tree is finished
    pub fn insert(&mut self, interval: Interval) -> Result<()> {
        if self.finished {
            return Err(Error::Internal(
                "history tree is finished, insertion refused".to_string(),
            ));
        }
        if interval.start() < self.start {
            return Err(Error::TimeRange {
                time: interval.start(),
                start: self.start,
                end: self.end,
            });
        }
        let size = match interval_size(&interval) {
            Some(size) if size <= self.layout.max_interval_size() => size,
            _ => {
                self.skipped += 1;
                warn!(
                    "Skipping interval of quark {} [{}, {}]: too large for a {} byte block",
                    interval.quark(),
                    interval.start(),
                    interval.end(),
                    self.layout.block_size
                );
                return Ok(());
            }
        };

        let mut idx = self.latest_branch.len() - 1;
        loop {
            let node = &self.latest_branch[idx];
            if interval.start() < node.start() {
                if idx == 0 {
                    return Err(Error::Internal(format!(
                        "interval start {} precedes root start {}",
                        interval.start(),
                        node.start()
                    )));
                }
                idx -= 1;
                continue;
            }
            if node.free_space(&self.layout) < size {
                self.add_sibling(idx)?;
                idx = self.latest_branch.len() - 1;
                continue;
            }
            break;
        }

        self.end = self.end.max(interval.end());
        self.latest_branch[idx].add_interval(interval, size);
        Ok(())
    }

    fn new_node(&mut self, kind: NodeKind, parent: i32, start: Timestamp) -> HistoryNode {
        let node = HistoryNode::new(kind, self.node_count, parent, start);
        self.node_count += 1;
        node
    }

    /// Close branch node `i` at `end`, update its parent's entry and write it
    fn close_branch_node(&mut self, i: usize, end: Timestamp) -> Result<()> {
        self.latest_branch[i].close(end);
        let node = &self.latest_branch[i];
        let (seq, closed_end) = (node.seq(), node.end());
        let block = node.encode(&self.layout)?;
        if i > 0 {
            self.latest_branch[i - 1].update_child_end(seq, closed_end);
        }
        self.write_block(seq, &block)
    }

    fn add_sibling(&mut self, mut idx: usize) -> Result<()> {
        loop {
            if idx == 0 {
                return self.add_new_root();
            }
            if self.latest_branch[idx - 1].children().len() < self.layout.max_children {
                break;
            }
            idx -= 1;
        }

        let split = self.end;
        // Close from the bottom up so parent entries see the final ends
        for i in (idx..self.latest_branch.len()).rev() {
            self.close_branch_node(i, split)?;
        }
        for i in idx..self.latest_branch.len() {
            let kind = self.latest_branch[i].kind();
            let parent_seq = self.latest_branch[i - 1].seq();
            let fresh = self.new_node(kind, parent_seq, split + 1);
            self.latest_branch[i - 1].link_child(&fresh);
            self.latest_branch[i] = fresh;
        }
        debug!(
            "Split history tree at {} from depth {} ({} nodes)",
            split, idx, self.node_count
        );
        Ok(())
    }

    fn add_new_root(&mut self) -> Result<()> {
        let split = self.end;
        let depth = self.latest_branch.len();
        let mut new_root = self.new_node(NodeKind::Core, NO_PARENT, self.start);
        self.latest_branch[0].set_parent(new_root.seq());

        for i in (0..depth).rev() {
            self.close_branch_node(i, split)?;
        }
        new_root.link_child(&self.latest_branch[0]);

        let mut branch = Vec::with_capacity(depth + 1);
        branch.push(new_root);
        for level in 1..=depth {
            let kind = if level == depth {
                NodeKind::Leaf
            } else {
                NodeKind::Core
            };
            let parent_seq = branch[level - 1].seq();
            let fresh = self.new_node(kind, parent_seq, split + 1);
            branch[level - 1].link_child(&fresh);
            branch.push(fresh);
        }
        self.root_seq = branch[0].seq();
        self.latest_branch = branch;
        debug!(
            "Added new history tree root {} (depth {})",
            self.root_seq,
            depth + 1
        );
        Ok(())
    }

    /// Close every open node at `max(end, tree end)` and write the header
    pub fn finish(&mut self, end: Timestamp) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let end = end.max(self.end);
        for i in (0..self.latest_branch.len()).rev() {
            self.close_branch_node(i, end)?;
        }
        self.end = end;
        self.finished = true;
        self.latest_branch.clear();
        self.write_header()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        info!(
            "Finished history tree at {}: {} nodes, [{}, {}], {} skipped intervals",
            self.path.display(),
            self.node_count,
            self.start,
            self.end,
            self.skipped
        );
        Ok(())
    }

    // ========================================================================
    // Block I/O
    // ========================================================================

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::Disposed)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = FileHeader {
            provider_version: self.provider_version,
            block_size: self.layout.block_size as u32,
            max_children: self.layout.max_children as u32,
            node_count: self.node_count as u32,
            root_seq: self.root_seq as u32,
            start: self.start,
            end: self.end,
        };
        let file = self.file()?;
        file.seek(SeekFrom::Start(0))?;
        header.write_to(file)
    }

    fn block_offset(&self, seq: i32) -> u64 {
        HEADER_SIZE + seq as u64 * self.layout.block_size as u64
    }

    fn write_block(&mut self, seq: i32, block: &[u8]) -> Result<()> {
        let offset = self.block_offset(seq);
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(block)?;
        Ok(())
    }

    fn load_node(&mut self, seq: i32) -> Result<Arc<HistoryNode>> {
        if let Some(node) = self.cache.get(seq) {
            return Ok(node);
        }
        if seq < 0 || seq >= self.node_count {
            return Err(Error::Corruption(format!(
                "node {} outside of {} nodes",
                seq, self.node_count
            )));
        }
        let offset = self.block_offset(seq);
        let mut block = vec![0u8; self.layout.block_size];
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut block)?;

        let node = Arc::new(HistoryNode::decode(&block, &self.layout)?);
        if node.seq() != seq {
            return Err(Error::Corruption(format!(
                "block {} holds node {}",
                seq,
                node.seq()
            )));
        }
        self.cache.insert(Arc::clone(&node));
        Ok(node)
    }

    fn node(&mut self, seq: i32) -> Result<NodeRef<'_>> {
        if let Some(pos) = self.latest_branch.iter().position(|n| n.seq() == seq) {
            return Ok(NodeRef::Branch(&self.latest_branch[pos]));
        }
        self.load_node(seq).map(NodeRef::Stored)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn check_time(&self, t: Timestamp) -> Result<()> {
        if t < self.start || t > self.end {
            return Err(Error::TimeRange {
                time: t,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Visit, breadth first, every node whose range covers `t`
    fn visit_covering<F>(&mut self, t: Timestamp, mut visit: F) -> Result<()>
    where
        F: FnMut(&HistoryNode),
    {
        let mut level: SmallVec<[i32; 8]> = SmallVec::new();
        level.push(self.root_seq);
        while !level.is_empty() {
            let mut next: SmallVec<[i32; 8]> = SmallVec::new();
            for seq in level {
                let node = self.node(seq)?;
                if !node.covers(t) {
                    continue;
                }
                visit(&node);
                next.extend(node.children_covering(t));
            }
            level = next;
        }
        Ok(())
    }

    /// The interval of `quark` covering `t` with the smallest end time
    ///
    /// # Errors
    ///
    /// `TimeRange` if `t` is outside `[start, end]`.
    pub fn singular_query(&mut self, t: Timestamp, quark: Quark) -> Result<Option<Interval>> {
        self.check_time(t)?;
        let mut best: Option<Interval> = None;
        self.visit_covering(t, |node| {
            if let Some(found) = node.relevant_interval(quark, t) {
                if best.as_ref().map_or(true, |b| found.end() < b.end()) {
                    best = Some(found.clone());
                }
            }
        })?;
        Ok(best)
    }

    /// Fill `buffer[quark]` with every interval covering `t`
    pub fn full_query(&mut self, buffer: &mut [Option<Interval>], t: Timestamp) -> Result<()> {
        self.check_time(t)?;
        self.visit_covering(t, |node| {
            for interval in node.intervals_at(t) {
                let Some(slot) = interval.quark().index().and_then(|i| buffer.get_mut(i)) else {
                    continue;
                };
                if slot.as_ref().map_or(true, |b| interval.end() < b.end()) {
                    *slot = Some(interval.clone());
                }
            }
        })
    }

    /// Intervals matching both conditions, ordered by start time
    pub fn range_query(
        &mut self,
        quarks: &QuarkCondition,
        times: &TimeCondition,
        reverse: bool,
    ) -> Result<Vec<Interval>> {
        let mut out = Vec::new();
        let mut queue: VecDeque<i32> = VecDeque::new();
        queue.push_back(self.root_seq);
        while let Some(seq) = queue.pop_front() {
            let node = self.node(seq)?;
            if !node.intersects(times) {
                continue;
            }
            out.extend(node.matching(quarks, times).cloned());
            queue.extend(node.children_intersecting(times));
        }
        out.sort_by_key(|i| (i.start(), i.quark(), i.end()));
        if reverse {
            out.reverse();
        }
        Ok(out)
    }
}
