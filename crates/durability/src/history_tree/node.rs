//! History tree nodes and their block encoding
//!
//! A node covers a time range and holds intervals that fit entirely inside
//! it. Core nodes also point to up to `max_children` children.
//!
//! ## Block Layout
//!
//! ```text
//! kind          u8    0 = core, 1 = leaf
//! start         i64
//! end           i64
//! sequence      i32
//! parent        i32   -1 for the root
//! intervals     u32
//! done          u8
//! -- core nodes only --
//! children      u32
//! entries       max_children x (seq i32, start i64, end i64)
//! -- all nodes --
//! interval records, sorted by end time
//! crc32         u32   (over every preceding byte of the block)
//! zero padding up to the block size
//! ```
//!
//! ## Interval Record
//!
//! ```text
//! start i64 | end i64 | quark i32 | tag u8 | payload
//! ```
//!
//! Payload by tag: Null none, Int i32, Long i64, String u16-length UTF-8,
//! Span span id, presence byte plus optional parent id, name (each a
//! u16-length UTF-8 string).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracestate_core::{
    Error, Interval, Quark, QuarkCondition, Result, SpanValue, StateValue, TimeCondition,
    Timestamp, ValueType,
};

/// Sequence number stored as the parent of the root
pub const NO_PARENT: i32 = -1;

/// Child end marker while the child is still open
pub const OPEN_END: Timestamp = Timestamp::MAX;

const COMMON_HEADER_SIZE: usize = 1 + 8 + 8 + 4 + 4 + 4 + 1;
const CHILD_ENTRY_SIZE: usize = 4 + 8 + 8;
const CHECKSUM_SIZE: usize = 4;
const INTERVAL_FIXED_SIZE: usize = 8 + 8 + 4 + 1;

/// Kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Node with children
    Core,
    /// Node without children
    Leaf,
}

impl NodeKind {
    fn tag(self) -> u8 {
        match self {
            NodeKind::Core => 0,
            NodeKind::Leaf => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(NodeKind::Core),
            1 => Ok(NodeKind::Leaf),
            other => Err(Error::Corruption(format!("unknown node type {}", other))),
        }
    }
}

/// Child pointer of a core node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    /// Sequence number of the child
    pub seq: i32,
    /// Start of the child's range
    pub start: Timestamp,
    /// End of the child's range, [`OPEN_END`] while it is open
    pub end: Timestamp,
}

impl ChildEntry {
    fn covers(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Node layout parameters shared by every node of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Block size in bytes
    pub block_size: usize,
    /// Maximum children per core node
    pub max_children: usize,
}

impl NodeLayout {
    /// Bytes taken by the fixed part of a node of `kind`
    pub fn header_size(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Core => COMMON_HEADER_SIZE + 4 + self.max_children * CHILD_ENTRY_SIZE,
            NodeKind::Leaf => COMMON_HEADER_SIZE,
        }
    }

    /// Bytes available for intervals in an empty node of `kind`
    pub fn capacity(&self, kind: NodeKind) -> usize {
        self.block_size
            .saturating_sub(self.header_size(kind) + CHECKSUM_SIZE)
    }

    /// Largest interval that fits in any empty node
    pub fn max_interval_size(&self) -> usize {
        self.capacity(NodeKind::Core).min(self.capacity(NodeKind::Leaf))
    }

    /// Smallest valid layout check: room for a core header and one interval
    pub fn validate(&self) -> Result<()> {
        if self.max_children < 2 {
            return Err(Error::InvalidConfig(format!(
                "max_children must be at least 2, got {}",
                self.max_children
            )));
        }
        if self.max_interval_size() < INTERVAL_FIXED_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block size {} cannot hold a core node with {} children",
                self.block_size, self.max_children
            )));
        }
        Ok(())
    }
}

/// One history tree node
#[derive(Debug, Clone)]
pub struct HistoryNode {
    kind: NodeKind,
    seq: i32,
    parent: i32,
    start: Timestamp,
    end: Timestamp,
    done: bool,
    children: Vec<ChildEntry>,
    /// Sorted by end time
    intervals: Vec<Interval>,
    used: usize,
}

impl HistoryNode {
    /// Create an empty open node
    pub fn new(kind: NodeKind, seq: i32, parent: i32, start: Timestamp) -> Self {
        Self {
            kind,
            seq,
            parent,
            start,
            end: start,
            done: false,
            children: Vec::new(),
            intervals: Vec::new(),
            used: 0,
        }
    }

    /// Node kind
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Sequence number
    pub fn seq(&self) -> i32 {
        self.seq
    }

    /// Parent sequence number, [`NO_PARENT`] for the root
    pub fn parent(&self) -> i32 {
        self.parent
    }

    /// Re-parent this node (used when a new root grows above it)
    pub fn set_parent(&mut self, parent: i32) {
        self.parent = parent;
    }

    /// Start of the covered range
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End of the covered range; meaningful once closed
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Whether the node was closed
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Child pointers (core nodes)
    pub fn children(&self) -> &[ChildEntry] {
        &self.children
    }

    /// Intervals stored in this node, sorted by end time
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Whether `t` is inside the range of this node
    pub fn covers(&self, t: Timestamp) -> bool {
        self.start <= t && (!self.done || t <= self.end)
    }

    /// Whether the range of this node intersects the time condition
    pub fn intersects(&self, times: &TimeCondition) -> bool {
        let end = if self.done { self.end } else { OPEN_END };
        times.intersects(self.start, end)
    }

    /// Bytes still free for intervals
    pub fn free_space(&self, layout: &NodeLayout) -> usize {
        layout.capacity(self.kind).saturating_sub(self.used)
    }

    /// Add an interval, keeping the end-time order
    ///
    /// Caller checks [`free_space`](Self::free_space) first.
    pub fn add_interval(&mut self, interval: Interval, size: usize) {
        let pos = self
            .intervals
            .partition_point(|existing| existing.end() <= interval.end());
        self.intervals.insert(pos, interval);
        self.used += size;
    }

    /// Link a new child
    pub fn link_child(&mut self, child: &HistoryNode) {
        self.children.push(ChildEntry {
            seq: child.seq,
            start: child.start,
            end: if child.done { child.end } else { OPEN_END },
        });
    }

    /// Record the end time of a child that was just closed
    pub fn update_child_end(&mut self, seq: i32, end: Timestamp) {
        if let Some(entry) = self.children.iter_mut().rev().find(|e| e.seq == seq) {
            entry.end = end;
        }
    }

    /// Close the node at `end` (raised to the node start if lower)
    pub fn close(&mut self, end: Timestamp) {
        self.end = end.max(self.start);
        self.done = true;
    }

    /// Children whose range covers `t`
    pub fn children_covering(&self, t: Timestamp) -> impl Iterator<Item = i32> + '_ {
        self.children
            .iter()
            .filter(move |e| e.covers(t))
            .map(|e| e.seq)
    }

    /// Children whose range intersects the time condition
    pub fn children_intersecting<'a>(
        &'a self,
        times: &'a TimeCondition,
    ) -> impl Iterator<Item = i32> + 'a {
        self.children
            .iter()
            .filter(move |e| times.intersects(e.start, e.end))
            .map(|e| e.seq)
    }

    /// The interval of `quark` covering `t` with the smallest end time
    pub fn relevant_interval(&self, quark: Quark, t: Timestamp) -> Option<&Interval> {
        let first = self.intervals.partition_point(|i| i.end() < t);
        self.intervals[first..]
            .iter()
            .find(|i| i.quark() == quark && i.start() <= t)
    }

    /// Every interval covering `t`
    pub fn intervals_at(&self, t: Timestamp) -> impl Iterator<Item = &Interval> + '_ {
        let first = self.intervals.partition_point(|i| i.end() < t);
        self.intervals[first..].iter().filter(move |i| i.start() <= t)
    }

    /// Intervals matching both conditions
    pub fn matching<'a>(
        &'a self,
        quarks: &'a QuarkCondition,
        times: &'a TimeCondition,
    ) -> impl Iterator<Item = &'a Interval> + 'a {
        let first = self.intervals.partition_point(|i| i.end() < times.min());
        self.intervals[first..]
            .iter()
            .filter(move |i| quarks.test(i.quark()) && times.intersects(i.start(), i.end()))
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode into a full block
    pub fn encode(&self, layout: &NodeLayout) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(layout.block_size);
        buf.write_u8(self.kind.tag())?;
        buf.write_i64::<BigEndian>(self.start)?;
        buf.write_i64::<BigEndian>(self.end)?;
        buf.write_i32::<BigEndian>(self.seq)?;
        buf.write_i32::<BigEndian>(self.parent)?;
        buf.write_u32::<BigEndian>(self.intervals.len() as u32)?;
        buf.write_u8(u8::from(self.done))?;

        if self.kind == NodeKind::Core {
            buf.write_u32::<BigEndian>(self.children.len() as u32)?;
            for slot in 0..layout.max_children {
                let entry = self.children.get(slot).copied().unwrap_or(ChildEntry {
                    seq: 0,
                    start: 0,
                    end: 0,
                });
                buf.write_i32::<BigEndian>(entry.seq)?;
                buf.write_i64::<BigEndian>(entry.start)?;
                buf.write_i64::<BigEndian>(entry.end)?;
            }
        }

        for interval in &self.intervals {
            write_interval(&mut buf, interval)?;
        }
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<BigEndian>(crc)?;

        if buf.len() > layout.block_size {
            return Err(Error::Internal(format!(
                "node {} overflows its block ({} > {})",
                self.seq,
                buf.len(),
                layout.block_size
            )));
        }
        buf.resize(layout.block_size, 0);
        Ok(buf)
    }

    /// Decode a block written by [`encode`](Self::encode)
    ///
    /// # Errors
    ///
    /// `Corruption` if the checksum or any field is invalid.
    pub fn decode(block: &[u8], layout: &NodeLayout) -> Result<Self> {
        let mut cursor = block;
        let kind = NodeKind::from_tag(cursor.read_u8()?)?;
        let start = cursor.read_i64::<BigEndian>()?;
        let end = cursor.read_i64::<BigEndian>()?;
        let seq = cursor.read_i32::<BigEndian>()?;
        let parent = cursor.read_i32::<BigEndian>()?;
        let count = cursor.read_u32::<BigEndian>()? as usize;
        let done = cursor.read_u8()? != 0;

        let mut children = Vec::new();
        if kind == NodeKind::Core {
            let child_count = cursor.read_u32::<BigEndian>()? as usize;
            if child_count > layout.max_children {
                return Err(Error::Corruption(format!(
                    "node {} claims {} children (max {})",
                    seq, child_count, layout.max_children
                )));
            }
            for slot in 0..layout.max_children {
                let entry = ChildEntry {
                    seq: cursor.read_i32::<BigEndian>()?,
                    start: cursor.read_i64::<BigEndian>()?,
                    end: cursor.read_i64::<BigEndian>()?,
                };
                if slot < child_count {
                    children.push(entry);
                }
            }
        }

        let mut intervals = Vec::with_capacity(count.min(block.len() / INTERVAL_FIXED_SIZE));
        let mut used = 0;
        for _ in 0..count {
            let before = cursor.len();
            let interval = read_interval(&mut cursor)?;
            used += before - cursor.len();
            intervals.push(interval);
        }

        let consumed = block.len() - cursor.len();
        let stored_crc = cursor.read_u32::<BigEndian>()?;
        if crc32fast::hash(&block[..consumed]) != stored_crc {
            return Err(Error::Corruption(format!("node {} checksum mismatch", seq)));
        }

        Ok(Self {
            kind,
            seq,
            parent,
            start,
            end,
            done,
            children,
            intervals,
            used,
        })
    }
}

// ============================================================================
// Interval records
// ============================================================================

/// Encoded size of `interval`, `None` if a string is too long to encode
pub fn interval_size(interval: &Interval) -> Option<usize> {
    let payload = match interval.value() {
        StateValue::Null => 0,
        StateValue::Int(_) => 4,
        StateValue::Long(_) => 8,
        StateValue::String(s) => string_size(s)?,
        StateValue::Span(span) => {
            let parent = match &span.parent_id {
                Some(p) => string_size(p)?,
                None => 0,
            };
            string_size(&span.span_id)? + 1 + parent + string_size(&span.name)?
        }
    };
    Some(INTERVAL_FIXED_SIZE + payload)
}

fn string_size(s: &str) -> Option<usize> {
    if s.len() > u16::MAX as usize {
        None
    } else {
        Some(2 + s.len())
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::Serialization(format!("string of {} bytes too long", s.len())))?;
    buf.write_u16::<BigEndian>(len)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_string(cursor: &mut &[u8]) -> Result<String> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    if cursor.len() < len {
        return Err(Error::Corruption("truncated string in interval record".to_string()));
    }
    let (bytes, rest) = cursor.split_at(len);
    let s = std::str::from_utf8(bytes)
        .map_err(|e| Error::Corruption(format!("invalid UTF-8 in interval record: {}", e)))?
        .to_string();
    *cursor = rest;
    Ok(s)
}

/// Append the record of `interval`
pub fn write_interval(buf: &mut Vec<u8>, interval: &Interval) -> Result<()> {
    buf.write_i64::<BigEndian>(interval.start())?;
    buf.write_i64::<BigEndian>(interval.end())?;
    buf.write_i32::<BigEndian>(interval.quark().raw())?;
    buf.write_u8(interval.value().value_type().tag())?;
    match interval.value() {
        StateValue::Null => {}
        StateValue::Int(i) => buf.write_i32::<BigEndian>(*i)?,
        StateValue::Long(l) => buf.write_i64::<BigEndian>(*l)?,
        StateValue::String(s) => write_string(buf, s)?,
        StateValue::Span(span) => {
            write_string(buf, &span.span_id)?;
            match &span.parent_id {
                Some(parent) => {
                    buf.write_u8(1)?;
                    write_string(buf, parent)?;
                }
                None => buf.write_u8(0)?,
            }
            write_string(buf, &span.name)?;
        }
    }
    Ok(())
}

/// Read one interval record, advancing `cursor`
pub fn read_interval(cursor: &mut &[u8]) -> Result<Interval> {
    let start = cursor.read_i64::<BigEndian>()?;
    let end = cursor.read_i64::<BigEndian>()?;
    let quark = Quark::new(cursor.read_i32::<BigEndian>()?);
    let tag = cursor.read_u8()?;
    let value = match ValueType::from_tag(tag) {
        Some(ValueType::Null) => StateValue::Null,
        Some(ValueType::Int) => StateValue::Int(cursor.read_i32::<BigEndian>()?),
        Some(ValueType::Long) => StateValue::Long(cursor.read_i64::<BigEndian>()?),
        Some(ValueType::String) => StateValue::String(read_string(cursor)?),
        Some(ValueType::Span) => {
            let span_id = read_string(cursor)?;
            let parent_id = match cursor.read_u8()? {
                0 => None,
                _ => Some(read_string(cursor)?),
            };
            let name = read_string(cursor)?;
            StateValue::Span(SpanValue::new(span_id, parent_id, name))
        }
        None => {
            return Err(Error::Corruption(format!("unknown value type tag {}", tag)));
        }
    };
    Interval::new(start, end, quark, value)
        .map_err(|_| Error::Corruption(format!("interval record with start {} > end {}", start, end)))
}
