//! Hierarchical attribute namespace
//!
//! Maps attribute paths like `Processes/P1/CallStack/2` to quarks. Nodes
//! live in an arena indexed by quark; a `(parent, key)` index resolves one
//! path segment in O(1).
//!
//! # Design
//!
//! - Arena: `Vec<AttributeNode>`, quark == arena index, never reused
//! - Index: `FxHashMap<(Quark, AttributeKey), Quark>`
//! - Depth children are keyed by integer, so a push never formats a string
//! - Every node remembers the context that created it
//!
//! # Path Expressions
//!
//! - `*` matches every direct child
//! - `..` steps to the parent
//! - any other segment is a literal child name

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use regex::{Regex, RegexBuilder};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracestate_core::{ContextId, Error, Quark, Result};

/// Wildcard path segment
pub const WILDCARD: &str = "*";

/// Parent path segment
pub const PARENT: &str = "..";

const SNAPSHOT_MAGIC: u32 = 0x0A77_7EE5;
const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// AttributeKey
// ============================================================================

/// Name of one node relative to its parent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKey {
    /// Ordinary named child
    Name(String),
    /// Stack depth child (`1`, `2`, ...)
    Depth(u32),
}

impl AttributeKey {
    /// Parse a path segment
    ///
    /// Canonical decimal integers (`"0"`, `"17"`, never `"017"`) become
    /// `Depth`, so `"2"` and `Depth(2)` address the same node.
    pub fn parse(segment: &str) -> Self {
        let canonical = !segment.is_empty()
            && segment.bytes().all(|b| b.is_ascii_digit())
            && (segment == "0" || !segment.starts_with('0'));
        if canonical {
            if let Ok(n) = segment.parse::<u32>() {
                return AttributeKey::Depth(n);
            }
        }
        AttributeKey::Name(segment.to_string())
    }

    /// String form used in paths
    pub fn render(&self) -> String {
        match self {
            AttributeKey::Name(name) => name.clone(),
            AttributeKey::Depth(depth) => depth.to_string(),
        }
    }
}

impl From<&str> for AttributeKey {
    fn from(segment: &str) -> Self {
        AttributeKey::parse(segment)
    }
}

impl std::fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeKey::Name(name) => f.write_str(name),
            AttributeKey::Depth(depth) => write!(f, "{}", depth),
        }
    }
}

// ============================================================================
// AttributeTree
// ============================================================================

#[derive(Debug, Clone)]
struct AttributeNode {
    key: AttributeKey,
    parent: Quark,
    children: Vec<Quark>,
    owner: ContextId,
}

/// Arena-backed attribute tree
#[derive(Debug, Default)]
pub struct AttributeTree {
    nodes: Vec<AttributeNode>,
    root_children: Vec<Quark>,
    index: FxHashMap<(Quark, AttributeKey), Quark>,
}

impl AttributeTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree holds no attribute
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, quark: Quark) -> Result<&AttributeNode> {
        quark
            .index()
            .and_then(|i| self.nodes.get(i))
            .ok_or(Error::QuarkOutOfRange {
                quark,
                count: self.nodes.len(),
            })
    }

    fn check_start(&self, start: Quark) -> Result<()> {
        if start.is_root() {
            Ok(())
        } else {
            self.node(start).map(|_| ())
        }
    }

    fn step_up(&self, quark: Quark) -> Quark {
        match self.node(quark) {
            Ok(node) => node.parent,
            Err(_) => Quark::ROOT,
        }
    }

    /// Direct child of `parent` with the given key
    pub fn child_of(&self, parent: Quark, key: &AttributeKey) -> Option<Quark> {
        self.index.get(&(parent, key.clone())).copied()
    }

    /// Look up a path below `start`, never creating anything
    ///
    /// `..` steps to the parent (ROOT stays ROOT). An empty path returns
    /// `start`.
    pub fn resolve(&self, start: Quark, path: &[&str]) -> Option<Quark> {
        self.check_start(start).ok()?;
        let mut current = start;
        for segment in path {
            if *segment == PARENT {
                current = self.step_up(current);
                continue;
            }
            current = self.child_of(current, &AttributeKey::parse(segment))?;
        }
        Some(current)
    }

    /// Like [`resolve`](Self::resolve), failing with `AttributeNotFound`
    pub fn resolve_required(&self, start: Quark, path: &[&str]) -> Result<Quark> {
        self.resolve(start, path)
            .ok_or_else(|| Error::attribute_not_found(start, path))
    }

    /// Create the direct child `key` of `parent` if missing
    ///
    /// Returns the child and whether it was created.
    pub fn child_or_create(
        &mut self,
        owner: ContextId,
        parent: Quark,
        key: AttributeKey,
    ) -> Result<(Quark, bool)> {
        self.check_start(parent)?;
        if let Some(existing) = self.child_of(parent, &key) {
            return Ok((existing, false));
        }
        if self.nodes.len() >= i32::MAX as usize {
            return Err(Error::Internal("attribute tree is full".to_string()));
        }

        let quark = Quark::from_index(self.nodes.len());
        self.nodes.push(AttributeNode {
            key: key.clone(),
            parent,
            children: Vec::new(),
            owner,
        });
        match parent.index() {
            Some(i) => self.nodes[i].children.push(quark),
            None => self.root_children.push(quark),
        }
        self.index.insert((parent, key), quark);
        Ok((quark, true))
    }

    /// Resolve a path, creating every missing node with `owner`
    ///
    /// Returns the target quark and the quarks created on the way in
    /// creation order.
    ///
    /// # Errors
    ///
    /// `QuarkOutOfRange` if `start` is not a valid attribute.
    pub fn resolve_or_create(
        &mut self,
        owner: ContextId,
        start: Quark,
        path: &[&str],
    ) -> Result<(Quark, Vec<Quark>)> {
        self.check_start(start)?;
        let mut created = Vec::new();
        let mut current = start;
        for segment in path {
            if *segment == PARENT {
                current = self.step_up(current);
                continue;
            }
            let (child, new) = self.child_or_create(owner, current, AttributeKey::parse(segment))?;
            if new {
                created.push(child);
            }
            current = child;
        }
        Ok((current, created))
    }

    /// Children of `quark`, depth first when `recursive`
    ///
    /// ROOT is accepted and yields the top-level attributes.
    pub fn children_of(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        let direct = self.direct_children(quark)?;
        if !recursive {
            return Ok(direct.to_vec());
        }
        let mut out = Vec::new();
        let mut stack: Vec<Quark> = direct.iter().rev().copied().collect();
        while let Some(q) = stack.pop() {
            out.push(q);
            if let Some(node) = q.index().and_then(|i| self.nodes.get(i)) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        Ok(out)
    }

    fn direct_children(&self, quark: Quark) -> Result<&[Quark]> {
        if quark.is_root() {
            Ok(&self.root_children)
        } else {
            Ok(&self.node(quark)?.children)
        }
    }

    /// Parent of `quark` (ROOT for top-level attributes)
    pub fn parent_of(&self, quark: Quark) -> Result<Quark> {
        if quark.is_root() {
            return Ok(Quark::ROOT);
        }
        Ok(self.node(quark)?.parent)
    }

    /// Key of `quark` relative to its parent
    pub fn key_of(&self, quark: Quark) -> Result<&AttributeKey> {
        Ok(&self.node(quark)?.key)
    }

    /// Simple name of `quark`
    pub fn name_of(&self, quark: Quark) -> Result<String> {
        Ok(self.node(quark)?.key.render())
    }

    /// Context that created `quark`
    pub fn owner_of(&self, quark: Quark) -> Option<ContextId> {
        self.node(quark).ok().map(|node| node.owner)
    }

    /// Path segments from the root down to `quark`
    pub fn path_of(&self, quark: Quark) -> Result<Vec<String>> {
        let mut segments = Vec::new();
        let mut current = quark;
        while !current.is_root() {
            let node = self.node(current)?;
            segments.push(node.key.render());
            current = node.parent;
        }
        segments.reverse();
        Ok(segments)
    }

    /// `/`-joined path of `quark`
    pub fn full_path(&self, quark: Quark) -> Result<String> {
        Ok(self.path_of(quark)?.join("/"))
    }

    /// Children whose simple name fully matches `pattern`
    ///
    /// The pattern is compiled multi-line and dot-all.
    pub fn find_by_pattern(&self, quark: Quark, recursive: bool, pattern: &str) -> Result<Vec<Quark>> {
        let regex = compile_full_match(pattern)?;
        let candidates = self.children_of(quark, recursive)?;
        Ok(candidates
            .into_iter()
            .filter(|q| {
                self.node(*q)
                    .map(|node| regex.is_match(&node.key.render()))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Resolve a path expression with `*` and `..`
    ///
    /// Unmatched literals contribute nothing. Results are de-duplicated in
    /// first-seen order. An empty pattern returns `[start]`.
    pub fn quarks(&self, start: Quark, pattern: &[&str]) -> Vec<Quark> {
        if self.check_start(start).is_err() {
            return Vec::new();
        }
        let mut frontier = vec![start];
        for segment in pattern {
            let mut next = Vec::new();
            for q in frontier {
                match *segment {
                    WILDCARD => {
                        if let Ok(children) = self.direct_children(q) {
                            next.extend_from_slice(children);
                        }
                    }
                    PARENT => next.push(self.step_up(q)),
                    literal => {
                        if let Some(child) = self.child_of(q, &AttributeKey::parse(literal)) {
                            next.push(child);
                        }
                    }
                }
            }
            frontier = dedup_in_order(next);
            if frontier.is_empty() {
                break;
            }
        }
        frontier
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Serialize the tree and the registered context names
    ///
    /// Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W, contexts: &[String]) -> Result<u64> {
        let snapshot = TreeSnapshot {
            contexts: contexts.to_vec(),
            nodes: self
                .nodes
                .iter()
                .map(|node| SnapshotNode {
                    key: node.key.clone(),
                    parent: node.parent,
                    owner: node.owner,
                })
                .collect(),
        };
        let payload = bincode::serialize(&snapshot)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Serialization("attribute tree snapshot too large".to_string()))?;

        writer.write_u32::<BigEndian>(SNAPSHOT_MAGIC)?;
        writer.write_u32::<BigEndian>(SNAPSHOT_VERSION)?;
        writer.write_u32::<BigEndian>(len)?;
        writer.write_u32::<BigEndian>(crc32fast::hash(&payload))?;
        writer.write_all(&payload)?;
        Ok(16 + payload.len() as u64)
    }

    /// Rebuild a tree written by [`write_to`](Self::write_to)
    ///
    /// # Errors
    ///
    /// `Corruption` on a bad magic, version, checksum or node ordering.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(AttributeTree, Vec<String>)> {
        let magic = reader.read_u32::<BigEndian>()?;
        if magic != SNAPSHOT_MAGIC {
            return Err(Error::Corruption(format!(
                "bad attribute tree magic {:#010x}",
                magic
            )));
        }
        let version = reader.read_u32::<BigEndian>()?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported attribute tree version {}",
                version
            )));
        }
        let len = reader.read_u32::<BigEndian>()? as usize;
        let expected_crc = reader.read_u32::<BigEndian>()?;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != expected_crc {
            return Err(Error::Corruption(
                "attribute tree checksum mismatch".to_string(),
            ));
        }

        let snapshot: TreeSnapshot = bincode::deserialize(&payload)?;
        let mut tree = AttributeTree::new();
        for (i, node) in snapshot.nodes.into_iter().enumerate() {
            // Parents always precede their children in the arena
            let parent_ok = node.parent.is_root()
                || node.parent.index().map(|p| p < i).unwrap_or(false);
            if !parent_ok {
                return Err(Error::Corruption(format!(
                    "attribute {} has invalid parent {}",
                    i, node.parent
                )));
            }
            let (quark, created) = tree.child_or_create(node.owner, node.parent, node.key)?;
            if !created || quark.index() != Some(i) {
                return Err(Error::Corruption(format!("duplicate attribute {}", i)));
            }
        }
        Ok((tree, snapshot.contexts))
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotNode {
    key: AttributeKey,
    parent: Quark,
    owner: ContextId,
}

#[derive(Serialize, Deserialize)]
struct TreeSnapshot {
    contexts: Vec<String>,
    nodes: Vec<SnapshotNode>,
}

fn compile_full_match(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{})$", pattern))
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| Error::InvalidPattern(e.to_string()))
}

fn dedup_in_order(quarks: Vec<Quark>) -> Vec<Quark> {
    let mut seen = FxHashSet::default();
    quarks.into_iter().filter(|q| seen.insert(*q)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: ContextId = ContextId::new(0);

    fn sample_tree() -> AttributeTree {
        let mut tree = AttributeTree::new();
        tree.resolve_or_create(CTX, Quark::ROOT, &["Processes", "P1", "CallStack", "1"])
            .unwrap();
        tree.resolve_or_create(CTX, Quark::ROOT, &["Processes", "P1", "CallStack", "2"])
            .unwrap();
        tree.resolve_or_create(ContextId::new(1), Quark::ROOT, &["Processes", "P2", "CallStack"])
            .unwrap();
        tree
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(AttributeKey::parse("3"), AttributeKey::Depth(3));
        assert_eq!(AttributeKey::parse("0"), AttributeKey::Depth(0));
        assert_eq!(AttributeKey::parse("03"), AttributeKey::Name("03".into()));
        assert_eq!(AttributeKey::parse("-1"), AttributeKey::Name("-1".into()));
        assert_eq!(AttributeKey::parse(""), AttributeKey::Name(String::new()));
        assert_eq!(AttributeKey::parse("99999999999"), AttributeKey::Name("99999999999".into()));
    }

    #[test]
    fn test_quarks_are_sequential() {
        let mut tree = AttributeTree::new();
        let (leaf, created) = tree
            .resolve_or_create(CTX, Quark::ROOT, &["a", "b", "c"])
            .unwrap();
        assert_eq!(created, vec![Quark::new(0), Quark::new(1), Quark::new(2)]);
        assert_eq!(leaf, Quark::new(2));

        let (again, created) = tree.resolve_or_create(CTX, Quark::ROOT, &["a", "b", "c"]).unwrap();
        assert_eq!(again, leaf);
        assert!(created.is_empty());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_resolve_never_creates() {
        let tree = sample_tree();
        let before = tree.len();
        assert!(tree.resolve(Quark::ROOT, &["Processes", "P3"]).is_none());
        assert_eq!(tree.len(), before);
        assert_eq!(tree.resolve(Quark::new(1), &[]), Some(Quark::new(1)));
    }

    #[test]
    fn test_resolve_parent_segment() {
        let tree = sample_tree();
        let p1 = tree.resolve(Quark::ROOT, &["Processes", "P1"]).unwrap();
        let via_parent = tree.resolve(p1, &["..", "P2"]).unwrap();
        assert_eq!(via_parent, tree.resolve(Quark::ROOT, &["Processes", "P2"]).unwrap());
        assert_eq!(tree.resolve(Quark::ROOT, &[".."]), Some(Quark::ROOT));
    }

    #[test]
    fn test_depth_key_and_string_segment_match() {
        let tree = sample_tree();
        let stack = tree.resolve(Quark::ROOT, &["Processes", "P1", "CallStack"]).unwrap();
        let by_key = tree.child_of(stack, &AttributeKey::Depth(2)).unwrap();
        assert_eq!(tree.resolve(stack, &["2"]), Some(by_key));
        assert_eq!(tree.name_of(by_key).unwrap(), "2");
    }

    #[test]
    fn test_required_lookup_reports_path() {
        let tree = sample_tree();
        let err = tree.resolve_required(Quark::ROOT, &["Processes", "nope"]).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_invalid_start() {
        let mut tree = sample_tree();
        assert!(tree.resolve(Quark::new(999), &["x"]).is_none());
        let err = tree.resolve_or_create(CTX, Quark::new(999), &["x"]).unwrap_err();
        assert!(matches!(err, Error::QuarkOutOfRange { .. }));
    }

    #[test]
    fn test_paths_and_parents() {
        let tree = sample_tree();
        let q = tree
            .resolve(Quark::ROOT, &["Processes", "P1", "CallStack", "2"])
            .unwrap();
        assert_eq!(tree.full_path(q).unwrap(), "Processes/P1/CallStack/2");
        assert_eq!(
            tree.path_of(q).unwrap(),
            vec!["Processes", "P1", "CallStack", "2"]
        );
        let parent = tree.parent_of(q).unwrap();
        assert_eq!(tree.name_of(parent).unwrap(), "CallStack");
        let top = tree.resolve(Quark::ROOT, &["Processes"]).unwrap();
        assert_eq!(tree.parent_of(top).unwrap(), Quark::ROOT);
    }

    #[test]
    fn test_children() {
        let tree = sample_tree();
        let processes = tree.resolve(Quark::ROOT, &["Processes"]).unwrap();
        let direct = tree.children_of(processes, false).unwrap();
        let names: Vec<_> = direct.iter().map(|q| tree.name_of(*q).unwrap()).collect();
        assert_eq!(names, vec!["P1", "P2"]);

        let all = tree.children_of(processes, true).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(tree.children_of(Quark::ROOT, false).unwrap(), vec![processes]);
    }

    #[test]
    fn test_owner_is_creator() {
        let tree = sample_tree();
        let processes = tree.resolve(Quark::ROOT, &["Processes"]).unwrap();
        let p2 = tree.resolve(Quark::ROOT, &["Processes", "P2"]).unwrap();
        assert_eq!(tree.owner_of(processes), Some(CTX));
        assert_eq!(tree.owner_of(p2), Some(ContextId::new(1)));
        assert_eq!(tree.owner_of(Quark::ROOT), None);
    }

    #[test]
    fn test_wildcard_pattern() {
        let tree = sample_tree();
        let stacks = tree.quarks(Quark::ROOT, &["Processes", "*", "CallStack"]);
        assert_eq!(stacks.len(), 2);
        let frames = tree.quarks(Quark::ROOT, &["Processes", "*", "CallStack", "*"]);
        assert_eq!(frames.len(), 2);
        assert!(tree.quarks(Quark::ROOT, &["Processes", "*", "Missing"]).is_empty());
        assert_eq!(tree.quarks(Quark::new(1), &[]), vec![Quark::new(1)]);
    }

    #[test]
    fn test_pattern_dedups_parent_fanout() {
        let tree = sample_tree();
        let parents = tree.quarks(Quark::ROOT, &["Processes", "*", ".."]);
        assert_eq!(parents, vec![tree.resolve(Quark::ROOT, &["Processes"]).unwrap()]);
    }

    #[test]
    fn test_find_by_pattern() {
        let tree = sample_tree();
        let processes = tree.resolve(Quark::ROOT, &["Processes"]).unwrap();
        let found = tree.find_by_pattern(processes, false, "P[0-9]").unwrap();
        assert_eq!(found.len(), 2);
        // full match only
        assert!(tree.find_by_pattern(processes, false, "P").unwrap().is_empty());
        let depths = tree.find_by_pattern(processes, true, "[0-9]+").unwrap();
        assert_eq!(depths.len(), 2);
        assert!(matches!(
            tree.find_by_pattern(processes, false, "("),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tree = sample_tree();
        let contexts = vec!["P1".to_string(), "P2".to_string()];
        let mut buf = Vec::new();
        let written = tree.write_to(&mut buf, &contexts).unwrap();
        assert_eq!(written as usize, buf.len());

        let (restored, names) = AttributeTree::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(names, contexts);
        assert_eq!(restored.len(), tree.len());
        for i in 0..tree.len() {
            let q = Quark::from_index(i);
            assert_eq!(restored.full_path(q).unwrap(), tree.full_path(q).unwrap());
            assert_eq!(restored.owner_of(q), tree.owner_of(q));
        }
    }

    #[test]
    fn test_snapshot_detects_corruption() {
        let tree = sample_tree();
        let mut buf = Vec::new();
        tree.write_to(&mut buf, &["P1".to_string()]).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let err = AttributeTree::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));

        let err = AttributeTree::read_from(&mut [0u8; 16].as_slice()).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        fn path_strategy() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec(prop_oneof![Just("a"), Just("b"), Just("1"), Just("2")], 1..5)
                .prop_map(|segs| segs.into_iter().map(String::from).collect())
        }

        proptest! {
            #[test]
            fn quark_count_equals_distinct_prefixes(paths in prop::collection::vec(path_strategy(), 1..20)) {
                let mut tree = AttributeTree::new();
                let mut prefixes = HashSet::new();
                for path in &paths {
                    let segs: Vec<&str> = path.iter().map(String::as_str).collect();
                    let (leaf, _) = tree.resolve_or_create(CTX, Quark::ROOT, &segs).unwrap();
                    prop_assert_eq!(tree.resolve(Quark::ROOT, &segs), Some(leaf));
                    prop_assert_eq!(tree.path_of(leaf).unwrap(), path.clone());
                    for i in 1..=path.len() {
                        prefixes.insert(path[..i].to_vec());
                    }
                }
                prop_assert_eq!(tree.len(), prefixes.len());
            }
        }
    }
}
