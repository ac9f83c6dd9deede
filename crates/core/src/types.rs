//! Core identifier types for the state store
//!
//! This module defines the fundamental identifiers used throughout the system:
//! - [`Quark`]: Integer identifier of one attribute in the attribute tree
//! - [`ContextId`]: Identifier of one execution context ("process")
//! - [`Timestamp`]: Trace time in nanoseconds

use serde::{Deserialize, Serialize};

/// Trace time, in nanoseconds
pub type Timestamp = i64;

/// Maximum number of frames a single stack base may hold
///
/// Pushing beyond this depth is treated as corrupt or unbounded input and
/// aborts the insertion.
pub const MAX_STACK_DEPTH: i32 = 100_000;

/// Integer identifier of one attribute
///
/// Quarks are assigned sequentially from 0 as attribute paths are first
/// created. Once assigned, a quark never changes meaning and is never reused.
///
/// Two values are reserved:
/// - [`Quark::ROOT`] denotes the root of the attribute tree
/// - [`Quark::INVALID`] denotes "no such attribute"
///
/// # Examples
///
/// ```
/// use tracestate_core::types::Quark;
///
/// let q = Quark::new(3);
/// assert_eq!(q.index(), Some(3));
/// assert_eq!(Quark::ROOT.index(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quark(i32);

impl Quark {
    /// Root of the attribute tree, parent of every top-level attribute
    pub const ROOT: Quark = Quark(-1);

    /// "No such attribute"
    pub const INVALID: Quark = Quark(-2);

    /// Create a quark from its raw integer value
    pub const fn new(raw: i32) -> Self {
        Quark(raw)
    }

    /// Create a quark for an arena index
    ///
    /// `index` must fit an `i32`; the attribute tree refuses to grow past
    /// `i32::MAX` attributes.
    pub fn from_index(index: usize) -> Self {
        Quark(index as i32)
    }

    /// Raw integer value, including the reserved negative values
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Arena index of a real attribute, `None` for ROOT and INVALID
    pub fn index(self) -> Option<usize> {
        if self.0 >= 0 {
            Some(self.0 as usize)
        } else {
            None
        }
    }

    /// Whether this is the tree root
    pub fn is_root(self) -> bool {
        self == Quark::ROOT
    }

    /// Whether this is the "not found" value
    pub fn is_invalid(self) -> bool {
        self == Quark::INVALID
    }
}

impl std::fmt::Display for Quark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Quark::ROOT => write!(f, "ROOT"),
            Quark::INVALID => write!(f, "INVALID"),
            Quark(raw) => write!(f, "{}", raw),
        }
    }
}

/// Identifier of one execution context
///
/// Contexts are numbered in registration order. The first registered context
/// is the "primary" one when the history is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u32);

impl ContextId {
    /// Create a context id from its registration index
    pub const fn new(index: u32) -> Self {
        ContextId(index)
    }

    /// Registration index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this context was registered first
    pub const fn is_primary(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}
