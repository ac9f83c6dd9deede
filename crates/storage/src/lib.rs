//! Storage layer for tracestate
//!
//! This crate holds the in-memory side of the state store:
//! - AttributeTree: hierarchical attribute namespace with snapshot codec
//! - TransientState: per-context ongoing `(value, start)` buffer
//! - ContextRegistry: lazily registered execution contexts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute_tree;
pub mod registry;
pub mod transient;

pub use attribute_tree::{AttributeKey, AttributeTree};
pub use registry::{ContextHandle, ContextRegistry};
pub use transient::{CloseMode, TransientState, REMOVED_DEPTH};
