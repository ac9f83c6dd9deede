//! Durability layer for tracestate
//!
//! This crate implements the interval backends:
//! - HistoryTreeBackend: block-structured history tree in one file
//! - InMemoryBackend: sorted in-memory vectors for ephemeral stores
//! - Node and header encoding with CRC32 checksums

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod history_tree;
pub mod memory;

pub use backend::HistoryTreeBackend;
pub use history_tree::{HistoryTree, TreeConfig};
pub use memory::InMemoryBackend;
