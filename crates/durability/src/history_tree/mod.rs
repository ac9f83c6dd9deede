//! Block-structured history tree file
//!
//! - `header`: fixed-size file header
//! - `node`: node blocks and interval records
//! - `tree`: insertion along the latest branch and breadth-first queries

pub mod header;
pub mod node;
pub mod tree;

pub use header::{FileHeader, FILE_VERSION, HEADER_SIZE, HISTORY_FILE_MAGIC};
pub use node::{HistoryNode, NodeKind, NodeLayout};
pub use tree::{HistoryTree, TreeConfig};
