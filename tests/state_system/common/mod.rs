//! Shared helpers for state system tests

#![allow(dead_code)]

pub use std::sync::Arc;
pub use tracestate::prelude::*;
pub use tracestate::{CALL_STACK, MAX_STACK_DEPTH, PROCESSES};

use std::path::PathBuf;
use tempfile::TempDir;

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// File-backed store in a temporary directory
///
/// Small blocks and fan-out so that even short tests split nodes.
pub struct TestStore {
    pub dir: TempDir,
    pub path: PathBuf,
    pub ss: Arc<StateSystem>,
}

impl TestStore {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state.ht");
        let ss = Self::builder(&path).build().expect("create store");
        Self { dir, path, ss }
    }

    fn builder(path: &std::path::Path) -> StoreBuilder {
        StoreBuilder::new()
            .path(path)
            .block_size(4096)
            .max_children(4)
            .provider_version(1)
            .ssid("test")
    }

    /// Reopen the finished history file
    pub fn reopen(&self) -> Arc<StateSystem> {
        Self::builder(&self.path)
            .open_existing()
            .expect("reopen store")
    }
}

/// In-memory store
pub fn ephemeral() -> Arc<StateSystem> {
    init_tracing();
    StoreBuilder::new().ssid("mem").build_ephemeral().expect("ephemeral store")
}

/// `Processes/<ctx>/CallStack`, created on demand
pub fn stack_base(ss: &StateSystem, ctx: &str) -> Quark {
    let context = ss.context_quark(ctx).unwrap();
    ss.get_or_create_quark(ctx, context, &[CALL_STACK]).unwrap()
}

/// Frame attribute at `depth` of the stack of `ctx`
pub fn frame_quark(ss: &StateSystem, ctx: &str, depth: usize) -> Quark {
    let depth = depth.to_string();
    ss.quark_absolute(&[PROCESSES, ctx, CALL_STACK, depth.as_str()])
        .unwrap()
}

/// Span frame value
pub fn span(id: &str, parent: Option<&str>, name: &str) -> StateValue {
    StateValue::Span(SpanValue::new(id, parent.map(str::to_string), name))
}
