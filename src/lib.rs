//! # tracestate
//!
//! Attribute-indexed, time-versioned state store for execution trace
//! analysis.
//!
//! Event-processing code records the state of named attributes (a
//! process's current function, a thread's status, a span stack) as values
//! that hold over time intervals. The store answers "what was the value of
//! attribute A at time T" quickly, for one attribute, for all of them, or
//! for a set of attributes over a time range.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tracestate::prelude::*;
//!
//! let ss = StoreBuilder::new().path("./trace.ht").build()?;
//!
//! let stack = ss.context_quark("P1")?;
//! let stack = ss.get_or_create_quark("P1", stack, &["CallStack"])?;
//! ss.push(10, StateValue::from("foo"), stack, "P1", None)?;
//! ss.pop(20, &StateValue::from("foo"), "P1")?;
//! ss.close_history(30)?;
//!
//! let frame = ss.quark_absolute(&["Processes", "P1", "CallStack", "1"])?;
//! let interval = ss.query_single_state(15, frame)?;
//! ```
//!
//! ## Layers
//!
//! - [`tracestate_core`] - quarks, values, intervals, errors, backend trait
//! - [`tracestate_storage`] - attribute tree, ongoing state, context registry
//! - [`tracestate_durability`] - history tree file and in-memory backends
//! - [`tracestate_engine`] - the [`StateSystem`] facade and call stacks

#![warn(missing_docs)]

mod builder;
mod config;

pub mod prelude;

// Re-export main entry points
pub use builder::StoreBuilder;
pub use config::{
    StoreConfig, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CHILDREN, DEFAULT_NODE_CACHE_CAPACITY,
    MIN_BLOCK_SIZE,
};

// Re-export core types
pub use tracestate_core::{
    ContextId, Error, Interval, Quark, QuarkCondition, Result, SpanValue, StateHistoryBackend,
    StateValue, TimeCondition, Timestamp, ValueType, MAX_STACK_DEPTH,
};

// Re-export backends and the facade
pub use tracestate_durability::{HistoryTreeBackend, InMemoryBackend, TreeConfig};
pub use tracestate_engine::{
    CallStack, CallStackEventSource, CallStackStateProvider, CalledFunction, SpanEvent,
    SpanEventKind, SpanEventSource, StateSystem, CALL_STACK, PROCESSES, THREAD_ID,
};

pub use tracestate_core;
pub use tracestate_durability;
pub use tracestate_engine;
pub use tracestate_storage;
