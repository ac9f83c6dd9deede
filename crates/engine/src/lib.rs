//! Engine layer for tracestate
//!
//! This crate ties the storage and durability layers together:
//! - StateSystem: the store facade (quarks, mutations, stack protocol, queries)
//! - CallStack: projection of a context's stack attributes into frames
//! - CallStackStateProvider: builds call stacks from trace events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callstack;
pub mod provider;
pub mod state_system;

pub use callstack::{CallStack, CalledFunction, CALL_STACK, THREAD_ID};
pub use provider::{
    CallStackEventSource, CallStackStateProvider, SpanEvent, SpanEventKind, SpanEventSource,
    UNKNOWN_CONTEXT,
};
pub use state_system::{StateSystem, PROCESSES};
