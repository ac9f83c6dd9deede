//! Convenient imports for tracestate.
//!
//! ```ignore
//! use tracestate::prelude::*;
//!
//! let ss = StoreBuilder::new().build_ephemeral()?;
//! ```

// Entry points
pub use crate::builder::StoreBuilder;
pub use crate::config::StoreConfig;

// Error handling
pub use tracestate_core::{Error, Result};

// Core types
pub use tracestate_core::{Interval, Quark, SpanValue, StateValue, Timestamp};

// Facade and call stacks
pub use tracestate_engine::{
    CallStack, CallStackEventSource, CallStackStateProvider, CalledFunction, SpanEvent,
    SpanEventSource, StateSystem,
};
