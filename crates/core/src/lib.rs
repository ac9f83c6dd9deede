//! Core types for tracestate
//!
//! This crate defines the types shared by every layer of the state store:
//! - Quark: integer identifier of one attribute
//! - StateValue: tagged value held by an attribute over an interval
//! - Interval: immutable `(quark, start, end, value)` record
//! - TimeCondition / QuarkCondition: selectors for 2D queries
//! - Error: the unified error type
//! - StateHistoryBackend: the interval storage trait

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod error;
pub mod interval;
pub mod traits;
pub mod types;
pub mod value;

pub use condition::{QuarkCondition, TimeCondition};
pub use error::{Error, Result};
pub use interval::Interval;
pub use traits::StateHistoryBackend;
pub use types::{ContextId, Quark, Timestamp, MAX_STACK_DEPTH};
pub use value::{SpanValue, StateValue, ValueType};
