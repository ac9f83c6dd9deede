//! Error types for the state store.
//!
//! One error type is shared by every layer so callers can match on the
//! condition regardless of which layer raised it.

use crate::types::{Quark, Timestamp};
use thiserror::Error;

/// All state store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A "must exist" attribute lookup failed
    #[error("attribute not found: {path}")]
    AttributeNotFound {
        /// The attempted path, for diagnostics
        path: String,
    },

    /// A timestamp was outside the valid or monotonic bound
    #[error("time {time} outside of range [{start}, {end}]")]
    TimeRange {
        /// Requested time
        time: Timestamp,
        /// Lowest accepted time
        start: Timestamp,
        /// Highest accepted time
        end: Timestamp,
    },

    /// A value was written with a type inconsistent with the attribute
    #[error("state value type mismatch on quark {quark}: expected {expected}, got {actual}")]
    StateValueType {
        /// Attribute being written
        quark: Quark,
        /// Type already recorded for the attribute
        expected: &'static str,
        /// Type of the rejected value
        actual: &'static str,
    },

    /// The store was torn down
    #[error("state system has been disposed")]
    Disposed,

    /// A push would exceed the maximum stack depth
    #[error("stack limit reached on quark {quark} (depth {depth}), not pushing")]
    StackOverflow {
        /// Stack base attribute
        quark: Quark,
        /// Depth at the time of the push
        depth: i32,
    },

    /// The attribute is owned by another context
    #[error("quark {quark} does not belong to context {context}")]
    ForeignAttribute {
        /// Attribute being written
        quark: Quark,
        /// Context that attempted the write
        context: String,
    },

    /// The context no longer accepts mutations
    #[error("context {context} is closed")]
    ContextClosed {
        /// Name of the closed context
        context: String,
    },

    /// A quark outside the attribute tree was used
    #[error("quark {quark} out of range (attribute count {count})")]
    QuarkOutOfRange {
        /// Offending quark
        quark: Quark,
        /// Number of attributes in the tree
        count: usize,
    },

    /// A call-stack depth outside of `[1, max]` was requested
    #[error("call stack depth {depth} is too large (max {max})")]
    DepthOutOfRange {
        /// Requested depth
        depth: usize,
        /// Deepest known level
        max: usize,
    },

    /// An interval or function with `start > end`
    #[error("invalid time range [{start}, {end}]")]
    InvalidInterval {
        /// Start time
        start: Timestamp,
        /// End time
        end: Timestamp,
    },

    /// Persisted data failed validation
    #[error("corruption: {0}")]
    Corruption(String),

    /// Serialization / deserialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An attribute name pattern failed to compile
    #[error("invalid attribute pattern: {0}")]
    InvalidPattern(String),

    /// Invalid store configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an `AttributeNotFound` for a path relative to `start`
    pub fn attribute_not_found(start: Quark, path: &[&str]) -> Self {
        Error::AttributeNotFound {
            path: format!("quark {}, sub-path {:?}", start, path),
        }
    }

    /// Build a `ForeignAttribute` error
    pub fn foreign(quark: Quark, context: impl Into<String>) -> Self {
        Error::ForeignAttribute {
            quark,
            context: context.into(),
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::AttributeNotFound { .. })
    }

    /// Check if this error reports a disposed store.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed)
    }

    /// Check if this error should abort the build of a context's history.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::StackOverflow { .. }
                | Error::TimeRange { .. }
                | Error::Corruption(_)
                | Error::Internal(_)
        )
    }

    /// Errors that mean "no data available for this request" to a reader.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            Error::AttributeNotFound { .. } | Error::TimeRange { .. } | Error::Disposed
        )
    }

    /// Context the error was raised for, when the context was the culprit
    pub fn context_hint(&self) -> Option<&str> {
        match self {
            Error::ForeignAttribute { context, .. } | Error::ContextClosed { context } => {
                Some(context)
            }
            _ => None,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
