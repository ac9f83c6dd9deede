//! State values
//!
//! Every interval carries one [`StateValue`]. The variant is chosen by the
//! writer; the store does not coerce between variants.
//!
//! ## The Five Variants
//!
//! 1. `Null` - no active state (gaps, popped frames, depth 0)
//! 2. `Int` - 32-bit signed integer (stack depths, process ids)
//! 3. `Long` - 64-bit signed integer
//! 4. `String` - UTF-8 string (function names, operation ids)
//! 5. `Span` - a distributed-tracing span carrying its correlation ids
//!
//! ## Equality Rules
//!
//! - Different variants are never equal: `Int(1) != Long(1)`
//! - `Span` values compare all fields

use serde::{Deserialize, Serialize};

/// Type tag of a [`StateValue`], used for type-consistency checks and the
/// on-disk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Null value
    Null,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// UTF-8 string
    String,
    /// Span with correlation ids
    Span,
}

impl ValueType {
    /// Type name (for error messages)
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Null => "Null",
            ValueType::Int => "Int",
            ValueType::Long => "Long",
            ValueType::String => "String",
            ValueType::Span => "Span",
        }
    }

    /// Encoding tag byte
    pub fn tag(&self) -> u8 {
        match self {
            ValueType::Null => 0,
            ValueType::Int => 1,
            ValueType::Long => 2,
            ValueType::String => 3,
            ValueType::Span => 4,
        }
    }

    /// Decode a tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueType::Null),
            1 => Some(ValueType::Int),
            2 => Some(ValueType::Long),
            3 => Some(ValueType::String),
            4 => Some(ValueType::Span),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One span of a distributed trace
///
/// Pushed as a stack frame value. `span_id` is the key an exit event uses to
/// find the frame again; `parent_id` is the caller hint used to place the
/// span under its logical parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanValue {
    /// Identifier of this span
    pub span_id: String,
    /// Identifier of the span that caused this one, if any
    pub parent_id: Option<String>,
    /// Operation (or service) name, used as the displayed symbol
    pub name: String,
}

impl SpanValue {
    /// Create a span value
    pub fn new(
        span_id: impl Into<String>,
        parent_id: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            span_id: span_id.into(),
            parent_id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SpanValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.span_id)
    }
}

/// Value of an attribute over one interval
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StateValue {
    /// No active state
    #[default]
    Null,
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    Long(i64),
    /// UTF-8 string
    String(String),
    /// Span with correlation ids
    Span(SpanValue),
}

impl StateValue {
    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            StateValue::Null => ValueType::Null,
            StateValue::Int(_) => ValueType::Int,
            StateValue::Long(_) => ValueType::Long,
            StateValue::String(_) => ValueType::String,
            StateValue::Span(_) => ValueType::Span,
        }
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    /// Try to get as i32
    pub fn as_int(&self) -> Option<i32> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as i64, widening `Int`
    pub fn as_long(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(i64::from(*i)),
            StateValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Try to get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as span
    pub fn as_span(&self) -> Option<&SpanValue> {
        match self {
            StateValue::Span(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is numeric
    pub fn is_number(&self) -> bool {
        matches!(self, StateValue::Int(_) | StateValue::Long(_))
    }

    /// Key used to correlate a frame with its exit event and with callers
    ///
    /// Spans correlate by span id, strings by themselves, numbers by their
    /// decimal rendering. Null has no key.
    pub fn correlation_key(&self) -> Option<std::borrow::Cow<'_, str>> {
        use std::borrow::Cow;
        match self {
            StateValue::Null => None,
            StateValue::Int(i) => Some(Cow::Owned(i.to_string())),
            StateValue::Long(l) => Some(Cow::Owned(l.to_string())),
            StateValue::String(s) => Some(Cow::Borrowed(s.as_str())),
            StateValue::Span(span) => Some(Cow::Borrowed(span.span_id.as_str())),
        }
    }

    /// Whether this frame value is the one `exit` closes
    pub fn matches_exit(&self, exit: &StateValue) -> bool {
        match (self.correlation_key(), exit.correlation_key()) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }

    /// Symbol shown for this value in call-stack views
    ///
    /// Numbers have no symbol.
    pub fn symbol(&self) -> Option<String> {
        match self {
            StateValue::String(s) => Some(s.clone()),
            StateValue::Span(span) => Some(span.name.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Null => f.write_str("null"),
            StateValue::Int(i) => write!(f, "{}", i),
            StateValue::Long(l) => write!(f, "{}", l),
            StateValue::String(s) => f.write_str(s),
            StateValue::Span(span) => write!(f, "{}", span),
        }
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Long(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl From<SpanValue> for StateValue {
    fn from(value: SpanValue) -> Self {
        StateValue::Span(value)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(StateValue::Null)
    }
}
