//! Call-stack state provider
//!
//! Turns a stream of entry and exit events into pushes and pops on the
//! `Processes/<ctx>/CallStack` stack of each context. The event type is
//! abstracted by [`CallStackEventSource`], so any trace format can feed the
//! same provider.
//!
//! ```text
//! Processes/
//!   <ctx>            ongoing value: process id (no interval)
//!     ThreadId       thread id of the latest entry
//!     CallStack      current depth
//!       1, 2, ...    frame at each depth
//! ```

use crate::callstack::{CALL_STACK, THREAD_ID};
use crate::state_system::StateSystem;
use std::sync::Arc;
use tracestate_core::{Result, SpanValue, StateValue, Timestamp};
use tracing::debug;

/// Context name used when an event carries neither a process name nor id
pub const UNKNOWN_CONTEXT: &str = "UNKNOWN";

/// Accessors a provider needs from a trace event of type `E`
pub trait CallStackEventSource<E> {
    /// Whether the provider should look at `event` at all
    fn consider_event(&self, event: &E) -> bool;

    /// Event time
    fn timestamp(&self, event: &E) -> Timestamp;

    /// Frame value pushed by an entry event
    fn function_entry(&self, event: &E) -> Option<StateValue>;

    /// Key matched against open frames by an exit event
    fn function_exit(&self, event: &E) -> Option<StateValue>;

    /// Numeric id of the owning process
    fn process_id(&self, event: &E) -> Option<i64>;

    /// Name of the owning process
    fn process_name(&self, event: &E) -> Option<String>;

    /// Numeric id of the emitting thread
    fn thread_id(&self, event: &E) -> Option<i64>;
}

/// Builds call stacks in a [`StateSystem`] from trace events
pub struct CallStackStateProvider<S> {
    ss: Arc<StateSystem>,
    source: S,
}

impl<S> CallStackStateProvider<S> {
    /// Create a provider writing into `ss`
    pub fn new(ss: Arc<StateSystem>, source: S) -> Self {
        Self { ss, source }
    }

    /// Store being built
    pub fn state_system(&self) -> &Arc<StateSystem> {
        &self.ss
    }

    /// Event accessors
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Close the history once the last event was handled
    pub fn done(&self, end: Timestamp) -> Result<()> {
        self.ss.close_history(end)
    }

    /// Apply one event
    ///
    /// Entry events record the process and thread ids and push the frame,
    /// using the parent id of a span as caller hint. Exit events pop the
    /// matching frame; exits without a matching frame are ignored.
    pub fn event_handle<E>(&self, event: &E) -> Result<()>
    where
        S: CallStackEventSource<E>,
    {
        if !self.source.consider_event(event) {
            return Ok(());
        }
        let t = self.source.timestamp(event);

        if let Some(value) = self.source.function_entry(event) {
            let ctx = self.context_name(event);
            let context_quark = self.ss.context_quark(&ctx)?;
            if let Some(pid) = self.source.process_id(event) {
                self.ss
                    .update_ongoing_state(StateValue::Long(pid), context_quark, &ctx)?;
            }
            if let Some(tid) = self.source.thread_id(event) {
                let thread = self.ss.get_or_create_quark(&ctx, context_quark, &[THREAD_ID])?;
                self.ss
                    .modify_attribute(t, StateValue::Long(tid), thread, &ctx)?;
            }
            let base = self.ss.get_or_create_quark(&ctx, context_quark, &[CALL_STACK])?;
            let hint = value.as_span().and_then(|span| span.parent_id.clone());
            return self.ss.push(t, value, base, &ctx, hint.as_deref());
        }

        if let Some(key) = self.source.function_exit(event) {
            let ctx = self.context_name(event);
            if self.ss.pop(t, &key, &ctx)?.is_none() {
                debug!("Exit of {} at {} matched no frame in {}", key, t, ctx);
            }
        }
        Ok(())
    }

    fn context_name<E>(&self, event: &E) -> String
    where
        S: CallStackEventSource<E>,
    {
        self.source
            .process_name(event)
            .or_else(|| self.source.process_id(event).map(|pid| pid.to_string()))
            .unwrap_or_else(|| UNKNOWN_CONTEXT.to_string())
    }
}

// ============================================================================
// Span events
// ============================================================================

/// Whether a span event opens or closes its span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanEventKind {
    /// The span begins
    Start,
    /// The span ends
    End,
}

/// Start or end of one span of a distributed trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanEvent {
    /// Start or end
    pub kind: SpanEventKind,
    /// Event time in nanoseconds
    pub timestamp: Timestamp,
    /// Trace the span belongs to
    pub trace_id: String,
    /// Span id
    pub span_id: String,
    /// Id of the calling span
    pub parent_id: Option<String>,
    /// Operation name, empty on end events
    pub operation: String,
    /// Name of the emitting process
    pub process_name: Option<String>,
    /// Id of the emitting process
    pub process_id: Option<i64>,
    /// Id of the emitting thread
    pub thread_id: Option<i64>,
}

impl SpanEvent {
    /// Span start
    pub fn start(
        timestamp: Timestamp,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_id: Option<&str>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            kind: SpanEventKind::Start,
            timestamp,
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: parent_id.map(str::to_string),
            operation: operation.into(),
            process_name: None,
            process_id: None,
            thread_id: None,
        }
    }

    /// Span end
    pub fn end(timestamp: Timestamp, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            kind: SpanEventKind::End,
            timestamp,
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: None,
            operation: String::new(),
            process_name: None,
            process_id: None,
            thread_id: None,
        }
    }

    /// Attach the emitting process
    pub fn with_process(mut self, name: impl Into<String>, pid: i64) -> Self {
        self.process_name = Some(name.into());
        self.process_id = Some(pid);
        self
    }

    /// Attach the emitting thread
    pub fn with_thread(mut self, tid: i64) -> Self {
        self.thread_id = Some(tid);
        self
    }
}

/// [`CallStackEventSource`] for [`SpanEvent`]s
///
/// Spans are pushed as [`StateValue::Span`] and closed by span id. Events
/// without a process name fall into a context named after their trace id.
#[derive(Debug, Clone, Default)]
pub struct SpanEventSource {
    trace_filter: Option<String>,
}

impl SpanEventSource {
    /// Source accepting every span
    pub fn new() -> Self {
        Self::default()
    }

    /// Source accepting only spans of trace `trace_id`
    pub fn for_trace(trace_id: impl Into<String>) -> Self {
        Self {
            trace_filter: Some(trace_id.into()),
        }
    }
}

impl CallStackEventSource<SpanEvent> for SpanEventSource {
    fn consider_event(&self, event: &SpanEvent) -> bool {
        self.trace_filter
            .as_deref()
            .map_or(true, |trace| trace == event.trace_id)
    }

    fn timestamp(&self, event: &SpanEvent) -> Timestamp {
        event.timestamp
    }

    fn function_entry(&self, event: &SpanEvent) -> Option<StateValue> {
        match event.kind {
            SpanEventKind::Start => Some(StateValue::Span(SpanValue::new(
                event.span_id.as_str(),
                event.parent_id.clone(),
                event.operation.as_str(),
            ))),
            SpanEventKind::End => None,
        }
    }

    fn function_exit(&self, event: &SpanEvent) -> Option<StateValue> {
        match event.kind {
            SpanEventKind::End => Some(StateValue::String(event.span_id.clone())),
            SpanEventKind::Start => None,
        }
    }

    fn process_id(&self, event: &SpanEvent) -> Option<i64> {
        event.process_id
    }

    fn process_name(&self, event: &SpanEvent) -> Option<String> {
        event
            .process_name
            .clone()
            .or_else(|| Some(event.trace_id.clone()))
    }

    fn thread_id(&self, event: &SpanEvent) -> Option<i64> {
        event.thread_id
    }
}
