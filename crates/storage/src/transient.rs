//! Ongoing state of one execution context
//!
//! A [`TransientState`] holds, for every attribute its context owns, the
//! value currently in effect and the time it started. A state change turns
//! the previous `(value, start)` into a completed interval for the backend.
//!
//! # Design
//!
//! - Slots are context-local and mapped to global quarks
//! - New slots start as `(Null, store start)` so coverage is gapless
//! - Live stack frames are tracked in push order; searches scan backward
//!   and are bounded by the nesting depth, not the number of attributes

use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracestate_core::{
    ContextId, Error, Interval, Quark, QuarkCondition, Result, StateHistoryBackend, StateValue,
    TimeCondition, Timestamp, ValueType,
};
use tracing::debug;

/// Stack depth sentinel for an attribute removed by a pop
pub const REMOVED_DEPTH: i32 = -1;

/// How a context is closed at the end of the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// First registered context: also extends the backend end time
    Primary,
    /// Every other context: flushes its slots only
    Secondary,
}

#[derive(Debug, Clone)]
struct Slot {
    quark: Quark,
    value: StateValue,
    start: Timestamp,
    stack_depth: i32,
    value_type: Option<ValueType>,
}

/// Per-context buffer of ongoing `(value, start)` pairs
pub struct TransientState {
    context: ContextId,
    name: String,
    backend: Arc<dyn StateHistoryBackend>,
    slots: Vec<Slot>,
    slot_of: FxHashMap<Quark, usize>,
    /// Slot indices of frames with a positive stack depth, oldest first
    live_frames: Vec<usize>,
    active: bool,
    strict_types: bool,
}

impl std::fmt::Debug for TransientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientState")
            .field("context", &self.context)
            .field("name", &self.name)
            .field("slots", &self.slots.len())
            .field("live_frames", &self.live_frames.len())
            .field("active", &self.active)
            .finish()
    }
}

impl TransientState {
    /// Create the ongoing state of a context
    ///
    /// # Arguments
    ///
    /// * `context` - id of the owning context
    /// * `name` - context name, used in error messages
    /// * `backend` - receiver of completed intervals
    /// * `strict_types` - reject values whose type differs from the first
    ///   non-null type written to the same attribute
    pub fn new(
        context: ContextId,
        name: impl Into<String>,
        backend: Arc<dyn StateHistoryBackend>,
        strict_types: bool,
    ) -> Self {
        Self {
            context,
            name: name.into(),
            backend,
            slots: Vec::new(),
            slot_of: FxHashMap::default(),
            live_frames: Vec::new(),
            active: true,
            strict_types,
        }
    }

    /// Id of the owning context
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Name of the owning context
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether mutations are still accepted
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop accepting mutations without flushing anything
    pub fn set_inactive(&mut self) {
        self.active = false;
    }

    /// Number of attributes tracked
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no attribute is tracked
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `quark` is tracked by this context
    pub fn contains(&self, quark: Quark) -> bool {
        self.slot_of.contains_key(&quark)
    }

    /// Start tracking `quark` with `(Null, store start)`
    ///
    /// Tracking an already tracked quark is a no-op.
    pub fn add_empty_entry(&mut self, quark: Quark) {
        if self.slot_of.contains_key(&quark) {
            return;
        }
        self.slot_of.insert(quark, self.slots.len());
        self.slots.push(Slot {
            quark,
            value: StateValue::Null,
            start: self.backend.start_time(),
            stack_depth: 0,
            value_type: None,
        });
    }

    fn slot_index(&self, quark: Quark) -> Result<usize> {
        self.slot_of
            .get(&quark)
            .copied()
            .ok_or_else(|| Error::foreign(quark, self.name.as_str()))
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(Error::ContextClosed {
                context: self.name.clone(),
            })
        }
    }

    fn check_type(&mut self, idx: usize, value: &StateValue) -> Result<()> {
        if !self.strict_types || value.is_null() {
            return Ok(());
        }
        let slot = &mut self.slots[idx];
        let actual = value.value_type();
        match slot.value_type {
            Some(expected) if expected != actual => Err(Error::StateValueType {
                quark: slot.quark,
                expected: expected.name(),
                actual: actual.name(),
            }),
            Some(_) => Ok(()),
            None => {
                slot.value_type = Some(actual);
                Ok(())
            }
        }
    }

    /// Apply a state change at time `t`
    ///
    /// The previous value becomes the interval `[start, t - 1]` unless it
    /// started at `t`, in which case it is overwritten. Writing the value
    /// already in effect is a no-op.
    ///
    /// # Errors
    ///
    /// - `ContextClosed` if the context was closed
    /// - `ForeignAttribute` if `quark` is not tracked by this context
    /// - `TimeRange` if `t` is before the ongoing start
    /// - `StateValueType` with strict typing and a type change
    pub fn process_state_change(&mut self, t: Timestamp, value: StateValue, quark: Quark) -> Result<()> {
        self.ensure_active()?;
        let idx = self.slot_index(quark)?;
        let start = self.slots[idx].start;
        if t < start {
            return Err(Error::TimeRange {
                time: t,
                start,
                end: Timestamp::MAX,
            });
        }
        self.check_type(idx, &value)?;
        if self.slots[idx].value == value {
            return Ok(());
        }

        if start < t {
            let old = self.slots[idx].value.clone();
            self.backend
                .insert_past_state(Interval::new(start, t - 1, quark, old)?)?;
        }
        let slot = &mut self.slots[idx];
        slot.value = value;
        slot.start = t;
        Ok(())
    }

    /// Change the ongoing value in place, without producing an interval
    pub fn change_ongoing_state_value(&mut self, quark: Quark, value: StateValue) -> Result<()> {
        self.ensure_active()?;
        let idx = self.slot_index(quark)?;
        self.check_type(idx, &value)?;
        self.slots[idx].value = value;
        Ok(())
    }

    /// Value currently in effect for `quark`
    pub fn ongoing_state_value(&self, quark: Quark) -> Result<StateValue> {
        Ok(self.slots[self.slot_index(quark)?].value.clone())
    }

    /// Start time of the value currently in effect for `quark`
    pub fn ongoing_start_time(&self, quark: Quark) -> Result<Timestamp> {
        Ok(self.slots[self.slot_index(quark)?].start)
    }

    /// Every tracked quark with its ongoing value
    pub fn ongoing_values(&self) -> Vec<(Quark, StateValue)> {
        self.slots
            .iter()
            .map(|slot| (slot.quark, slot.value.clone()))
            .collect()
    }

    /// Quarks tracked by this context, in registration order
    pub fn quarks(&self) -> Vec<Quark> {
        self.slots.iter().map(|slot| slot.quark).collect()
    }

    /// Overwrite the ongoing `(value, start)` of every attribute named by
    /// `intervals`
    ///
    /// Used to restore the ongoing state after seeking in a trace.
    pub fn replace_ongoing_state(&mut self, intervals: &[Interval]) -> Result<()> {
        self.ensure_active()?;
        for interval in intervals {
            let idx = self.slot_index(interval.quark())?;
            let slot = &mut self.slots[idx];
            slot.value = interval.value().clone();
            slot.start = interval.start();
        }
        Ok(())
    }

    // ========================================================================
    // Stack frames
    // ========================================================================

    /// Record the stack depth of `quark`
    ///
    /// A positive depth makes the attribute the most recent live frame. If it
    /// was already live, the earlier frame it held is displaced. Zero or
    /// [`REMOVED_DEPTH`] drops it from the live list.
    pub fn modify_stack_depth(&mut self, quark: Quark, depth: i32) -> Result<()> {
        let idx = self.slot_index(quark)?;
        let previous = self.slots[idx].stack_depth;
        self.slots[idx].stack_depth = depth;

        if previous > 0 {
            if let Some(pos) = self.live_frames.iter().rposition(|i| *i == idx) {
                self.live_frames.remove(pos);
                if depth > 0 {
                    debug!(
                        context = %self.name,
                        quark = %quark,
                        depth,
                        "Displacing live frame at reused depth"
                    );
                }
            }
        }
        if depth > 0 {
            self.live_frames.push(idx);
        }
        Ok(())
    }

    /// Recorded stack depth of `quark`
    pub fn stack_depth(&self, quark: Quark) -> Result<i32> {
        Ok(self.slots[self.slot_index(quark)?].stack_depth)
    }

    /// Most recent live frame whose value is closed by `exit_key`
    pub fn find_frame(&self, exit_key: &StateValue) -> Option<Quark> {
        self.live_frames
            .iter()
            .rev()
            .map(|idx| &self.slots[*idx])
            .find(|slot| slot.value.matches_exit(exit_key))
            .map(|slot| slot.quark)
    }

    /// Depth of the most recent live frame correlated by `hint`
    pub fn frame_depth_for_caller(&self, hint: &str) -> Option<i32> {
        self.live_frames
            .iter()
            .rev()
            .map(|idx| &self.slots[*idx])
            .find(|slot| slot.value.correlation_key().as_deref() == Some(hint))
            .map(|slot| slot.stack_depth)
    }

    /// Number of live frames
    pub fn live_frame_count(&self) -> usize {
        self.live_frames.len()
    }

    // ========================================================================
    // Close-out
    // ========================================================================

    /// Flush every slot as an interval ending at `end` and close the context
    ///
    /// Slots whose ongoing start is after `end` are dropped.
    pub fn close_transient_state(&mut self, end: Timestamp, mode: CloseMode) -> Result<()> {
        self.ensure_active()?;
        let mut dropped = 0usize;
        for slot in &self.slots {
            if slot.start > end {
                dropped += 1;
                continue;
            }
            self.backend
                .insert_past_state(Interval::new(slot.start, end, slot.quark, slot.value.clone())?)?;
        }
        if dropped > 0 {
            debug!(context = %self.name, dropped, end, "Dropped slots starting after close time");
        }
        if mode == CloseMode::Primary {
            self.backend.extend_end_time(end);
        }
        self.live_frames.clear();
        self.active = false;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Fill `buffer[quark]` with the ongoing interval of each slot started
    /// at or before `t`
    ///
    /// A closed context contributes nothing.
    pub fn do_query(&self, buffer: &mut [Option<Interval>], t: Timestamp, current_end: Timestamp) {
        if !self.active {
            return;
        }
        for slot in &self.slots {
            if slot.start > t {
                continue;
            }
            let Some(i) = slot.quark.index() else { continue };
            if let (Some(entry), Ok(interval)) = (
                buffer.get_mut(i),
                Interval::new(slot.start, current_end.max(t), slot.quark, slot.value.clone()),
            ) {
                *entry = Some(interval);
            }
        }
    }

    /// Ongoing interval of `quark` covering `t`, if any
    ///
    /// The interval ends at `max(current_end, t)`.
    pub fn interval_at(&self, t: Timestamp, quark: Quark, current_end: Timestamp) -> Option<Interval> {
        if !self.active {
            return None;
        }
        let slot = &self.slots[*self.slot_of.get(&quark)?];
        if slot.start > t {
            return None;
        }
        Interval::new(slot.start, current_end.max(t), quark, slot.value.clone()).ok()
    }

    /// Ongoing intervals matching both conditions
    pub fn query_2d(
        &self,
        quarks: &QuarkCondition,
        times: &TimeCondition,
        current_end: Timestamp,
    ) -> Vec<Interval> {
        if !self.active {
            return Vec::new();
        }
        self.slots
            .iter()
            .filter(|slot| quarks.test(slot.quark))
            .filter(|slot| times.intersects(slot.start, current_end.max(slot.start)))
            .filter_map(|slot| {
                Interval::new(slot.start, current_end.max(slot.start), slot.quark, slot.value.clone()).ok()
            })
            .collect()
    }
}
