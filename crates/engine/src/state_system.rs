//! State system facade
//!
//! [`StateSystem`] is the single entry point used by event-processing code.
//! It owns the attribute tree, routes mutations to the ongoing state of the
//! context that owns each attribute, and answers queries by merging the
//! ongoing state with the interval backend.
//!
//! # Lock order
//!
//! ```text
//! attribute tree  ->  context registry  ->  context state  ->  backend
//! ```
//!
//! A context state lock is never held while the tree lock is acquired.
//!
//! # Lifecycle
//!
//! Contexts are `Active` until [`StateSystem::close_history`] closes them.
//! Mutations on a closed context fail with `ContextClosed`. After
//! [`StateSystem::dispose`] every query fails with `Disposed`.

use parking_lot::{Condvar, Mutex, RwLock};
use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracestate_core::{
    Error, Interval, Quark, QuarkCondition, Result, StateHistoryBackend, StateValue,
    TimeCondition, Timestamp, MAX_STACK_DEPTH,
};
use tracestate_storage::{
    AttributeKey, AttributeTree, CloseMode, ContextHandle, ContextRegistry, TransientState,
    REMOVED_DEPTH,
};
use tracing::{debug, error, info, trace, warn};

/// Name of the top-level attribute holding one subtree per context
pub const PROCESSES: &str = "Processes";

/// A state history store under construction or reopened read-only
pub struct StateSystem {
    tree: RwLock<AttributeTree>,
    contexts: ContextRegistry,
    backend: Arc<dyn StateHistoryBackend>,
    strict_types: bool,
    latest_time: AtomicI64,
    disposed: AtomicBool,
    cancelled: AtomicBool,
    built: Mutex<bool>,
    built_signal: Condvar,
}

impl std::fmt::Debug for StateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSystem")
            .field("ssid", &self.backend.ssid())
            .field("attributes", &self.nb_attributes())
            .field("contexts", &self.contexts.len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl StateSystem {
    /// Create an empty store writing its intervals to `backend`
    ///
    /// With `strict_types`, writing a value whose type differs from the
    /// first non-null value of the same attribute fails with
    /// `StateValueType`.
    pub fn new(backend: Arc<dyn StateHistoryBackend>, strict_types: bool) -> Self {
        let start = backend.start_time();
        Self {
            tree: RwLock::new(AttributeTree::new()),
            contexts: ContextRegistry::new(),
            backend,
            strict_types,
            latest_time: AtomicI64::new(start),
            disposed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            built: Mutex::new(false),
            built_signal: Condvar::new(),
        }
    }

    /// Reopen a finished store from its backend
    ///
    /// Reads the attribute tree snapshot at the location the backend
    /// reports and registers every context as closed. The store is built
    /// on return.
    ///
    /// # Errors
    ///
    /// `Corruption` if the backend has no snapshot or the snapshot is
    /// invalid, `Io` if it cannot be read.
    pub fn open_existing(backend: Arc<dyn StateHistoryBackend>) -> Result<Self> {
        let (path, offset) = backend.attribute_tree_reader().ok_or_else(|| {
            Error::Corruption(format!(
                "history {} has no attribute tree snapshot",
                backend.ssid()
            ))
        })?;
        let mut file = OpenOptions::new().read(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        let (tree, names) = AttributeTree::read_from(&mut BufReader::new(file))?;

        let ss = Self::new(backend, false);
        for name in &names {
            let backend = Arc::clone(&ss.backend);
            ss.contexts.get_or_register(name, |id| {
                let mut state = TransientState::new(id, name.as_str(), backend, false);
                state.set_inactive();
                state
            });
        }
        let end = ss.backend.end_time();
        ss.latest_time.store(end, Ordering::Release);
        let attributes = tree.len();
        *ss.tree.write() = tree;
        ss.release_latch();

        info!(
            "Opened state history {} at {} ({} attributes, {} contexts)",
            ss.ssid(),
            path.display(),
            attributes,
            names.len()
        );
        Ok(ss)
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Identifier of this store
    pub fn ssid(&self) -> &str {
        self.backend.ssid()
    }

    /// Earliest time covered by the store
    pub fn start_time(&self) -> Timestamp {
        self.backend.start_time()
    }

    /// Latest time covered so far
    ///
    /// The later of the backend end time and the latest event time seen.
    pub fn current_end_time(&self) -> Timestamp {
        self.backend
            .end_time()
            .max(self.latest_time.load(Ordering::Acquire))
    }

    /// Backend holding the completed intervals
    pub fn backend(&self) -> &Arc<dyn StateHistoryBackend> {
        &self.backend
    }

    /// Names of the registered contexts, in registration order
    pub fn context_names(&self) -> Vec<String> {
        self.contexts.names()
    }

    /// Whether `ctx` still accepts mutations
    pub fn is_context_active(&self, ctx: &str) -> bool {
        self.contexts
            .get(ctx)
            .map(|handle| handle.state().is_active())
            .unwrap_or(false)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn observe(&self, t: Timestamp) {
        self.latest_time.fetch_max(t, Ordering::AcqRel);
    }

    /// Reject times before the store start
    ///
    /// Later times are left to the ongoing state, which covers any time
    /// while its context is open, and to the backend, which checks its own
    /// range.
    fn check_start(&self, t: Timestamp) -> Result<Timestamp> {
        let end = self.current_end_time();
        let start = self.start_time();
        if t < start {
            return Err(Error::TimeRange { time: t, start, end });
        }
        Ok(end)
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    fn context(&self, ctx: &str) -> Arc<ContextHandle> {
        if let Some(handle) = self.contexts.get(ctx) {
            return handle;
        }
        let backend = Arc::clone(&self.backend);
        let strict = self.strict_types;
        self.contexts
            .get_or_register(ctx, |id| TransientState::new(id, ctx, backend, strict))
    }

    fn writer(&self, quark: Quark, ctx: &str) -> Result<Arc<ContextHandle>> {
        self.ensure_live()?;
        self.contexts
            .get(ctx)
            .ok_or_else(|| Error::foreign(quark, ctx))
    }

    fn owner(&self, quark: Quark) -> Result<Arc<ContextHandle>> {
        let owner = self.tree.read().owner_of(quark);
        owner
            .and_then(|id| self.contexts.by_id(id))
            .ok_or_else(|| Error::QuarkOutOfRange {
                quark,
                count: self.nb_attributes(),
            })
    }

    // ========================================================================
    // Quarks
    // ========================================================================

    /// Quark of `Processes/<ctx>`, created on first use
    pub fn context_quark(&self, ctx: &str) -> Result<Quark> {
        self.get_or_create_quark(ctx, Quark::ROOT, &[PROCESSES, ctx])
    }

    /// Resolve `path` from `start`, creating missing nodes owned by `ctx`
    ///
    /// Every created attribute starts tracked by `ctx` with a null value
    /// starting at the store start.
    ///
    /// # Errors
    ///
    /// `ContextClosed` if nodes would be created for a closed context.
    pub fn get_or_create_quark(&self, ctx: &str, start: Quark, path: &[&str]) -> Result<Quark> {
        self.ensure_live()?;
        if let Some(quark) = self.tree.read().resolve(start, path) {
            return Ok(quark);
        }
        if *self.built.lock() {
            return Err(Error::ContextClosed {
                context: ctx.to_string(),
            });
        }
        let handle = self.context(ctx);

        let mut tree = self.tree.write();
        let mut state = handle.state();
        if !state.is_active() {
            return Err(Error::ContextClosed {
                context: ctx.to_string(),
            });
        }
        let (quark, created) = tree.resolve_or_create(handle.id(), start, path)?;
        for new in created {
            state.add_empty_entry(new);
        }
        Ok(quark)
    }

    /// Quark of an absolute path, if it exists
    pub fn opt_quark_absolute(&self, path: &[&str]) -> Option<Quark> {
        self.tree.read().resolve(Quark::ROOT, path)
    }

    /// Quark of a path relative to `start`, if it exists
    pub fn opt_quark_relative(&self, start: Quark, path: &[&str]) -> Option<Quark> {
        self.tree.read().resolve(start, path)
    }

    /// Quark of an absolute path
    ///
    /// # Errors
    ///
    /// `AttributeNotFound` naming the attempted path.
    pub fn quark_absolute(&self, path: &[&str]) -> Result<Quark> {
        self.tree.read().resolve_required(Quark::ROOT, path)
    }

    /// Quark of a path relative to `start`
    pub fn quark_relative(&self, start: Quark, path: &[&str]) -> Result<Quark> {
        self.tree.read().resolve_required(start, path)
    }

    /// Quarks matching a path pattern where `*` matches any one segment
    /// and `..` steps to the parent
    pub fn quarks(&self, start: Quark, pattern: &[&str]) -> Vec<Quark> {
        self.tree.read().quarks(start, pattern)
    }

    /// Children of `quark`, or every descendant with `recursive`
    pub fn sub_attributes(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        self.tree.read().children_of(quark, recursive)
    }

    /// Children (or descendants) of `quark` whose name fully matches the
    /// regular expression `pattern`
    pub fn sub_attributes_matching(
        &self,
        quark: Quark,
        recursive: bool,
        pattern: &str,
    ) -> Result<Vec<Quark>> {
        self.tree.read().find_by_pattern(quark, recursive, pattern)
    }

    /// Parent of `quark`; top-level attributes have [`Quark::ROOT`]
    pub fn parent_attribute(&self, quark: Quark) -> Result<Quark> {
        self.tree.read().parent_of(quark)
    }

    /// Key of `quark` within its parent
    pub fn attribute_key(&self, quark: Quark) -> Result<AttributeKey> {
        self.tree.read().key_of(quark).cloned()
    }

    /// Last path segment of `quark`
    pub fn attribute_name(&self, quark: Quark) -> Result<String> {
        self.tree.read().name_of(quark)
    }

    /// Path of `quark` joined with `/`
    pub fn full_attribute_path(&self, quark: Quark) -> Result<String> {
        self.tree.read().full_path(quark)
    }

    /// Path segments of `quark` from the root
    pub fn full_attribute_path_segments(&self, quark: Quark) -> Result<Vec<String>> {
        self.tree.read().path_of(quark)
    }

    /// Number of attributes in the store
    pub fn nb_attributes(&self) -> usize {
        self.tree.read().len()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Set `quark` to `value` from time `t`
    ///
    /// # Errors
    ///
    /// - `ForeignAttribute` if `ctx` does not own `quark`
    /// - `ContextClosed` after the history was closed
    /// - `TimeRange` if `t` precedes the ongoing start of `quark`
    pub fn modify_attribute(
        &self,
        t: Timestamp,
        value: StateValue,
        quark: Quark,
        ctx: &str,
    ) -> Result<()> {
        let handle = self.writer(quark, ctx)?;
        self.observe(t);
        let mut state = handle.state();
        state.process_state_change(t, value, quark)
    }

    /// Change the ongoing value of `quark` without producing an interval
    pub fn update_ongoing_state(&self, value: StateValue, quark: Quark, ctx: &str) -> Result<()> {
        let handle = self.writer(quark, ctx)?;
        let mut state = handle.state();
        state.change_ongoing_state_value(quark, value)
    }

    /// Record the stack depth of a frame attribute
    pub fn modify_stack_depth(&self, quark: Quark, depth: i32, ctx: &str) -> Result<()> {
        let handle = self.writer(quark, ctx)?;
        let mut state = handle.state();
        state.modify_stack_depth(quark, depth)
    }

    /// Null `quark` and every descendant `ctx` owns from time `t`
    ///
    /// Removed attributes get the [`REMOVED_DEPTH`] stack depth.
    pub fn remove_attribute(&self, t: Timestamp, quark: Quark, ctx: &str) -> Result<()> {
        let handle = self.writer(quark, ctx)?;
        let descendants = self.tree.read().children_of(quark, true)?;
        self.observe(t);

        let mut state = handle.state();
        for child in descendants {
            if state.contains(child) {
                state.process_state_change(t, StateValue::Null, child)?;
                state.modify_stack_depth(child, REMOVED_DEPTH)?;
            }
        }
        state.process_state_change(t, StateValue::Null, quark)?;
        state.modify_stack_depth(quark, REMOVED_DEPTH)
    }

    /// Overwrite the ongoing state of `ctx` with `intervals`
    pub fn replace_ongoing_state(&self, ctx: &str, intervals: &[Interval]) -> Result<()> {
        self.ensure_live()?;
        let handle = self.contexts.get(ctx).ok_or_else(|| Error::ContextClosed {
            context: ctx.to_string(),
        })?;
        let mut state = handle.state();
        state.replace_ongoing_state(intervals)
    }

    // ========================================================================
    // Stack protocol
    // ========================================================================

    /// Push `value` onto the stack rooted at `base`
    ///
    /// The base holds the current depth as an `Int`. When the stack is not
    /// empty and `caller_hint` names the correlation key of a live frame,
    /// the new frame goes right above that frame instead of on top.
    ///
    /// # Errors
    ///
    /// - `StackOverflow` if the stack is already [`MAX_STACK_DEPTH`] deep
    /// - `StateValueType` if the base holds something other than a depth
    pub fn push(
        &self,
        t: Timestamp,
        value: StateValue,
        base: Quark,
        ctx: &str,
        caller_hint: Option<&str>,
    ) -> Result<()> {
        let handle = self.writer(base, ctx)?;
        self.observe(t);

        let depth = {
            let state = handle.state();
            if !state.is_active() {
                return Err(Error::ContextClosed {
                    context: ctx.to_string(),
                });
            }
            let current = match state.ongoing_state_value(base)? {
                StateValue::Null => 0,
                StateValue::Int(depth) => depth,
                other => {
                    return Err(Error::StateValueType {
                        quark: base,
                        expected: "Int",
                        actual: other.value_type().name(),
                    })
                }
            };
            if current >= MAX_STACK_DEPTH {
                error!(
                    "Stack overflow on {} in context {} at depth {}",
                    base, ctx, current
                );
                return Err(Error::StackOverflow {
                    quark: base,
                    depth: current,
                });
            }
            match caller_hint {
                Some(hint) if current > 0 => state.frame_depth_for_caller(hint).unwrap_or(current),
                _ => current,
            }
        } + 1;

        let frame = {
            let mut tree = self.tree.write();
            let (frame, created) =
                tree.child_or_create(handle.id(), base, AttributeKey::Depth(depth as u32))?;
            if created {
                handle.state().add_empty_entry(frame);
            }
            frame
        };

        let mut state = handle.state();
        state.process_state_change(t, StateValue::Int(depth), base)?;
        state.process_state_change(t, value, frame)?;
        state.modify_stack_depth(frame, depth)
    }

    /// Pop the most recent live frame of `ctx` matching `exit_key`
    ///
    /// Returns the value the frame held. A pop with no matching frame, or on
    /// an empty stack, is a no-op returning `None`.
    pub fn pop(&self, t: Timestamp, exit_key: &StateValue, ctx: &str) -> Result<Option<StateValue>> {
        self.ensure_live()?;
        let Some(handle) = self.contexts.get(ctx) else {
            debug!("Pop on unknown context {} ignored", ctx);
            return Ok(None);
        };
        self.observe(t);

        let found = {
            let state = handle.state();
            match state.find_frame(exit_key) {
                Some(frame) => Some((frame, state.stack_depth(frame)?)),
                None => None,
            }
        };
        let Some((frame, depth)) = found else {
            debug!(
                "No open frame matches {} in context {}, pop ignored",
                exit_key, ctx
            );
            return Ok(None);
        };
        let base = self.tree.read().parent_of(frame)?;

        let (base_depth, value) = {
            let state = handle.state();
            let base_depth = state.ongoing_state_value(base)?.as_int().unwrap_or(0);
            (base_depth, state.ongoing_state_value(frame)?)
        };
        if base_depth == 0 {
            debug!("Pop on empty stack {} in context {} ignored", base, ctx);
            return Ok(None);
        }

        self.remove_attribute(t, frame, ctx)?;
        let remaining = if depth > 1 {
            StateValue::Int(depth - 1)
        } else {
            StateValue::Null
        };
        handle.state().process_state_change(t, remaining, base)?;
        Ok(Some(value))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Interval of `quark` covering `t`
    ///
    /// The ongoing state answers first; the backend answers for anything
    /// already completed. While the owning context is open, the ongoing
    /// interval covers every time from its start on.
    ///
    /// # Errors
    ///
    /// `TimeRange` if `t` precedes the store start, or if the backend has to
    /// answer and `t` is past its end.
    pub fn query_single_state(&self, t: Timestamp, quark: Quark) -> Result<Interval> {
        self.ensure_live()?;
        let current_end = self.check_start(t)?;
        let owner = self.owner(quark)?;
        trace!("Single query for {} at {}", quark, t);

        let ongoing = owner.state().interval_at(t, quark, current_end);
        if let Some(interval) = ongoing {
            return Ok(interval);
        }
        if let Some(interval) = self.backend.do_singular_query(t, quark)? {
            return Ok(interval);
        }
        Err(Error::Internal(format!(
            "incoherent interval storage: no interval for {} at {}",
            quark, t
        )))
    }

    /// One interval per attribute, all covering `t`
    ///
    /// The result is indexed by quark.
    pub fn query_full_state(&self, t: Timestamp) -> Result<Vec<Interval>> {
        self.ensure_live()?;
        let current_end = self.check_start(t)?;
        let count = self.nb_attributes();
        trace!("Full query for {} attributes at {}", count, t);

        // Ongoing state is read first: an interval a writer completes
        // meanwhile is already in the backend when the backend is read.
        let mut buffer: Vec<Option<Interval>> = vec![None; count];
        for handle in self.contexts.all() {
            handle.state().do_query(&mut buffer, t, current_end);
        }
        if buffer.iter().any(Option::is_none) {
            self.backend.do_query(&mut buffer, t)?;
        }
        buffer
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    Error::Internal(format!(
                        "incoherent interval storage: no interval for {} at {}",
                        Quark::from_index(index),
                        t
                    ))
                })
            })
            .collect()
    }

    /// Value currently in effect for `quark`
    pub fn query_ongoing_state(&self, quark: Quark) -> Result<StateValue> {
        self.ensure_live()?;
        let owner = self.owner(quark)?;
        let state = owner.state();
        state.ongoing_state_value(quark)
    }

    /// Start time of the value currently in effect for `quark`
    pub fn ongoing_start_time(&self, quark: Quark) -> Result<Timestamp> {
        self.ensure_live()?;
        let owner = self.owner(quark)?;
        let state = owner.state();
        state.ongoing_start_time(quark)
    }

    /// Intervals of `quarks` covering any of `times`, ordered by start
    pub fn query_2d(&self, quarks: &[Quark], times: &[Timestamp]) -> Result<Vec<Interval>> {
        self.ensure_live()?;
        let (Some(quarks), Some(times)) = (
            QuarkCondition::discrete(quarks.iter().copied()),
            TimeCondition::discrete(times.iter().copied()),
        ) else {
            return Ok(Vec::new());
        };
        self.query_2d_inner(&quarks, &times, false)
    }

    /// Intervals of `quarks` overlapping the range between `start` and `end`
    ///
    /// With `start > end` the intervals come most recent first.
    pub fn query_2d_range(
        &self,
        quarks: &[Quark],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Interval>> {
        self.ensure_live()?;
        let Some(quarks) = QuarkCondition::discrete(quarks.iter().copied()) else {
            return Ok(Vec::new());
        };
        self.query_2d_inner(&quarks, &TimeCondition::continuous(start, end), start > end)
    }

    /// Completed intervals of `quarks` covering any of `times`
    ///
    /// Ongoing values are not consulted.
    pub fn query_backend_2d(&self, quarks: &[Quark], times: &[Timestamp]) -> Result<Vec<Interval>> {
        self.ensure_live()?;
        let (Some(quarks), Some(times)) = (
            QuarkCondition::discrete(quarks.iter().copied()),
            TimeCondition::discrete(times.iter().copied()),
        ) else {
            return Ok(Vec::new());
        };
        self.check_2d(&quarks, &times)?;
        self.backend.query_2d(&quarks, &times, false)
    }

    fn check_2d(&self, quarks: &QuarkCondition, times: &TimeCondition) -> Result<()> {
        let start = self.start_time();
        if times.min() < start {
            return Err(Error::TimeRange {
                time: times.min(),
                start,
                end: self.current_end_time(),
            });
        }
        let count = self.nb_attributes();
        let out_of_range = |quark: Quark| quark.index().map_or(true, |i| i >= count);
        for quark in [quarks.min(), quarks.max()] {
            if out_of_range(quark) {
                return Err(Error::QuarkOutOfRange { quark, count });
            }
        }
        Ok(())
    }

    fn query_2d_inner(
        &self,
        quarks: &QuarkCondition,
        times: &TimeCondition,
        reverse: bool,
    ) -> Result<Vec<Interval>> {
        self.check_2d(quarks, times)?;
        let current_end = self.current_end_time();
        let mut out = self.backend.query_2d(quarks, times, reverse)?;
        for handle in self.contexts.all() {
            out.extend(handle.state().query_2d(quarks, times, current_end));
        }
        out.sort_by_key(|i| (i.start(), i.quark(), i.end()));
        if reverse {
            out.reverse();
        }
        Ok(out)
    }

    // ========================================================================
    // Close-out
    // ========================================================================

    /// Close every context at `end`, finish the backend and persist the
    /// attribute tree
    ///
    /// The first registered context closes as primary and extends the
    /// backend end time. Closing an already built store is a no-op.
    pub fn close_history(&self, end: Timestamp) -> Result<()> {
        self.ensure_live()?;
        if *self.built.lock() {
            debug!("State history {} already built", self.ssid());
            return Ok(());
        }
        let result = self.close_inner(end);
        self.release_latch();
        result
    }

    fn close_inner(&self, end: Timestamp) -> Result<()> {
        let real_end = end.max(self.backend.end_time());
        if real_end != end {
            warn!(
                "Close time {} precedes stored history, closing {} at {}",
                end,
                self.ssid(),
                real_end
            );
        }

        for (position, handle) in self.contexts.all().into_iter().enumerate() {
            let mode = if position == 0 {
                CloseMode::Primary
            } else {
                CloseMode::Secondary
            };
            let mut state = handle.state();
            if state.is_active() {
                state.close_transient_state(real_end, mode)?;
            }
        }
        self.backend.finished_building(real_end)?;

        if let Some((path, offset)) = self.backend.attribute_tree_location() {
            let mut file = OpenOptions::new().write(true).open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut writer = BufWriter::new(file);
            let written = self
                .tree
                .read()
                .write_to(&mut writer, &self.contexts.names())?;
            writer.flush()?;
            debug!(
                "Wrote attribute tree snapshot ({} bytes) at offset {}",
                written, offset
            );
        }
        self.observe(real_end);

        info!(
            "Closed state history {} at {} ({} attributes, {} contexts)",
            self.ssid(),
            real_end,
            self.nb_attributes(),
            self.contexts.len()
        );
        Ok(())
    }

    // ========================================================================
    // Teardown and completion
    // ========================================================================

    fn release_latch(&self) {
        let mut built = self.built.lock();
        *built = true;
        self.built_signal.notify_all();
    }

    /// Block until the store is built or disposed
    pub fn wait_until_built(&self) {
        let mut built = self.built.lock();
        while !*built {
            self.built_signal.wait(&mut built);
        }
    }

    /// Block until the store is built or `timeout` elapses
    ///
    /// Returns whether the store completed in time.
    pub fn wait_until_built_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut built = self.built.lock();
        while !*built {
            if self
                .built_signal
                .wait_until(&mut built, deadline)
                .timed_out()
            {
                return *built;
            }
        }
        true
    }

    /// Whether construction was abandoned by [`dispose`](Self::dispose)
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Tear down the store
    ///
    /// Marks every context inactive, cancels construction, disposes the
    /// backend and wakes any waiter. Calling it again is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancelled.store(true, Ordering::Release);
        for handle in self.contexts.all() {
            handle.state().set_inactive();
        }
        self.backend.dispose();
        self.release_latch();
        info!("Disposed state history {}", self.ssid());
    }

    /// Dispose the store and delete its files
    pub fn remove_files(&self) -> Result<()> {
        self.dispose();
        self.backend.remove_files()
    }
}
