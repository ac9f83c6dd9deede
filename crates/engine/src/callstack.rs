//! Call-stack projection
//!
//! Reconstructs the frames of one context from its
//! `Processes/<ctx>/CallStack/<depth>` attributes. Each depth attribute
//! holds the frame at that depth over time, with null intervals between
//! frames.

use crate::state_system::{StateSystem, PROCESSES};
use tracestate_core::{Error, Interval, Quark, Result, Timestamp};
use tracestate_storage::AttributeKey;

/// Attribute under a context holding the stack depth and one child per depth
pub const CALL_STACK: &str = "CallStack";

/// Attribute under a context holding the thread id
pub const THREAD_ID: &str = "ThreadId";

/// A frame active over `[start, end]` at some depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalledFunction {
    start: Timestamp,
    end: Timestamp,
    symbol: String,
    depth: usize,
    process_id: Option<i64>,
    thread_id: Option<i64>,
}

impl CalledFunction {
    /// Create a frame record
    ///
    /// # Errors
    ///
    /// `InvalidInterval` if `start > end`.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        symbol: impl Into<String>,
        depth: usize,
        process_id: Option<i64>,
        thread_id: Option<i64>,
    ) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            symbol: symbol.into(),
            depth,
            process_id,
            thread_id,
        })
    }

    /// First time the frame is active
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End of the frame, exclusive of the next frame's start
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// `end - start`
    pub fn duration(&self) -> Timestamp {
        self.end - self.start
    }

    /// Function or span name
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Stack depth, 1 for the outermost frame
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Process id of the owning context at the frame start
    pub fn process_id(&self) -> Option<i64> {
        self.process_id
    }

    /// Thread id at the frame start
    pub fn thread_id(&self) -> Option<i64> {
        self.thread_id
    }
}

/// Call stack of one context
#[derive(Debug)]
pub struct CallStack<'a> {
    ss: &'a StateSystem,
    context: String,
    context_quark: Quark,
    thread_quark: Option<Quark>,
    /// `(depth, quark)` sorted by depth
    depths: Vec<(usize, Quark)>,
}

impl<'a> CallStack<'a> {
    /// Call stack of context `ctx`
    ///
    /// # Errors
    ///
    /// `AttributeNotFound` if the context has no attributes.
    pub fn for_context(ss: &'a StateSystem, ctx: &str) -> Result<Self> {
        let context_quark = ss.quark_absolute(&[PROCESSES, ctx])?;
        let mut stack = Self {
            ss,
            context: ctx.to_string(),
            context_quark,
            thread_quark: None,
            depths: Vec::new(),
        };
        stack.refresh()?;
        Ok(stack)
    }

    /// Context name
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Deepest depth seen so far
    pub fn max_depth(&self) -> usize {
        self.depths.last().map_or(0, |(depth, _)| *depth)
    }

    /// Attribute of the frame slot at `depth`, if one was created
    pub fn depth_quark(&self, depth: usize) -> Option<Quark> {
        self.depths
            .binary_search_by_key(&depth, |(d, _)| *d)
            .ok()
            .map(|i| self.depths[i].1)
    }

    /// Pick up depth attributes created since the last refresh
    pub fn refresh(&mut self) -> Result<()> {
        self.thread_quark = self.ss.opt_quark_relative(self.context_quark, &[THREAD_ID]);
        let Some(base) = self.ss.opt_quark_relative(self.context_quark, &[CALL_STACK]) else {
            self.depths.clear();
            return Ok(());
        };
        let mut levels = Vec::new();
        for child in self.ss.sub_attributes(base, false)? {
            if let AttributeKey::Depth(depth) = self.ss.attribute_key(child)? {
                if depth > 0 {
                    levels.push((depth as usize, child));
                }
            }
        }
        levels.sort_unstable();
        self.depths = levels;
        Ok(())
    }

    /// Next frame at `depth` active at or after `time`
    ///
    /// Null gaps and frames ending before `range_start` are skipped. The
    /// search is bounded by the end of `parent`, or by the current end of
    /// the store. The frame is clipped to `[range_start, range_end]`.
    /// Frames holding a number have no symbol and yield `None`. A store
    /// disposed during the search yields `None`.
    ///
    /// # Errors
    ///
    /// `DepthOutOfRange` if `depth` is 0 or above [`max_depth`](Self::max_depth).
    /// A depth below the maximum with no frame slot yields `None`.
    pub fn next_function(
        &self,
        time: Timestamp,
        depth: usize,
        parent: Option<&CalledFunction>,
        range_start: Timestamp,
        range_end: Timestamp,
    ) -> Result<Option<CalledFunction>> {
        if depth == 0 || depth > self.max_depth() {
            return Err(Error::DepthOutOfRange {
                depth,
                max: self.max_depth(),
            });
        }
        match self.find_next(time, depth, parent, range_start, range_end) {
            Err(Error::Disposed) => Ok(None),
            other => other,
        }
    }

    fn find_next(
        &self,
        time: Timestamp,
        depth: usize,
        parent: Option<&CalledFunction>,
        range_start: Timestamp,
        range_end: Timestamp,
    ) -> Result<Option<CalledFunction>> {
        let Some(quark) = self.depth_quark(depth) else {
            return Ok(None);
        };
        let bound = parent.map_or_else(|| self.ss.current_end_time(), CalledFunction::end);
        if time > bound || time >= range_end {
            return Ok(None);
        }

        let mut interval = self.ss.query_single_state(time, quark)?;
        while (interval.value().is_null() || interval.end() < range_start)
            && interval.end().saturating_add(1) < bound
        {
            interval = self.ss.query_single_state(interval.end() + 1, quark)?;
        }
        if interval.value().is_null()
            || interval.end() < range_start
            || interval.start() >= range_end
        {
            return Ok(None);
        }
        let Some(symbol) = interval.value().symbol() else {
            return Ok(None);
        };

        let start = range_start.max(interval.start());
        let end = range_end.min(interval.end().saturating_add(1));
        CalledFunction::new(
            start,
            end,
            symbol,
            depth,
            self.long_at(Some(self.context_quark), &interval),
            self.long_at(self.thread_quark, &interval),
        )
        .map(Some)
    }

    fn long_at(&self, quark: Option<Quark>, frame: &Interval) -> Option<i64> {
        let found = self.ss.query_single_state(frame.start(), quark?).ok()?;
        found.value().as_long()
    }

    /// Frames active at `time`, outermost first
    pub fn functions_at(&self, time: Timestamp) -> Result<Vec<CalledFunction>> {
        let mut frames: Vec<CalledFunction> = Vec::new();
        for depth in 1..=self.max_depth() {
            let parent = frames.last();
            match self.next_function(time, depth, parent, time, time.saturating_add(1))? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }
}
