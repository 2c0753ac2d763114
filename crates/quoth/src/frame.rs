//! Frames: suspended evaluation state.
//!
//! A frame is one activation record on the trampoline's explicit stack:
//! an executor selector, a feed position, the `out` and `spare` cells, a
//! state byte recording where to resume after a sub-frame returns, and
//! bookkeeping (data-stack baseline, catch filter, result destination).
//! Frames are plain data — saving a contiguous span of them (plug) and
//! splicing it back later (replug) needs no re-entry.

use bitflags::bitflags;

use crate::{
    cell::Cell,
    feed::FeedIx,
    heap::SeriesId,
    intern::SymbolId,
};

bitflags! {
    /// Per-frame flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct FrameFlags: u16 {
        /// This step computes an argument for an action frame above it;
        /// deferring enfix refuses to run at this level.
        const FULFILLING_ARG = 1 << 0;
        /// Do not consume any enfix at step completion (tight right
        /// arguments of enfix actions).
        const NO_LOOKAHEAD = 1 << 1;
        /// The outermost frame; throws may not unwind past it.
        const ROOT = 1 << 2;
        /// The frame delegated to the sub-frame it pushed and must not be
        /// re-entered; its result forwards through.
        const DELEGATED = 1 << 3;
        /// Run the executor once in cleanup mode when an abrupt failure
        /// unwinds through this frame.
        const NOTIFY_ON_ABRUPT = 1 << 4;
        /// Meta the result when the frame completes (meta-group).
        const META_RESULT = 1 << 5;
        /// A raised error in `out` is acceptable to this frame's parent
        /// (assignment-side and trapping constructs).
        const RAISED_OK = 1 << 6;
    }
}

/// Where a completed frame's `out` is written in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dest {
    Out,
    Spare,
    /// An argument slot of the parent action frame.
    Arg(u16),
    Discard,
}

/// Which throws a frame intercepts.
#[derive(Debug, Clone)]
pub(crate) enum CatchMode {
    None,
    /// Any unnamed or named throw (catch without /name takes unnamed
    /// throws only; see the catch native).
    Unnamed,
    /// Throws whose label is a word equal to this symbol.
    Named(SymbolId),
    /// Throws labelled with this frame context (definitional return).
    Definitional(SeriesId),
    /// Abrupt failures (rescue).
    Failures,
}

/// State byte shared by all executors: the entry state.
pub(crate) const ST_INITIAL: u8 = 0;
/// State byte convention: a catch-accepting frame is re-entered with this
/// state after the trampoline stops an unwind at it.
pub(crate) const ST_CAUGHT: u8 = 200;
/// State byte convention: a frame with `NOTIFY_ON_ABRUPT` is entered once
/// with this state while an abrupt failure unwinds through it.
pub(crate) const ST_ABRUPT: u8 = 201;

/// Executor selector plus executor-specific state.
#[derive(Debug)]
pub(crate) enum Executor {
    /// Runs expression steps over a feed until it is exhausted,
    /// accumulating the last non-vanished value in `out`.
    Stepper,
    /// Evaluates exactly one expression from the feed.
    Step,
    /// Runs steps over a feed, collecting each non-vanished result onto
    /// the data stack, and completes with a new block (reduce, pack).
    Reducer {
        /// Meta each collected value, making isotopes storable (pack).
        meta: bool,
    },
    /// Fulfills an action's arguments, then runs its dispatcher.
    Action(Box<ActionState>),
}

impl Executor {
    /// Static name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stepper => "stepper",
            Self::Step => "step",
            Self::Reducer { .. } => "reducer",
            Self::Action(_) => "action",
        }
    }
}

/// Per-call state of the action executor.
#[derive(Debug)]
pub(crate) struct ActionState {
    /// The action's details series.
    pub action: SeriesId,
    /// One slot per parameter, in declaration order. Unfilled slots are
    /// fresh voids until fulfillment reaches them.
    pub args: Vec<Cell>,
    /// Fulfillment progress.
    pub param_ix: u16,
    /// Pending left value for an enfix call, consumed by the first
    /// call-site parameter.
    pub left: Option<Cell>,
    /// Frame context created for interpreted bodies; tombstoned on drop.
    pub frame_ctx: Option<SeriesId>,
    /// Refinement symbols supplied by the invoking path; entries are
    /// removed as fulfillment matches them, and leftovers are unknown
    /// refinements.
    pub refinements: smallvec::SmallVec<[SymbolId; 2]>,
    /// An extra feed owned by the dispatcher (loop natives walking a
    /// block); released when the frame drops.
    pub aux_feed: Option<crate::feed::FeedIx>,
}

impl ActionState {
    pub fn new(action: SeriesId, param_count: usize) -> Self {
        Self {
            action,
            args: (0..param_count).map(|_| Cell::fresh_void()).collect(),
            param_ix: 0,
            left: None,
            frame_ctx: None,
            refinements: smallvec::SmallVec::new(),
            aux_feed: None,
        }
    }
}

/// One trampoline activation record.
#[derive(Debug)]
pub(crate) struct Frame {
    pub executor: Executor,
    pub feed: FeedIx,
    /// The result slot. Starts as a fresh void; a completed frame whose
    /// `out` is still stale vanished.
    pub out: Cell,
    /// Scratch cell (group results, set-word targets).
    pub spare: Cell,
    /// Executor-specific resume point.
    pub state: u8,
    pub flags: FrameFlags,
    /// Where the trampoline writes `out` when this frame completes.
    pub dest: Dest,
    /// Label for diagnostics (usually the word that named an action).
    pub label: Option<SymbolId>,
    /// Data stack depth at push; restored at drop.
    pub baseline: u32,
    /// Mold buffer depth at push; asserted at drop.
    pub mold_baseline: u32,
    pub catch: CatchMode,
}

impl Frame {
    pub fn new(executor: Executor, feed: FeedIx, dest: Dest) -> Self {
        Self {
            executor,
            feed,
            out: Cell::fresh_void(),
            spare: Cell::fresh_void(),
            state: ST_INITIAL,
            flags: FrameFlags::empty(),
            dest,
            label: None,
            baseline: 0,
            mold_baseline: 0,
            catch: CatchMode::None,
        }
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_label(mut self, label: Option<SymbolId>) -> Self {
        self.label = label;
        self
    }

    /// The action state; panics when the frame is not an action frame
    /// (executor routing guarantees it is).
    pub fn action_state(&self) -> &ActionState {
        match &self.executor {
            Executor::Action(state) => state,
            _ => unreachable!("not an action frame"),
        }
    }

    pub fn action_state_mut(&mut self) -> &mut ActionState {
        match &mut self.executor {
            Executor::Action(state) => state,
            _ => unreachable!("not an action frame"),
        }
    }
}
