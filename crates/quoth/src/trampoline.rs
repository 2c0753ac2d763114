//! The trampoline: the single owner of the frame stack.
//!
//! Executors never recurse on the host stack. Each invocation of the top
//! frame's executor returns a [`Bounce`]; the trampoline honors it by
//! re-entering, popping, forwarding results, or unwinding. Throws walk
//! the frame stack looking for an accepting catch filter; abrupt failures
//! unwind everything except `Failures` catchers; halt unwinds everything.
//!
//! The machine also owns the shared mutable resources evaluation needs:
//! the feed table, the data stack (refinement collection, multi-return
//! targets, transient accumulations), the mold buffer, and the pending
//! throw slot. Every frame records baselines into the data stack and
//! mold buffer at push; drops restore them.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    call,
    cell::{Cell, Heart},
    context::Resolution,
    error::{RunError, RunResult},
    eval,
    feed::{Feed, FeedIx},
    frame::{CatchMode, Dest, Executor, Frame, FrameFlags, ST_ABRUPT, ST_CAUGHT},
    heap::{Heap, SeriesId},
    intern::SymbolTable,
    mold::{MoldBuffer, mold_cell, mold_to_string},
    resource::{EVAL_SIGNAL_INTERVAL, ResourceTracker},
    tracer::EvalTracer,
};

/// Status code an executor returns to the trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bounce {
    /// A sub-frame was pushed; resume with the new top.
    Continue,
    /// A sub-frame was pushed and this frame must not be re-entered; its
    /// parent receives the sub-frame's result directly. The executor sets
    /// its own `DELEGATED` flag before returning this.
    Delegate,
    /// Re-invoke the current frame immediately.
    Redo,
    /// A throw is active in the machine's thrown slot.
    Thrown,
    /// The `out` cell is final.
    Completed,
}

/// A labelled throw in flight.
#[derive(Debug)]
pub(crate) struct Thrown {
    /// Typically a word (`break`, `quit`), a frame context (definitional
    /// return), or a blank for unnamed throws.
    pub label: Cell,
    pub payload: Cell,
}

/// What the trampoline hands back once the root frame is gone.
#[derive(Debug)]
pub(crate) enum TrampolineOutcome {
    /// The root frame completed; its `out` (possibly stale = void).
    Completed(Cell),
    /// A throw reached the root without a matching catch.
    Thrown(Thrown),
}

struct FeedSlot {
    feed: Feed,
    refs: u32,
}

/// Host-registered dispatcher storage lives in the engine; the machine
/// sees it through this alias.
pub(crate) type HostFns = Vec<crate::datum::HostFn>;

/// The evaluation machine: frame stack, feed table, shared buffers, and
/// borrowed engine state.
pub(crate) struct Machine<'e, T: ResourceTracker, Tr: EvalTracer> {
    pub heap: &'e mut Heap<T>,
    pub symbols: &'e mut SymbolTable,
    pub tracer: &'e mut Tr,
    /// The lib module (natives).
    pub lib: SeriesId,
    /// The user module (scanned code binds here).
    pub user: SeriesId,
    pub frames: Vec<Frame>,
    feeds: Vec<Option<FeedSlot>>,
    free_feeds: Vec<u32>,
    /// The data stack: refinement collection, multi-return targets,
    /// transient accumulations.
    pub data: Vec<Cell>,
    pub mold: MoldBuffer,
    pub thrown: Option<Thrown>,
    countdown: u32,
    halt: &'e AtomicBool,
    /// Collect on every evaluator step (testing knob).
    force_gc: bool,
    pub hosts: &'e mut HostFns,
    /// API handles rooted by the engine.
    handles: &'e Vec<Option<Cell>>,
}

impl<'e, T: ResourceTracker, Tr: EvalTracer> Machine<'e, T, Tr> {
    #[expect(clippy::too_many_arguments, reason = "borrows each engine field individually")]
    pub fn new(
        heap: &'e mut Heap<T>,
        symbols: &'e mut SymbolTable,
        tracer: &'e mut Tr,
        lib: SeriesId,
        user: SeriesId,
        halt: &'e AtomicBool,
        force_gc: bool,
        hosts: &'e mut HostFns,
        handles: &'e Vec<Option<Cell>>,
    ) -> Self {
        Self {
            heap,
            symbols,
            tracer,
            lib,
            user,
            frames: Vec::with_capacity(16),
            feeds: Vec::new(),
            free_feeds: Vec::new(),
            data: Vec::new(),
            mold: MoldBuffer::default(),
            thrown: None,
            countdown: EVAL_SIGNAL_INTERVAL,
            halt,
            force_gc,
            hosts,
            handles,
        }
    }

    // --- feed table ---

    pub fn new_feed(&mut self, array: SeriesId, index: u32) -> FeedIx {
        let feed = Feed::new(self.heap, array, index);
        let slot = FeedSlot { feed, refs: 1 };
        if let Some(ix) = self.free_feeds.pop() {
            self.feeds[ix as usize] = Some(slot);
            FeedIx(ix)
        } else {
            self.feeds.push(Some(slot));
            FeedIx(self.feeds.len() as u32 - 1)
        }
    }

    pub fn retain_feed(&mut self, ix: FeedIx) {
        self.feeds[ix.0 as usize].as_mut().expect("live feed").refs += 1;
    }

    pub fn release_feed(&mut self, ix: FeedIx) {
        let slot = self.feeds[ix.0 as usize].as_mut().expect("live feed");
        slot.refs -= 1;
        if slot.refs == 0 {
            let mut slot = self.feeds[ix.0 as usize].take().expect("live feed");
            slot.feed.release(self.heap);
            self.free_feeds.push(ix.0);
        }
    }

    fn feed_ref(&self, ix: FeedIx) -> &Feed {
        &self.feeds[ix.0 as usize].as_ref().expect("live feed").feed
    }

    pub fn feed_at(&self, ix: FeedIx) -> Option<&Cell> {
        self.feeds[ix.0 as usize].as_ref().expect("live feed").feed.at(self.heap)
    }

    pub fn feed_is_at_end(&self, ix: FeedIx) -> bool {
        self.feed_ref(ix).is_at_end(self.heap)
    }

    pub fn feed_fetch(&mut self, ix: FeedIx) -> Option<Cell> {
        self.feeds[ix.0 as usize]
            .as_mut()
            .expect("live feed")
            .feed
            .fetch_next(self.heap)
    }

    pub fn feed_set_gotten(&mut self, ix: FeedIx, cell: Cell) {
        self.feeds[ix.0 as usize].as_mut().expect("live feed").feed.set_gotten(cell);
    }

    pub fn feed_take_gotten(&mut self, ix: FeedIx) -> Option<Cell> {
        self.feeds[ix.0 as usize].as_mut().expect("live feed").feed.take_gotten()
    }

    /// Drops a cached lookahead resolution; assignments call this so a
    /// peeked word is never consumed with a pre-assignment value.
    pub fn feed_clear_gotten(&mut self, ix: FeedIx) {
        let _ = self.feed_take_gotten(ix);
    }

    /// The array and index of the feed's current position.
    pub fn feed_position(&self, ix: FeedIx) -> (SeriesId, u32) {
        self.feed_ref(ix).position()
    }

    pub fn feed_deferred_once(&self, ix: FeedIx) -> bool {
        self.feed_ref(ix).deferred_once()
    }

    pub fn feed_set_deferred_once(&mut self, ix: FeedIx) {
        self.feeds[ix.0 as usize]
            .as_mut()
            .expect("live feed")
            .feed
            .set_deferred_once();
    }

    /// Molded excerpt of the feed's current neighborhood, for errors.
    pub fn feed_near(&self, ix: FeedIx) -> String {
        let feed = self.feed_ref(ix);
        let (array, index) = feed.position();
        let cells = self.heap.array(array);
        let mut buf = String::from("[");
        let start = (index as usize).saturating_sub(2);
        for (i, cell) in cells.iter().enumerate().skip(start).take(5) {
            if i > start {
                buf.push(' ');
            }
            mold_cell(self.heap, self.symbols, cell, &mut buf, 0);
        }
        if start + 5 < cells.len() {
            buf.push_str(" ...");
        }
        buf.push(']');
        buf
    }

    /// Attaches a feed excerpt to an abrupt failure that lacks one.
    pub fn fail_near(&self, fx: usize, err: RunError) -> RunError {
        match err {
            RunError::Fail(e) if e.near.is_none() => {
                let near = self.feed_near(self.frames[fx].feed);
                RunError::Fail(Box::new(e.with_near(near)))
            }
            other => other,
        }
    }

    // --- frame stack ---

    pub fn push_frame(&mut self, mut frame: Frame) -> RunResult<()> {
        self.heap.tracker().check_depth(self.frames.len())?;
        frame.baseline = self.data.len() as u32;
        frame.mold_baseline = self.mold.depth() as u32;
        self.tracer.on_frame_push(frame.executor.name(), self.frames.len() + 1);
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the top frame, restoring its baselines and releasing what it
    /// held. The data stack must be at or above the recorded baseline.
    pub fn drop_frame(&mut self) -> Frame {
        let frame = self.frames.pop().expect("frame stack underflow");
        debug_assert!(self.data.len() >= frame.baseline as usize, "data stack below baseline");
        debug_assert_eq!(self.mold.depth(), frame.mold_baseline as usize, "unbalanced mold buffer");
        self.data.truncate(frame.baseline as usize);
        if let Executor::Action(state) = &frame.executor {
            if let Some(ctx) = state.frame_ctx {
                self.heap.tombstone(ctx);
            }
            if let Some(aux) = state.aux_feed {
                self.release_feed(aux);
            }
        }
        self.release_feed(frame.feed);
        self.tracer.on_frame_drop(self.frames.len());
        frame
    }

    /// Pushes a stepper frame over a fresh feed on `array`.
    pub fn push_stepper_over(&mut self, array: SeriesId, dest: Dest, flags: FrameFlags) -> RunResult<()> {
        let feed = self.new_feed(array, 0);
        self.push_frame(Frame::new(Executor::Stepper, feed, dest).with_flags(flags))
    }

    /// Pushes a single-step frame sharing an existing feed.
    pub fn push_step_shared(&mut self, feed: FeedIx, dest: Dest, flags: FrameFlags) -> RunResult<()> {
        self.retain_feed(feed);
        self.push_frame(Frame::new(Executor::Step, feed, dest).with_flags(flags))
    }

    // --- signals ---

    /// Called at the start of every evaluator step: budget countdown,
    /// halt polling, and GC scheduling.
    pub fn on_eval_step(&mut self) -> RunResult<()> {
        if self.force_gc {
            self.collect_garbage();
        }
        self.countdown -= 1;
        if self.countdown == 0 {
            self.countdown = EVAL_SIGNAL_INTERVAL;
            self.heap.tracker_mut().on_steps(EVAL_SIGNAL_INTERVAL)?;
            if self.halt.load(Ordering::Relaxed) {
                return Err(RunError::Halt);
            }
            if self.heap.wants_collection() {
                self.collect_garbage();
            }
        }
        Ok(())
    }

    /// Mark-sweep from the machine's full root set.
    pub fn collect_garbage(&mut self) {
        let mut roots = vec![self.lib, self.user];
        for frame in &self.frames {
            if let Executor::Action(state) = &frame.executor {
                roots.push(state.action);
                if let Some(ctx) = state.frame_ctx {
                    roots.push(ctx);
                }
            }
            if let CatchMode::Definitional(ctx) = frame.catch {
                roots.push(ctx);
            }
        }
        for slot in self.feeds.iter().flatten() {
            let (array, _) = slot.feed.position();
            roots.push(array);
        }

        let mut cells: Vec<&Cell> = Vec::new();
        for frame in &self.frames {
            cells.push(&frame.out);
            cells.push(&frame.spare);
            if let Executor::Action(state) = &frame.executor {
                cells.extend(state.args.iter());
                if let Some(left) = &state.left {
                    cells.push(left);
                }
            }
        }
        cells.extend(self.data.iter());
        cells.extend(self.handles.iter().flatten());
        if let Some(thrown) = &self.thrown {
            cells.push(&thrown.label);
            cells.push(&thrown.payload);
        }

        let swept = self.heap.collect(roots, cells);
        self.tracer.on_gc(swept);
    }

    // --- word resolution ---

    /// Resolves a word-family cell through its binding.
    pub fn resolve_word_cell(&self, cell: &Cell) -> RunResult<Resolution> {
        let result = crate::context::resolve_word(self.heap, cell.word_symbol(), cell.binding());
        match result {
            Err(RunError::Fail(e)) if e.near.is_none() => Err(RunError::Fail(Box::new(
                e.with_near(self.symbols.resolve(cell.word_symbol()).to_owned()),
            ))),
            other => other,
        }
    }

    // --- the trampoline proper ---

    /// Runs until the root frame is gone. The caller must have pushed a
    /// root frame (flagged `ROOT`).
    pub fn run(&mut self) -> RunResult<TrampolineOutcome> {
        debug_assert!(
            self.frames.first().is_some_and(|f| f.flags.contains(FrameFlags::ROOT)),
            "trampoline needs a rooted frame stack"
        );
        loop {
            let bounce = self.enter_top();
            match bounce {
                Ok(Bounce::Continue | Bounce::Delegate | Bounce::Redo) => {}
                Ok(Bounce::Completed) => {
                    if let Some(outcome) = self.complete_top() {
                        return Ok(outcome);
                    }
                }
                Ok(Bounce::Thrown) => {
                    if let Some(outcome) = self.unwind_throw() {
                        return Ok(outcome);
                    }
                }
                Err(err) => {
                    if let Some(err) = self.unwind_failure(err) {
                        return Err(err);
                    }
                }
            }
        }
    }

    fn enter_top(&mut self) -> RunResult<Bounce> {
        let fx = self.frames.len() - 1;
        match self.frames[fx].executor {
            Executor::Stepper => eval::stepper_executor(self, fx),
            Executor::Step => eval::step_executor(self, fx),
            Executor::Reducer { .. } => eval::reducer_executor(self, fx),
            Executor::Action(_) => call::action_executor(self, fx),
        }
    }

    /// Pops the completed top frame and forwards its result; returns the
    /// final outcome once the root frame has been popped. Delegated
    /// parents complete in the same pass.
    fn complete_top(&mut self) -> Option<TrampolineOutcome> {
        loop {
            let frame = self.drop_frame();
            let mut result = frame.out;
            if frame.flags.contains(FrameFlags::META_RESULT) {
                result = result.meta();
            }

            let Some(parent) = self.frames.last_mut() else {
                debug_assert!(frame.flags.contains(FrameFlags::ROOT));
                return Some(TrampolineOutcome::Completed(result));
            };

            // a stale result is a vanished step: leave the destination
            // untouched so prior residue shows through
            if !result.is_stale() {
                match frame.dest {
                    Dest::Out => parent.out = result,
                    Dest::Spare => parent.spare = result,
                    Dest::Arg(ix) => {
                        let state = parent.action_state_mut();
                        state.args[ix as usize] = result;
                    }
                    Dest::Discard => {}
                }
            }

            if parent.flags.contains(FrameFlags::DELEGATED) {
                // the delegating frame forwards without re-entry
                continue;
            }
            return None;
        }
    }

    /// Unwinds an active throw. Returns the outcome when it crossed to
    /// the root; `None` when a catcher accepted it (and will be
    /// re-entered with `ST_CAUGHT`).
    fn unwind_throw(&mut self) -> Option<TrampolineOutcome> {
        let thrown = self.thrown.as_ref().expect("thrown status without a throw");
        let label_text = mold_to_string(self.heap, self.symbols, &thrown.label);
        self.tracer.on_throw(&label_text);
        loop {
            let top = self.frames.last().expect("throw escaped the frame stack");
            if self.catch_accepts(&top.catch) {
                let top = self.frames.last_mut().expect("just observed");
                top.state = ST_CAUGHT;
                return None;
            }
            if top.flags.contains(FrameFlags::ROOT) {
                let thrown = self.thrown.take().expect("checked above");
                self.drop_frame();
                return Some(TrampolineOutcome::Thrown(thrown));
            }
            self.drop_frame();
        }
    }

    fn catch_accepts(&self, mode: &CatchMode) -> bool {
        let thrown = self.thrown.as_ref().expect("checked by caller");
        match mode {
            CatchMode::None | CatchMode::Failures => false,
            CatchMode::Unnamed => thrown.label.heart() == Heart::Blank,
            CatchMode::Named(sym) => {
                thrown.label.heart() == Heart::Word && thrown.label.word_symbol() == *sym
            }
            CatchMode::Definitional(ctx) => {
                thrown.label.heart() == Heart::Frame && thrown.label.series_id() == *ctx
            }
        }
    }

    /// Unwinds an abrupt failure. Returns `Some(err)` when it crossed the
    /// root; `None` when a `Failures` catcher (rescue) trapped it.
    fn unwind_failure(&mut self, err: RunError) -> Option<RunError> {
        if matches!(err, RunError::Halt) {
            while !self.frames.is_empty() {
                self.drop_frame();
            }
            return Some(err);
        }
        loop {
            let Some(top) = self.frames.last() else {
                return Some(err);
            };
            if top.flags.contains(FrameFlags::NOTIFY_ON_ABRUPT) {
                let fx = self.frames.len() - 1;
                self.frames[fx].state = ST_ABRUPT;
                // best-effort cleanup entry; its status is ignored
                let _ = self.enter_top();
            }
            let top = self.frames.last().expect("still present");
            if matches!(top.catch, CatchMode::Failures) {
                // reify the failure for the trapping construct
                let error = err.into_error();
                let reified = match crate::context::error_to_context(self.heap, self.symbols, &error) {
                    Ok(ctx) => Cell::context(Heart::Error, ctx),
                    Err(nested) => return Some(nested),
                };
                let top = self.frames.last_mut().expect("still present");
                top.spare = reified;
                top.state = ST_CAUGHT;
                return None;
            }
            if top.flags.contains(FrameFlags::ROOT) {
                self.drop_frame();
                return Some(err);
            }
            self.drop_frame();
        }
    }

    // --- plug / replug ---

    /// Detaches the frames above `keep_depth` as a plug. The caller is
    /// responsible for replugging before the feeds or data those frames
    /// reference are torn down.
    pub fn plug(&mut self, keep_depth: usize) -> Plug {
        Plug {
            frames: self.frames.split_off(keep_depth),
        }
    }

    /// Splices a plugged frame span back on top of the stack.
    pub fn replug(&mut self, plug: Plug) {
        self.frames.extend(plug.frames);
    }
}

/// A saved contiguous span of frames (see [`Machine::plug`]).
#[derive(Debug)]
pub(crate) struct Plug {
    frames: Vec<Frame>,
}

impl Plug {
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::{
        context::{ContextData, ContextKind},
        resource::NoLimitTracker,
        scan::scan_block,
        tracer::NoopTracer,
    };

    struct Fixture {
        heap: Heap<NoLimitTracker>,
        symbols: SymbolTable,
        tracer: NoopTracer,
        lib: SeriesId,
        user: SeriesId,
        halt: AtomicBool,
        hosts: HostFns,
        handles: Vec<Option<Cell>>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut heap = Heap::new(NoLimitTracker);
            let lib = heap.alloc_context(ContextData::new(ContextKind::Module)).unwrap();
            let user = heap
                .alloc_context(ContextData::with_ancestor(ContextKind::Module, lib))
                .unwrap();
            Self {
                heap,
                symbols: SymbolTable::new(),
                tracer: NoopTracer,
                lib,
                user,
                halt: AtomicBool::new(false),
                hosts: Vec::new(),
                handles: Vec::new(),
            }
        }

        fn machine(&mut self) -> Machine<'_, NoLimitTracker, NoopTracer> {
            Machine::new(
                &mut self.heap,
                &mut self.symbols,
                &mut self.tracer,
                self.lib,
                self.user,
                &self.halt,
                false,
                &mut self.hosts,
                &self.handles,
            )
        }
    }

    #[test]
    fn plug_and_replug_preserve_progress() {
        let mut fixture = Fixture::new();
        let array = scan_block(&mut fixture.heap, &mut fixture.symbols, "1 2 3").unwrap();
        let mut m = fixture.machine();
        m.push_stepper_over(array, Dest::Out, FrameFlags::ROOT).unwrap();

        // give the stepper a sub-frame, then unplug that span
        assert_eq!(m.enter_top().unwrap(), Bounce::Continue);
        let plug = m.plug(1);
        assert_eq!(plug.depth(), 1);
        assert_eq!(m.frames.len(), 1);

        m.replug(plug);
        match m.run().unwrap() {
            TrampolineOutcome::Completed(cell) => assert_eq!(cell.as_integer(), Some(3)),
            TrampolineOutcome::Thrown(_) => panic!("no throw expected"),
        }
    }

    #[test]
    fn frame_drop_restores_data_stack_baseline() {
        let mut fixture = Fixture::new();
        let array = fixture.heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        let mut m = fixture.machine();
        m.push_stepper_over(array, Dest::Out, FrameFlags::ROOT).unwrap();
        m.data.push(Cell::integer(7));
        m.push_stepper_over(array, Dest::Discard, FrameFlags::empty()).unwrap();
        m.data.push(Cell::integer(8));
        m.data.push(Cell::integer(9));
        m.drop_frame();
        assert_eq!(m.data.len(), 1, "drop truncates to the recorded baseline");
        m.drop_frame();
        assert!(m.data.is_empty());
    }

    #[test]
    fn feed_holds_released_when_frames_drop() {
        let mut fixture = Fixture::new();
        let array = fixture.heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        {
            let mut m = fixture.machine();
            m.push_stepper_over(array, Dest::Out, FrameFlags::ROOT).unwrap();
            assert_eq!(m.heap.hold_count(array), 1);
            match m.run().unwrap() {
                TrampolineOutcome::Completed(cell) => assert_eq!(cell.as_integer(), Some(1)),
                TrampolineOutcome::Thrown(_) => panic!("no throw expected"),
            }
            assert_eq!(m.heap.hold_count(array), 0);
        }
        assert_eq!(fixture.heap.hold_count(array), 0);
    }
}
