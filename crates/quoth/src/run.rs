//! Public interface for embedding the interpreter.
//!
//! [`Engine`] owns the heap, symbol table, and module roots. `run()`
//! scans source, binds it to the user module, and drives the trampoline
//! to completion; [`Stepper`] exposes the one-expression-at-a-time form
//! for debuggers. Host values cross the boundary as [`Datum`]s, and
//! host-registered actions participate in the ordinary call protocol.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    action::{ActionDetails, Dispatcher},
    cell::Cell,
    context::{BindMode, ContextData, ContextKind, bind_array_deep},
    datum::{Datum, HostFn, cell_from_datum, datum_from_cell},
    error::{Error, ErrorKind},
    feed::FeedIx,
    frame::{Dest, Executor, Frame, FrameFlags},
    heap::{Heap, HeapStats, SeriesId},
    intern::SymbolTable,
    natives,
    resource::{NoLimitTracker, ResourceTracker},
    scan::scan_block,
    spec::compile_spec,
    tracer::{EvalTracer, NoopTracer},
    trampoline::{Machine, TrampolineOutcome},
};

/// Result of evaluating source to completion.
#[derive(Debug)]
pub enum Outcome {
    /// A value.
    Value(Datum),
    /// Every step vanished (or the source was empty).
    Void,
    /// The absence of a value (e.g. an untaken branch).
    Null,
    /// A raised error that no assignment-side construct trapped.
    Raised(Error),
    /// A throw that crossed the root frame without a matching catch.
    Thrown {
        label: Datum,
        payload: Datum,
    },
}

impl Outcome {
    /// The value, if this outcome is one.
    pub fn value(self) -> Option<Datum> {
        match self {
            Self::Value(datum) => Some(datum),
            _ => None,
        }
    }
}

/// An API handle keeping a value rooted against the GC until released.
#[derive(Debug)]
#[must_use = "an unreleased handle keeps its value alive for the engine's whole life"]
pub struct Handle(usize);

/// Requests a halt of a running evaluation from outside.
///
/// The trampoline polls between steps and unwinds everything; the run
/// reports a `Halted` error.
#[derive(Debug, Clone)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    pub fn halt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// The interpreter engine.
///
/// # Example
/// ```
/// use quoth::{Datum, Engine};
///
/// let mut engine = Engine::new();
/// let outcome = engine.run("1 + 2 * 3").unwrap();
/// assert_eq!(outcome.value(), Some(Datum::Integer(9)));
/// ```
pub struct Engine<T: ResourceTracker = NoLimitTracker, Tr: EvalTracer = NoopTracer> {
    heap: Heap<T>,
    symbols: SymbolTable,
    tracer: Tr,
    lib: SeriesId,
    user: SeriesId,
    handles: Vec<Option<Cell>>,
    free_handles: Vec<usize>,
    halt: Arc<AtomicBool>,
    force_gc: bool,
    hosts: Vec<HostFn>,
}

impl Engine {
    /// Boots an engine with no resource limits and no tracing.
    ///
    /// # Panics
    /// Panics only if the native library fails to install, which would
    /// be a packaging bug, not a user-reachable state.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with(NoLimitTracker, NoopTracer)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceTracker, Tr: EvalTracer> Engine<T, Tr> {
    /// Boots an engine with a custom resource tracker and tracer.
    ///
    /// Startup wires the process-wide roots in order: symbol table, lib
    /// module with the native library, then the user module chained to
    /// lib. The `QUOTH_FORCE_GC` environment variable (any value except
    /// `0`) forces a collection on every evaluator step, for testing.
    pub fn new_with(tracker: T, tracer: Tr) -> Self {
        let mut heap = Heap::new(tracker);
        let mut symbols = SymbolTable::new();
        let lib = heap
            .alloc_context(ContextData::new(ContextKind::Module))
            .expect("fresh heap cannot be over limit");
        natives::install(&mut heap, &mut symbols, lib).expect("native library installs");
        let user = heap
            .alloc_context(ContextData::with_ancestor(ContextKind::Module, lib))
            .expect("fresh heap cannot be over limit");
        let force_gc = std::env::var("QUOTH_FORCE_GC").is_ok_and(|v| v != "0");
        Self {
            heap,
            symbols,
            tracer,
            lib,
            user,
            handles: Vec::new(),
            free_handles: Vec::new(),
            halt: Arc::new(AtomicBool::new(false)),
            force_gc,
            hosts: Vec::new(),
        }
    }

    /// Forces a garbage collection on every evaluator step (testing).
    pub fn set_force_gc(&mut self, force: bool) {
        self.force_gc = force;
    }

    /// A handle that can halt a run of this engine.
    #[must_use]
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle(Arc::clone(&self.halt))
    }

    /// The tracer, for reading back recorded events.
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    /// Scans, binds, and evaluates source to completion.
    pub fn run(&mut self, source: &str) -> Result<Outcome, Error> {
        let array = scan_block(&mut self.heap, &mut self.symbols, source)
            .map_err(crate::error::RunError::into_error)?;
        bind_array_deep(&mut self.heap, array, self.user, BindMode::Attach)
            .map_err(crate::error::RunError::into_error)?;
        self.eval_array(array)
    }

    /// Evaluates an already-scanned array.
    fn eval_array(&mut self, array: SeriesId) -> Result<Outcome, Error> {
        self.halt.store(false, Ordering::Relaxed);
        let mut machine = Machine::new(
            &mut self.heap,
            &mut self.symbols,
            &mut self.tracer,
            self.lib,
            self.user,
            &self.halt,
            self.force_gc,
            &mut self.hosts,
            &self.handles,
        );
        machine.push_stepper_over(array, Dest::Out, FrameFlags::ROOT)
            .map_err(crate::error::RunError::into_error)?;
        let result = machine.run();
        drop(machine);
        match result {
            Ok(TrampolineOutcome::Completed(cell)) => Ok(self.outcome_from_cell(cell)),
            Ok(TrampolineOutcome::Thrown(thrown)) => Ok(Outcome::Thrown {
                label: datum_from_cell(&self.heap, &self.symbols, &thrown.label),
                payload: datum_from_cell(&self.heap, &self.symbols, &thrown.payload),
            }),
            Err(err) => Err(err.into_error()),
        }
    }

    fn outcome_from_cell(&self, cell: Cell) -> Outcome {
        if cell.is_raised() {
            return Outcome::Raised(crate::context::context_to_error(
                &self.heap,
                &self.symbols,
                cell.series_id(),
            ));
        }
        if cell.is_stale() || cell.is_void() {
            return Outcome::Void;
        }
        if cell.is_null() {
            return Outcome::Null;
        }
        Outcome::Value(datum_from_cell(&self.heap, &self.symbols, &cell))
    }

    /// Opens a single-step evaluator over source.
    pub fn stepper(&mut self, source: &str) -> Result<Stepper<'_, T, Tr>, Error> {
        let array = scan_block(&mut self.heap, &mut self.symbols, source)
            .map_err(crate::error::RunError::into_error)?;
        bind_array_deep(&mut self.heap, array, self.user, BindMode::Attach)
            .map_err(crate::error::RunError::into_error)?;
        self.halt.store(false, Ordering::Relaxed);
        let mut machine = Machine::new(
            &mut self.heap,
            &mut self.symbols,
            &mut self.tracer,
            self.lib,
            self.user,
            &self.halt,
            self.force_gc,
            &mut self.hosts,
            &self.handles,
        );
        let feed = machine.new_feed(array, 0);
        Ok(Stepper { machine, feed })
    }

    /// Registers a host action under `name` in the lib module.
    ///
    /// The spec uses the same dialect as `func`; the host function
    /// receives fulfilled arguments as detached values.
    pub fn register_action(
        &mut self,
        name: &str,
        spec_source: &str,
        host_fn: HostFn,
    ) -> Result<(), Error> {
        let spec_array = scan_block(&mut self.heap, &mut self.symbols, spec_source)
            .map_err(crate::error::RunError::into_error)?;
        let compiled = compile_spec(&self.heap, &self.symbols, spec_array)
            .map_err(crate::error::RunError::into_error)?;
        let host_ix = self.hosts.len() as u32;
        self.hosts.push(host_fn);
        let name_sym = self.symbols.intern(name);
        let details = ActionDetails::new(Some(name_sym), compiled.params, Dispatcher::Host(host_ix));
        let details_id = self
            .heap
            .alloc_details(details.finalize())
            .map_err(crate::error::RunError::into_error)?;
        self.heap
            .context_mut(self.lib)
            .and_then(|ctx| {
                ctx.append(name_sym, Cell::action(details_id));
                Ok(())
            })
            .map_err(crate::error::RunError::into_error)
    }

    /// Roots a value against the GC until the handle is released.
    pub fn alloc_handle(&mut self, value: &Datum) -> Result<Handle, Error> {
        let cell = cell_from_datum(&mut self.heap, &mut self.symbols, value)
            .map_err(crate::error::RunError::into_error)?;
        let ix = match self.free_handles.pop() {
            Some(ix) => {
                self.handles[ix] = Some(cell);
                ix
            }
            None => {
                self.handles.push(Some(cell));
                self.handles.len() - 1
            }
        };
        Ok(Handle(ix))
    }

    /// Reads a handle's value back.
    pub fn handle_value(&self, handle: &Handle) -> Result<Datum, Error> {
        match self.handles.get(handle.0).and_then(Option::as_ref) {
            Some(cell) => Ok(datum_from_cell(&self.heap, &self.symbols, cell)),
            None => Err(Error::new(ErrorKind::BadHandle, "handle already released")),
        }
    }

    /// Releases a handle; its value becomes collectible.
    pub fn release_handle(&mut self, handle: Handle) -> Result<(), Error> {
        match self.handles.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.free_handles.push(handle.0);
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::BadHandle, "handle already released")),
        }
    }

    /// Runs a collection outside of evaluation.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = [self.lib, self.user];
        self.heap.collect(roots, self.handles.iter().flatten())
    }

    /// Arena statistics.
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Tears the engine down, verifying that the final sweep reclaims
    /// every series once the roots are dropped.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.handles.clear();
        self.heap.collect([], []);
        let stats = self.heap.stats();
        if stats.live_series != 0 {
            return Err(Error::internal(format!(
                "{} series survived the final sweep",
                stats.live_series
            )));
        }
        Ok(())
    }
}

/// One-expression-at-a-time evaluation.
///
/// Each call to [`Stepper::step`] evaluates a single expression and
/// reports its outcome; `None` means the feed is exhausted.
pub struct Stepper<'e, T: ResourceTracker, Tr: EvalTracer> {
    machine: Machine<'e, T, Tr>,
    feed: FeedIx,
}

impl<T: ResourceTracker, Tr: EvalTracer> Stepper<'_, T, Tr> {
    /// Evaluates the next expression.
    pub fn step(&mut self) -> Result<Option<Outcome>, Error> {
        if self.machine.feed_is_at_end(self.feed) {
            return Ok(None);
        }
        self.machine.retain_feed(self.feed);
        let frame = Frame::new(Executor::Step, self.feed, Dest::Out).with_flags(FrameFlags::ROOT);
        self.machine
            .push_frame(frame)
            .map_err(crate::error::RunError::into_error)?;
        match self.machine.run() {
            Ok(TrampolineOutcome::Completed(cell)) => {
                let outcome = if cell.is_raised() {
                    Outcome::Raised(crate::context::context_to_error(
                        self.machine.heap,
                        self.machine.symbols,
                        cell.series_id(),
                    ))
                } else if cell.is_stale() || cell.is_void() {
                    Outcome::Void
                } else if cell.is_null() {
                    Outcome::Null
                } else {
                    Outcome::Value(datum_from_cell(self.machine.heap, self.machine.symbols, &cell))
                };
                Ok(Some(outcome))
            }
            Ok(TrampolineOutcome::Thrown(thrown)) => Ok(Some(Outcome::Thrown {
                label: datum_from_cell(self.machine.heap, self.machine.symbols, &thrown.label),
                payload: datum_from_cell(self.machine.heap, self.machine.symbols, &thrown.payload),
            })),
            Err(err) => Err(err.into_error()),
        }
    }
}

impl<T: ResourceTracker, Tr: EvalTracer> Drop for Stepper<'_, T, Tr> {
    fn drop(&mut self) {
        self.machine.release_feed(self.feed);
    }
}
