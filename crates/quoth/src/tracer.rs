//! Evaluator tracing infrastructure.
//!
//! A trait-based tracing system for the trampoline with zero-cost
//! abstraction: when using [`NoopTracer`], every hook compiles away via
//! monomorphization, the same way [`NoLimitTracker`](crate::resource::NoLimitTracker)
//! eliminates resource checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |

use crate::cell::Heart;

/// Trace event emitted during evaluation.
///
/// Used by [`RecordingTracer`] to capture an execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An evaluator step began on a cell of the given heart.
    Step {
        /// Heart of the cell at the feed position.
        heart: Heart,
        /// Frame depth at the time of the step.
        depth: usize,
    },
    /// A frame was pushed.
    FramePush {
        /// Executor kind ("stepper", "step", "action").
        executor: &'static str,
        /// Frame depth after the push.
        depth: usize,
    },
    /// A frame was dropped.
    FrameDrop {
        /// Frame depth after the drop.
        depth: usize,
    },
    /// An action dispatcher was invoked.
    ActionCall {
        /// The action's label, when known.
        name: Option<String>,
    },
    /// A throw began unwinding.
    Throw {
        /// Molded label of the throw.
        label: String,
    },
    /// A garbage collection pass completed.
    Gc {
        /// Number of series swept.
        swept: usize,
    },
}

/// Trait for evaluator tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`]
/// requires zero lines of code and compiles to zero instructions.
pub trait EvalTracer: std::fmt::Debug {
    /// Called at the start of every evaluator step. The hottest hook;
    /// implementations should stay lightweight.
    #[inline(always)]
    fn on_step(&mut self, _heart: Heart, _depth: usize) {}

    /// Called after a frame is pushed.
    #[inline(always)]
    fn on_frame_push(&mut self, _executor: &'static str, _depth: usize) {}

    /// Called after a frame is dropped.
    #[inline(always)]
    fn on_frame_drop(&mut self, _depth: usize) {}

    /// Called when an action's dispatcher is about to run.
    #[inline(always)]
    fn on_action_call(&mut self, _name: Option<&str>) {}

    /// Called when a throw starts unwinding.
    #[inline(always)]
    fn on_throw(&mut self, _label: &str) {}

    /// Called after each garbage collection pass.
    #[inline(always)]
    fn on_gc(&mut self, _swept: usize) {}
}

/// Zero-cost tracer; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Logs each hook to stderr; for interactive debugging.
#[derive(Debug, Default)]
pub struct StderrTracer {
    steps: u64,
}

impl EvalTracer for StderrTracer {
    fn on_step(&mut self, heart: Heart, depth: usize) {
        self.steps += 1;
        eprintln!("[{:>6}] {:indent$}step {heart}", self.steps, "", indent = depth * 2);
    }

    fn on_frame_push(&mut self, executor: &'static str, depth: usize) {
        eprintln!("         {:indent$}push {executor}", "", indent = depth * 2);
    }

    fn on_frame_drop(&mut self, depth: usize) {
        eprintln!("         {:indent$}drop", "", indent = depth * 2);
    }

    fn on_action_call(&mut self, name: Option<&str>) {
        eprintln!("         call {}", name.unwrap_or("(anonymous)"));
    }

    fn on_throw(&mut self, label: &str) {
        eprintln!("         throw {label}");
    }

    fn on_gc(&mut self, swept: usize) {
        eprintln!("         gc swept {swept}");
    }
}

/// Records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, in order.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Consumes the tracer, returning the recorded events.
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl EvalTracer for RecordingTracer {
    fn on_step(&mut self, heart: Heart, depth: usize) {
        self.events.push(TraceEvent::Step { heart, depth });
    }

    fn on_frame_push(&mut self, executor: &'static str, depth: usize) {
        self.events.push(TraceEvent::FramePush { executor, depth });
    }

    fn on_frame_drop(&mut self, depth: usize) {
        self.events.push(TraceEvent::FrameDrop { depth });
    }

    fn on_action_call(&mut self, name: Option<&str>) {
        self.events.push(TraceEvent::ActionCall {
            name: name.map(str::to_owned),
        });
    }

    fn on_throw(&mut self, label: &str) {
        self.events.push(TraceEvent::Throw {
            label: label.to_owned(),
        });
    }

    fn on_gc(&mut self, swept: usize) {
        self.events.push(TraceEvent::Gc { swept });
    }
}
