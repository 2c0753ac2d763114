#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "parts of the feed/frame protocol are exercised only by tests")]

mod action;
mod call;
mod cell;
mod context;
mod datum;
mod error;
mod eval;
mod feed;
mod frame;
mod heap;
mod intern;
mod mold;
mod natives;
mod resource;
mod run;
mod scan;
mod spec;
pub mod tracer;
mod trampoline;

pub use crate::{
    cell::Heart,
    datum::{Datum, HostFn},
    error::{Error, ErrorKind},
    heap::HeapStats,
    resource::{
        DEFAULT_MAX_FRAME_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits,
        ResourceTracker,
    },
    run::{Engine, HaltHandle, Handle, Outcome, Stepper},
    tracer::{EvalTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
