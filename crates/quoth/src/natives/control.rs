//! Control-flow natives: branching, loops, throws, and the vanishing
//! and multi-return constructs.

use crate::{
    call::ST_DISPATCH,
    cell::{Cell, CellFlags, Heart},
    error::{ErrorKind, RunError, RunResult},
    frame::{CatchMode, Dest, Executor, Frame, FrameFlags, ST_CAUGHT},
    natives::{ST_NATIVE, arg, arg_cloned, attach_to_user, delegate_block},
    resource::ResourceTracker,
    scan::scan_block,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine, Thrown},
};

/// Generic "continuation is running" state.
const ST_RUNNING: u8 = ST_NATIVE;
/// Loop natives: a step over the aux feed completed into `spare`.
const ST_LOOP_STEP: u8 = ST_NATIVE + 1;
/// While: the condition block completed into `spare`.
const ST_COND_DONE: u8 = ST_NATIVE + 2;
/// While: the body block completed into `out`.
const ST_BODY_DONE: u8 = ST_NATIVE + 3;

pub(crate) fn r#if<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    if arg(m, fx, 0).is_truthy()? {
        let branch = arg_cloned(m, fx, 1);
        delegate_block(m, fx, &branch)
    } else {
        // out stays stale: the whole expression is void, so else can
        // tell "ran and produced nothing" from "did not run"
        Ok(Bounce::Completed)
    }
}

pub(crate) fn either<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let which = if arg(m, fx, 0).is_truthy()? { 1 } else { 2 };
    let branch = arg_cloned(m, fx, which);
    delegate_block(m, fx, &branch)
}

/// The meta'd left side of then/else/also is "absent" when it was null
/// or void.
fn left_absent(left: &Cell) -> bool {
    left.is_quasiform() && matches!(left.heart(), Heart::Void | Heart::Null)
}

pub(crate) fn r#else<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let left = arg_cloned(m, fx, 0);
    if left_absent(&left) {
        let branch = arg_cloned(m, fx, 1);
        delegate_block(m, fx, &branch)
    } else {
        m.frames[fx].out = left.unmeta()?;
        Ok(Bounce::Completed)
    }
}

pub(crate) fn then<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let left = arg_cloned(m, fx, 0);
    if left_absent(&left) {
        m.frames[fx].out = left.unmeta()?;
        Ok(Bounce::Completed)
    } else {
        let branch = arg_cloned(m, fx, 1);
        delegate_block(m, fx, &branch)
    }
}

pub(crate) fn also<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let left = arg_cloned(m, fx, 0);
            if left_absent(&left) {
                m.frames[fx].out = left.unmeta()?;
                return Ok(Bounce::Completed);
            }
            // run the branch for its side effects, keep the left value
            m.frames[fx].spare = left;
            let branch = arg(m, fx, 1).series_id();
            m.push_stepper_over(branch, Dest::Discard, FrameFlags::empty())?;
            m.frames[fx].state = ST_RUNNING;
            Ok(Bounce::Continue)
        }
        ST_RUNNING => {
            let left = std::mem::replace(&mut m.frames[fx].spare, Cell::fresh_void());
            m.frames[fx].out = left.unmeta()?;
            Ok(Bounce::Completed)
        }
        other => unreachable!("also in state {other}"),
    }
}

/// Advances a loop native to its next step over the aux feed.
fn loop_next<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let feed = m.frames[fx].action_state().aux_feed.expect("loop opened its feed");
    if m.feed_is_at_end(feed) {
        return Ok(Bounce::Completed);
    }
    m.push_step_shared(feed, Dest::Spare, FrameFlags::empty())?;
    m.frames[fx].state = ST_LOOP_STEP;
    Ok(Bounce::Continue)
}

pub(crate) fn all<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let block = arg(m, fx, 0).series_id();
            let feed = m.new_feed(block, 0);
            m.frames[fx].action_state_mut().aux_feed = Some(feed);
            loop_next(m, fx)
        }
        ST_LOOP_STEP => {
            let spare = std::mem::replace(&mut m.frames[fx].spare, Cell::fresh_void());
            // a vanished step leaves the previous value in play
            if !spare.is_stale() {
                if !spare.is_truthy()? {
                    m.frames[fx].out = Cell::null();
                    return Ok(Bounce::Completed);
                }
                m.frames[fx].out = spare;
            }
            loop_next(m, fx)
        }
        other => unreachable!("all in state {other}"),
    }
}

pub(crate) fn any<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let block = arg(m, fx, 0).series_id();
            let feed = m.new_feed(block, 0);
            m.frames[fx].action_state_mut().aux_feed = Some(feed);
            any_next(m, fx)
        }
        ST_LOOP_STEP => {
            let spare = std::mem::replace(&mut m.frames[fx].spare, Cell::fresh_void());
            if !spare.is_stale() && spare.is_truthy()? {
                m.frames[fx].out = spare;
                return Ok(Bounce::Completed);
            }
            any_next(m, fx)
        }
        other => unreachable!("any in state {other}"),
    }
}

fn any_next<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let feed = m.frames[fx].action_state().aux_feed.expect("loop opened its feed");
    if m.feed_is_at_end(feed) {
        m.frames[fx].out = Cell::null();
        return Ok(Bounce::Completed);
    }
    m.push_step_shared(feed, Dest::Spare, FrameFlags::empty())?;
    m.frames[fx].state = ST_LOOP_STEP;
    Ok(Bounce::Continue)
}

pub(crate) fn r#while<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH | ST_BODY_DONE => {
            let cond = arg(m, fx, 0).series_id();
            m.push_stepper_over(cond, Dest::Spare, FrameFlags::empty())?;
            m.frames[fx].state = ST_COND_DONE;
            Ok(Bounce::Continue)
        }
        ST_COND_DONE => {
            let spare = std::mem::replace(&mut m.frames[fx].spare, Cell::fresh_void());
            if spare.is_stale() {
                return Err(RunError::fail(
                    ErrorKind::BadCondition,
                    "while condition vanished",
                ));
            }
            if spare.is_truthy()? {
                let body = arg(m, fx, 1).series_id();
                m.push_stepper_over(body, Dest::Out, FrameFlags::empty())?;
                m.frames[fx].state = ST_BODY_DONE;
                Ok(Bounce::Continue)
            } else {
                if m.frames[fx].out.is_stale() {
                    m.frames[fx].out = Cell::null();
                }
                Ok(Bounce::Completed)
            }
        }
        other => unreachable!("while in state {other}"),
    }
}

pub(crate) fn catch<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let name = arg(m, fx, 1);
            m.frames[fx].catch = if name.is_null() {
                CatchMode::Unnamed
            } else {
                CatchMode::Named(name.word_symbol())
            };
            let block = arg(m, fx, 0).series_id();
            m.push_stepper_over(block, Dest::Discard, FrameFlags::empty())?;
            m.frames[fx].state = ST_RUNNING;
            Ok(Bounce::Continue)
        }
        ST_RUNNING => {
            // the block ran to completion without a matching throw
            m.frames[fx].out = Cell::null();
            Ok(Bounce::Completed)
        }
        ST_CAUGHT => {
            let thrown = m.thrown.take().expect("caught state without a throw");
            m.frames[fx].out = thrown.payload;
            Ok(Bounce::Completed)
        }
        other => unreachable!("catch in state {other}"),
    }
}

pub(crate) fn throw<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let payload = arg_cloned(m, fx, 0);
    let name = arg(m, fx, 1);
    let label = if name.is_null() {
        Cell::blank()
    } else {
        Cell::word(Heart::Word, name.word_symbol())
    };
    m.thrown = Some(Thrown { label, payload });
    Ok(Bounce::Thrown)
}

pub(crate) fn r#do<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let source = arg_cloned(m, fx, 0);
    match source.heart() {
        Heart::Block => delegate_block(m, fx, &source),
        Heart::Text => {
            let text = m.heap.text(source.series_id()).to_owned();
            let array = scan_block(m.heap, m.symbols, &text)?;
            attach_to_user(m, array)?;
            m.frames[fx].flags |= FrameFlags::DELEGATED;
            m.push_stepper_over(array, Dest::Out, FrameFlags::empty())?;
            Ok(Bounce::Delegate)
        }
        _ => unreachable!("typecheck admits block! and text! only"),
    }
}

pub(crate) fn reduce<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let block = arg(m, fx, 0).series_id();
    let feed = m.new_feed(block, 0);
    m.frames[fx].flags |= FrameFlags::DELEGATED;
    m.push_frame(Frame::new(Executor::Reducer { meta: false }, feed, Dest::Out))?;
    Ok(Bounce::Delegate)
}

/// Also handles `elide`, whose argument was evaluated (and is now
/// discarded) during fulfillment.
pub(crate) fn comment<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    debug_assert!(m.frames[fx].out.is_stale());
    // out stays stale: the expression vanishes
    Ok(Bounce::Completed)
}

pub(crate) fn pack<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let block = arg(m, fx, 0).series_id();
            let feed = m.new_feed(block, 0);
            m.push_frame(Frame::new(Executor::Reducer { meta: true }, feed, Dest::Out))?;
            m.frames[fx].state = ST_RUNNING;
            Ok(Bounce::Continue)
        }
        ST_RUNNING => {
            let out = std::mem::replace(&mut m.frames[fx].out, Cell::fresh_void());
            debug_assert_eq!(out.heart(), Heart::Block);
            m.frames[fx].out = out.make_isotope();
            Ok(Bounce::Completed)
        }
        other => unreachable!("pack in state {other}"),
    }
}

pub(crate) fn fail<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    Err(reason_to_error(m, fx))
}

pub(crate) fn raise<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let reason = arg_cloned(m, fx, 0);
    let ctx_id = match reason.heart() {
        Heart::Error => reason.series_id(),
        Heart::Text => {
            let message = m.heap.text(reason.series_id()).to_owned();
            let err = crate::error::Error::new(ErrorKind::UserError, message);
            crate::context::error_to_context(m.heap, m.symbols, &err)?
        }
        _ => unreachable!("typecheck admits text! and error! only"),
    };
    let mut cell = Cell::context(Heart::Error, ctx_id);
    cell.set_flag(CellFlags::RAISED);
    m.frames[fx].out = cell;
    Ok(Bounce::Completed)
}

fn reason_to_error<T: ResourceTracker, Tr: EvalTracer>(m: &Machine<'_, T, Tr>, fx: usize) -> RunError {
    let reason = arg(m, fx, 0);
    match reason.heart() {
        Heart::Error => RunError::Fail(Box::new(crate::context::context_to_error(
            m.heap,
            m.symbols,
            reason.series_id(),
        ))),
        Heart::Text => RunError::fail(ErrorKind::UserError, m.heap.text(reason.series_id()).to_owned()),
        _ => unreachable!("typecheck admits text! and error! only"),
    }
}

pub(crate) fn r#try<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let value = arg_cloned(m, fx, 0);
    // the meta parameter defused any raised error into a quasi error
    if value.is_quasiform() && value.heart() == Heart::Error {
        m.frames[fx].out = Cell::null();
    } else if value.is_quasiform() && value.heart() == Heart::Void {
        // void passes through as void
        return Ok(Bounce::Completed);
    } else {
        m.frames[fx].out = value.unmeta()?;
    }
    Ok(Bounce::Completed)
}

pub(crate) fn rescue<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            m.frames[fx].catch = CatchMode::Failures;
            let block = arg(m, fx, 0).series_id();
            m.push_stepper_over(block, Dest::Discard, FrameFlags::empty())?;
            m.frames[fx].state = ST_RUNNING;
            Ok(Bounce::Continue)
        }
        ST_RUNNING => {
            m.frames[fx].out = Cell::null();
            Ok(Bounce::Completed)
        }
        ST_CAUGHT => {
            // the unwind left the reified error in spare
            let error = std::mem::replace(&mut m.frames[fx].spare, Cell::fresh_void());
            m.frames[fx].out = error;
            Ok(Bounce::Completed)
        }
        other => unreachable!("rescue in state {other}"),
    }
}
