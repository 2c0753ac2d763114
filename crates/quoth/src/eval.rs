//! The evaluator executor: one expression per step.
//!
//! Each step marks `out` stale, consumes one shape from the feed, and
//! dispatches on it. Sub-expressions (action arguments, groups, right
//! hand sides) are pushed as sub-frames; the state byte records where to
//! resume when they complete. A completed step whose `out` is still
//! stale vanished, and the trampoline leaves the destination untouched
//! so prior residue shows through (`all [1 + 2 comment "x"]` is 3).
//!
//! Enfix is handled in two places. *Left-quote lookahead* runs before
//! dispatch: a word ahead that names an enfix action whose first
//! parameter quotes claims the current cell verbatim. *Post-step
//! lookahead* runs after `out` is produced: an enfix word ahead consumes
//! `out` as its left argument, subject to the tight-argument
//! (`NO_LOOKAHEAD`), deferral, and postponement rules. A deferring
//! operator seen while fulfilling an argument is passed over exactly
//! once, so it ends up binding to the outermost completed argument
//! expression.

use crate::{
    call,
    cell::{Cell, CellFlags, Heart, Payload, QuoteState, decay},
    context::{Resolution, assign_word},
    error::{ErrorKind, RunError, RunResult},
    frame::{Dest, Executor, Frame, FrameFlags, ST_ABRUPT, ST_INITIAL},
    resource::ResourceTracker,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine},
};

// step executor resume points
pub(crate) const ST_LOOKAHEAD: u8 = 1;
const ST_SET_WORD_RHS: u8 = 2;
const ST_SET_TUPLE_RHS: u8 = 3;
const ST_SET_GROUP_DONE: u8 = 4;
const ST_SET_BLOCK_PREP: u8 = 5;
const ST_SET_BLOCK_RHS: u8 = 6;

// reducer executor resume point
const ST_REDUCE_COLLECT: u8 = 1;

/// Runs expression steps over the frame's feed until it is exhausted.
/// Vanished steps leave `out` untouched, so the result is the last real
/// value (or void when nothing produced one).
pub(crate) fn stepper_executor<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    if m.frames[fx].state == ST_ABRUPT {
        return Ok(Bounce::Completed);
    }
    let feed = m.frames[fx].feed;
    if m.feed_is_at_end(feed) {
        return Ok(Bounce::Completed);
    }
    // an unconsumed raised error promotes at the next step boundary
    if m.frames[fx].out.is_raised() {
        return Err(promote_raised(m, fx));
    }
    m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
    Ok(Bounce::Continue)
}

/// Evaluates exactly one expression from the feed.
pub(crate) fn step_executor<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_ABRUPT => Ok(Bounce::Completed),
        ST_INITIAL => {
            let result = dispatch(m, fx);
            result.map_err(|e| m.fail_near(fx, e))
        }
        ST_LOOKAHEAD => lookahead(m, fx),
        ST_SET_WORD_RHS => set_word_resume(m, fx),
        ST_SET_TUPLE_RHS => set_tuple_resume(m, fx),
        ST_SET_GROUP_DONE => set_group_resume(m, fx),
        ST_SET_BLOCK_PREP => set_block_prep_resume(m, fx),
        ST_SET_BLOCK_RHS => set_block_resume(m, fx),
        other => unreachable!("step executor in unknown state {other}"),
    }
}

/// Collects step results onto the data stack and completes with a new
/// block. `meta` variants store meta'd values (packs).
pub(crate) fn reducer_executor<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    if m.frames[fx].state == ST_ABRUPT {
        return Ok(Bounce::Completed);
    }
    let meta = matches!(m.frames[fx].executor, Executor::Reducer { meta: true });
    let feed = m.frames[fx].feed;

    if m.frames[fx].state == ST_REDUCE_COLLECT {
        let out = std::mem::replace(&mut m.frames[fx].out, Cell::fresh_void());
        if !out.is_stale() {
            if out.is_raised() {
                m.frames[fx].out = out;
                return Err(promote_raised(m, fx));
            }
            let cell = if meta {
                out.meta()
            } else {
                let value = decay(m.heap, out)?;
                if value.is_isotope() {
                    return Err(RunError::fail(
                        ErrorKind::BadIsotope,
                        "cannot put an isotope into a reduced block",
                    ));
                }
                value
            };
            m.data.push(cell);
        }
        m.frames[fx].state = ST_INITIAL;
    }

    if m.feed_is_at_end(feed) {
        let baseline = m.frames[fx].baseline as usize;
        let cells = m.data.split_off(baseline);
        let id = m.heap.alloc_array(cells)?;
        m.frames[fx].out = Cell::series(Heart::Block, id);
        return Ok(Bounce::Completed);
    }
    m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
    m.frames[fx].state = ST_REDUCE_COLLECT;
    Ok(Bounce::Continue)
}

/// The initial dispatch: consume one cell and act on its shape.
fn dispatch<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    m.on_eval_step()?;
    let feed = m.frames[fx].feed;
    let Some(peek) = m.feed_at(feed) else {
        return Ok(Bounce::Completed); // out stays stale: void
    };
    let heart = peek.heart();
    m.tracer.on_step(heart, fx + 1);

    let gotten = m.feed_take_gotten(feed);
    let current = m.feed_fetch(feed).expect("peeked above");

    if let Some(bounce) = try_left_quote(m, fx, &current)? {
        return Ok(bounce);
    }

    match current.quote() {
        QuoteState::Isotope => Err(RunError::fail(
            ErrorKind::Internal,
            "isotope found inside an array",
        )),
        QuoteState::Quasi(0) => {
            m.frames[fx].out = current.evaluate_quasi();
            goto_lookahead(m, fx)
        }
        QuoteState::Plain(0) => dispatch_heart(m, fx, current, gotten),
        // quoted (plain or quasi): copy with one quote level removed
        QuoteState::Plain(_) | QuoteState::Quasi(_) => {
            m.frames[fx].out = current.unquote_one()?;
            goto_lookahead(m, fx)
        }
    }
}

fn dispatch_heart<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    current: Cell,
    gotten: Option<Cell>,
) -> RunResult<Bounce> {
    let feed = m.frames[fx].feed;
    match current.heart() {
        Heart::Null | Heart::Void => Err(RunError::fail(
            ErrorKind::BadNull,
            "null may not appear in an expression slot",
        )),

        // expression barrier: complete the step with out still stale
        Heart::Comma => {
            if m.feed_deferred_once(feed) {
                return Err(RunError::fail(
                    ErrorKind::AmbiguousInfix,
                    "comma barrier while a deferred enfix is pending",
                ));
            }
            Ok(Bounce::Completed)
        }

        Heart::Word => {
            let value = match gotten {
                Some(v) => v,
                None => match m.resolve_word_cell(&current)? {
                    Resolution::Value(v) => v,
                    Resolution::Undefined => return Err(unset_error(m, &current)),
                },
            };
            if value.heart() == Heart::Action && value.quote() == QuoteState::Plain(0) {
                let details_id = value.series_id();
                if m.heap.details(details_id).is_enfix() {
                    return Err(RunError::fail(
                        ErrorKind::NoLeftValue,
                        format!(
                            "enfix {} has no value to its left",
                            m.symbols.resolve(current.word_symbol())
                        ),
                    ));
                }
                call::push_action_frame(
                    m,
                    details_id,
                    feed,
                    Dest::Out,
                    None,
                    Some(current.word_symbol()),
                    0,
                )?;
                m.frames[fx].state = ST_LOOKAHEAD;
                return Ok(Bounce::Continue);
            }
            if value.is_unset() {
                return Err(unset_error(m, &current));
            }
            if value.is_unstable_isotope() {
                return Err(RunError::fail(
                    ErrorKind::BadIsotope,
                    format!(
                        "{} holds an isotope; use a meta form to read it",
                        m.symbols.resolve(current.word_symbol())
                    ),
                ));
            }
            let mut out = value;
            out.clear_flag(CellFlags::UNEVALUATED);
            m.frames[fx].out = out;
            goto_lookahead(m, fx)
        }

        Heart::SetWord => {
            require_right_hand(m, fx, "set-word")?;
            m.frames[fx].spare = current;
            m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_SET_WORD_RHS;
            Ok(Bounce::Continue)
        }

        Heart::GetWord => {
            let value = match m.resolve_word_cell(&current)? {
                Resolution::Value(v) => v,
                Resolution::Undefined => return Err(unset_error(m, &current)),
            };
            if value.is_unset() {
                return Err(unset_error(m, &current));
            }
            if value.is_unstable_isotope() {
                return Err(RunError::fail(
                    ErrorKind::BadIsotope,
                    "isotope is forbidden in a plain get; use a meta form",
                ));
            }
            m.frames[fx].out = value;
            goto_lookahead(m, fx)
        }

        Heart::MetaWord => {
            let value = match m.resolve_word_cell(&current)? {
                Resolution::Value(v) => v,
                Resolution::Undefined => Cell::unset(),
            };
            m.frames[fx].out = value.meta();
            goto_lookahead(m, fx)
        }

        Heart::Group | Heart::GetGroup => {
            m.push_stepper_over(current.series_id(), Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_LOOKAHEAD;
            Ok(Bounce::Continue)
        }

        Heart::MetaGroup => {
            m.push_stepper_over(current.series_id(), Dest::Out, FrameFlags::META_RESULT)?;
            m.frames[fx].state = ST_LOOKAHEAD;
            Ok(Bounce::Continue)
        }

        Heart::MetaBlock => {
            let mut out = Cell::series(Heart::Block, current.series_id());
            out.set_binding(current.binding());
            m.frames[fx].out = out.quote_one()?;
            goto_lookahead(m, fx)
        }

        Heart::GetBlock => {
            let feed2 = m.new_feed(current.series_id(), 0);
            m.push_frame(Frame::new(Executor::Reducer { meta: false }, feed2, Dest::Out))?;
            m.frames[fx].state = ST_LOOKAHEAD;
            Ok(Bounce::Continue)
        }

        Heart::Tuple => {
            let segments = m.heap.array(current.series_id()).to_vec();
            if segments.first().is_some_and(|head| head.heart() == Heart::Blank) {
                return inert(m, fx, current);
            }
            let value = resolve_pick_chain(m, &segments)?;
            if value.heart() == Heart::Action && value.quote() == QuoteState::Plain(0) {
                // no enfix through tuples; always prefix
                call::push_action_frame(m, value.series_id(), feed, Dest::Out, None, None, 0)?;
                m.frames[fx].state = ST_LOOKAHEAD;
                return Ok(Bounce::Continue);
            }
            m.frames[fx].out = value;
            goto_lookahead(m, fx)
        }

        Heart::Path => {
            let segments = m.heap.array(current.series_id()).to_vec();
            if segments.first().is_some_and(|head| head.heart() == Heart::Blank) {
                return inert(m, fx, current);
            }
            if segments.last().is_some_and(|tail| tail.heart() == Heart::Blank) {
                return Err(RunError::fail(
                    ErrorKind::PathApplyIncomplete,
                    "path ends in a slash with nothing to apply",
                ));
            }
            let head_value = resolve_pick_chain(m, &segments[..1])?;
            if head_value.heart() == Heart::Action && head_value.quote() == QuoteState::Plain(0) {
                // collect refinements onto the data stack
                let mut count = 0;
                for segment in &segments[1..] {
                    if !segment.heart().is_word() {
                        return Err(RunError::fail(
                            ErrorKind::UnknownRefinement,
                            "path refinements must be words",
                        ));
                    }
                    m.data.push(Cell::word(Heart::Word, segment.word_symbol()));
                    count += 1;
                }
                let label = segments[0].word_symbol();
                call::push_action_frame(
                    m,
                    head_value.series_id(),
                    feed,
                    Dest::Out,
                    None,
                    Some(label),
                    count,
                )?;
                m.frames[fx].state = ST_LOOKAHEAD;
                return Ok(Bounce::Continue);
            }
            let value = resolve_pick_chain(m, &segments)?;
            m.frames[fx].out = value;
            goto_lookahead(m, fx)
        }

        Heart::SetTuple => {
            require_right_hand(m, fx, "set-tuple")?;
            m.frames[fx].spare = current;
            m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_SET_TUPLE_RHS;
            Ok(Bounce::Continue)
        }

        Heart::SetGroup => {
            m.push_stepper_over(current.series_id(), Dest::Spare, FrameFlags::empty())?;
            m.frames[fx].state = ST_SET_GROUP_DONE;
            Ok(Bounce::Continue)
        }

        Heart::SetBlock => {
            m.frames[fx].spare = current;
            set_block_advance(m, fx)
        }

        Heart::Action => {
            call::push_action_frame(m, current.series_id(), feed, Dest::Out, None, None, 0)?;
            m.frames[fx].state = ST_LOOKAHEAD;
            Ok(Bounce::Continue)
        }

        // everything else is inert: copied verbatim with the
        // "this came from source" flag
        _ => inert(m, fx, current),
    }
}

fn inert<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    mut current: Cell,
) -> RunResult<Bounce> {
    current.set_flag(CellFlags::UNEVALUATED);
    m.frames[fx].out = current;
    goto_lookahead(m, fx)
}

fn goto_lookahead<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    m.frames[fx].state = ST_LOOKAHEAD;
    lookahead(m, fx)
}

/// Errors when a set form has nothing to its right.
fn require_right_hand<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    fx: usize,
    what: &str,
) -> RunResult<()> {
    let feed = m.frames[fx].feed;
    match m.feed_at(feed) {
        None => Err(RunError::fail(
            ErrorKind::MissingArgument,
            format!("{what} has no value to its right"),
        )),
        Some(cell) if cell.heart() == Heart::Comma => Err(RunError::fail(
            ErrorKind::NeedsValue,
            format!("{what} hit an expression barrier"),
        )),
        Some(_) => Ok(()),
    }
}

fn unset_error<T: ResourceTracker, Tr: EvalTracer>(m: &Machine<'_, T, Tr>, word: &Cell) -> RunError {
    RunError::fail(
        ErrorKind::UnsetVariable,
        format!("{} is unset", m.symbols.resolve(word.word_symbol())),
    )
}

/// Promotes the raised error sitting in `out` to an abrupt failure.
pub(crate) fn promote_raised<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    fx: usize,
) -> RunError {
    let cell = &m.frames[fx].out;
    debug_assert!(cell.is_raised());
    RunError::Fail(Box::new(crate::context::context_to_error(
        m.heap, m.symbols, cell.series_id(),
    )))
}

// --- left-quote lookahead -------------------------------------------------

/// Before dispatching the current cell: a word ahead bound to an enfix
/// action whose first parameter quotes claims the current cell verbatim.
///
/// Priority reverses when the operator is the final cell of its feed and
/// the current cell is itself a word, tuple, or path (`help of`): the
/// left side gets to treat the operator as its own argument instead.
fn try_left_quote<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    current: &Cell,
) -> RunResult<Option<Bounce>> {
    let feed = m.frames[fx].feed;
    let Some(next) = m.feed_at(feed) else {
        return Ok(None);
    };
    if next.heart() != Heart::Word || next.quote() != QuoteState::Plain(0) {
        return Ok(None);
    }
    let next = next.clone();
    let Ok(Resolution::Value(value)) = m.resolve_word_cell(&next) else {
        return Ok(None);
    };
    if value.heart() != Heart::Action || value.quote() != QuoteState::Plain(0) {
        return Ok(None);
    }
    let details_id = value.series_id();
    let dflags = m.heap.details(details_id).flags;
    if !dflags.contains(crate::action::ActionFlags::ENFIX)
        || !dflags.contains(crate::action::ActionFlags::QUOTES_FIRST)
    {
        return Ok(None);
    }
    let (array, index) = m.feed_position(feed);
    let operator_is_last = index as usize + 1 >= m.heap.array(array).len();
    if operator_is_last && matches!(current.heart(), Heart::Word | Heart::Tuple | Heart::Path) {
        return Ok(None);
    }
    let label = next.word_symbol();
    m.feed_fetch(feed); // consume the operator
    let mut left = current.clone();
    left.set_flag(CellFlags::UNEVALUATED);
    call::push_action_frame(m, details_id, feed, Dest::Out, Some(left), Some(label), 0)?;
    m.frames[fx].state = ST_LOOKAHEAD;
    Ok(Some(Bounce::Continue))
}

// --- post-step enfix lookahead --------------------------------------------

/// After `out` is produced: decide whether the next word consumes it as
/// an enfix left argument.
pub(crate) fn lookahead<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    use crate::action::{ActionFlags, ParamFlags};

    let frame_flags = m.frames[fx].flags;
    if frame_flags.contains(FrameFlags::NO_LOOKAHEAD) {
        return Ok(Bounce::Completed);
    }
    let feed = m.frames[fx].feed;
    let Some(next) = m.feed_at(feed) else {
        return Ok(Bounce::Completed);
    };
    if next.heart() != Heart::Word || next.quote() != QuoteState::Plain(0) {
        return Ok(Bounce::Completed);
    }
    let next = next.clone();
    let Ok(Resolution::Value(value)) = m.resolve_word_cell(&next) else {
        return Ok(Bounce::Completed);
    };
    if value.heart() != Heart::Action || value.quote() != QuoteState::Plain(0) {
        m.feed_set_gotten(feed, value);
        return Ok(Bounce::Completed);
    }
    let details_id = value.series_id();
    let (dflags, first) = {
        let details = m.heap.details(details_id);
        (details.flags, details.first_interesting_param().cloned())
    };
    if !dflags.contains(ActionFlags::ENFIX) {
        m.feed_set_gotten(feed, value);
        return Ok(Bounce::Completed);
    }
    if dflags.contains(ActionFlags::POSTPONES_ENTIRELY) && frame_flags.contains(FrameFlags::FULFILLING_ARG) {
        return Ok(Bounce::Completed);
    }
    if dflags.contains(ActionFlags::DEFERS_LOOKBACK)
        && frame_flags.contains(FrameFlags::FULFILLING_ARG)
        && !m.feed_deferred_once(feed)
    {
        // pass over once; the lookahead that sees the completed outer
        // argument takes it
        m.feed_set_deferred_once(feed);
        return Ok(Bounce::Completed);
    }
    if dflags.contains(ActionFlags::SKIPPABLE_FIRST)
        && let Some(param) = &first
        && !param.accepts(&m.frames[fx].out)
    {
        // skippable left declines by type; the operator runs prefix on
        // the next step instead
        return Ok(Bounce::Completed);
    }

    if m.frames[fx].out.is_raised() {
        // consuming a raised error as a left operand promotes it
        return Err(promote_raised(m, fx));
    }
    let left = if m.frames[fx].out.is_stale() {
        match &first {
            Some(p) if p.flags.contains(ParamFlags::VOID_OK) => Cell::void(),
            Some(p) if p.flags.contains(ParamFlags::END) => Cell::null(),
            _ => {
                return Err(RunError::fail(
                    ErrorKind::NoLeftValue,
                    format!(
                        "enfix {} has no completed value to its left",
                        m.symbols.resolve(next.word_symbol())
                    ),
                ));
            }
        }
    } else {
        std::mem::replace(&mut m.frames[fx].out, Cell::fresh_void())
    };

    let label = next.word_symbol();
    m.feed_fetch(feed); // consume the operator
    call::push_action_frame(m, details_id, feed, Dest::Out, Some(left), Some(label), 0)?;
    m.frames[fx].state = ST_LOOKAHEAD;
    Ok(Bounce::Continue)
}

// --- set-word / set-tuple right-hand sides --------------------------------

/// Shared decay-and-store policy for assignment right-hand sides.
///
/// Returns `None` when the right side vanished (the variable becomes
/// unset and the expression stays void).
fn storable_from_rhs<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    out: &Cell,
) -> RunResult<Option<Cell>> {
    if out.is_stale() {
        return Ok(None);
    }
    if !out.is_isotope() {
        return Ok(Some(out.clone()));
    }
    if out.flags().contains(CellFlags::FROM_QUASI) {
        let mut value = out.clone();
        value.clear_flag(CellFlags::FROM_QUASI);
        return decay(m.heap, value).map(Some);
    }
    if out.is_pack() || out.is_null() {
        return decay(m.heap, out.clone()).map(Some);
    }
    if out.is_unset() || out.is_void() {
        return Ok(Some(Cell::unset()));
    }
    Err(RunError::fail(
        ErrorKind::BadIsotope,
        "right-hand side is an isotope not fit for storage",
    ))
}

fn set_word_resume<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let out = m.frames[fx].out.clone();
    if out.is_raised() {
        // tolerated: the variable is left alone and the raised error
        // propagates for a downstream trap or promotion
        return Ok(Bounce::Completed);
    }
    // a word peeked before this assignment must be re-resolved
    m.feed_clear_gotten(m.frames[fx].feed);
    let target = m.frames[fx].spare.clone();
    match storable_from_rhs(m, &out)? {
        None => {
            assign_word(m.heap, target.word_symbol(), target.binding(), Cell::unset())?;
            // out stays stale: the assignment vanishes with its right side
            Ok(Bounce::Completed)
        }
        Some(value) => {
            assign_word(m.heap, target.word_symbol(), target.binding(), value.clone())?;
            m.frames[fx].out = value;
            goto_lookahead(m, fx)
        }
    }
}

fn set_tuple_resume<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let out = m.frames[fx].out.clone();
    if out.is_raised() {
        return Ok(Bounce::Completed);
    }
    m.feed_clear_gotten(m.frames[fx].feed);
    let target = m.frames[fx].spare.clone();
    let value = storable_from_rhs(m, &out)?.ok_or_else(|| {
        RunError::fail(ErrorKind::NeedsValue, "set-tuple right-hand side vanished")
    })?;
    let segments = m.heap.array(target.series_id()).to_vec();
    poke_chain(m, &segments, value.clone())?;
    m.frames[fx].out = value;
    goto_lookahead(m, fx)
}

fn set_group_resume<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let target = m.frames[fx].spare.clone();
    if target.is_stale() {
        return Err(RunError::fail(
            ErrorKind::BadSetTarget,
            "set-group evaluated to nothing assignable",
        ));
    }
    let feed = m.frames[fx].feed;
    match target.heart() {
        Heart::Word | Heart::SetWord => {
            require_right_hand(m, fx, "set-group")?;
            m.frames[fx].spare = Cell::word(Heart::SetWord, target.word_symbol());
            let binding = target.binding();
            m.frames[fx].spare.set_binding(binding);
            m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_SET_WORD_RHS;
            Ok(Bounce::Continue)
        }
        Heart::Tuple | Heart::SetTuple => {
            require_right_hand(m, fx, "set-group")?;
            let mut retarget = Cell::series(Heart::SetTuple, target.series_id());
            retarget.set_binding(target.binding());
            m.frames[fx].spare = retarget;
            m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_SET_TUPLE_RHS;
            Ok(Bounce::Continue)
        }
        Heart::Block | Heart::SetBlock => {
            let mut retarget = Cell::series(Heart::SetBlock, target.series_id());
            retarget.set_binding(target.binding());
            m.frames[fx].spare = retarget;
            set_block_advance(m, fx)
        }
        _ => Err(RunError::fail(
            ErrorKind::BadSetTarget,
            "set-group must evaluate to a word, tuple, or block",
        )),
    }
}

// --- set-block (multi-return) ---------------------------------------------

/// Stages targets onto the data stack, evaluating group targets as they
/// are reached; once all are staged, pushes the right-hand-side step.
fn set_block_advance<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let targets_id = m.frames[fx].spare.series_id();
    let baseline = m.frames[fx].baseline as usize;
    loop {
        let staged = m.data.len() - baseline;
        let total = m.heap.array(targets_id).len();
        if staged == total {
            require_right_hand(m, fx, "set-block")?;
            let feed = m.frames[fx].feed;
            m.push_step_shared(feed, Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_SET_BLOCK_RHS;
            return Ok(Bounce::Continue);
        }
        let target = m.heap.array(targets_id)[staged].clone();
        match target.heart() {
            Heart::Group => {
                m.push_stepper_over(target.series_id(), Dest::Out, FrameFlags::empty())?;
                m.frames[fx].state = ST_SET_BLOCK_PREP;
                return Ok(Bounce::Continue);
            }
            _ => {
                stage_set_block_target(m, target)?;
            }
        }
    }
}

/// A group target finished evaluating; validate and stage its result.
fn set_block_prep_resume<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let out = std::mem::replace(&mut m.frames[fx].out, Cell::fresh_void());
    if out.is_stale() {
        return Err(RunError::fail(
            ErrorKind::BadSetTarget,
            "set-block group target evaluated to nothing",
        ));
    }
    stage_set_block_target(m, out)?;
    set_block_advance(m, fx)
}

fn stage_set_block_target<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    target: Cell,
) -> RunResult<()> {
    match target.heart() {
        Heart::Word | Heart::MetaWord | Heart::TheWord | Heart::Blank | Heart::Issue => {
            m.data.push(target);
            Ok(())
        }
        _ => Err(RunError::fail(
            ErrorKind::BadSetTarget,
            "set-block targets must be words, ^words, @words, blanks, or #",
        )),
    }
}

/// The right-hand call finished; destructure its (possibly packed)
/// result into the staged targets.
fn set_block_resume<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let out = m.frames[fx].out.clone();
    if out.is_raised() {
        return Ok(Bounce::Completed);
    }
    m.feed_clear_gotten(m.frames[fx].feed);

    let values: Vec<Cell> = if out.is_pack() {
        m.heap
            .array(out.series_id())
            .to_vec()
            .into_iter()
            .map(Cell::unmeta)
            .collect::<RunResult<_>>()?
    } else if out.is_stale() {
        return Err(RunError::fail(
            ErrorKind::NeedsValue,
            "multi-return right-hand side vanished",
        ));
    } else {
        vec![out]
    };

    let baseline = m.frames[fx].baseline as usize;
    let targets = m.data.split_off(baseline);
    let mut circled: Option<Cell> = None;
    for (i, target) in targets.iter().enumerate() {
        let Some(value) = values.get(i) else {
            return Err(RunError::fail(
                ErrorKind::PackTooShort,
                format!("{} targets but only {} values", targets.len(), values.len()),
            ));
        };
        match target.heart() {
            // _ suppresses; # is "don't care, don't suppress"
            Heart::Blank | Heart::Issue => {}
            Heart::Word => {
                let stored = decay(m.heap, value.clone())?;
                assign_word(m.heap, target.word_symbol(), target.binding(), stored)?;
            }
            Heart::MetaWord => {
                assign_word(m.heap, target.word_symbol(), target.binding(), value.clone().meta())?;
            }
            Heart::TheWord => {
                let stored = decay(m.heap, value.clone())?;
                assign_word(m.heap, target.word_symbol(), target.binding(), stored.clone())?;
                circled = Some(stored);
            }
            _ => unreachable!("validated when staged"),
        }
    }

    let primary = match (circled, values.into_iter().next()) {
        (Some(value), _) => value,
        (None, Some(first)) => decay(m.heap, first)?,
        (None, None) => Cell::null(),
    };
    m.frames[fx].out = primary;
    goto_lookahead(m, fx)
}

// --- pick / poke ----------------------------------------------------------

/// Resolves a tuple or path chain: the head word's value, then one pick
/// per remaining segment.
fn resolve_pick_chain<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    segments: &[Cell],
) -> RunResult<Cell> {
    let head = segments
        .first()
        .ok_or_else(|| RunError::fail(ErrorKind::Internal, "empty sequence"))?;
    if !head.heart().is_word() {
        return Err(RunError::fail(
            ErrorKind::BadPick,
            "sequence head must be a word",
        ));
    }
    let mut value = match m.resolve_word_cell(head)? {
        Resolution::Value(v) => v,
        Resolution::Undefined => return Err(unset_error(m, head)),
    };
    for segment in &segments[1..] {
        value = pick_in(m, &value, segment)?;
    }
    if value.is_unset() {
        return Err(RunError::fail(ErrorKind::UnsetVariable, "field is unset"));
    }
    if value.is_unstable_isotope() {
        return Err(RunError::fail(
            ErrorKind::BadIsotope,
            "field holds an isotope; use a meta form",
        ));
    }
    Ok(value)
}

/// One generalized pick step.
pub(crate) fn pick_in<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    value: &Cell,
    segment: &Cell,
) -> RunResult<Cell> {
    if value.heart().is_context() {
        if !segment.heart().is_word() {
            return Err(RunError::fail(
                ErrorKind::BadPick,
                "context fields are picked by word",
            ));
        }
        let ctx = m.heap.context(value.series_id())?;
        match ctx.find(segment.word_symbol()) {
            Some(index) => Ok(ctx.get(index).clone()),
            None => Err(RunError::fail(
                ErrorKind::BadPick,
                format!("no field named {}", m.symbols.resolve(segment.word_symbol())),
            )),
        }
    } else if value.heart().is_array() {
        let Payload::Integer(n) = segment.payload() else {
            return Err(RunError::fail(
                ErrorKind::BadPick,
                "array elements are picked by integer",
            ));
        };
        let cells = m.heap.array(value.series_id());
        let start = value.series_index() as usize;
        let offset = n
            .checked_sub(1)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| RunError::fail(ErrorKind::BadPick, "pick index must be positive"))?;
        match cells.get(start + offset) {
            Some(cell) => Ok(cell.clone()),
            None => Ok(Cell::null()),
        }
    } else {
        Err(RunError::fail(
            ErrorKind::BadPick,
            format!("cannot pick into a {}", value.heart()),
        ))
    }
}

/// Generalized poke through a set-tuple's segments.
fn poke_chain<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    segments: &[Cell],
    value: Cell,
) -> RunResult<()> {
    let (last, walk) = segments
        .split_last()
        .ok_or_else(|| RunError::fail(ErrorKind::Internal, "empty sequence"))?;
    let container = resolve_container(m, walk)?;
    if container.heart().is_context() {
        if !last.heart().is_word() {
            return Err(RunError::fail(
                ErrorKind::BadPick,
                "context fields are poked by word",
            ));
        }
        if m.heap.is_frozen(container.series_id()) {
            return Err(RunError::fail(ErrorKind::FrozenSeries, "context is frozen"));
        }
        let symbol = last.word_symbol();
        let ctx = m.heap.context_mut(container.series_id())?;
        match ctx.find(symbol) {
            Some(index) => {
                ctx.set(index, value);
                Ok(())
            }
            None => Err(RunError::fail(
                ErrorKind::BadPick,
                format!("no field named {}", m.symbols.resolve(symbol)),
            )),
        }
    } else if container.heart().is_array() {
        if value.is_isotope() {
            return Err(RunError::fail(
                ErrorKind::BadIsotope,
                "isotopes are prohibited inside arrays",
            ));
        }
        let Payload::Integer(n) = last.payload() else {
            return Err(RunError::fail(
                ErrorKind::BadPick,
                "array elements are poked by integer",
            ));
        };
        let start = container.series_index() as usize;
        let offset = n
            .checked_sub(1)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| RunError::fail(ErrorKind::BadPick, "poke index must be positive"))?;
        let cells = m.heap.array_cells_mut(container.series_id())?;
        match cells.get_mut(start + offset) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RunError::fail(ErrorKind::BadPick, "poke index out of range")),
        }
    } else {
        Err(RunError::fail(
            ErrorKind::BadPick,
            format!("cannot poke into a {}", container.heart()),
        ))
    }
}

/// Resolves all but the last segment of a set-tuple, yielding the
/// container to poke.
fn resolve_container<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    walk: &[Cell],
) -> RunResult<Cell> {
    let head = walk
        .first()
        .ok_or_else(|| RunError::fail(ErrorKind::BadPick, "set-tuple needs a container segment"))?;
    if !head.heart().is_word() {
        return Err(RunError::fail(
            ErrorKind::BadPick,
            "sequence head must be a word",
        ));
    }
    let mut value = match m.resolve_word_cell(head)? {
        Resolution::Value(v) => v,
        Resolution::Undefined => return Err(unset_error(m, head)),
    };
    for segment in &walk[1..] {
        value = pick_in(m, &value, segment)?;
    }
    Ok(value)
}
