//! The action executor: parameter-by-parameter argument fulfillment,
//! the final typecheck, and dispatcher invocation.
//!
//! Fulfillment walks the parameter list in declaration order. Evaluative
//! parameters push a sub-step flagged `FULFILLING_ARG` (plus
//! `NO_LOOKAHEAD` when the action is enfix, making its right argument
//! tight); quoting parameters consume feed cells directly. Refinements
//! match against the symbols the invoking path pushed through the data
//! stack. Once every slot is filled and typechecked, the dispatcher runs
//! with the same status-code contract as any executor, so it may push
//! continuations, delegate, throw, raise, or complete.

use smallvec::SmallVec;

use crate::{
    action::{Dispatcher, Param, ParamClass, ParamFlags},
    cell::{Cell, CellFlags, Heart, QuoteState, decay},
    context::{BindMode, ContextData, ContextKind, Resolution, bind_array_deep},
    datum,
    error::{ErrorKind, RunError, RunResult},
    feed::FeedIx,
    frame::{ActionState, CatchMode, Dest, Executor, Frame, FrameFlags, ST_ABRUPT, ST_CAUGHT, ST_INITIAL},
    heap::SeriesId,
    intern::{KnownSymbol, SymbolId},
    natives,
    resource::ResourceTracker,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine, Thrown},
};

/// A fulfillment sub-frame completed; its slot needs postprocessing.
const ST_ARG_DONE: u8 = 1;
/// First dispatcher entry. Dispatchers own states from here up (natives
/// use 120+, the interpreted dispatcher uses [`ST_BODY`]).
pub(crate) const ST_DISPATCH: u8 = 100;
/// Interpreted dispatcher: the body stepper is running.
const ST_BODY: u8 = 110;

/// Pushes an action frame sharing `feed`.
///
/// `refinement_count` words are popped off the data stack (where the
/// path dispatch collected them) into the frame's refinement list.
pub(crate) fn push_action_frame<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    details_id: SeriesId,
    feed: FeedIx,
    dest: Dest,
    left: Option<Cell>,
    label: Option<SymbolId>,
    refinement_count: usize,
) -> RunResult<()> {
    let param_count = m.heap.details(details_id).params.len();
    let mut state = ActionState::new(details_id, param_count);
    state.left = left;
    let mut refinements: SmallVec<[SymbolId; 2]> = SmallVec::new();
    for _ in 0..refinement_count {
        let cell = m.data.pop().expect("path pushed its refinements");
        refinements.push(cell.word_symbol());
    }
    refinements.reverse(); // restore path order
    state.refinements = refinements;
    m.retain_feed(feed);
    let frame = Frame::new(Executor::Action(Box::new(state)), feed, dest).with_label(label);
    m.push_frame(frame)
}

pub(crate) fn action_executor<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let state = m.frames[fx].state;
    if state == ST_ABRUPT {
        return Ok(Bounce::Completed);
    }
    if state == ST_CAUGHT || state >= ST_DISPATCH {
        return dispatch_action(m, fx);
    }
    if state == ST_ARG_DONE {
        finish_arg(m, fx)?;
    }
    fulfill(m, fx).map_err(|e| m.fail_near(fx, e))
}

/// The fulfillment loop; runs until a sub-frame is needed or every
/// parameter is filled.
fn fulfill<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    loop {
        let (details_id, param_ix) = {
            let st = m.frames[fx].action_state();
            (st.action, st.param_ix as usize)
        };
        let details = m.heap.details(details_id);
        if param_ix >= details.params.len() {
            if let Some(unknown) = m.frames[fx].action_state().refinements.first() {
                return Err(RunError::fail(
                    ErrorKind::UnknownRefinement,
                    format!("unknown refinement {}", m.symbols.resolve(*unknown)),
                ));
            }
            typecheck(m, fx)?;
            m.frames[fx].state = ST_DISPATCH;
            return dispatch_action(m, fx);
        }
        let param = details.params[param_ix].clone();
        let enfix = details.is_enfix();
        let first_ix = details.first_interesting_index();
        let exemplar = details.exemplar;

        match param.class {
            ParamClass::Local => advance(m, fx, Cell::unset()),
            ParamClass::Return => advance(m, fx, Cell::unset()),
            ParamClass::Output => advance(m, fx, Cell::null()),

            ParamClass::Refinement => {
                let st = m.frames[fx].action_state_mut();
                match st.refinements.iter().position(|s| *s == param.name) {
                    None => advance(m, fx, Cell::null()),
                    Some(pos) => {
                        st.refinements.remove(pos);
                        if param.types.is_empty() {
                            advance(m, fx, Cell::logic(true));
                        } else {
                            // the refinement carries an argument
                            if let Some(bounce) = fulfill_evaluative(m, fx, &param, enfix)? {
                                return Ok(bounce);
                            }
                        }
                    }
                }
            }

            ParamClass::Normal | ParamClass::Meta => {
                if let Some(value) = exemplar_value(m, exemplar, param.name) {
                    advance(m, fx, value);
                    continue;
                }
                if Some(param_ix) == first_ix
                    && let Some(left) = m.frames[fx].action_state_mut().left.take()
                {
                    let value = postprocess_value(m, &param, left)?;
                    advance(m, fx, value);
                    continue;
                }
                if let Some(bounce) = fulfill_evaluative(m, fx, &param, enfix)? {
                    return Ok(bounce);
                }
            }

            ParamClass::Hard | ParamClass::Soft | ParamClass::Medium => {
                if Some(param_ix) == first_ix
                    && let Some(left) = m.frames[fx].action_state_mut().left.take()
                {
                    advance(m, fx, left);
                    continue;
                }
                if let Some(bounce) = fulfill_quoted(m, fx, &param)? {
                    return Ok(bounce);
                }
            }
        }
    }
}

/// Stores an argument and moves to the next parameter.
fn advance<T: ResourceTracker, Tr: EvalTracer>(m: &mut Machine<'_, T, Tr>, fx: usize, value: Cell) {
    let st = m.frames[fx].action_state_mut();
    st.args[st.param_ix as usize] = value;
    st.param_ix += 1;
}

/// True when the feed offers nothing for an argument: hard end, or an
/// expression barrier comma (left unconsumed for the outer step).
fn at_argument_end<T: ResourceTracker, Tr: EvalTracer>(m: &Machine<'_, T, Tr>, fx: usize) -> bool {
    let feed = m.frames[fx].feed;
    match m.feed_at(feed) {
        None => true,
        Some(cell) => cell.heart() == Heart::Comma,
    }
}

/// Fulfills an evaluative (or refinement-argument) parameter. Returns
/// `Some(bounce)` when a sub-frame was pushed.
fn fulfill_evaluative<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    param: &Param,
    enfix: bool,
) -> RunResult<Option<Bounce>> {
    if at_argument_end(m, fx) {
        if param.flags.contains(ParamFlags::END) {
            advance(m, fx, Cell::null());
            return Ok(None);
        }
        return Err(missing_argument(m, fx, param));
    }
    let feed = m.frames[fx].feed;
    let param_ix = m.frames[fx].action_state().param_ix;

    if param.flags.contains(ParamFlags::VARIADIC) {
        // gather the rest of the feed into a block
        m.retain_feed(feed);
        m.push_frame(Frame::new(Executor::Reducer { meta: false }, feed, Dest::Arg(param_ix)))?;
        m.frames[fx].state = ST_ARG_DONE;
        return Ok(Some(Bounce::Continue));
    }

    let mut flags = FrameFlags::FULFILLING_ARG;
    if enfix {
        // enfix right arguments are tight
        flags |= FrameFlags::NO_LOOKAHEAD;
    }
    m.push_step_shared(feed, Dest::Arg(param_ix), flags)?;
    m.frames[fx].state = ST_ARG_DONE;
    Ok(Some(Bounce::Continue))
}

/// Fulfills a quoting parameter from the feed.
fn fulfill_quoted<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    param: &Param,
) -> RunResult<Option<Bounce>> {
    if at_argument_end(m, fx) {
        if param.flags.contains(ParamFlags::END) {
            advance(m, fx, Cell::null());
            return Ok(None);
        }
        return Err(missing_argument(m, fx, param));
    }
    let feed = m.frames[fx].feed;
    let next = m.feed_at(feed).expect("checked above").clone();

    let escapable = matches!(next.heart(), Heart::GetWord | Heart::GetGroup)
        && next.quote() == QuoteState::Plain(0);
    match param.class {
        ParamClass::Hard => {}
        ParamClass::Soft | ParamClass::Medium if escapable => {
            m.feed_fetch(feed);
            if next.heart() == Heart::GetWord {
                let value = match m.resolve_word_cell(&next)? {
                    Resolution::Value(v) => v,
                    Resolution::Undefined => {
                        return Err(RunError::fail(
                            ErrorKind::UnsetVariable,
                            format!("{} is unset", m.symbols.resolve(next.word_symbol())),
                        ));
                    }
                };
                advance(m, fx, value);
                return Ok(None);
            }
            let param_ix = m.frames[fx].action_state().param_ix;
            m.push_stepper_over(next.series_id(), Dest::Arg(param_ix), FrameFlags::empty())?;
            m.frames[fx].state = ST_ARG_DONE;
            return Ok(Some(Bounce::Continue));
        }
        ParamClass::Medium if next.quote() == QuoteState::Plain(1) => {
            // medium-quote accepts one level of literal quoting
            m.feed_fetch(feed);
            advance(m, fx, next.unquote_one()?);
            return Ok(None);
        }
        _ => {}
    }
    m.feed_fetch(feed);
    let mut cell = next;
    cell.set_flag(CellFlags::UNEVALUATED);
    advance(m, fx, cell);
    Ok(None)
}

fn missing_argument<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    fx: usize,
    param: &Param,
) -> RunError {
    let action = m.frames[fx].label.map_or("action", |sym| m.symbols.resolve(sym));
    RunError::fail(
        ErrorKind::MissingArgument,
        format!("{action} is missing its {} argument", m.symbols.resolve(param.name)),
    )
}

/// Postprocesses a freshly completed argument sub-frame's slot.
fn finish_arg<T: ResourceTracker, Tr: EvalTracer>(m: &mut Machine<'_, T, Tr>, fx: usize) -> RunResult<()> {
    let (details_id, param_ix) = {
        let st = m.frames[fx].action_state();
        (st.action, st.param_ix as usize)
    };
    let param = m.heap.details(details_id).params[param_ix].clone();
    let slot = std::mem::replace(
        &mut m.frames[fx].action_state_mut().args[param_ix],
        Cell::fresh_void(),
    );
    let value = postprocess_value(m, &param, slot)?;
    let st = m.frames[fx].action_state_mut();
    st.args[param_ix] = value;
    st.param_ix += 1;
    m.frames[fx].state = ST_INITIAL;
    Ok(())
}

/// Applies a parameter class's view to a fulfilled value.
fn postprocess_value<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    param: &Param,
    value: Cell,
) -> RunResult<Cell> {
    match param.class {
        ParamClass::Meta => {
            // voids become meta-voids, isotopes become quasis
            if value.is_stale() {
                Ok(Cell::void().meta())
            } else {
                Ok(value.meta())
            }
        }
        _ => {
            if value.is_raised() {
                if param.flags.contains(ParamFlags::RAISED_OK) {
                    return Ok(value);
                }
                // consuming a raised error as ordinary input promotes it
                return Err(RunError::Fail(Box::new(crate::context::context_to_error(
                    m.heap,
                    m.symbols,
                    value.series_id(),
                ))));
            }
            if value.is_stale() {
                if param.flags.contains(ParamFlags::VOID_OK) {
                    return Ok(Cell::void());
                }
                return Err(RunError::fail(
                    ErrorKind::NeedsValue,
                    format!("argument {} vanished", m.symbols.resolve(param.name)),
                ));
            }
            decay(m.heap, value)
        }
    }
}

/// The post-fulfillment typecheck pass.
fn typecheck<T: ResourceTracker, Tr: EvalTracer>(m: &Machine<'_, T, Tr>, fx: usize) -> RunResult<()> {
    let st = m.frames[fx].action_state();
    let details = m.heap.details(st.action);
    for (param, arg) in details.params.iter().zip(&st.args) {
        match param.class {
            ParamClass::Local | ParamClass::Return | ParamClass::Output => continue,
            ParamClass::Refinement => {
                if arg.is_null() || arg.as_logic().is_some() {
                    continue;
                }
            }
            _ => {}
        }
        if !param.accepts(arg) {
            let action = m.frames[fx].label.map_or("action", |sym| m.symbols.resolve(sym));
            return Err(RunError::fail(
                ErrorKind::TypeMismatch,
                format!(
                    "{action}'s {} argument does not accept this value",
                    m.symbols.resolve(param.name)
                ),
            ));
        }
    }
    Ok(())
}

/// Routes to the action's dispatcher.
fn dispatch_action<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let details_id = m.frames[fx].action_state().action;
    let dispatcher = m.heap.details(details_id).dispatcher;
    if m.frames[fx].state == ST_DISPATCH {
        let name = m.heap.details(details_id).name.map(|sym| m.symbols.resolve(sym).to_owned());
        m.tracer.on_action_call(name.as_deref());
    }
    match dispatcher {
        Dispatcher::Native(id) => natives::dispatch(m, fx, id),
        Dispatcher::Host(ix) => host_dispatch(m, fx, ix),
        Dispatcher::Interpreted => interpreted_dispatch(m, fx),
        Dispatcher::Returner => returner_dispatch(m, fx),
    }
}

/// Runs an interpreted body in a fresh frame context with a definitional
/// RETURN bound to it.
fn interpreted_dispatch<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let details_id = m.frames[fx].action_state().action;
            let (params, body) = {
                let details = m.heap.details(details_id);
                (details.params.clone(), details.body)
            };
            let body = body.ok_or_else(|| RunError::internal_fail("interpreted action without a body"))?;

            let mut ctx = ContextData::new(ContextKind::Frame);
            for (param, arg) in params.iter().zip(&m.frames[fx].action_state().args) {
                ctx.append(param.name, arg.clone());
            }
            let ctx_id = m.heap.alloc_context(ctx)?;

            // wire the definitional RETURN to this frame's identity
            if params.first().is_some_and(|p| p.class == ParamClass::Return) {
                let returner_id = make_returner(m, ctx_id)?;
                let slot = m
                    .heap
                    .context(ctx_id)?
                    .find(KnownSymbol::Return.id())
                    .expect("return param appended");
                m.heap.context_mut(ctx_id)?.set(slot, Cell::action(returner_id));
            }

            let st = m.frames[fx].action_state_mut();
            st.frame_ctx = Some(ctx_id);
            m.frames[fx].catch = CatchMode::Definitional(ctx_id);

            // each call binds its own copy of the body, so recursion and
            // retained bindings cannot alias another call's variables
            let body_copy = m.heap.deep_copy_array(body)?;
            bind_array_deep(m.heap, body_copy, ctx_id, BindMode::Overlay)?;
            m.push_stepper_over(body_copy, Dest::Out, FrameFlags::empty())?;
            m.frames[fx].state = ST_BODY;
            Ok(Bounce::Continue)
        }
        ST_BODY => Ok(Bounce::Completed),
        ST_CAUGHT => {
            let thrown = m.thrown.take().expect("caught state without a throw");
            m.frames[fx].out = thrown.payload;
            Ok(Bounce::Completed)
        }
        other => unreachable!("interpreted dispatcher in state {other}"),
    }
}

/// Builds the returner action for a frame context.
fn make_returner<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    ctx_id: SeriesId,
) -> RunResult<SeriesId> {
    let mut param = Param::new(KnownSymbol::Value.id(), ParamClass::Normal);
    param.flags |= ParamFlags::OPT | ParamFlags::END;
    let mut details = crate::action::ActionDetails::new(
        Some(KnownSymbol::Return.id()),
        vec![param],
        Dispatcher::Returner,
    );
    details.target = Some(ctx_id);
    m.heap.alloc_details(details.finalize())
}

/// The definitional RETURN: throw labelled with the frame identity.
fn returner_dispatch<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let details_id = m.frames[fx].action_state().action;
    let target = m
        .heap
        .details(details_id)
        .target
        .ok_or_else(|| RunError::internal_fail("returner without a target frame"))?;
    // returning across a frame that already exited is an error
    m.heap.context(target)?;
    let value = m.frames[fx].action_state().args[0].clone();
    m.thrown = Some(Thrown {
        label: Cell::context(Heart::Frame, target),
        payload: value,
    });
    Ok(Bounce::Thrown)
}

/// Calls out to a host-registered function with detached values.
fn host_dispatch<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    host_ix: u32,
) -> RunResult<Bounce> {
    let details_id = m.frames[fx].action_state().action;
    let params = m.heap.details(details_id).params.clone();
    let mut args = Vec::with_capacity(params.len());
    for (param, arg) in params.iter().zip(&m.frames[fx].action_state().args) {
        if matches!(param.class, ParamClass::Local | ParamClass::Return | ParamClass::Output) {
            continue;
        }
        args.push(datum::datum_from_cell(m.heap, m.symbols, arg));
    }
    let result = (m.hosts[host_ix as usize])(&args).map_err(RunError::from)?;
    let cell = datum::cell_from_datum(m.heap, m.symbols, &result)?;
    m.frames[fx].out = cell;
    Ok(Bounce::Completed)
}

/// Reads a specialization exemplar's pre-filled slot for a parameter.
fn exemplar_value<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    exemplar: Option<SeriesId>,
    name: SymbolId,
) -> Option<Cell> {
    let ctx = m.heap.context_raw(exemplar?);
    let ix = ctx.find(name)?;
    let cell = ctx.get(ix);
    if cell.is_unset() { None } else { Some(cell.clone()) }
}
