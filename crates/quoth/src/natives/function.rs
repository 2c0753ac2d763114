//! Function-building natives: interpreted actions, lambdas, and
//! specialization.

use crate::{
    action::{ActionDetails, Dispatcher, Param, ParamClass},
    call::ST_DISPATCH,
    cell::{Cell, Heart},
    context::{BindMode, ContextData, ContextKind, bind_array_deep},
    error::{ErrorKind, RunError, RunResult},
    frame::{Dest, FrameFlags},
    natives::{ST_NATIVE, arg, arg_cloned},
    resource::ResourceTracker,
    spec::compile_spec,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine},
};

const ST_RUNNING: u8 = ST_NATIVE;

/// `func`: compile the spec block, bundle it with the body as an
/// interpreted action. The body is copied and bound per call, not here.
pub(crate) fn func<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let spec = arg(m, fx, 0).series_id();
    let body = arg(m, fx, 1).series_id();
    let compiled = compile_spec(m.heap, m.symbols, spec)?;
    let mut details = ActionDetails::new(None, compiled.params, Dispatcher::Interpreted);
    details.body = Some(body);
    details.meta = Some(Box::new(compiled.meta));
    let id = m.heap.alloc_details(details.finalize())?;
    m.frames[fx].out = Cell::action(id);
    Ok(Bounce::Completed)
}

/// `->`: left-quoted lambda. `x -> [x + 1]` makes a one-parameter
/// action; a block on the left declares several parameters.
pub(crate) fn lambda<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let params_cell = arg_cloned(m, fx, 0);
    let body = arg(m, fx, 1).series_id();
    let mut params = Vec::new();
    match params_cell.heart() {
        Heart::Word => params.push(Param::new(params_cell.word_symbol(), ParamClass::Normal)),
        Heart::Block => {
            for cell in m.heap.array(params_cell.series_id()) {
                if cell.heart() != Heart::Word {
                    return Err(RunError::fail(
                        ErrorKind::BadSpec,
                        "lambda parameters must be plain words",
                    ));
                }
                params.push(Param::new(cell.word_symbol(), ParamClass::Normal));
            }
        }
        _ => unreachable!("typecheck admits word! and block! only"),
    }
    let mut details = ActionDetails::new(None, params, Dispatcher::Interpreted);
    details.body = Some(body);
    let id = m.heap.alloc_details(details.finalize())?;
    m.frames[fx].out = Cell::action(id);
    Ok(Bounce::Completed)
}

/// `does`: a zero-parameter interpreted action.
pub(crate) fn does<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let body = arg(m, fx, 0).series_id();
    let mut details = ActionDetails::new(None, Vec::new(), Dispatcher::Interpreted);
    details.body = Some(body);
    let id = m.heap.alloc_details(details.finalize())?;
    m.frames[fx].out = Cell::action(id);
    Ok(Bounce::Completed)
}

/// `specialize`: derive an action with some parameters pre-filled.
///
/// The values block runs inside an exemplar frame whose slots start
/// unset; set-words fill them, and fulfillment later skips any slot the
/// exemplar provides.
pub(crate) fn specialize<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    match m.frames[fx].state {
        ST_DISPATCH => {
            let target = arg(m, fx, 0).series_id();
            let params = m.heap.details(target).params.clone();
            let mut ctx = ContextData::new(ContextKind::Frame);
            for param in &params {
                ctx.append(param.name, Cell::unset());
            }
            let ctx_id = m.heap.alloc_context(ctx)?;
            m.frames[fx].action_state_mut().frame_ctx = Some(ctx_id);
            let block_copy = m.heap.deep_copy_array(arg(m, fx, 1).series_id())?;
            bind_array_deep(m.heap, block_copy, ctx_id, BindMode::Overlay)?;
            m.push_stepper_over(block_copy, Dest::Discard, FrameFlags::empty())?;
            m.frames[fx].state = ST_RUNNING;
            Ok(Bounce::Continue)
        }
        ST_RUNNING => {
            let target = arg(m, fx, 0).series_id();
            let exemplar = m.frames[fx]
                .action_state_mut()
                .frame_ctx
                .take()
                .expect("exemplar built on entry");
            let (name, params, dispatcher, flags, body) = {
                let details = m.heap.details(target);
                (
                    details.name,
                    details.params.clone(),
                    details.dispatcher,
                    details.flags,
                    details.body,
                )
            };
            let mut details = ActionDetails::new(name, params, dispatcher);
            details.flags = flags;
            details.body = body;
            details.exemplar = Some(exemplar);
            details.target = Some(target);
            let id = m.heap.alloc_details(details)?;
            m.frames[fx].out = Cell::action(id);
            Ok(Bounce::Completed)
        }
        other => unreachable!("specialize in state {other}"),
    }
}
