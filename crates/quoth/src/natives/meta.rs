//! Quoting, binding access, and rendering natives.

use crate::{
    cell::{Cell, Heart},
    context::Resolution,
    error::{ErrorKind, RunError, RunResult},
    eval::pick_in,
    mold::mold_cell,
    natives::{arg, arg_cloned},
    resource::ResourceTracker,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine},
};

/// `the`: the next cell verbatim (the unevaluated flag was set when the
/// hard-quoted parameter copied it from the feed).
pub(crate) fn the<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    m.frames[fx].out = arg_cloned(m, fx, 0);
    Ok(Bounce::Completed)
}

pub(crate) fn quote<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    m.frames[fx].out = arg_cloned(m, fx, 0).quote_one()?;
    Ok(Bounce::Completed)
}

pub(crate) fn unquote<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    m.frames[fx].out = arg_cloned(m, fx, 0).unquote_one()?;
    Ok(Bounce::Completed)
}

/// `meta`: the parameter class already did the work.
pub(crate) fn meta<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    m.frames[fx].out = arg_cloned(m, fx, 0);
    Ok(Bounce::Completed)
}

pub(crate) fn unmeta<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let value = arg_cloned(m, fx, 0).unmeta()?;
    if value.is_void() {
        // out stays stale: unmeta of ~void~ is the vanished state
        return Ok(Bounce::Completed);
    }
    m.frames[fx].out = value;
    Ok(Bounce::Completed)
}

pub(crate) fn get<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let target = arg_cloned(m, fx, 0);
    let any = !arg(m, fx, 1).is_null();
    let value = match target.heart() {
        Heart::Word => match m.resolve_word_cell(&target)? {
            Resolution::Value(v) => v,
            Resolution::Undefined => Cell::unset(),
        },
        Heart::Tuple => {
            let segments = m.heap.array(target.series_id()).to_vec();
            let head = &segments[0];
            let mut value = match m.resolve_word_cell(head)? {
                Resolution::Value(v) => v,
                Resolution::Undefined => Cell::unset(),
            };
            for segment in &segments[1..] {
                value = pick_in(m, &value, segment)?;
            }
            value
        }
        _ => unreachable!("typecheck admits word! and tuple! only"),
    };
    if !any && value.is_unstable_isotope() {
        return Err(RunError::fail(
            ErrorKind::BadIsotope,
            "variable holds an isotope; use get with /any",
        ));
    }
    m.frames[fx].out = value;
    Ok(Bounce::Completed)
}

pub(crate) fn set<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let target = arg_cloned(m, fx, 0);
    let value = arg_cloned(m, fx, 1);
    crate::context::assign_word(m.heap, target.word_symbol(), target.binding(), value.clone())?;
    m.frames[fx].out = value;
    Ok(Bounce::Completed)
}

/// `type-of`: the heart's type word (`integer!`, `block!`, ...).
pub(crate) fn type_of<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let value = arg(m, fx, 0);
    let spelling = format!("{}!", value.heart());
    let sym = m.symbols.intern(&spelling);
    m.frames[fx].out = Cell::word(Heart::Word, sym);
    Ok(Bounce::Completed)
}

/// `mold`: canonical text for a value, built through the shared mold
/// buffer.
pub(crate) fn mold<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let value = arg_cloned(m, fx, 0);
    m.mold.mark();
    mold_cell(m.heap, m.symbols, &value, m.mold.buf_mut(), 0);
    let text = m.mold.take();
    let id = m.heap.alloc_text(text)?;
    m.frames[fx].out = Cell::series(Heart::Text, id);
    Ok(Bounce::Completed)
}
