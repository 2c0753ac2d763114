//! Series natives: picking, poking, growing, freezing, copying.

use crate::{
    cell::{Cell, Heart},
    error::{ErrorKind, RunError, RunResult},
    eval::pick_in,
    heap::SeriesData,
    natives::{arg, arg_cloned},
    resource::ResourceTracker,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine},
};

pub(crate) fn first<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let series = arg_cloned(m, fx, 0);
    let value = if series.heart() == Heart::Text {
        match m.heap.text(series.series_id()).chars().next() {
            Some(c) => Cell::series(Heart::Text, m.heap.alloc_text(c.to_string())?),
            None => Cell::null(),
        }
    } else {
        pick_in(m, &series, &Cell::integer(1))?
    };
    m.frames[fx].out = value;
    Ok(Bounce::Completed)
}

pub(crate) fn length_of<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let series = arg(m, fx, 0);
    let length = match &m.heap.get(series.series_id()).data {
        SeriesData::Array(cells) => cells.len().saturating_sub(series.series_index() as usize),
        SeriesData::Text(s) => s.chars().count(),
        SeriesData::Binary(bytes) => bytes.len(),
        _ => unreachable!("typecheck admits series kinds only"),
    };
    m.frames[fx].out = Cell::integer(length as i64);
    Ok(Bounce::Completed)
}

/// Mutating append; raises on frozen or held series, and refuses
/// isotopes per the array invariant.
pub(crate) fn append<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let series = arg_cloned(m, fx, 0);
    let value = arg_cloned(m, fx, 1);
    m.heap.push_cell(series.series_id(), value)?;
    m.frames[fx].out = series;
    Ok(Bounce::Completed)
}

pub(crate) fn pick<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let series = arg_cloned(m, fx, 0);
    let index = arg_cloned(m, fx, 1);
    m.frames[fx].out = pick_in(m, &series, &index)?;
    Ok(Bounce::Completed)
}

pub(crate) fn poke<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let series = arg_cloned(m, fx, 0);
    let index = arg(m, fx, 1)
        .as_integer()
        .expect("typecheck admits integer! only");
    let value = arg_cloned(m, fx, 2);
    if value.is_isotope() {
        return Err(RunError::fail(
            ErrorKind::BadIsotope,
            "isotopes are prohibited inside arrays",
        ));
    }
    let offset = index
        .checked_sub(1)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| RunError::fail(ErrorKind::BadPick, "poke index must be positive"))?;
    let start = series.series_index() as usize;
    let cells = m.heap.array_cells_mut(series.series_id())?;
    match cells.get_mut(start + offset) {
        Some(slot) => {
            *slot = value.clone();
        }
        None => return Err(RunError::fail(ErrorKind::BadPick, "poke index out of range")),
    }
    m.frames[fx].out = value;
    Ok(Bounce::Completed)
}

/// Transitive, irrevocable freeze.
pub(crate) fn freeze<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let value = arg_cloned(m, fx, 0);
    m.heap.freeze_deep(value.series_id());
    m.frames[fx].out = value;
    Ok(Bounce::Completed)
}

pub(crate) fn copy<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
) -> RunResult<Bounce> {
    let value = arg_cloned(m, fx, 0);
    let deep = !arg(m, fx, 1).is_null();
    let copied = if value.heart() == Heart::Text {
        let text = m.heap.text(value.series_id()).to_owned();
        Cell::series(Heart::Text, m.heap.alloc_text(text)?)
    } else if deep {
        Cell::series(value.heart(), m.heap.deep_copy_array(value.series_id())?)
    } else {
        let cells = m.heap.array(value.series_id())[value.series_index() as usize..].to_vec();
        Cell::series(value.heart(), m.heap.alloc_array(cells)?)
    };
    m.frames[fx].out = copied;
    Ok(Bounce::Completed)
}
