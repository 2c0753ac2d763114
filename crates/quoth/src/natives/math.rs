//! Arithmetic and comparison natives. No precedence: enfix operators
//! evaluate strictly left to right, so `1 + 2 * 3` is 9.

use crate::{
    cell::{Cell, Heart, Payload},
    error::{ErrorKind, RunError, RunResult},
    heap::Heap,
    natives::{NativeId, arg},
    resource::ResourceTracker,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine},
};

enum Number {
    Int(i64),
    Dec(f64),
}

fn number(cell: &Cell) -> Number {
    match cell.payload() {
        Payload::Integer(n) => Number::Int(*n),
        Payload::Decimal(d) => Number::Dec(*d),
        _ => unreachable!("typecheck admits integer! and decimal! only"),
    }
}

pub(crate) fn arith<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    id: NativeId,
) -> RunResult<Bounce> {
    let result = if id == NativeId::Negate {
        match number(arg(m, fx, 0)) {
            Number::Int(n) => n
                .checked_neg()
                .map(Cell::integer)
                .ok_or_else(overflow)?,
            Number::Dec(d) => Cell::decimal(-d),
        }
    } else {
        let a = number(arg(m, fx, 0));
        let b = number(arg(m, fx, 1));
        match (a, b) {
            (Number::Int(a), Number::Int(b)) => int_arith(id, a, b)?,
            (a, b) => {
                let a = match a {
                    Number::Int(n) => n as f64,
                    Number::Dec(d) => d,
                };
                let b = match b {
                    Number::Int(n) => n as f64,
                    Number::Dec(d) => d,
                };
                dec_arith(id, a, b)?
            }
        }
    };
    m.frames[fx].out = result;
    Ok(Bounce::Completed)
}

fn int_arith(id: NativeId, a: i64, b: i64) -> RunResult<Cell> {
    let checked = match id {
        NativeId::Add => a.checked_add(b),
        NativeId::Subtract => a.checked_sub(b),
        NativeId::Multiply => a.checked_mul(b),
        NativeId::Divide => {
            if b == 0 {
                return Err(RunError::fail(ErrorKind::ZeroDivide, "attempt to divide by zero"));
            }
            // exact quotients stay integral; the rest go decimal
            if a % b == 0 {
                a.checked_div(b)
            } else {
                return Ok(Cell::decimal(a as f64 / b as f64));
            }
        }
        _ => unreachable!("routed by dispatch"),
    };
    checked.map(Cell::integer).ok_or_else(overflow)
}

fn dec_arith(id: NativeId, a: f64, b: f64) -> RunResult<Cell> {
    let result = match id {
        NativeId::Add => a + b,
        NativeId::Subtract => a - b,
        NativeId::Multiply => a * b,
        NativeId::Divide => {
            if b == 0.0 {
                return Err(RunError::fail(ErrorKind::ZeroDivide, "attempt to divide by zero"));
            }
            a / b
        }
        _ => unreachable!("routed by dispatch"),
    };
    Ok(Cell::decimal(result))
}

fn overflow() -> RunError {
    RunError::fail(ErrorKind::Overflow, "integer overflow")
}

pub(crate) fn compare<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    id: NativeId,
) -> RunResult<Bounce> {
    let a = arg(m, fx, 0);
    let b = arg(m, fx, 1);
    let result = match id {
        NativeId::Equal => cells_equal(m.heap, a, b),
        NativeId::NotEqual => !cells_equal(m.heap, a, b),
        _ => {
            let ordering = compare_order(m.heap, a, b)?;
            match id {
                NativeId::Lesser => ordering.is_lt(),
                NativeId::Greater => ordering.is_gt(),
                NativeId::LesserEqual => ordering.is_le(),
                NativeId::GreaterEqual => ordering.is_ge(),
                _ => unreachable!("routed by dispatch"),
            }
        }
    };
    m.frames[fx].out = Cell::logic(result);
    Ok(Bounce::Completed)
}

/// Structural equality: numbers compare across integer/decimal, words by
/// symbol, text by content, arrays element-wise, contexts and actions by
/// identity.
pub(crate) fn cells_equal<T: ResourceTracker>(heap: &Heap<T>, a: &Cell, b: &Cell) -> bool {
    if a.quote() != b.quote() {
        return false;
    }
    match (a.payload(), b.payload()) {
        (Payload::Integer(x), Payload::Integer(y)) => x == y,
        (Payload::Decimal(x), Payload::Decimal(y)) => x == y,
        (Payload::Integer(x), Payload::Decimal(y)) | (Payload::Decimal(y), Payload::Integer(x)) => {
            (*x as f64) == *y
        }
        (Payload::Logic(x), Payload::Logic(y)) => x == y,
        (Payload::Word(x), Payload::Word(y)) => a.heart() == b.heart() && x == y,
        (Payload::None, Payload::None) => a.heart() == b.heart(),
        (Payload::Series { .. }, Payload::Series { .. }) => {
            if a.heart() != b.heart() {
                return false;
            }
            if a.heart() == Heart::Text {
                return heap.text(a.series_id()) == heap.text(b.series_id());
            }
            if a.heart().is_array() {
                let xs = &heap.array(a.series_id())[a.series_index() as usize..];
                let ys = &heap.array(b.series_id())[b.series_index() as usize..];
                return xs.len() == ys.len()
                    && xs.iter().zip(ys).all(|(x, y)| cells_equal(heap, x, y));
            }
            a.series_id() == b.series_id()
        }
        (Payload::Context(x), Payload::Context(y)) => x == y,
        (Payload::Action(x), Payload::Action(y)) => x == y,
        _ => false,
    }
}

fn compare_order<T: ResourceTracker>(
    heap: &Heap<T>,
    a: &Cell,
    b: &Cell,
) -> RunResult<std::cmp::Ordering> {
    let incomparable = || {
        RunError::fail(
            ErrorKind::TypeMismatch,
            "values of these kinds have no ordering",
        )
    };
    match (a.payload(), b.payload()) {
        (Payload::Integer(x), Payload::Integer(y)) => Ok(x.cmp(y)),
        (Payload::Integer(x), Payload::Decimal(y)) => {
            (*x as f64).partial_cmp(y).ok_or_else(incomparable)
        }
        (Payload::Decimal(x), Payload::Integer(y)) => {
            x.partial_cmp(&(*y as f64)).ok_or_else(incomparable)
        }
        (Payload::Decimal(x), Payload::Decimal(y)) => x.partial_cmp(y).ok_or_else(incomparable),
        (Payload::Series { .. }, Payload::Series { .. })
            if a.heart() == Heart::Text && b.heart() == Heart::Text =>
        {
            Ok(heap.text(a.series_id()).cmp(heap.text(b.series_id())))
        }
        _ => Err(incomparable()),
    }
}
