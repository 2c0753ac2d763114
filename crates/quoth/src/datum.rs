//! Detached values exchanged with the host.
//!
//! A [`Datum`] carries a value across the engine boundary without
//! exposing cells or the heap: host-registered actions receive their
//! arguments as data, and evaluation outcomes render through them.
//! Conversion is lossy only for things a host has no business holding
//! (bindings, quote levels beyond the value itself).

use std::fmt;

use crate::{
    cell::{Cell, Heart, Payload},
    error::{Error, ErrorKind, RunError, RunResult},
    heap::{Heap, SeriesData},
    intern::SymbolTable,
    resource::ResourceTracker,
};

/// A host-registered action: takes detached argument values, returns a
/// detached result.
pub type HostFn = Box<dyn FnMut(&[Datum]) -> Result<Datum, Error>>;

/// A value detached from the engine's heap.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Void,
    /// The unset state a variable holds before assignment.
    Unset,
    Blank,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Word(String),
    Issue(String),
    Block(Vec<Datum>),
    Group(Vec<Datum>),
    Binary(Vec<u8>),
    /// An error value (raised or reified).
    Error {
        kind: ErrorKind,
        message: String,
    },
    /// Something with no detached representation (action, object, ...);
    /// carries its molded form.
    Opaque(String),
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Void => write!(f, "void"),
            Self::Unset => write!(f, "~"),
            Self::Blank => write!(f, "_"),
            Self::Logic(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Decimal(d) => {
                let mut buf = ryu::Buffer::new();
                write!(f, "{}", buf.format(*d))
            }
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Word(w) => write!(f, "{w}"),
            Self::Issue(s) => write!(f, "#{s}"),
            Self::Block(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Group(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Binary(bytes) => {
                write!(f, "#{{")?;
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                write!(f, "}}")
            }
            Self::Error { kind, message } => write!(f, "** {kind} error: {message}"),
            Self::Opaque(molded) => write!(f, "{molded}"),
        }
    }
}

/// Detaches a cell into a datum.
pub(crate) fn datum_from_cell<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    cell: &Cell,
) -> Datum {
    if cell.is_null() {
        return Datum::Null;
    }
    if cell.is_void() {
        return Datum::Void;
    }
    if cell.is_unset() {
        return Datum::Unset;
    }
    if cell.quote().is_quoted() || cell.is_quasiform() || cell.is_isotope() {
        return Datum::Opaque(crate::mold::mold_to_string(heap, symbols, cell));
    }
    match (cell.heart(), cell.payload()) {
        (Heart::Blank, _) => Datum::Blank,
        (Heart::Logic, Payload::Logic(b)) => Datum::Logic(*b),
        (Heart::Integer, Payload::Integer(n)) => Datum::Integer(*n),
        (Heart::Decimal, Payload::Decimal(d)) => Datum::Decimal(*d),
        (Heart::Text, _) => Datum::Text(heap.text(cell.series_id()).to_owned()),
        (Heart::Word, Payload::Word(sym)) => Datum::Word(symbols.resolve(*sym).to_owned()),
        (Heart::Issue, Payload::Word(sym)) => Datum::Issue(symbols.resolve(*sym).to_owned()),
        (Heart::Block, _) | (Heart::Group, _) => {
            let items = heap
                .array(cell.series_id())
                .iter()
                .skip(cell.series_index() as usize)
                .map(|item| datum_from_cell(heap, symbols, item))
                .collect();
            if cell.heart() == Heart::Block {
                Datum::Block(items)
            } else {
                Datum::Group(items)
            }
        }
        (Heart::Binary, _) => match &heap.get(cell.series_id()).data {
            SeriesData::Binary(bytes) => Datum::Binary(bytes.clone()),
            _ => unreachable!("binary heart with non-binary series"),
        },
        (Heart::Error, _) => {
            let err = crate::context::context_to_error(heap, symbols, cell.series_id());
            Datum::Error {
                kind: err.kind,
                message: err.message,
            }
        }
        _ => Datum::Opaque(crate::mold::mold_to_string(heap, symbols, cell)),
    }
}

/// Attaches a datum as a cell, allocating series as needed.
pub(crate) fn cell_from_datum<T: ResourceTracker>(
    heap: &mut Heap<T>,
    symbols: &mut SymbolTable,
    datum: &Datum,
) -> RunResult<Cell> {
    Ok(match datum {
        Datum::Null => Cell::null(),
        Datum::Void => Cell::void(),
        Datum::Unset => Cell::unset(),
        Datum::Blank => Cell::blank(),
        Datum::Logic(b) => Cell::logic(*b),
        Datum::Integer(n) => Cell::integer(*n),
        Datum::Decimal(d) => Cell::decimal(*d),
        Datum::Text(s) => Cell::series(Heart::Text, heap.alloc_text(s.clone())?),
        Datum::Word(w) => Cell::word(Heart::Word, symbols.intern(w)),
        Datum::Issue(s) => Cell::word(Heart::Issue, symbols.intern(s)),
        Datum::Block(items) | Datum::Group(items) => {
            let mut cells = Vec::with_capacity(items.len());
            for item in items {
                cells.push(cell_from_datum(heap, symbols, item)?);
            }
            let heart = if matches!(datum, Datum::Block(_)) {
                Heart::Block
            } else {
                Heart::Group
            };
            Cell::series(heart, heap.alloc_array(cells)?)
        }
        Datum::Binary(bytes) => Cell::series(Heart::Binary, heap.alloc(SeriesData::Binary(bytes.clone()))?),
        Datum::Error { kind, message } => {
            let err = Error::new(*kind, message.clone());
            let ctx = crate::context::error_to_context(heap, symbols, &err)?;
            Cell::context(Heart::Error, ctx)
        }
        Datum::Opaque(_) => {
            return Err(RunError::fail(
                ErrorKind::BadHostValue,
                "opaque values cannot round-trip back into the engine",
            ));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn round_trips_scalars_and_blocks() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let datum = Datum::Block(vec![
            Datum::Integer(1),
            Datum::Text("hi".to_owned()),
            Datum::Word("foo".to_owned()),
            Datum::Logic(true),
        ]);
        let cell = cell_from_datum(&mut heap, &mut symbols, &datum).unwrap();
        let back = datum_from_cell(&heap, &symbols, &cell);
        assert_eq!(back, datum);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Datum::Null.to_string(), "null");
        assert_eq!(Datum::Unset.to_string(), "~");
        assert_eq!(Datum::Block(vec![Datum::Integer(1), Datum::Blank]).to_string(), "[1 _]");
    }
}
