//! Molding: rendering cells back into canonical source text.
//!
//! Isotopes have no written form; they mold as their meta (quasi) shape,
//! which is also what the console-style renderers show. Arrays recurse
//! with a depth guard so cyclic structures stay printable.

use std::fmt::Write;

use crate::{
    cell::{Cell, Heart, Payload, QuoteState},
    heap::{Heap, SeriesData},
    intern::{KnownSymbol, SymbolTable},
    resource::ResourceTracker,
};

/// Cycle guard for nested arrays.
const MAX_MOLD_DEPTH: usize = 24;

/// The process-wide mold scratch buffer.
///
/// Operations that build text acquire a region with [`MoldBuffer::mark`]
/// and must balance it with [`MoldBuffer::take`] (or [`MoldBuffer::drop_mark`])
/// before yielding control; the trampoline asserts balance at frame drop.
#[derive(Debug, Default)]
pub(crate) struct MoldBuffer {
    buf: String,
    marks: Vec<usize>,
}

impl MoldBuffer {
    /// Opens a region; text pushed after this belongs to it.
    pub fn mark(&mut self) {
        self.marks.push(self.buf.len());
    }

    /// Closes the innermost region, returning its text.
    pub fn take(&mut self) -> String {
        let mark = self.marks.pop().expect("unbalanced mold mark");
        self.buf.split_off(mark)
    }

    /// Closes the innermost region, discarding its text.
    pub fn drop_mark(&mut self) {
        let mark = self.marks.pop().expect("unbalanced mold mark");
        self.buf.truncate(mark);
    }

    pub fn buf_mut(&mut self) -> &mut String {
        &mut self.buf
    }

    /// Number of open regions; frames record this as part of their
    /// baseline.
    pub fn depth(&self) -> usize {
        self.marks.len()
    }
}

/// Molds a cell to a fresh string.
pub(crate) fn mold_to_string<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    cell: &Cell,
) -> String {
    let mut buf = String::new();
    mold_cell(heap, symbols, cell, &mut buf, 0);
    buf
}

/// Molds a cell into a buffer.
pub(crate) fn mold_cell<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    cell: &Cell,
    buf: &mut String,
    depth: usize,
) {
    if depth > MAX_MOLD_DEPTH {
        buf.push_str("...");
        return;
    }
    match cell.quote() {
        QuoteState::Isotope => {
            // no written form; render the meta shape
            let meta = cell.clone().meta();
            mold_cell(heap, symbols, &meta, buf, depth);
            return;
        }
        QuoteState::Plain(n) => {
            for _ in 0..n {
                buf.push('\'');
            }
        }
        QuoteState::Quasi(n) => {
            for _ in 0..n {
                buf.push('\'');
            }
            if cell.heart() == Heart::Blank {
                // the quasi-blank molds as a bare ~
                buf.push('~');
                return;
            }
            buf.push('~');
            mold_body(heap, symbols, cell, buf, depth);
            buf.push('~');
            return;
        }
    }
    mold_body(heap, symbols, cell, buf, depth);
}

/// Molds the heart-level body of an unquoted cell.
fn mold_body<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    cell: &Cell,
    buf: &mut String,
    depth: usize,
) {
    match cell.heart() {
        Heart::Null => buf.push_str(symbols.resolve(KnownSymbol::Null.id())),
        Heart::Void => buf.push_str(symbols.resolve(KnownSymbol::Void.id())),
        Heart::Blank => buf.push('_'),
        Heart::Comma => buf.push(','),
        Heart::Logic => buf.push_str(if cell.as_logic() == Some(true) { "true" } else { "false" }),
        Heart::Integer => {
            let Payload::Integer(n) = cell.payload() else { unreachable!() };
            let _ = write!(buf, "{n}");
        }
        Heart::Decimal => {
            let Payload::Decimal(d) = cell.payload() else { unreachable!() };
            let mut ryu_buf = ryu::Buffer::new();
            buf.push_str(ryu_buf.format(*d));
        }
        Heart::Text => {
            buf.push('"');
            for c in heap.text(cell.series_id()).chars() {
                match c {
                    '"' => buf.push_str("^\""),
                    '^' => buf.push_str("^^"),
                    '\n' => buf.push_str("^/"),
                    '\t' => buf.push_str("^-"),
                    c => buf.push(c),
                }
            }
            buf.push('"');
        }
        Heart::Binary => {
            buf.push_str("#{");
            if let SeriesData::Binary(bytes) = &heap.get(cell.series_id()).data {
                for byte in bytes {
                    let _ = write!(buf, "{byte:02X}");
                }
            }
            buf.push('}');
        }
        Heart::Issue => {
            buf.push('#');
            buf.push_str(symbols.resolve(cell.word_symbol()));
        }
        Heart::Tag => {
            buf.push('<');
            buf.push_str(symbols.resolve(cell.word_symbol()));
            buf.push('>');
        }
        Heart::Word => buf.push_str(symbols.resolve(cell.word_symbol())),
        Heart::SetWord => {
            buf.push_str(symbols.resolve(cell.word_symbol()));
            buf.push(':');
        }
        Heart::GetWord => {
            buf.push(':');
            buf.push_str(symbols.resolve(cell.word_symbol()));
        }
        Heart::MetaWord => {
            buf.push('^');
            buf.push_str(symbols.resolve(cell.word_symbol()));
        }
        Heart::TheWord => {
            buf.push('@');
            buf.push_str(symbols.resolve(cell.word_symbol()));
        }
        Heart::Block => mold_array(heap, symbols, cell, buf, "[", "]", depth),
        Heart::SetBlock => {
            mold_array(heap, symbols, cell, buf, "[", "]", depth);
            buf.push(':');
        }
        Heart::GetBlock => {
            buf.push(':');
            mold_array(heap, symbols, cell, buf, "[", "]", depth);
        }
        Heart::MetaBlock => {
            buf.push('^');
            mold_array(heap, symbols, cell, buf, "[", "]", depth);
        }
        Heart::Group => mold_array(heap, symbols, cell, buf, "(", ")", depth),
        Heart::SetGroup => {
            mold_array(heap, symbols, cell, buf, "(", ")", depth);
            buf.push(':');
        }
        Heart::GetGroup => {
            buf.push(':');
            mold_array(heap, symbols, cell, buf, "(", ")", depth);
        }
        Heart::MetaGroup => {
            buf.push('^');
            mold_array(heap, symbols, cell, buf, "(", ")", depth);
        }
        Heart::Path => mold_sequence(heap, symbols, cell, buf, '/', depth),
        Heart::Tuple => mold_sequence(heap, symbols, cell, buf, '.', depth),
        Heart::SetTuple => {
            mold_sequence(heap, symbols, cell, buf, '.', depth);
            buf.push(':');
        }
        Heart::Action => {
            let details = heap.details(cell.series_id());
            match details.name {
                Some(name) => {
                    let _ = write!(buf, "#[action {}]", symbols.resolve(name));
                }
                None => buf.push_str("#[action]"),
            }
        }
        Heart::Object => buf.push_str("#[object]"),
        Heart::Module => buf.push_str("#[module]"),
        Heart::Frame => buf.push_str("#[frame]"),
        Heart::Error => {
            let err = crate::context::context_to_error(heap, symbols, cell.series_id());
            let _ = write!(buf, "make error! [{} \"{}\"]", err.kind, err.message);
        }
    }
}

fn mold_array<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    cell: &Cell,
    buf: &mut String,
    open: &str,
    close: &str,
    depth: usize,
) {
    buf.push_str(open);
    let cells = heap.array(cell.series_id());
    let start = cell.series_index() as usize;
    for (i, item) in cells.iter().enumerate().skip(start) {
        if i > start {
            buf.push(' ');
        }
        mold_cell(heap, symbols, item, buf, depth + 1);
    }
    buf.push_str(close);
}

fn mold_sequence<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    cell: &Cell,
    buf: &mut String,
    sep: char,
    depth: usize,
) {
    let cells = heap.array(cell.series_id());
    for (i, item) in cells.iter().enumerate() {
        if i > 0 {
            buf.push(sep);
        }
        if item.heart() != Heart::Blank {
            mold_cell(heap, symbols, item, buf, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::NoLimitTracker, scan::scan_block};

    fn round_trip(src: &str) -> String {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let id = scan_block(&mut heap, &mut symbols, src).unwrap();
        let block = Cell::series(Heart::Block, id);
        let molded = mold_to_string(&heap, &symbols, &block);
        molded
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .expect("block molds with brackets")
            .to_owned()
    }

    #[test]
    fn molds_match_source() {
        for src in [
            "1 2.5 \"hi\" word word: :word ^word @word _",
            "[a b] (c d) a/b obj.field",
            "'x ''[a] ~x~ ~",
            "#tok <local>",
        ] {
            assert_eq!(round_trip(src), src);
        }
    }

    #[test]
    fn isotopes_mold_as_meta_shapes() {
        let heap = Heap::new(NoLimitTracker);
        let symbols = SymbolTable::new();
        assert_eq!(mold_to_string(&heap, &symbols, &Cell::unset()), "~");
        assert_eq!(mold_to_string(&heap, &symbols, &Cell::null()), "~null~");
        assert_eq!(mold_to_string(&heap, &symbols, &Cell::void()), "~void~");
    }

    #[test]
    fn mold_buffer_balances() {
        let mut mold = MoldBuffer::default();
        mold.mark();
        mold.buf_mut().push_str("outer ");
        mold.mark();
        mold.buf_mut().push_str("inner");
        assert_eq!(mold.take(), "inner");
        assert_eq!(mold.take(), "outer ");
        assert_eq!(mold.depth(), 0);
    }
}
