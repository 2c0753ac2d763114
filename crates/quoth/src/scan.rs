//! The scanner: UTF-8 source text to arrays of cells.
//!
//! Produces exactly the shapes the evaluator dispatches on: words and
//! their set/get/meta/the forms, quote levels, quasiforms, blocks,
//! groups, paths, tuples, issues, tags, numbers, text, and binary.
//! Isotopes have no written form and are never produced here.
//!
//! Newlines are recorded on the first cell after them so molded output
//! can preserve rough source shape.

use crate::{
    cell::{Cell, CellFlags, Heart},
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, SeriesId},
    intern::SymbolTable,
    resource::ResourceTracker,
};

/// Characters that always end a token.
fn is_delimiter(c: char) -> bool {
    matches!(c, '[' | ']' | '(' | ')' | '"' | ';' | ',') || c.is_whitespace()
}

/// Scans source text into a block array.
pub(crate) fn scan_block<T: ResourceTracker>(
    heap: &mut Heap<T>,
    symbols: &mut SymbolTable,
    src: &str,
) -> RunResult<SeriesId> {
    let mut scanner = Scanner { src, pos: 0, line: 1 };
    let cells = scanner.scan_sequence(heap, symbols, None)?;
    heap.alloc_array(cells)
}

struct Scanner<'s> {
    src: &'s str,
    pos: usize,
    line: u32,
}

impl<'s> Scanner<'s> {
    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek2(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        if c == '\n' {
            self.line += 1;
        }
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> RunError {
        RunError::fail(
            ErrorKind::Syntax,
            format!("{} (line {})", message.into(), self.line),
        )
    }

    /// Skips whitespace and `;` comments; reports whether a newline was
    /// crossed.
    fn skip_trivia(&mut self) -> bool {
        let mut saw_newline = false;
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    if c == '\n' {
                        saw_newline = true;
                    }
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return saw_newline,
            }
        }
    }

    /// Scans items until the terminator (or end of input when `None`).
    fn scan_sequence<T: ResourceTracker>(
        &mut self,
        heap: &mut Heap<T>,
        symbols: &mut SymbolTable,
        terminator: Option<char>,
    ) -> RunResult<Vec<Cell>> {
        let mut cells = Vec::new();
        loop {
            let newline = self.skip_trivia();
            match self.peek() {
                None => match terminator {
                    None => return Ok(cells),
                    Some(t) => return Err(self.error(format!("missing closing {t}"))),
                },
                Some(c) if Some(c) == terminator => {
                    self.bump();
                    return Ok(cells);
                }
                Some(']') | Some(')') => {
                    return Err(self.error("unexpected closing delimiter"));
                }
                Some(_) => {
                    let mut cell = self.scan_item(heap, symbols)?;
                    if newline && !cells.is_empty() {
                        cell.set_flag(CellFlags::NEWLINE_BEFORE);
                    }
                    cells.push(cell);
                }
            }
        }
    }

    fn scan_item<T: ResourceTracker>(
        &mut self,
        heap: &mut Heap<T>,
        symbols: &mut SymbolTable,
    ) -> RunResult<Cell> {
        let c = self.peek().expect("caller checked non-empty");
        match c {
            '[' => {
                self.bump();
                let cells = self.scan_sequence(heap, symbols, Some(']'))?;
                let id = heap.alloc_array(cells)?;
                Ok(Cell::series(self.suffixed_heart(Heart::Block, Heart::SetBlock), id))
            }
            '(' => {
                self.bump();
                let cells = self.scan_sequence(heap, symbols, Some(')'))?;
                let id = heap.alloc_array(cells)?;
                Ok(Cell::series(self.suffixed_heart(Heart::Group, Heart::SetGroup), id))
            }
            ':' => {
                self.bump();
                match self.peek() {
                    Some('[') => {
                        self.bump();
                        let cells = self.scan_sequence(heap, symbols, Some(']'))?;
                        Ok(Cell::series(Heart::GetBlock, heap.alloc_array(cells)?))
                    }
                    Some('(') => {
                        self.bump();
                        let cells = self.scan_sequence(heap, symbols, Some(')'))?;
                        Ok(Cell::series(Heart::GetGroup, heap.alloc_array(cells)?))
                    }
                    _ => {
                        let token = self.take_token()?;
                        Ok(Cell::word(Heart::GetWord, symbols.intern(token)))
                    }
                }
            }
            '^' => {
                self.bump();
                match self.peek() {
                    Some('[') => {
                        self.bump();
                        let cells = self.scan_sequence(heap, symbols, Some(']'))?;
                        Ok(Cell::series(Heart::MetaBlock, heap.alloc_array(cells)?))
                    }
                    Some('(') => {
                        self.bump();
                        let cells = self.scan_sequence(heap, symbols, Some(')'))?;
                        Ok(Cell::series(Heart::MetaGroup, heap.alloc_array(cells)?))
                    }
                    _ => {
                        let token = self.take_token()?;
                        Ok(Cell::word(Heart::MetaWord, symbols.intern(token)))
                    }
                }
            }
            '@' => {
                self.bump();
                let token = self.take_token()?;
                Ok(Cell::word(Heart::TheWord, symbols.intern(token)))
            }
            '\'' => {
                let mut depth: u8 = 0;
                while self.peek() == Some('\'') {
                    self.bump();
                    depth += 1;
                }
                if self.peek().is_none_or(is_delimiter) {
                    return Err(self.error("quote mark with nothing to quote"));
                }
                let inner = self.scan_item(heap, symbols)?;
                let mut quoted = inner;
                for _ in 0..depth {
                    quoted = quoted.quote_one().map_err(|_| self.error("unquotable item"))?;
                }
                Ok(quoted)
            }
            '~' => self.scan_quasi(heap, symbols),
            '"' => {
                self.bump();
                let text = self.scan_string_body()?;
                Ok(Cell::series(Heart::Text, heap.alloc_text(text)?))
            }
            '#' => {
                self.bump();
                if self.peek() == Some('{') {
                    self.bump();
                    let bytes = self.scan_binary_body()?;
                    Ok(Cell::series(Heart::Binary, heap.alloc(crate::heap::SeriesData::Binary(bytes))?))
                } else if self.peek().is_none_or(is_delimiter) {
                    Ok(Cell::word(Heart::Issue, symbols.intern("")))
                } else {
                    let token = self.take_token()?;
                    Ok(Cell::word(Heart::Issue, symbols.intern(token)))
                }
            }
            ',' => {
                self.bump();
                Ok(Cell::comma())
            }
            '_' => {
                self.bump();
                if self.peek().is_none_or(is_delimiter) {
                    Ok(Cell::blank())
                } else {
                    Err(self.error("blank may not begin a word"))
                }
            }
            '<' => {
                if let Some(tag) = self.try_scan_tag() {
                    return Ok(Cell::word(Heart::Tag, symbols.intern(tag)));
                }
                self.scan_token_item(heap, symbols)
            }
            c if c.is_ascii_digit() => self.scan_token_item(heap, symbols),
            '+' | '-' if self.peek2().is_some_and(|c2| c2.is_ascii_digit()) => {
                self.scan_token_item(heap, symbols)
            }
            _ => self.scan_token_item(heap, symbols),
        }
    }

    /// After a closing bracket: a `:` suffix turns the form into its set
    /// variant.
    fn suffixed_heart(&mut self, plain: Heart, set: Heart) -> Heart {
        if self.peek() == Some(':') {
            self.bump();
            set
        } else {
            plain
        }
    }

    /// A `<tag>`: only when the text between the angles is markup-shaped.
    fn try_scan_tag(&mut self) -> Option<&'s str> {
        let rest = self.rest();
        debug_assert!(rest.starts_with('<'));
        let close = rest.find('>')?;
        let inner = &rest[1..close];
        if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return None;
        }
        if !inner.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        self.pos += close + 1;
        Some(inner)
    }

    fn scan_quasi<T: ResourceTracker>(
        &mut self,
        heap: &mut Heap<T>,
        symbols: &mut SymbolTable,
    ) -> RunResult<Cell> {
        self.bump(); // opening ~
        if self.peek().is_none_or(|c| is_delimiter(c)) {
            // bare ~ is the quasi-blank ("none") literal
            return Ok(Cell::unset().meta());
        }
        if self.peek() == Some('[') {
            self.bump();
            let cells = self.scan_sequence(heap, symbols, Some(']'))?;
            if self.bump() != Some('~') {
                return Err(self.error("quasi block missing closing ~"));
            }
            let id = heap.alloc_array(cells)?;
            return Ok(Cell::series(Heart::Block, id).make_quasi());
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '~' {
                let spelling = &self.src[start..self.pos];
                self.bump();
                return Ok(match spelling {
                    "void" => Cell::void().meta(),
                    "null" => Cell::null().meta(),
                    _ => Cell::word(Heart::Word, symbols.intern(spelling)).make_quasi(),
                });
            }
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        Err(self.error("quasiform missing closing ~"))
    }

    fn scan_string_body(&mut self) -> RunResult<String> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(text),
                Some('^') => match self.bump() {
                    Some('"') => text.push('"'),
                    Some('^') => text.push('^'),
                    Some('/') => text.push('\n'),
                    Some('-') => text.push('\t'),
                    other => {
                        return Err(self.error(format!("unknown string escape ^{}", other.unwrap_or(' '))));
                    }
                },
                Some(c) => text.push(c),
            }
        }
    }

    fn scan_binary_body(&mut self) -> RunResult<Vec<u8>> {
        let mut digits = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated binary")),
                Some('}') => break,
                Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                Some(c) if c.is_whitespace() => {}
                Some(c) => return Err(self.error(format!("bad binary digit {c}"))),
            }
        }
        if digits.len() % 2 != 0 {
            return Err(self.error("binary needs an even number of hex digits"));
        }
        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in digits.as_bytes().chunks(2) {
            let hex = std::str::from_utf8(pair).expect("hex digits are ascii");
            bytes.push(u8::from_str_radix(hex, 16).expect("checked hex digits"));
        }
        Ok(bytes)
    }

    /// Reads a raw token up to the next delimiter.
    fn take_token(&mut self) -> RunResult<&'s str> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected a token"));
        }
        Ok(&self.src[start..self.pos])
    }

    /// Scans a token and classifies it: number, path, tuple, set-word, or
    /// plain word.
    fn scan_token_item<T: ResourceTracker>(
        &mut self,
        heap: &mut Heap<T>,
        symbols: &mut SymbolTable,
    ) -> RunResult<Cell> {
        let token = self.take_token()?;

        // standalone slash is the division operator word
        if token == "/" {
            return Ok(Cell::word(Heart::Word, symbols.intern("/")));
        }

        let (token, is_set) = match token.strip_suffix(':') {
            Some(stripped) if !stripped.is_empty() => (stripped, true),
            _ => (token, false),
        };

        if looks_numeric(token) {
            if is_set {
                return Err(self.error("numbers cannot be assigned to"));
            }
            return self.scan_number(token);
        }

        if token.contains('/') {
            if is_set {
                return Err(self.error("set-paths are not supported"));
            }
            let cells = self.split_sequence(token, '/', symbols)?;
            return Ok(Cell::series(Heart::Path, heap.alloc_array(cells)?));
        }

        if token.contains('.') && token.len() > 1 {
            let cells = self.split_sequence(token, '.', symbols)?;
            let heart = if is_set { Heart::SetTuple } else { Heart::Tuple };
            return Ok(Cell::series(heart, heap.alloc_array(cells)?));
        }

        let heart = if is_set { Heart::SetWord } else { Heart::Word };
        Ok(Cell::word(heart, symbols.intern(token)))
    }

    /// Splits a path or tuple token into segment cells. Empty segments
    /// become blanks (`/foo` has a blank head).
    fn split_sequence(&self, token: &str, sep: char, symbols: &mut SymbolTable) -> RunResult<Vec<Cell>> {
        let mut cells = Vec::new();
        for segment in token.split(sep) {
            if segment.is_empty() {
                cells.push(Cell::blank());
            } else if looks_numeric(segment) {
                let n: i64 = segment
                    .parse()
                    .map_err(|_| self.error(format!("bad sequence segment {segment}")))?;
                cells.push(Cell::integer(n));
            } else if segment.contains('.') {
                return Err(self.error("tuples may not nest inside paths"));
            } else {
                cells.push(Cell::word(Heart::Word, symbols.intern(segment)));
            }
        }
        if cells.len() < 2 {
            return Err(self.error("sequence needs at least two segments"));
        }
        Ok(cells)
    }

    fn scan_number(&self, token: &str) -> RunResult<Cell> {
        let dots = token.matches('.').count();
        match dots {
            0 => token
                .parse::<i64>()
                .map(Cell::integer)
                .map_err(|_| self.error(format!("bad integer {token}"))),
            1 => token
                .parse::<f64>()
                .map(Cell::decimal)
                .map_err(|_| self.error(format!("bad decimal {token}"))),
            _ => Err(self.error(format!("bad number {token}"))),
        }
    }
}

/// A token is numeric when it starts with a digit or a sign before a
/// digit.
fn looks_numeric(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cell::QuoteState, resource::NoLimitTracker};

    fn scan(src: &str) -> (Heap<NoLimitTracker>, SymbolTable, SeriesId) {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let id = scan_block(&mut heap, &mut symbols, src).unwrap();
        (heap, symbols, id)
    }

    fn hearts(src: &str) -> Vec<Heart> {
        let (heap, _, id) = scan(src);
        heap.array(id).iter().map(Cell::heart).collect()
    }

    #[test]
    fn scans_scalars_and_words() {
        assert_eq!(
            hearts(r#"10 2.5 "hi" word word: :word ^word @word _ , #tok"#),
            vec![
                Heart::Integer,
                Heart::Decimal,
                Heart::Text,
                Heart::Word,
                Heart::SetWord,
                Heart::GetWord,
                Heart::MetaWord,
                Heart::TheWord,
                Heart::Blank,
                Heart::Comma,
                Heart::Issue,
            ]
        );
    }

    #[test]
    fn scans_array_forms() {
        assert_eq!(
            hearts("[a] [a]: :[a] ^[a] (a) (a): :(a) ^(a)"),
            vec![
                Heart::Block,
                Heart::SetBlock,
                Heart::GetBlock,
                Heart::MetaBlock,
                Heart::Group,
                Heart::SetGroup,
                Heart::GetGroup,
                Heart::MetaGroup,
            ]
        );
    }

    #[test]
    fn scans_paths_and_tuples() {
        let (heap, _, id) = scan("a/b /only obj.field throw/name");
        let cells = heap.array(id);
        assert_eq!(cells[0].heart(), Heart::Path);
        assert_eq!(cells[1].heart(), Heart::Path);
        assert_eq!(heap.array(cells[1].series_id())[0].heart(), Heart::Blank);
        assert_eq!(cells[2].heart(), Heart::Tuple);
        assert_eq!(cells[3].heart(), Heart::Path);
    }

    #[test]
    fn scans_quotes_and_quasis() {
        let (heap, _, id) = scan("'x ''x ~x~ '~x~ ~ ~void~ ~null~");
        let cells = heap.array(id);
        assert_eq!(cells[0].quote(), QuoteState::Plain(1));
        assert_eq!(cells[1].quote(), QuoteState::Plain(2));
        assert_eq!(cells[2].quote(), QuoteState::Quasi(0));
        assert_eq!(cells[3].quote(), QuoteState::Quasi(1));
        assert_eq!(cells[4].heart(), Heart::Blank);
        assert_eq!(cells[4].quote(), QuoteState::Quasi(0));
        assert_eq!(cells[5].heart(), Heart::Void);
        assert_eq!(cells[6].heart(), Heart::Null);
    }

    #[test]
    fn operators_are_words() {
        let (heap, symbols, id) = scan("1 + 2 * 3 <= 4 <> 5 -> x");
        let cells = heap.array(id);
        assert_eq!(cells[1].heart(), Heart::Word);
        assert_eq!(symbols.resolve(cells[1].word_symbol()), "+");
        assert_eq!(symbols.resolve(cells[5].word_symbol()), "<=");
        assert_eq!(symbols.resolve(cells[7].word_symbol()), "<>");
        assert_eq!(symbols.resolve(cells[9].word_symbol()), "->");
    }

    #[test]
    fn tags_are_recognized() {
        let (heap, symbols, id) = scan("<local> x <opt>");
        let cells = heap.array(id);
        assert_eq!(cells[0].heart(), Heart::Tag);
        assert_eq!(symbols.resolve(cells[0].word_symbol()), "local");
        assert_eq!(cells[2].heart(), Heart::Tag);
    }

    #[test]
    fn nested_blocks_and_comments() {
        let (heap, _, id) = scan("[a ; comment\n b] (1 2)");
        let cells = heap.array(id);
        assert_eq!(heap.array(cells[0].series_id()).len(), 2);
        assert_eq!(heap.array(cells[1].series_id()).len(), 2);
    }

    #[test]
    fn string_escapes() {
        let (heap, _, id) = scan(r#""a^"b^/c""#);
        let cells = heap.array(id);
        assert_eq!(heap.text(cells[0].series_id()), "a\"b\nc");
    }

    #[test]
    fn unclosed_block_errors() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let err = scan_block(&mut heap, &mut symbols, "[a b").unwrap_err();
        assert_eq!(err.into_error().kind, ErrorKind::Syntax);
    }

    #[test]
    fn negative_numbers_and_minus_word() {
        let (heap, symbols, id) = scan("-5 - 5");
        let cells = heap.array(id);
        assert_eq!(cells[0].as_integer(), Some(-5));
        assert_eq!(symbols.resolve(cells[1].word_symbol()), "-");
    }
}
