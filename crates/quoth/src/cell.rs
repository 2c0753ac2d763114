//! The tagged cell: the unit value of the interpreter.
//!
//! A cell pairs a *heart* (the underlying kind) with a *quote state*
//! layered on top of it, a small flag word, a heart-specific payload, and
//! an optional binding used by the word-family hearts to resolve through a
//! context. Quote depth is stored directly in the quote state, so deep
//! quoting costs nothing extra.
//!
//! Isotopes (the evaluation products of quasiforms) are representable in
//! cells but are prohibited inside arrays; the heap's array mutators
//! enforce that invariant.

use bitflags::bitflags;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, SeriesData, SeriesId},
    intern::{KnownSymbol, SymbolId},
    resource::ResourceTracker,
};

/// The underlying kind of a cell, before quoting is considered.
///
/// The string form is the kebab-case type name without the `!` suffix
/// (e.g. `SetWord` -> "set-word").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Heart {
    /// Absence of a value. Storable in variables, never in arrays, and an
    /// error when found in an expression slot.
    Null,
    /// The vanished result of an expression. Only reachable through
    /// evaluation and meta forms; has no plain written form.
    Void,
    /// `_`
    Blank,
    /// `,` expression barrier.
    Comma,
    /// `#token`
    Issue,
    /// `<tag>` (spec dialect markup).
    Tag,
    Logic,
    Integer,
    Decimal,
    Text,
    Binary,
    Word,
    SetWord,
    GetWord,
    MetaWord,
    /// `@word`, used to circle a slot in multi-return destructuring.
    TheWord,
    Block,
    SetBlock,
    GetBlock,
    MetaBlock,
    Group,
    SetGroup,
    GetGroup,
    MetaGroup,
    Path,
    Tuple,
    SetTuple,
    Action,
    Object,
    Module,
    Frame,
    Error,
}

impl Heart {
    /// Hearts whose payload is an array series.
    pub(crate) fn is_array(self) -> bool {
        matches!(
            self,
            Self::Block
                | Self::SetBlock
                | Self::GetBlock
                | Self::MetaBlock
                | Self::Group
                | Self::SetGroup
                | Self::GetGroup
                | Self::MetaGroup
                | Self::Path
                | Self::Tuple
                | Self::SetTuple
        )
    }

    /// Hearts whose payload is a word symbol.
    pub(crate) fn is_word(self) -> bool {
        matches!(self, Self::Word | Self::SetWord | Self::GetWord | Self::MetaWord | Self::TheWord)
    }

    /// Hearts whose payload is a context.
    pub(crate) fn is_context(self) -> bool {
        matches!(self, Self::Object | Self::Module | Self::Frame | Self::Error)
    }
}

/// Quote layering on top of a heart.
///
/// `Plain(0)` is the ordinary unquoted state. Evaluating `Quasi(0)` (the
/// written `~x~` form) produces `Isotope`, which cannot be written
/// literally and cannot be stored in arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuoteState {
    /// The unstable evaluation product of a quasiform.
    Isotope,
    /// Plain value under `n` levels of quoting (`0` = unquoted).
    Plain(u8),
    /// Quasiform under `n` levels of quoting (`0` = written `~x~`).
    Quasi(u8),
}

impl QuoteState {
    pub fn is_quoted(self) -> bool {
        matches!(self, Self::Plain(n) | Self::Quasi(n) if n > 0)
    }
}

bitflags! {
    /// Per-cell flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CellFlags: u16 {
        /// The cell's bits are residue from a prior step; treat the slot
        /// as logically unwritten. Never valid as an enfix left operand.
        const STALE = 1 << 0;
        /// The value was copied verbatim from source, not computed.
        const UNEVALUATED = 1 << 1;
        /// The cell is a raised error awaiting local trapping or
        /// promotion to an abrupt failure.
        const RAISED = 1 << 2;
        /// Source formatting: a newline preceded this cell.
        const NEWLINE_BEFORE = 1 << 3;
        /// Writes through this cell are refused.
        const PROTECTED = 1 << 4;
        /// The isotope in this cell came directly from evaluating a
        /// quasiform, so an assignment may still accept it.
        const FROM_QUASI = 1 << 5;
    }
}

/// Heart-specific payload.
///
/// The active variant is determined by the heart; constructors keep the
/// pairing consistent and accessors debug-assert it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Payload {
    None,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Word(SymbolId),
    Series { id: SeriesId, index: u32 },
    Context(SeriesId),
    Action(SeriesId),
}

/// A tagged value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Cell {
    heart: Heart,
    quote: QuoteState,
    flags: CellFlags,
    payload: Payload,
    binding: Option<SeriesId>,
}

impl Cell {
    fn raw(heart: Heart, quote: QuoteState, payload: Payload) -> Self {
        Self {
            heart,
            quote,
            flags: CellFlags::empty(),
            payload,
            binding: None,
        }
    }

    /// The null state: absence of a value.
    pub fn null() -> Self {
        Self::raw(Heart::Null, QuoteState::Isotope, Payload::None)
    }

    /// A fresh void: stale and carrying no residue. The initial state of
    /// every frame's `out` and `spare` slots.
    pub fn fresh_void() -> Self {
        let mut cell = Self::raw(Heart::Void, QuoteState::Isotope, Payload::None);
        cell.flags |= CellFlags::STALE;
        cell
    }

    /// The void value itself (non-stale), as stored in variables or
    /// produced by `unmeta` of `~void~`.
    pub fn void() -> Self {
        Self::raw(Heart::Void, QuoteState::Isotope, Payload::None)
    }

    /// The unset state a variable holds before assignment ("none").
    pub fn unset() -> Self {
        Self::raw(Heart::Blank, QuoteState::Isotope, Payload::None)
    }

    pub fn blank() -> Self {
        Self::raw(Heart::Blank, QuoteState::Plain(0), Payload::None)
    }

    pub fn comma() -> Self {
        Self::raw(Heart::Comma, QuoteState::Plain(0), Payload::None)
    }

    pub fn logic(value: bool) -> Self {
        Self::raw(Heart::Logic, QuoteState::Plain(0), Payload::Logic(value))
    }

    pub fn integer(value: i64) -> Self {
        Self::raw(Heart::Integer, QuoteState::Plain(0), Payload::Integer(value))
    }

    pub fn decimal(value: f64) -> Self {
        Self::raw(Heart::Decimal, QuoteState::Plain(0), Payload::Decimal(value))
    }

    pub fn word(heart: Heart, symbol: SymbolId) -> Self {
        debug_assert!(heart.is_word() || matches!(heart, Heart::Issue | Heart::Tag));
        Self::raw(heart, QuoteState::Plain(0), Payload::Word(symbol))
    }

    pub fn series(heart: Heart, id: SeriesId) -> Self {
        debug_assert!(heart.is_array() || matches!(heart, Heart::Text | Heart::Binary));
        Self::raw(heart, QuoteState::Plain(0), Payload::Series { id, index: 0 })
    }

    pub fn context(heart: Heart, id: SeriesId) -> Self {
        debug_assert!(heart.is_context());
        Self::raw(heart, QuoteState::Plain(0), Payload::Context(id))
    }

    pub fn action(details: SeriesId) -> Self {
        Self::raw(Heart::Action, QuoteState::Plain(0), Payload::Action(details))
    }

    // --- accessors ---

    #[inline]
    pub fn heart(&self) -> Heart {
        self.heart
    }

    #[inline]
    pub fn quote(&self) -> QuoteState {
        self.quote
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    pub fn binding(&self) -> Option<SeriesId> {
        self.binding
    }

    pub fn set_binding(&mut self, binding: Option<SeriesId>) {
        self.binding = binding;
    }

    #[inline]
    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: CellFlags) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: CellFlags) {
        self.flags &= !flag;
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.flags.contains(CellFlags::STALE)
    }

    /// True when this cell is a fresh void that was never written over.
    pub fn is_fresh_void(&self) -> bool {
        self.is_stale() && self.heart == Heart::Void
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.flags.contains(CellFlags::RAISED)
    }

    #[inline]
    pub fn is_isotope(&self) -> bool {
        matches!(self.quote, QuoteState::Isotope)
    }

    pub fn is_quasiform(&self) -> bool {
        matches!(self.quote, QuoteState::Quasi(0))
    }

    pub fn is_null(&self) -> bool {
        self.heart == Heart::Null && self.is_isotope()
    }

    pub fn is_void(&self) -> bool {
        self.heart == Heart::Void && self.is_isotope()
    }

    pub fn is_unset(&self) -> bool {
        self.heart == Heart::Blank && self.is_isotope()
    }

    /// A pack: the block isotope produced by multi-return operations.
    pub fn is_pack(&self) -> bool {
        self.heart == Heart::Block && self.is_isotope()
    }

    /// Isotopes that no plain read or array slot may observe. The null
    /// isotope is stable (ordinary reads see it); packs, voids, errors,
    /// and the unset state are not.
    pub fn is_unstable_isotope(&self) -> bool {
        self.is_isotope() && !matches!(self.heart, Heart::Null | Heart::Logic)
    }

    pub fn word_symbol(&self) -> SymbolId {
        match self.payload {
            Payload::Word(sym) => sym,
            _ => unreachable!("word payload expected for {:?}", self.heart),
        }
    }

    pub fn series_id(&self) -> SeriesId {
        match self.payload {
            Payload::Series { id, .. } => id,
            Payload::Context(id) | Payload::Action(id) => id,
            _ => unreachable!("series payload expected for {:?}", self.heart),
        }
    }

    pub fn series_index(&self) -> u32 {
        match self.payload {
            Payload::Series { index, .. } => index,
            _ => 0,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(n) if self.quote == QuoteState::Plain(0) => Some(n),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.payload {
            Payload::Logic(b) if self.quote == QuoteState::Plain(0) => Some(b),
            _ => None,
        }
    }

    // --- quote transforms ---

    /// Adds one level of literal quoting. Errors on isotopes, which have
    /// no quoted form (use `meta` instead).
    pub fn quote_one(mut self) -> RunResult<Self> {
        self.quote = match self.quote {
            QuoteState::Isotope => {
                return Err(RunError::fail(ErrorKind::BadIsotope, "cannot quote an isotope (use meta)"));
            }
            QuoteState::Plain(n) => QuoteState::Plain(n + 1),
            QuoteState::Quasi(n) => QuoteState::Quasi(n + 1),
        };
        Ok(self)
    }

    /// Removes one level of literal quoting.
    pub fn unquote_one(mut self) -> RunResult<Self> {
        self.quote = match self.quote {
            QuoteState::Plain(n) if n > 0 => QuoteState::Plain(n - 1),
            QuoteState::Quasi(n) if n > 0 => QuoteState::Quasi(n - 1),
            _ => return Err(RunError::fail(ErrorKind::BadIsotope, "value is not quoted")),
        };
        Ok(self)
    }

    /// Turns an unquoted value into its isotope (pack construction).
    #[must_use]
    pub fn make_isotope(mut self) -> Self {
        debug_assert_eq!(self.quote, QuoteState::Plain(0));
        self.quote = QuoteState::Isotope;
        self
    }

    /// Evaluates a quasiform: the result is the corresponding isotope,
    /// flagged as having come directly from a quasiform so assignments
    /// can still accept it.
    #[must_use]
    pub fn evaluate_quasi(mut self) -> Self {
        debug_assert_eq!(self.quote, QuoteState::Quasi(0));
        self.quote = QuoteState::Isotope;
        self.flags |= CellFlags::FROM_QUASI;
        self
    }

    /// Reinterprets an unquoted value as its quasiform (the scanner's
    /// `~x~` shape).
    #[must_use]
    pub fn make_quasi(mut self) -> Self {
        debug_assert_eq!(self.quote, QuoteState::Plain(0));
        self.quote = QuoteState::Quasi(0);
        self
    }

    /// The meta transform: isotopes become quasiforms, everything else
    /// gains one quote level. Total over all cell states, and inverted
    /// exactly by [`Cell::unmeta`].
    #[must_use]
    pub fn meta(mut self) -> Self {
        self.quote = match self.quote {
            QuoteState::Isotope => QuoteState::Quasi(0),
            QuoteState::Plain(n) => QuoteState::Plain(n + 1),
            QuoteState::Quasi(n) => QuoteState::Quasi(n + 1),
        };
        self.flags &= !(CellFlags::STALE | CellFlags::FROM_QUASI | CellFlags::RAISED);
        self
    }

    /// The unmeta transform: quasiforms become isotopes, quoted values
    /// lose one level. Unquoted plain values have no unmeta.
    pub fn unmeta(mut self) -> RunResult<Self> {
        self.quote = match self.quote {
            QuoteState::Quasi(0) => QuoteState::Isotope,
            QuoteState::Plain(n) if n > 0 => QuoteState::Plain(n - 1),
            QuoteState::Quasi(n) => QuoteState::Quasi(n - 1),
            _ => {
                return Err(RunError::fail(
                    ErrorKind::BadIsotope,
                    "unmeta of an unquoted value has no meaning",
                ));
            }
        };
        Ok(self)
    }

    /// Marks the slot stale without disturbing its bits, so a vanishing
    /// step leaves the prior value observable as residue.
    pub fn mark_stale(&mut self) {
        self.flags |= CellFlags::STALE;
    }

    /// Truthiness for condition slots. Unset and void have none.
    pub fn is_truthy(&self) -> RunResult<bool> {
        if self.is_unset() || self.is_void() || self.is_stale() {
            return Err(RunError::fail(
                ErrorKind::BadCondition,
                "condition slot holds no value to test",
            ));
        }
        Ok(match (self.heart, &self.payload) {
            (Heart::Logic, Payload::Logic(b)) => *b,
            (Heart::Null, _) => false,
            (Heart::Blank, _) => false,
            _ => true,
        })
    }
}

/// Decays an evaluation product into a value fit for variable storage.
///
/// Packs decay to their (recursively decayed) first slot, the logic-word
/// quasiform products decay to logic, and other isotopes store as-is.
/// The heap is needed to read pack slots.
pub(crate) fn decay<T: ResourceTracker>(heap: &Heap<T>, cell: Cell) -> RunResult<Cell> {
    if !cell.is_isotope() {
        return Ok(cell);
    }
    match cell.heart() {
        Heart::Word => {
            // the quasi logic/null words decay to their primitive values
            let sym = cell.word_symbol();
            if sym == KnownSymbol::True.id() {
                Ok(Cell::logic(true))
            } else if sym == KnownSymbol::False.id() {
                Ok(Cell::logic(false))
            } else if sym == KnownSymbol::Null.id() {
                Ok(Cell::null())
            } else {
                Ok(cell)
            }
        }
        Heart::Block => {
            // pack: first slot, unmeta'd, then decayed again
            let id = cell.series_id();
            let SeriesData::Array(items) = &heap.get(id).data else {
                return Err(RunError::fail(ErrorKind::Internal, "pack payload is not an array"));
            };
            let Some(first) = items.first() else {
                return Err(RunError::fail(ErrorKind::NeedsValue, "empty pack has no primary value"));
            };
            let first = first.clone().unmeta()?;
            decay(heap, first)
        }
        Heart::Error => Err(RunError::fail(
            ErrorKind::BadIsotope,
            "error isotope must be trapped, not stored",
        )),
        _ => Ok(cell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_unmeta_round_trips() {
        let cases = [
            Cell::integer(42),
            Cell::null(),
            Cell::void(),
            Cell::unset(),
            Cell::logic(true).quote_one().unwrap(),
        ];
        for cell in cases {
            let back = cell.clone().meta().unmeta().unwrap();
            assert_eq!(back.quote(), cell.quote());
            assert_eq!(back.heart(), cell.heart());
        }
    }

    #[test]
    fn quote_unquote_round_trips() {
        let cell = Cell::integer(7).quote_one().unwrap();
        assert!(cell.quote().is_quoted());
        let back = cell.unquote_one().unwrap();
        assert_eq!(back.as_integer(), Some(7));
    }

    #[test]
    fn isotope_has_no_quoted_form() {
        assert!(Cell::unset().quote_one().is_err());
    }

    #[test]
    fn truthiness() {
        assert!(Cell::integer(0).is_truthy().unwrap());
        assert!(!Cell::logic(false).is_truthy().unwrap());
        assert!(!Cell::null().is_truthy().unwrap());
        assert!(!Cell::blank().is_truthy().unwrap());
        assert!(Cell::unset().is_truthy().is_err());
    }

    #[test]
    fn stale_marking_preserves_bits() {
        let mut cell = Cell::integer(3);
        cell.mark_stale();
        assert!(cell.is_stale());
        assert_eq!(cell.payload(), &Payload::Integer(3));
    }
}
