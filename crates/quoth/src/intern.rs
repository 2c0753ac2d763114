//! Symbol interning for words, refinements, and context keys.
//!
//! Every word-like cell carries a `SymbolId` rather than string data, so
//! symbol comparison is a single integer compare and contexts can key their
//! variable slots on ids. The interner stores each unique spelling once and
//! is populated by the scanner, the spec compiler, and native registration.
//!
//! SymbolIds are laid out as follows:
//! * 0 to count(KnownSymbol) - symbols the core itself needs to recognize
//! * count(KnownSymbol)+ - symbols interned on demand

use ahash::AHashMap;
use strum::{EnumCount, FromRepr, IntoStaticStr};

/// Index into the symbol interner's storage.
///
/// Uses `u32` to keep cells small. Identity comparison is sufficient for
/// symbol equality; spellings are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Symbols the core compares against by identity.
///
/// These are interned first, in discriminant order, so that
/// `SymbolId(k as u32)` is the id of known symbol `k`. The string form of
/// each variant is its spelling in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u32)]
pub(crate) enum KnownSymbol {
    Return,
    Null,
    True,
    False,
    Halt,
    Void,
    None,
    Local,
    With,
    Opt,
    End,
    Skip,
    Variadic,
    Name,
    Any,
    Deep,
    Kind,
    Message,
    Near,
    Value,
}

impl KnownSymbol {
    /// The pre-interned id for this symbol.
    #[inline]
    pub fn id(self) -> SymbolId {
        SymbolId(self as u32)
    }
}

/// Interner mapping spellings to `SymbolId`s and back.
///
/// Owned by the engine; threaded by reference into the scanner, evaluator,
/// and molding code. Lookups during evaluation happen only for error
/// messages and mold output.
#[derive(Debug)]
pub(crate) struct SymbolTable {
    lookup: AHashMap<Box<str>, SymbolId>,
    spellings: Vec<Box<str>>,
}

impl SymbolTable {
    /// Creates a table with all `KnownSymbol` spellings pre-interned.
    pub fn new() -> Self {
        let mut table = Self {
            lookup: AHashMap::with_capacity(KnownSymbol::COUNT * 2),
            spellings: Vec::with_capacity(KnownSymbol::COUNT * 2),
        };
        for repr in 0..KnownSymbol::COUNT {
            let known = KnownSymbol::from_repr(repr as u32).expect("contiguous discriminants");
            let spelling: &'static str = known.into();
            let id = table.intern(spelling);
            debug_assert_eq!(id, known.id());
        }
        table
    }

    /// Interns a spelling, returning the existing id if already present.
    pub fn intern(&mut self, spelling: &str) -> SymbolId {
        if let Some(&id) = self.lookup.get(spelling) {
            return id;
        }
        let id = SymbolId(self.spellings.len() as u32);
        self.spellings.push(spelling.into());
        self.lookup.insert(spelling.into(), id);
        id
    }

    /// Returns the spelling for an id.
    ///
    /// # Panics
    /// Panics if the id did not come from this table; that is an internal
    /// invariant violation, not a user-reachable state.
    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.spellings[id.index()]
    }

    /// Looks up a spelling without interning it.
    pub fn find(&self, spelling: &str) -> Option<SymbolId> {
        self.lookup.get(spelling).copied()
    }

    /// Number of interned symbols (including the pre-interned set).
    pub fn len(&self) -> usize {
        self.spellings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbols_pre_interned() {
        let table = SymbolTable::new();
        assert_eq!(table.find("return"), Some(KnownSymbol::Return.id()));
        assert_eq!(table.find("variadic"), Some(KnownSymbol::Variadic.id()));
        assert_eq!(table.resolve(KnownSymbol::Null.id()), "null");
    }

    #[test]
    fn intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("frobnicate");
        let b = table.intern("frobnicate");
        assert_eq!(a, b);
        assert_ne!(a, table.intern("frobnicatex"));
        assert_eq!(table.resolve(a), "frobnicate");
    }
}
