//! Contexts: keyed collections of variable cells.
//!
//! Objects, modules, function frames, and errors all share this layout: an
//! insertion-ordered keylist of symbols paired with a varlist of cells,
//! distinguished by kind. Modules chain to an ancestor (user chains to
//! lib) so word lookup can fall through.
//!
//! Binding writes a context id into the binding slot of word cells inside
//! an array. Two modes exist: *overlay* rebinds only words whose symbol
//! the context actually has (used for function bodies), and *attach*
//! claims every unbound word for a module, so that a later set-word can
//! define it there.

use indexmap::IndexSet;

use crate::{
    cell::{Cell, Heart},
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, SeriesId},
    intern::{KnownSymbol, SymbolId},
    resource::ResourceTracker,
};

/// What a context stands for; affects lookup and lifetime, not layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextKind {
    Object,
    Module,
    Frame,
    Error,
}

type SymbolSet = IndexSet<SymbolId, ahash::RandomState>;

/// Keylist + varlist pair.
#[derive(Debug)]
pub(crate) struct ContextData {
    kind: ContextKind,
    /// Insertion-ordered symbol set; the position of a symbol is the
    /// index of its variable cell in `vars`.
    keys: SymbolSet,
    vars: Vec<Cell>,
    /// Lookup falls through to this context when a symbol is absent
    /// (user module -> lib).
    ancestor: Option<SeriesId>,
}

impl ContextData {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            keys: SymbolSet::default(),
            vars: Vec::new(),
            ancestor: None,
        }
    }

    pub fn with_ancestor(kind: ContextKind, ancestor: SeriesId) -> Self {
        Self {
            kind,
            keys: SymbolSet::default(),
            vars: Vec::new(),
            ancestor: Some(ancestor),
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn ancestor(&self) -> Option<SeriesId> {
        self.ancestor
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn vars(&self) -> &[Cell] {
        &self.vars
    }

    /// Slot index of a symbol, if present.
    pub fn find(&self, symbol: SymbolId) -> Option<usize> {
        self.keys.get_index_of(&symbol)
    }

    pub fn symbol_at(&self, index: usize) -> SymbolId {
        *self.keys.get_index(index).expect("keylist/varlist in sync")
    }

    pub fn get(&self, index: usize) -> &Cell {
        &self.vars[index]
    }

    pub fn set(&mut self, index: usize, value: Cell) {
        self.vars[index] = value;
    }

    /// Appends a new variable, returning its slot index. Appending an
    /// existing symbol instead overwrites that slot.
    pub fn append(&mut self, symbol: SymbolId, value: Cell) -> usize {
        let (index, fresh) = self.keys.insert_full(symbol);
        if fresh {
            self.vars.push(value);
        } else {
            self.vars[index] = value;
        }
        debug_assert_eq!(self.keys.len(), self.vars.len());
        index
    }

    /// Rough byte estimate for resource tracking.
    pub fn estimate_size(&self) -> usize {
        self.vars.len() * size_of::<Cell>() + self.keys.len() * size_of::<SymbolId>() * 2
    }
}

/// Result of resolving a word through its binding.
#[derive(Debug)]
pub(crate) enum Resolution {
    /// The slot holds this value.
    Value(Cell),
    /// The word is attached to a module but nothing defined it yet.
    Undefined,
}

/// Resolves a word cell through its binding, following module ancestry.
///
/// Errors on unbound words and tombstoned contexts; returns
/// [`Resolution::Undefined`] for attached-but-never-set module words so
/// set-word can define them.
pub(crate) fn resolve_word<T: ResourceTracker>(
    heap: &Heap<T>,
    symbol: SymbolId,
    binding: Option<SeriesId>,
) -> RunResult<Resolution> {
    let Some(mut ctx_id) = binding else {
        return Err(RunError::fail(ErrorKind::UnboundWord, "word has no binding"));
    };
    loop {
        let ctx = heap.context(ctx_id)?;
        if let Some(index) = ctx.find(symbol) {
            return Ok(Resolution::Value(ctx.get(index).clone()));
        }
        match ctx.ancestor() {
            Some(ancestor) => ctx_id = ancestor,
            None => return Ok(Resolution::Undefined),
        }
    }
}

/// Stores a value through a word's binding.
///
/// For module bindings an absent symbol is appended (this is how top-level
/// set-words define variables). For frames and objects the symbol must
/// already exist.
pub(crate) fn assign_word<T: ResourceTracker>(
    heap: &mut Heap<T>,
    symbol: SymbolId,
    binding: Option<SeriesId>,
    value: Cell,
) -> RunResult<()> {
    let Some(ctx_id) = binding else {
        return Err(RunError::fail(ErrorKind::UnboundWord, "word has no binding"));
    };
    // assignment never follows ancestry: defining in the attached module
    // shadows the ancestor rather than overwriting it
    let ctx = heap.context_mut(ctx_id)?;
    match ctx.find(symbol) {
        Some(index) => {
            ctx.set(index, value);
            Ok(())
        }
        None if ctx.kind() == ContextKind::Module => {
            ctx.append(symbol, value);
            Ok(())
        }
        None => Err(RunError::fail(
            ErrorKind::UnboundWord,
            "word's context has no such variable",
        )),
    }
}

/// Binding modes for [`bind_array_deep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindMode {
    /// Bind every word, defined in the context or not (modules).
    Attach,
    /// Bind only words whose symbol the context has (function bodies).
    Overlay,
}

/// Walks an array, binding word-family cells to a context.
///
/// Recurses into nested arrays. Runs on freshly scanned or freshly copied
/// arrays, so it writes cells directly without mutation checks.
pub(crate) fn bind_array_deep<T: ResourceTracker>(
    heap: &mut Heap<T>,
    array: SeriesId,
    ctx_id: SeriesId,
    mode: BindMode,
) -> RunResult<()> {
    // symbols the context knows, snapshotted to avoid aliasing the heap
    let len = heap.array(array).len();
    for i in 0..len {
        let cell = heap.array(array)[i].clone();
        if cell.heart().is_word() {
            let symbol = cell.word_symbol();
            let bind = match mode {
                BindMode::Attach => true,
                BindMode::Overlay => heap.context(ctx_id)?.find(symbol).is_some(),
            };
            if bind {
                let cells = heap.array_cells_mut(array)?;
                cells[i].set_binding(Some(ctx_id));
            }
        } else if cell.heart().is_array() {
            bind_array_deep(heap, cell.series_id(), ctx_id, mode)?;
        }
    }
    Ok(())
}

/// Builds an error context from a rendered error, reifying it as a value.
pub(crate) fn error_to_context<T: ResourceTracker>(
    heap: &mut Heap<T>,
    symbols: &mut crate::intern::SymbolTable,
    err: &crate::error::Error,
) -> RunResult<SeriesId> {
    let mut ctx = ContextData::new(ContextKind::Error);
    let kind_word = symbols.intern(err.kind.into());
    ctx.append(KnownSymbol::Kind.id(), Cell::word(Heart::Word, kind_word));
    let message_id = heap.alloc_text(err.message.clone())?;
    ctx.append(KnownSymbol::Message.id(), Cell::series(Heart::Text, message_id));
    if let Some(near) = &err.near {
        let near_id = heap.alloc_text(near.clone())?;
        ctx.append(KnownSymbol::Near.id(), Cell::series(Heart::Text, near_id));
    }
    heap.alloc_context(ctx)
}

/// Reads an error context back into a rendered error.
pub(crate) fn context_to_error<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &crate::intern::SymbolTable,
    ctx_id: SeriesId,
) -> crate::error::Error {
    let ctx = heap.context_raw(ctx_id);
    let kind = ctx
        .find(KnownSymbol::Kind.id())
        .map(|ix| ctx.get(ix))
        .filter(|cell| cell.heart().is_word())
        .and_then(|cell| symbols.resolve(cell.word_symbol()).parse().ok())
        .unwrap_or(ErrorKind::UserError);
    let message = ctx
        .find(KnownSymbol::Message.id())
        .map(|ix| ctx.get(ix))
        .filter(|cell| cell.heart() == Heart::Text)
        .map(|cell| heap.text(cell.series_id()).to_owned())
        .unwrap_or_default();
    let near = ctx
        .find(KnownSymbol::Near.id())
        .map(|ix| ctx.get(ix))
        .filter(|cell| cell.heart() == Heart::Text)
        .map(|cell| heap.text(cell.series_id()).to_owned());
    crate::error::Error { kind, message, near }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::SymbolTable, resource::NoLimitTracker};

    #[test]
    fn module_lookup_falls_through_to_ancestor() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");

        let mut lib = ContextData::new(ContextKind::Module);
        lib.append(x, Cell::integer(7));
        let lib_id = heap.alloc_context(lib).unwrap();
        let user = ContextData::with_ancestor(ContextKind::Module, lib_id);
        let user_id = heap.alloc_context(user).unwrap();

        match resolve_word(&heap, x, Some(user_id)).unwrap() {
            Resolution::Value(cell) => assert_eq!(cell.as_integer(), Some(7)),
            Resolution::Undefined => panic!("should fall through to lib"),
        }
    }

    #[test]
    fn assign_defines_in_module() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let y = symbols.intern("y");
        let user_id = heap.alloc_context(ContextData::new(ContextKind::Module)).unwrap();

        assign_word(&mut heap, y, Some(user_id), Cell::integer(3)).unwrap();
        match resolve_word(&heap, y, Some(user_id)).unwrap() {
            Resolution::Value(cell) => assert_eq!(cell.as_integer(), Some(3)),
            Resolution::Undefined => panic!("assignment should define"),
        }
    }

    #[test]
    fn tombstoned_context_raises() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let mut frame = ContextData::new(ContextKind::Frame);
        frame.append(x, Cell::integer(1));
        let id = heap.alloc_context(frame).unwrap();
        heap.tombstone(id);
        let err = resolve_word(&heap, x, Some(id)).unwrap_err();
        assert_eq!(err.into_error().kind, ErrorKind::InaccessibleContext);
    }
}
