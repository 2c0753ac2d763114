//! Actions: callable values bundling a parameter list with a dispatcher.
//!
//! An action's *details* series carries everything the call protocol
//! needs: the compiled parameter list, scheduling flags (enfix, deferral,
//! and the cached first-parameter properties the evaluator's lookahead
//! consults), the dispatcher selector, and dispatcher-specific data (an
//! interpreted body, a specialization exemplar). Uniform dispatch — every
//! dispatcher maps a frame to a bounce status — is the only polymorphism;
//! natives, interpreted functions, specializations, and the synthesized
//! returner differ only in which dispatcher they carry.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::{
    cell::{Cell, Heart},
    heap::SeriesId,
    intern::SymbolId,
    natives::NativeId,
};

bitflags! {
    /// Action-level flags, cached at creation so the evaluator's one-cell
    /// lookahead never has to walk the parameter list.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ActionFlags: u8 {
        /// Takes its first argument from the left.
        const ENFIX = 1 << 0;
        /// When met while fulfilling an outer argument, runs after that
        /// argument completes rather than inline.
        const DEFERS_LOOKBACK = 1 << 1;
        /// Always waits for the current expression to finish.
        const POSTPONES_ENTIRELY = 1 << 2;
        /// First parameter is hard/soft-quoted; triggers the evaluator's
        /// left-quote lookahead.
        const QUOTES_FIRST = 1 << 3;
        /// First parameter may decline by type mismatch.
        const SKIPPABLE_FIRST = 1 << 4;
    }
}

/// How a parameter acquires its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamClass {
    /// Evaluate one expression.
    Normal,
    /// Evaluate one expression and meta the result.
    Meta,
    /// Copy the next feed cell verbatim.
    Hard,
    /// Copy verbatim unless the cell is an escapable get-form.
    Soft,
    /// Like soft, but also accepts one level of literal quoting.
    Medium,
    /// Filled by the definitional RETURN synthesized for the frame.
    Return,
    /// Multi-return slot, surfaced through packs.
    Output,
    /// Truthy if its path segment was supplied; may take an argument.
    Refinement,
    /// Frame-local variable, starts unset.
    Local,
}

impl ParamClass {
    /// Classes fulfilled by evaluating feed material.
    pub fn is_evaluative(self) -> bool {
        matches!(self, Self::Normal | Self::Meta)
    }

    /// Classes that consume a feed cell without full evaluation.
    pub fn is_quoting(self) -> bool {
        matches!(self, Self::Hard | Self::Soft | Self::Medium)
    }
}

bitflags! {
    /// Per-parameter attributes from the spec dialect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ParamFlags: u8 {
        /// `<opt>`: accepts null.
        const OPT = 1 << 0;
        /// `<end>`: tolerates end-of-feed (argument becomes null).
        const END = 1 << 1;
        /// `<void>`: accepts a vanished right-hand side.
        const VOID_OK = 1 << 2;
        /// `<skip>`: may decline by type mismatch without erroring.
        const SKIP = 1 << 3;
        /// `<variadic>`: gathers the rest of the feed.
        const VARIADIC = 1 << 4;
        /// Tolerates a raised error as its value (assignment-side and
        /// trapping constructs only).
        const RAISED_OK = 1 << 5;
    }
}

/// A single type constraint inside a parameter's typeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeCheck {
    Exact(Heart),
    AnyValue,
    AnyWord,
    AnyArray,
    AnySeries,
    AnyContext,
}

impl TypeCheck {
    pub fn accepts(self, heart: Heart) -> bool {
        match self {
            Self::Exact(h) => heart == h,
            Self::AnyValue => true,
            Self::AnyWord => heart.is_word(),
            Self::AnyArray => heart.is_array(),
            Self::AnySeries => heart.is_array() || matches!(heart, Heart::Text | Heart::Binary),
            Self::AnyContext => heart.is_context(),
        }
    }
}

pub(crate) type TypeSet = SmallVec<[TypeCheck; 2]>;

/// One compiled parameter.
#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: SymbolId,
    pub class: ParamClass,
    pub flags: ParamFlags,
    /// Empty means unconstrained.
    pub types: TypeSet,
}

impl Param {
    pub fn new(name: SymbolId, class: ParamClass) -> Self {
        Self {
            name,
            class,
            flags: ParamFlags::empty(),
            types: TypeSet::new(),
        }
    }

    /// Whether a fulfilled value satisfies this parameter's typeset.
    pub fn accepts(&self, cell: &Cell) -> bool {
        if cell.is_null() {
            return self.flags.contains(ParamFlags::OPT) || self.flags.contains(ParamFlags::END);
        }
        if self.types.is_empty() {
            return true;
        }
        // quoted and quasi values only match through any-value
        if cell.quote().is_quoted() || cell.is_quasiform() || cell.is_isotope() {
            return self.types.contains(&TypeCheck::AnyValue);
        }
        self.types.iter().any(|t| t.accepts(cell.heart()))
    }
}

/// Documentation gathered by the spec compiler.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActionMeta {
    pub description: Option<String>,
    /// Per-parameter notes, keyed by parameter name.
    pub notes: Vec<(SymbolId, String)>,
    pub return_types: TypeSet,
    pub return_note: Option<String>,
}

/// Dispatcher selector; the typed variants of dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatcher {
    /// A built-in, identified by its id in the native registry.
    Native(NativeId),
    /// Evaluates the body block in a frame context.
    Interpreted,
    /// The synthesized definitional RETURN: throws with its frame's
    /// identity as the label.
    Returner,
    /// A host-registered function, identified by its registration slot.
    Host(u32),
}

/// Details payload of an action series.
#[derive(Debug)]
pub(crate) struct ActionDetails {
    /// Label for error messages and throw identification.
    pub name: Option<SymbolId>,
    pub params: Vec<Param>,
    pub dispatcher: Dispatcher,
    pub flags: ActionFlags,
    /// Interpreted body block, where applicable.
    pub body: Option<SeriesId>,
    /// Specialization exemplar frame, where applicable.
    pub exemplar: Option<SeriesId>,
    /// For `Returner` and specializations: the series they refer back to
    /// (the frame context to unwind to, or the specialized action).
    pub target: Option<SeriesId>,
    pub meta: Option<Box<ActionMeta>>,
}

impl ActionDetails {
    pub fn new(name: Option<SymbolId>, params: Vec<Param>, dispatcher: Dispatcher) -> Self {
        Self {
            name,
            params,
            dispatcher,
            flags: ActionFlags::empty(),
            body: None,
            exemplar: None,
            target: None,
            meta: None,
        }
    }

    /// Caches the first-parameter properties the evaluator's lookahead
    /// consults. Call after the parameter list is final.
    #[must_use]
    pub fn finalize(mut self) -> Self {
        if let Some(first) = self.first_interesting_param() {
            let is_quoting = first.class.is_quoting();
            let is_skip = first.flags.contains(ParamFlags::SKIP);
            if is_quoting {
                self.flags |= ActionFlags::QUOTES_FIRST;
            }
            if is_skip {
                self.flags |= ActionFlags::SKIPPABLE_FIRST;
            }
        }
        self
    }

    /// The first parameter that consumes call-site material.
    pub fn first_interesting_param(&self) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.class.is_evaluative() || p.class.is_quoting())
    }

    /// Index of the first parameter that consumes call-site material.
    pub fn first_interesting_index(&self) -> Option<usize> {
        self.params
            .iter()
            .position(|p| p.class.is_evaluative() || p.class.is_quoting())
    }

    pub fn is_enfix(&self) -> bool {
        self.flags.contains(ActionFlags::ENFIX)
    }

    /// Rough byte estimate for resource tracking.
    pub fn estimate_size(&self) -> usize {
        128 + self.params.len() * size_of::<Param>()
    }

    /// GC edges out of the details.
    pub fn push_edges(&self, work: &mut Vec<SeriesId>) {
        if let Some(body) = self.body {
            work.push(body);
        }
        if let Some(exemplar) = self.exemplar {
            work.push(exemplar);
        }
        if let Some(target) = self.target {
            work.push(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::SymbolTable;

    #[test]
    fn finalize_caches_quoting_first() {
        let mut symbols = SymbolTable::new();
        let value = symbols.intern("value");
        let params = vec![Param::new(value, ParamClass::Hard)];
        let details = ActionDetails::new(None, params, Dispatcher::Interpreted).finalize();
        assert!(details.flags.contains(ActionFlags::QUOTES_FIRST));
        assert!(!details.flags.contains(ActionFlags::SKIPPABLE_FIRST));
    }

    #[test]
    fn typeset_acceptance() {
        let mut symbols = SymbolTable::new();
        let mut param = Param::new(symbols.intern("n"), ParamClass::Normal);
        param.types.push(TypeCheck::Exact(Heart::Integer));
        assert!(param.accepts(&Cell::integer(1)));
        assert!(!param.accepts(&Cell::logic(true)));
        // null only passes with <opt>
        assert!(!param.accepts(&Cell::null()));
        param.flags |= ParamFlags::OPT;
        assert!(param.accepts(&Cell::null()));
    }
}
