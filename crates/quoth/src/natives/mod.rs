//! The native action library.
//!
//! Each native is declared with a spec written in the language itself
//! (compiled by the spec compiler at install time) plus scheduling flags.
//! Dispatch is a match over [`NativeId`]; a native's handler has the
//! same contract as any executor and may push continuations using
//! states from [`ST_NATIVE`] up.

mod control;
mod function;
mod math;
mod meta;
mod series;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    action::{ActionDetails, ActionFlags, Dispatcher},
    cell::Cell,
    context::BindMode,
    error::RunResult,
    frame::{Dest, FrameFlags},
    heap::{Heap, SeriesId},
    intern::SymbolTable,
    resource::ResourceTracker,
    scan::scan_block,
    spec::compile_spec,
    tracer::EvalTracer,
    trampoline::{Bounce, Machine},
};

/// First state byte available to native dispatcher continuations.
pub(crate) const ST_NATIVE: u8 = 120;

/// Identity of a built-in dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub(crate) enum NativeId {
    If,
    Either,
    Else,
    Then,
    Also,
    All,
    Any,
    While,
    Catch,
    Throw,
    Do,
    Reduce,
    Comment,
    Elide,
    Pack,
    Fail,
    Raise,
    Try,
    Rescue,
    The,
    Quote,
    Unquote,
    Meta,
    Unmeta,
    Get,
    Set,
    TypeOf,
    Mold,
    Func,
    Lambda,
    Does,
    Specialize,
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Equal,
    NotEqual,
    Lesser,
    Greater,
    LesserEqual,
    GreaterEqual,
    First,
    LengthOf,
    Append,
    Pick,
    Poke,
    Freeze,
    CopyOf,
}

struct Registration {
    name: &'static str,
    id: NativeId,
    spec: &'static str,
    flags: ActionFlags,
}

const ENFIX: ActionFlags = ActionFlags::ENFIX;
const DEFER: ActionFlags = ActionFlags::DEFERS_LOOKBACK.union(ActionFlags::ENFIX);

/// The registry: name, id, spec source, flags.
fn registrations() -> Vec<Registration> {
    let reg = |name, id, spec, flags| Registration { name, id, spec, flags };
    let none = ActionFlags::empty();
    vec![
        reg("if", NativeId::If, "\"run a branch when the condition is truthy\" condition [any-value!] branch [block!]", none),
        reg("either", NativeId::Either, "condition [any-value!] true-branch [block!] false-branch [block!]", none),
        reg("else", NativeId::Else, "\"run the branch when the left side was null or void\" ^optional [<opt> <void> <end> any-value!] branch [block!]", DEFER),
        reg("then", NativeId::Then, "^optional [<opt> <void> <end> any-value!] branch [block!]", DEFER),
        reg("also", NativeId::Also, "^optional [<opt> <void> <end> any-value!] branch [block!]", DEFER),
        reg("all", NativeId::All, "\"evaluate steps, stopping at the first falsey one\" block [block!]", none),
        reg("any", NativeId::Any, "\"evaluate steps, stopping at the first truthy one\" block [block!]", none),
        reg("while", NativeId::While, "condition [block!] body [block!]", none),
        reg("catch", NativeId::Catch, "\"intercept a throw from the block\" block [block!] /name [word!]", none),
        reg("throw", NativeId::Throw, "value [<opt> any-value!] /name [word!]", none),
        reg("do", NativeId::Do, "source [block! text!]", none),
        reg("reduce", NativeId::Reduce, "value [block!]", none),
        reg("comment", NativeId::Comment, "\"vanish, leaving the prior step's value visible\" 'discarded [block! text! integer! decimal! word!]", none),
        reg("elide", NativeId::Elide, "^discarded [<opt> <void> any-value!]", none),
        reg("pack", NativeId::Pack, "\"bundle values for multi-return destructuring\" values [block!]", none),
        reg("fail", NativeId::Fail, "reason [text! error!]", none),
        reg("raise", NativeId::Raise, "\"produce a raised error for local trapping\" reason [text! error!]", none),
        reg("try", NativeId::Try, "^optional [<opt> <void> any-value!]", none),
        reg("rescue", NativeId::Rescue, "\"trap an abrupt failure from the block\" block [block!]", none),
        reg("the", NativeId::The, "'value [any-value!]", none),
        reg("quote", NativeId::Quote, "value [any-value!]", none),
        reg("unquote", NativeId::Unquote, "value [any-value!]", none),
        reg("meta", NativeId::Meta, "^value [<opt> <void> any-value!]", none),
        reg("unmeta", NativeId::Unmeta, "value [any-value!]", none),
        reg("get", NativeId::Get, "target [word! tuple!] /any", none),
        reg("set", NativeId::Set, "target [word!] value [<opt> any-value!]", none),
        reg("type-of", NativeId::TypeOf, "value [<opt> any-value!]", none),
        reg("mold", NativeId::Mold, "value [any-value!]", none),
        reg("func", NativeId::Func, "\"make an action from a spec block and a body block\" spec [block!] body [block!]", none),
        reg("->", NativeId::Lambda, "'params [word! block!] body [block!]", ENFIX),
        reg("does", NativeId::Does, "body [block!]", none),
        reg("specialize", NativeId::Specialize, "action [action!] values [block!]", none),
        reg("add", NativeId::Add, "value1 [integer! decimal!] value2 [integer! decimal!]", none),
        reg("+", NativeId::Add, "value1 [integer! decimal!] value2 [integer! decimal!]", ENFIX),
        reg("subtract", NativeId::Subtract, "value1 [integer! decimal!] value2 [integer! decimal!]", none),
        reg("-", NativeId::Subtract, "value1 [integer! decimal!] value2 [integer! decimal!]", ENFIX),
        reg("multiply", NativeId::Multiply, "value1 [integer! decimal!] value2 [integer! decimal!]", none),
        reg("*", NativeId::Multiply, "value1 [integer! decimal!] value2 [integer! decimal!]", ENFIX),
        reg("divide", NativeId::Divide, "value1 [integer! decimal!] value2 [integer! decimal!]", none),
        reg("/", NativeId::Divide, "value1 [integer! decimal!] value2 [integer! decimal!]", ENFIX),
        reg("negate", NativeId::Negate, "value [integer! decimal!]", none),
        reg("equal?", NativeId::Equal, "value1 [<opt> any-value!] value2 [<opt> any-value!]", none),
        reg("=", NativeId::Equal, "value1 [<opt> any-value!] value2 [<opt> any-value!]", ENFIX),
        reg("<>", NativeId::NotEqual, "value1 [<opt> any-value!] value2 [<opt> any-value!]", ENFIX),
        reg("<", NativeId::Lesser, "value1 [integer! decimal! text!] value2 [integer! decimal! text!]", ENFIX),
        reg(">", NativeId::Greater, "value1 [integer! decimal! text!] value2 [integer! decimal! text!]", ENFIX),
        reg("<=", NativeId::LesserEqual, "value1 [integer! decimal! text!] value2 [integer! decimal! text!]", ENFIX),
        reg(">=", NativeId::GreaterEqual, "value1 [integer! decimal! text!] value2 [integer! decimal! text!]", ENFIX),
        reg("first", NativeId::First, "series [any-array! text!]", none),
        reg("length-of", NativeId::LengthOf, "series [any-array! text! binary!]", none),
        reg("append", NativeId::Append, "series [any-array!] value [any-value!]", none),
        reg("pick", NativeId::Pick, "series [any-array! any-context!] index [integer! word!]", none),
        reg("poke", NativeId::Poke, "series [any-array!] index [integer!] value [any-value!]", none),
        reg("freeze", NativeId::Freeze, "value [any-array! any-context!]", none),
        reg("copy", NativeId::CopyOf, "value [any-array! text!] /deep", none),
    ]
}

/// Compiles every native spec and defines the words in the lib module,
/// along with the few non-action constants (`true`, `false`, `null`).
pub(crate) fn install<T: ResourceTracker>(
    heap: &mut Heap<T>,
    symbols: &mut SymbolTable,
    lib: SeriesId,
) -> RunResult<()> {
    for registration in registrations() {
        let spec_array = scan_block(heap, symbols, registration.spec)?;
        let compiled = compile_spec(heap, symbols, spec_array)?;
        let name = symbols.intern(registration.name);
        let mut details = ActionDetails::new(Some(name), compiled.params, Dispatcher::Native(registration.id));
        details.flags |= registration.flags;
        details.meta = Some(Box::new(compiled.meta));
        let details_id = heap.alloc_details(details.finalize())?;
        heap.context_mut(lib)?.append(name, Cell::action(details_id));
    }

    let lib_ctx = heap.context_mut(lib)?;
    lib_ctx.append(symbols.intern("true"), Cell::logic(true));
    lib_ctx.append(symbols.intern("false"), Cell::logic(false));
    lib_ctx.append(symbols.intern("null"), Cell::null());
    Ok(())
}

/// Routes an action frame to its native handler.
pub(crate) fn dispatch<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    id: NativeId,
) -> RunResult<Bounce> {
    match id {
        NativeId::If => control::r#if(m, fx),
        NativeId::Either => control::either(m, fx),
        NativeId::Else => control::r#else(m, fx),
        NativeId::Then => control::then(m, fx),
        NativeId::Also => control::also(m, fx),
        NativeId::All => control::all(m, fx),
        NativeId::Any => control::any(m, fx),
        NativeId::While => control::r#while(m, fx),
        NativeId::Catch => control::catch(m, fx),
        NativeId::Throw => control::throw(m, fx),
        NativeId::Do => control::r#do(m, fx),
        NativeId::Reduce => control::reduce(m, fx),
        NativeId::Comment => control::comment(m, fx),
        NativeId::Elide => control::comment(m, fx),
        NativeId::Pack => control::pack(m, fx),
        NativeId::Fail => control::fail(m, fx),
        NativeId::Raise => control::raise(m, fx),
        NativeId::Try => control::r#try(m, fx),
        NativeId::Rescue => control::rescue(m, fx),
        NativeId::The => meta::the(m, fx),
        NativeId::Quote => meta::quote(m, fx),
        NativeId::Unquote => meta::unquote(m, fx),
        NativeId::Meta => meta::meta(m, fx),
        NativeId::Unmeta => meta::unmeta(m, fx),
        NativeId::Get => meta::get(m, fx),
        NativeId::Set => meta::set(m, fx),
        NativeId::TypeOf => meta::type_of(m, fx),
        NativeId::Mold => meta::mold(m, fx),
        NativeId::Func => function::func(m, fx),
        NativeId::Lambda => function::lambda(m, fx),
        NativeId::Does => function::does(m, fx),
        NativeId::Specialize => function::specialize(m, fx),
        NativeId::Add
        | NativeId::Subtract
        | NativeId::Multiply
        | NativeId::Divide
        | NativeId::Negate => math::arith(m, fx, id),
        NativeId::Equal
        | NativeId::NotEqual
        | NativeId::Lesser
        | NativeId::Greater
        | NativeId::LesserEqual
        | NativeId::GreaterEqual => math::compare(m, fx, id),
        NativeId::First => series::first(m, fx),
        NativeId::LengthOf => series::length_of(m, fx),
        NativeId::Append => series::append(m, fx),
        NativeId::Pick => series::pick(m, fx),
        NativeId::Poke => series::poke(m, fx),
        NativeId::Freeze => series::freeze(m, fx),
        NativeId::CopyOf => series::copy(m, fx),
    }
}

// --- shared handler helpers ------------------------------------------------

/// Borrows an argument slot.
pub(crate) fn arg<'m, T: ResourceTracker, Tr: EvalTracer>(
    m: &'m Machine<'_, T, Tr>,
    fx: usize,
    ix: usize,
) -> &'m Cell {
    &m.frames[fx].action_state().args[ix]
}

/// Clones an argument slot.
pub(crate) fn arg_cloned<T: ResourceTracker, Tr: EvalTracer>(
    m: &Machine<'_, T, Tr>,
    fx: usize,
    ix: usize,
) -> Cell {
    m.frames[fx].action_state().args[ix].clone()
}

/// Completes by delegating to a stepper over a branch block; the
/// branch's result becomes this frame's result without re-entry.
pub(crate) fn delegate_block<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    fx: usize,
    block: &Cell,
) -> RunResult<Bounce> {
    m.frames[fx].flags |= FrameFlags::DELEGATED;
    m.push_stepper_over(block.series_id(), Dest::Out, FrameFlags::empty())?;
    Ok(Bounce::Delegate)
}

/// Rebinds a body block to run against the user module (for `do` of
/// freshly scanned text).
pub(crate) fn attach_to_user<T: ResourceTracker, Tr: EvalTracer>(
    m: &mut Machine<'_, T, Tr>,
    array: SeriesId,
) -> RunResult<()> {
    let user = m.user;
    crate::context::bind_array_deep(m.heap, array, user, BindMode::Attach)
}
