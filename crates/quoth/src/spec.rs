//! The action spec compiler: parses a spec block into a parameter list
//! and a meta record.
//!
//! The spec dialect, in evaluation order:
//!
//! * leading text is the action's description; text after a parameter
//!   attaches to that parameter as its note
//! * `<local>` and `<with>` switch the role of subsequent words
//! * a path with a blank head (`/name`) declares a refinement; a type
//!   block directly after it makes the refinement carry an argument
//! * plain, get-, meta-, quoted, and the-words declare arguments of the
//!   corresponding class
//! * `return:` declares the definitional RETURN with an optional typeset
//!   and note
//! * a block constrains the immediately preceding parameter's types

use crate::{
    action::{ActionMeta, Param, ParamClass, ParamFlags, TypeCheck, TypeSet},
    cell::{Heart, QuoteState},
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, SeriesId},
    intern::{KnownSymbol, SymbolId, SymbolTable},
    resource::ResourceTracker,
};

/// Output of spec compilation.
#[derive(Debug)]
pub(crate) struct CompiledSpec {
    pub params: Vec<Param>,
    pub meta: ActionMeta,
    /// Whether the spec declared `return:`; when true the parameter list
    /// begins with the synthesized Return slot.
    pub has_return: bool,
}

enum Role {
    Argument,
    Local,
    With,
}

/// Compiles a spec block into parameters and meta.
pub(crate) fn compile_spec<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    spec: SeriesId,
) -> RunResult<CompiledSpec> {
    let items = heap.array(spec);
    let mut params: Vec<Param> = Vec::new();
    let mut meta = ActionMeta::default();
    let mut has_return = false;
    let mut role = Role::Argument;
    // index into `params` of the most recent declaration, for attaching
    // notes and type blocks
    let mut last_declared: Option<usize> = None;

    for cell in items {
        match (cell.heart(), cell.quote()) {
            (Heart::Text, QuoteState::Plain(0)) => {
                let text = heap.text(cell.series_id()).to_owned();
                match last_declared {
                    None if meta.description.is_none() && !has_return => meta.description = Some(text),
                    None => meta.return_note = Some(text),
                    Some(ix) => meta.notes.push((params[ix].name, text)),
                }
            }
            (Heart::Tag, QuoteState::Plain(0)) => {
                let sym = cell.word_symbol();
                if sym == KnownSymbol::Local.id() {
                    role = Role::Local;
                } else if sym == KnownSymbol::With.id() {
                    role = Role::With;
                } else if sym == KnownSymbol::None.id() || sym == KnownSymbol::Void.id() {
                    // return-convention markers; recorded, not parameters
                    meta.return_types.clear();
                    meta.return_types.push(TypeCheck::Exact(Heart::Blank));
                } else {
                    return Err(bad_spec(symbols, "unrecognized spec tag", Some(sym)));
                }
                last_declared = None;
            }
            (Heart::Path, QuoteState::Plain(0)) => {
                let segments = heap.array(cell.series_id());
                let [head, name_cell] = segments else {
                    return Err(bad_spec(symbols, "refinement path must be /name", None));
                };
                if head.heart() != Heart::Blank || !name_cell.heart().is_word() {
                    return Err(bad_spec(symbols, "refinement path must be /name", None));
                }
                let name = name_cell.word_symbol();
                check_duplicate(&params, name, symbols)?;
                params.push(Param::new(name, ParamClass::Refinement));
                last_declared = Some(params.len() - 1);
            }
            (Heart::SetWord, QuoteState::Plain(0)) => {
                if cell.word_symbol() != KnownSymbol::Return.id() {
                    return Err(bad_spec(symbols, "only return: may be declared with a set-word", None));
                }
                if has_return {
                    return Err(bad_spec(symbols, "duplicate return: declaration", None));
                }
                has_return = true;
                last_declared = None;
            }
            (heart, quote) if heart.is_word() => {
                let name = cell.word_symbol();
                let class = match role {
                    Role::With => {
                        last_declared = None;
                        continue;
                    }
                    Role::Local => ParamClass::Local,
                    Role::Argument => match (heart, quote) {
                        (Heart::Word, QuoteState::Plain(0)) => ParamClass::Normal,
                        (Heart::Word, QuoteState::Plain(1)) => ParamClass::Hard,
                        (Heart::GetWord, QuoteState::Plain(0)) => ParamClass::Soft,
                        (Heart::GetWord, QuoteState::Plain(1)) => ParamClass::Medium,
                        (Heart::MetaWord, QuoteState::Plain(0)) => ParamClass::Meta,
                        (Heart::TheWord, QuoteState::Plain(0)) => ParamClass::Output,
                        _ => return Err(bad_spec(symbols, "unrecognized parameter form", Some(name))),
                    },
                };
                check_duplicate(&params, name, symbols)?;
                params.push(Param::new(name, class));
                last_declared = Some(params.len() - 1);
            }
            (Heart::Block, QuoteState::Plain(0)) => {
                let types = compile_typeset(heap, symbols, cell.series_id())?;
                match last_declared {
                    Some(ix) => {
                        params[ix].types = types.0;
                        params[ix].flags |= types.1;
                    }
                    None if has_return => meta.return_types = types.0,
                    None => return Err(bad_spec(symbols, "type block with no preceding parameter", None)),
                }
            }
            _ => return Err(bad_spec(symbols, "unrecognized spec item", None)),
        }
    }

    if has_return {
        check_duplicate(&params, KnownSymbol::Return.id(), symbols)?;
        params.insert(0, Param::new(KnownSymbol::Return.id(), ParamClass::Return));
    }

    Ok(CompiledSpec {
        params,
        meta,
        has_return,
    })
}

/// Parses a typeset block: type words plus attribute tags.
fn compile_typeset<T: ResourceTracker>(
    heap: &Heap<T>,
    symbols: &SymbolTable,
    block: SeriesId,
) -> RunResult<(TypeSet, ParamFlags)> {
    let mut types = TypeSet::new();
    let mut flags = ParamFlags::empty();
    for cell in heap.array(block) {
        match cell.heart() {
            Heart::Tag => {
                let sym = cell.word_symbol();
                if sym == KnownSymbol::Opt.id() {
                    flags |= ParamFlags::OPT;
                } else if sym == KnownSymbol::End.id() {
                    flags |= ParamFlags::END;
                } else if sym == KnownSymbol::Void.id() {
                    flags |= ParamFlags::VOID_OK;
                } else if sym == KnownSymbol::Skip.id() {
                    flags |= ParamFlags::SKIP;
                } else if sym == KnownSymbol::Variadic.id() {
                    flags |= ParamFlags::VARIADIC;
                } else {
                    return Err(bad_spec(symbols, "unrecognized parameter attribute", Some(sym)));
                }
            }
            Heart::Word => {
                types.push(parse_type_word(symbols, cell.word_symbol())?);
            }
            _ => return Err(bad_spec(symbols, "typeset items must be type words or attribute tags", None)),
        }
    }
    Ok((types, flags))
}

/// Maps a `type!` word to a type check.
fn parse_type_word(symbols: &SymbolTable, sym: SymbolId) -> RunResult<TypeCheck> {
    let spelling = symbols.resolve(sym);
    let Some(name) = spelling.strip_suffix('!') else {
        return Err(bad_spec(symbols, "type words end in !", Some(sym)));
    };
    Ok(match name {
        "any-value" => TypeCheck::AnyValue,
        "any-word" => TypeCheck::AnyWord,
        "any-array" => TypeCheck::AnyArray,
        "any-series" => TypeCheck::AnySeries,
        "any-context" => TypeCheck::AnyContext,
        _ => match name.parse::<Heart>() {
            Ok(heart) => TypeCheck::Exact(heart),
            Err(_) => return Err(bad_spec(symbols, "unknown type word", Some(sym))),
        },
    })
}

fn check_duplicate(params: &[Param], name: SymbolId, symbols: &SymbolTable) -> RunResult<()> {
    if params.iter().any(|p| p.name == name) {
        return Err(RunError::fail(
            ErrorKind::DuplicateParameter,
            format!("parameter declared twice: {}", symbols.resolve(name)),
        ));
    }
    Ok(())
}

fn bad_spec(symbols: &SymbolTable, message: &str, sym: Option<SymbolId>) -> RunError {
    match sym {
        Some(sym) => RunError::fail(
            ErrorKind::BadSpec,
            format!("{message}: {}", symbols.resolve(sym)),
        ),
        None => RunError::fail(ErrorKind::BadSpec, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::NoLimitTracker, scan::scan_block};

    fn compile(src: &str) -> RunResult<CompiledSpec> {
        let mut heap = Heap::new(NoLimitTracker);
        let mut symbols = SymbolTable::new();
        let spec = scan_block(&mut heap, &mut symbols, src).unwrap();
        compile_spec(&heap, &symbols, spec)
    }

    #[test]
    fn classes_from_word_forms() {
        let spec = compile("a 'b :c ^d @e").unwrap();
        let classes: Vec<_> = spec.params.iter().map(|p| p.class).collect();
        assert_eq!(
            classes,
            vec![
                ParamClass::Normal,
                ParamClass::Hard,
                ParamClass::Soft,
                ParamClass::Meta,
                ParamClass::Output,
            ]
        );
    }

    #[test]
    fn return_slot_goes_first() {
        let spec = compile("x [integer!] return: [integer!]").unwrap();
        assert!(spec.has_return);
        assert_eq!(spec.params[0].class, ParamClass::Return);
        assert_eq!(spec.params[1].class, ParamClass::Normal);
        assert_eq!(spec.meta.return_types.len(), 1);
    }

    #[test]
    fn refinement_with_argument_types() {
        let spec = compile("value /name [word!]").unwrap();
        assert_eq!(spec.params[1].class, ParamClass::Refinement);
        assert_eq!(spec.params[1].types.len(), 1);
    }

    #[test]
    fn duplicate_parameter_detected() {
        let err = compile("x x").unwrap_err();
        assert_eq!(err.into_error().kind, ErrorKind::DuplicateParameter);
    }

    #[test]
    fn locals_after_local_tag() {
        let spec = compile("a <local> b c").unwrap();
        assert_eq!(spec.params[1].class, ParamClass::Local);
        assert_eq!(spec.params[2].class, ParamClass::Local);
    }

    #[test]
    fn description_and_notes() {
        let spec = compile(r#""sums things" a [integer!] "the addend""#).unwrap();
        assert_eq!(spec.meta.description.as_deref(), Some("sums things"));
        assert_eq!(spec.meta.notes.len(), 1);
    }

    #[test]
    fn attributes_set_flags() {
        let spec = compile("x [<opt> <end> integer!]").unwrap();
        assert!(spec.params[0].flags.contains(ParamFlags::OPT));
        assert!(spec.params[0].flags.contains(ParamFlags::END));
    }
}
