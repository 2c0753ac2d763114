//! Single-stepping semantics: left-to-right enfix, vanishing
//! expressions, quoting transforms, and the word forms.

use pretty_assertions::assert_eq;
use quoth::{Datum, Engine, ErrorKind, Outcome};

fn eval(src: &str) -> Datum {
    let mut engine = Engine::new();
    match engine.run(src).unwrap() {
        Outcome::Value(datum) => datum,
        other => panic!("expected a value for {src:?}, got {other:?}"),
    }
}

fn eval_outcome(src: &str) -> Outcome {
    Engine::new().run(src).unwrap()
}

fn eval_err(src: &str) -> ErrorKind {
    Engine::new().run(src).unwrap_err().kind
}

#[test]
fn enfix_is_left_to_right_with_no_precedence() {
    assert_eq!(eval("1 + 2 * 3"), Datum::Integer(9));
    assert_eq!(eval("10 - 4 - 3"), Datum::Integer(3));
    assert_eq!(eval("1 + 2 = 3"), Datum::Logic(true));
}

#[test]
fn prefix_arguments_are_greedy_but_enfix_rights_are_tight() {
    // the right of an enfix op takes exactly one expression
    assert_eq!(eval("10 * add 1 2"), Datum::Integer(30));
    // a prefix argument keeps consuming enfix
    assert_eq!(eval("add 1 2 + 3"), Datum::Integer(6));
}

#[test]
fn inert_values_evaluate_to_themselves() {
    assert_eq!(eval("10"), Datum::Integer(10));
    assert_eq!(eval("2.5"), Datum::Decimal(2.5));
    assert_eq!(eval("\"hi\""), Datum::Text("hi".to_owned()));
    assert_eq!(eval("_"), Datum::Blank);
    assert_eq!(eval("#tok"), Datum::Issue("tok".to_owned()));
    assert_eq!(
        eval("[a 1]"),
        Datum::Block(vec![Datum::Word("a".to_owned()), Datum::Integer(1)])
    );
}

#[test]
fn the_last_expression_wins() {
    assert_eq!(eval("1 2 3"), Datum::Integer(3));
}

#[test]
fn empty_source_and_groups_are_void() {
    assert!(matches!(eval_outcome(""), Outcome::Void));
    assert!(matches!(eval_outcome("()"), Outcome::Void));
    assert!(matches!(eval_outcome(r#"(comment "x")"#), Outcome::Void));
}

#[test]
fn vanishing_steps_preserve_the_prior_value() {
    assert_eq!(eval(r#"10 (comment "x")"#), Datum::Integer(10));
    assert_eq!(eval(r#"10 comment "x""#), Datum::Integer(10));
    assert_eq!(eval(r#"10 elide 1 + 2"#), Datum::Integer(10));
}

#[test]
fn groups_evaluate_their_contents() {
    assert_eq!(eval("(1 + 2) * 3"), Datum::Integer(9));
    assert_eq!(eval("1 + (2 * 3)"), Datum::Integer(7));
}

#[test]
fn comma_is_an_expression_barrier() {
    assert_eq!(eval("1, 2"), Datum::Integer(2));
    assert_eq!(eval_err("add 1, 2"), ErrorKind::MissingArgument);
}

#[test]
fn quote_laws() {
    assert_eq!(eval("'x"), Datum::Word("x".to_owned()));
    assert_eq!(eval("unquote quote 5"), Datum::Integer(5));
    assert_eq!(eval("unmeta meta 5"), Datum::Integer(5));
    // unmeta meta of a vanished expression round-trips to void
    assert!(matches!(
        eval_outcome(r#"unmeta meta (comment "x")"#),
        Outcome::Void
    ));
}

#[test]
fn quasiforms_evaluate_to_isotopes() {
    // storing the quasi logic words decays them to logic
    assert_eq!(eval("x: ~true~ x"), Datum::Logic(true));
    assert!(matches!(eval_outcome("x: ~null~ x"), Outcome::Null));
    // other word isotopes store as-is and fail plain reads
    assert_eq!(eval_err("x: ~weird~ x"), ErrorKind::BadIsotope);
}

#[test]
fn words_fetch_their_values() {
    assert_eq!(eval("x: 10 x + 1"), Datum::Integer(11));
    assert_eq!(eval("x: 1 x: x + 1 x"), Datum::Integer(2));
    assert_eq!(eval_err("definitely-not-defined"), ErrorKind::UnsetVariable);
}

#[test]
fn get_words_fetch_without_invoking() {
    let mut engine = Engine::new();
    engine.run("f: does [7]").unwrap();
    // plain word runs the action; get-word fetches it
    assert_eq!(engine.run("f").unwrap().value(), Some(Datum::Integer(7)));
    assert!(matches!(
        engine.run(":f").unwrap().value(),
        Some(Datum::Opaque(_))
    ));
}

#[test]
fn meta_words_quote_their_fetch() {
    assert_eq!(eval("x: 5 unquote ^x"), Datum::Integer(5));
    // meta of an unset variable is the quasi-blank
    assert_eq!(eval("^never-set"), Datum::Opaque("~".to_owned()));
}

#[test]
fn meta_group_quotes_the_result() {
    assert_eq!(eval("unquote ^(1 + 2)"), Datum::Integer(3));
    assert_eq!(eval(r#"^(comment "x")"#), Datum::Opaque("~void~".to_owned()));
}

#[test]
fn get_block_reduces() {
    assert_eq!(
        eval(":[1 + 2 3]"),
        Datum::Block(vec![Datum::Integer(3), Datum::Integer(3)])
    );
}

#[test]
fn meta_block_is_the_block_quoted_by_one() {
    assert_eq!(
        eval("unquote ^[a b]"),
        Datum::Block(vec![Datum::Word("a".to_owned()), Datum::Word("b".to_owned())])
    );
}

#[test]
fn tuples_pick_and_set_tuples_poke() {
    let mut engine = Engine::new();
    engine.run("b: [10 20 30]").unwrap();
    assert_eq!(engine.run("b.2").unwrap().value(), Some(Datum::Integer(20)));
    assert_eq!(engine.run("b.2: 99").unwrap().value(), Some(Datum::Integer(99)));
    assert_eq!(engine.run("b.2").unwrap().value(), Some(Datum::Integer(99)));
    // out-of-range pick is null
    assert!(matches!(engine.run("b.9").unwrap(), Outcome::Null));
}

#[test]
fn set_group_retargets_by_its_result() {
    assert_eq!(eval("('x): 5 x"), Datum::Integer(5));
    assert_eq!(eval_err("(1): 5"), ErrorKind::BadSetTarget);
}

#[test]
fn set_word_with_vanished_right_side_unsets() {
    let mut engine = Engine::new();
    assert!(matches!(engine.run(r#"x: comment "hi""#).unwrap(), Outcome::Void));
    assert_eq!(engine.run("x").unwrap_err().kind, ErrorKind::UnsetVariable);
    assert_eq!(engine.run("get/any 'x").unwrap().value(), Some(Datum::Unset));
}

#[test]
fn enfix_with_nothing_to_its_left_errors() {
    assert_eq!(eval_err("+ 1"), ErrorKind::NoLeftValue);
    assert_eq!(eval_err(r#"comment "x" + 1"#), ErrorKind::NoLeftValue);
}

#[test]
fn mold_renders_canonical_source() {
    assert_eq!(eval("mold [1 + 2]"), Datum::Text("[1 + 2]".to_owned()));
    assert_eq!(eval("mold 'x"), Datum::Text("x".to_owned()));
}

#[test]
fn type_of_names_the_heart() {
    assert_eq!(eval("type-of 10"), Datum::Word("integer!".to_owned()));
    assert_eq!(eval("type-of [a]"), Datum::Word("block!".to_owned()));
}
