//! Set-block destructuring over packs.

use pretty_assertions::assert_eq;
use quoth::{Datum, Engine, ErrorKind, Outcome};

fn eval(src: &str) -> Datum {
    let mut engine = Engine::new();
    match engine.run(src).unwrap() {
        Outcome::Value(datum) => datum,
        other => panic!("expected a value for {src:?}, got {other:?}"),
    }
}

#[test]
fn destructures_a_pack_into_targets() {
    let mut engine = Engine::new();
    assert_eq!(
        engine.run("[a b]: pack [10 20]").unwrap().value(),
        Some(Datum::Integer(10)),
        "the primary slot is the expression value"
    );
    assert_eq!(engine.run("a").unwrap().value(), Some(Datum::Integer(10)));
    assert_eq!(engine.run("b").unwrap().value(), Some(Datum::Integer(20)));
}

#[test]
fn pack_slots_are_evaluated() {
    let mut engine = Engine::new();
    engine.run("[a b]: pack [1 + 2 3 * 4]").unwrap();
    assert_eq!(engine.run("a").unwrap().value(), Some(Datum::Integer(3)));
    assert_eq!(engine.run("b").unwrap().value(), Some(Datum::Integer(12)));
}

#[test]
fn blank_suppresses_and_issue_ignores() {
    let mut engine = Engine::new();
    assert_eq!(
        engine.run("[_ b]: pack [1 2]").unwrap().value(),
        Some(Datum::Integer(1))
    );
    assert_eq!(engine.run("b").unwrap().value(), Some(Datum::Integer(2)));
    assert_eq!(
        engine.run("[# c]: pack [5 6]").unwrap().value(),
        Some(Datum::Integer(5))
    );
    assert_eq!(engine.run("c").unwrap().value(), Some(Datum::Integer(6)));
}

#[test]
fn the_word_circles_the_overall_value() {
    let mut engine = Engine::new();
    assert_eq!(
        engine.run("[a @b]: pack [1 2]").unwrap().value(),
        Some(Datum::Integer(2)),
        "@ circles its slot as the expression value"
    );
    assert_eq!(engine.run("a").unwrap().value(), Some(Datum::Integer(1)));
    assert_eq!(engine.run("b").unwrap().value(), Some(Datum::Integer(2)));
}

#[test]
fn meta_word_targets_store_the_meta_form() {
    let mut engine = Engine::new();
    engine.run("[^m]: pack [5]").unwrap();
    assert_eq!(engine.run("unquote m").unwrap().value(), Some(Datum::Integer(5)));
}

#[test]
fn group_targets_evaluate_first() {
    let mut engine = Engine::new();
    engine.run("[('x) b]: pack [7 8]").unwrap();
    assert_eq!(engine.run("x").unwrap().value(), Some(Datum::Integer(7)));
    assert_eq!(engine.run("b").unwrap().value(), Some(Datum::Integer(8)));
}

#[test]
fn a_single_value_fills_one_target() {
    let mut engine = Engine::new();
    assert_eq!(engine.run("[a]: 42").unwrap().value(), Some(Datum::Integer(42)));
    assert_eq!(engine.run("a").unwrap().value(), Some(Datum::Integer(42)));
}

#[test]
fn too_few_values_error() {
    let err = Engine::new().run("[a b c]: pack [1 2]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::PackTooShort);
}

#[test]
fn functions_can_produce_packs() {
    let mut engine = Engine::new();
    engine.run("halves: func [a b] [pack [a / 2 b / 2]]").unwrap();
    engine.run("[q r]: halves 8 10").unwrap();
    assert_eq!(engine.run("q").unwrap().value(), Some(Datum::Integer(4)));
    assert_eq!(engine.run("r").unwrap().value(), Some(Datum::Integer(5)));
}

#[test]
fn assignment_of_a_pack_through_a_set_word_decays() {
    let mut engine = Engine::new();
    assert_eq!(
        engine.run("x: pack [9 10] x").unwrap().value(),
        Some(Datum::Integer(9)),
        "a pack decays to its first slot in ordinary assignment"
    );
}

#[test]
fn enfix_chains_after_a_set_block() {
    assert_eq!(eval("[a b]: pack [1 2] a + b"), Datum::Integer(3));
    // then/else can chain directly on the primary result
    assert_eq!(eval("[a]: pack [5] then [99]"), Datum::Integer(99));
}
