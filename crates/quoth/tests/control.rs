//! Branching, loops, throws, and deferred enfix scheduling.

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

#[test]
fn if_branches_and_voids() {
    assert_eq!(eval("if true [10]"), Datum::Integer(10));
    assert!(matches!(eval_outcome("if false [10]"), Outcome::Void));
    assert_eq!(eval("if true [10] else [20]"), Datum::Integer(10));
    assert_eq!(eval("if false [10] else [20]"), Datum::Integer(20));
}

#[test]
fn either_takes_one_of_two_branches() {
    assert_eq!(eval("either 1 < 2 [\"yes\"] [\"no\"]"), Datum::Text("yes".to_owned()));
    assert_eq!(eval("either 1 > 2 [\"yes\"] [\"no\"]"), Datum::Text("no".to_owned()));
}

#[test]
fn then_and_also_chain_on_values() {
    assert_eq!(eval("if true [1] then [2]"), Datum::Integer(2));
    assert!(matches!(eval_outcome("if false [1] then [2]"), Outcome::Void));
    // also runs its branch for effect but keeps the left value
    let mut engine = Engine::new();
    engine.run("x: 0").unwrap();
    assert_eq!(engine.run("5 also [x: 9]").unwrap().value(), Some(Datum::Integer(5)));
    assert_eq!(engine.run("x").unwrap().value(), Some(Datum::Integer(9)));
}

#[test]
fn else_chains_further_enfix() {
    assert_eq!(eval("if false [1] else [2] + 3"), Datum::Integer(5));
}

#[test]
fn deferred_enfix_binds_to_the_outermost_completed_argument() {
    // else must attach to the `if`, making the func's argument 2, not
    // attach to the func call's own result
    let src = "f: func [x] [x + 100] f if false [1] else [2]";
    assert_eq!(eval(src), Datum::Integer(102));
}

#[test]
fn all_stops_at_falsey_and_keeps_the_last_truthy() {
    assert_eq!(eval("all [1 2 3]"), Datum::Integer(3));
    assert!(matches!(eval_outcome("all [1 false 3]"), Outcome::Null));
    assert!(matches!(eval_outcome("all []"), Outcome::Void));
    // the trailing vanish does not clobber the accumulated value
    assert_eq!(eval(r#"all [1 + 2 comment "x"]"#), Datum::Integer(3));
}

#[test]
fn any_takes_the_first_truthy() {
    assert_eq!(eval("any [false 3 4]"), Datum::Integer(3));
    assert!(matches!(eval_outcome("any [false false]"), Outcome::Null));
}

#[test]
fn while_loops_until_falsey() {
    let src = "sum: 0 i: 0 while [i < 5] [i: i + 1 sum: sum + i] sum";
    assert_eq!(eval(src), Datum::Integer(15));
    assert!(matches!(eval_outcome("while [false] [1]"), Outcome::Null));
}

#[test]
fn catch_intercepts_throws() {
    assert_eq!(eval("catch [throw 42]"), Datum::Integer(42));
    assert_eq!(eval("catch [1 + throw 5 99]"), Datum::Integer(5));
    assert!(matches!(eval_outcome("catch [1 2]"), Outcome::Null));
}

#[test]
fn catch_filters_by_name() {
    assert_eq!(eval("catch/name [throw/name 1 'foo] 'foo"), Datum::Integer(1));
    // an unnamed catch does not take a named throw
    assert_eq!(
        eval("catch/name [catch [throw/name 7 'foo]] 'foo"),
        Datum::Integer(7)
    );
    // a name mismatch keeps unwinding; the host sees the throw
    match Engine::new().run("catch/name [throw/name 1 'foo] 'bar").unwrap() {
        Outcome::Thrown { label, payload } => {
            assert_eq!(label, Datum::Word("foo".to_owned()));
            assert_eq!(payload, Datum::Integer(1));
        }
        other => panic!("expected the throw to reach the root, got {other:?}"),
    }
}

#[test]
fn uncaught_throw_reaches_the_host() {
    match Engine::new().run("throw 9").unwrap() {
        Outcome::Thrown { label, payload } => {
            assert_eq!(label, Datum::Blank);
            assert_eq!(payload, Datum::Integer(9));
        }
        other => panic!("expected a thrown outcome, got {other:?}"),
    }
}

#[test]
fn do_evaluates_blocks_and_text() {
    assert_eq!(eval("do [1 + 2]"), Datum::Integer(3));
    assert_eq!(eval(r#"do "3 + 4""#), Datum::Integer(7));
    assert!(matches!(eval_outcome("do []"), Outcome::Void));
}

#[test]
fn reduce_builds_a_block_of_results() {
    assert_eq!(
        eval("reduce [1 + 2 'x \"s\"]"),
        Datum::Block(vec![
            Datum::Integer(3),
            Datum::Word("x".to_owned()),
            Datum::Text("s".to_owned()),
        ])
    );
}

#[test]
fn reduce_skips_vanished_steps_but_rejects_isotopes() {
    // an untaken branch vanishes, contributing no slot
    assert_eq!(eval("reduce [if false [1]]"), Datum::Block(vec![]));
    // null is an isotope and cannot be put into an array
    let err = Engine::new().run("reduce [null]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadIsotope);
}
