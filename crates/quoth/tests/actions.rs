//! The action call protocol: interpreted functions, definitional
//! return, refinements, quoting parameter classes, specialization, and
//! host-registered actions.

use pretty_assertions::assert_eq;
use quoth::{Datum, Engine, Error, ErrorKind, Outcome};

fn eval(src: &str) -> Datum {
    let mut engine = Engine::new();
    match engine.run(src).unwrap() {
        Outcome::Value(datum) => datum,
        other => panic!("expected a value for {src:?}, got {other:?}"),
    }
}

fn eval_err(src: &str) -> ErrorKind {
    Engine::new().run(src).unwrap_err().kind
}

#[test]
fn func_defines_callable_actions() {
    assert_eq!(eval("f: func [x] [x + 1] f 41"), Datum::Integer(42));
    assert_eq!(eval("f: func [a b] [a * b] f 6 7"), Datum::Integer(42));
}

#[test]
fn each_call_gets_its_own_frame() {
    let src = "
        fact: func [n] [either n < 2 [1] [n * fact n - 1]]
        fact 5
    ";
    assert_eq!(eval(src), Datum::Integer(120));
}

#[test]
fn definitional_return_unwinds_just_its_own_frame() {
    assert_eq!(
        eval("f: func [x return: [any-value!]] [return x + 1 999] f 1"),
        Datum::Integer(2)
    );
    assert_eq!(
        eval("f: func [x return: [any-value!]] [if x [return 10] 20] f true"),
        Datum::Integer(10)
    );
    assert_eq!(
        eval("f: func [x return: [any-value!]] [if x [return 10] 20] f false"),
        Datum::Integer(20)
    );
    // bare return returns null
    assert!(matches!(
        Engine::new()
            .run("f: func [return: [<opt> any-value!]] [return] f")
            .unwrap(),
        Outcome::Null
    ));
}

#[test]
fn return_crosses_intermediate_frames() {
    let src = "
        f: func [return: [integer!]] [
            g: does [return 7]
            g
            99
        ]
        f
    ";
    // the inner `does` body is bound to f's frame, so its return is f's
    assert_eq!(eval(src), Datum::Integer(7));
}

#[test]
fn locals_start_unset_and_are_frame_scoped() {
    let src = "
        f: func [x <local> acc] [acc: x * 2 acc]
        f 21
    ";
    assert_eq!(eval(src), Datum::Integer(42));
}

#[test]
fn refinements_arrive_through_paths() {
    let mut engine = Engine::new();
    engine
        .run("scale: func [n /double /offset [integer!]] [if double [n: n * 2] if offset [n: n + offset] n]")
        .unwrap();
    assert_eq!(engine.run("scale 5").unwrap().value(), Some(Datum::Integer(5)));
    assert_eq!(engine.run("scale/double 5").unwrap().value(), Some(Datum::Integer(10)));
    assert_eq!(
        engine.run("scale/offset 5 3").unwrap().value(),
        Some(Datum::Integer(8))
    );
    assert_eq!(
        engine.run("scale/double/offset 5 3").unwrap().value(),
        Some(Datum::Integer(13))
    );
    assert_eq!(
        engine.run("scale/nonsense 5").unwrap_err().kind,
        ErrorKind::UnknownRefinement
    );
}

#[test]
fn quoting_parameter_classes() {
    // hard quote: verbatim, no evaluation
    assert_eq!(eval("the x"), Datum::Word("x".to_owned()));
    assert_eq!(
        eval("f: func ['w] [w] f some-word"),
        Datum::Word("some-word".to_owned())
    );
    // soft quote: escapable by get-group
    let mut engine = Engine::new();
    engine.run("f: func [:w] [w]").unwrap();
    assert_eq!(
        engine.run("f literal").unwrap().value(),
        Some(Datum::Word("literal".to_owned()))
    );
    assert_eq!(
        engine.run("f :(1 + 2)").unwrap().value(),
        Some(Datum::Integer(3))
    );
}

#[test]
fn typecheck_runs_after_fulfillment() {
    assert_eq!(eval_err("f: func [n [integer!]] [n] f \"text\""), ErrorKind::TypeMismatch);
    assert_eq!(eval_err("add 1 \"x\""), ErrorKind::TypeMismatch);
    assert_eq!(eval_err("add 1"), ErrorKind::MissingArgument);
}

#[test]
fn variadic_parameters_gather_the_rest_of_the_feed() {
    assert_eq!(
        eval("f: func [rest [<variadic> any-value!]] [length-of rest] f 1 2 3"),
        Datum::Integer(3)
    );
}

#[test]
fn lambda_left_quotes_its_parameter() {
    assert_eq!(eval("inc: x -> [x + 1] inc 4"), Datum::Integer(5));
    assert_eq!(eval("sum: [a b] -> [a + b] sum 3 4"), Datum::Integer(7));
}

#[test]
fn specialization_pre_fills_parameters() {
    let src = "
        add5: specialize :add [value1: 5]
        add5 3
    ";
    assert_eq!(eval(src), Datum::Integer(8));
}

#[test]
fn frame_contexts_tombstone_after_exit() {
    let src = "
        f: func [x] [does [x]]
        g: f 5
        g
    ";
    assert_eq!(eval_err(src), ErrorKind::InaccessibleContext);
}

#[test]
fn spec_documentation_is_tolerated() {
    let src = r#"
        f: func ["doubles a number" n [integer!] "the number"] [n * 2]
        f 4
    "#;
    assert_eq!(eval(src), Datum::Integer(8));
}

#[test]
fn host_actions_join_the_call_protocol() {
    let mut engine = Engine::new();
    engine
        .register_action(
            "triple",
            "n [integer!]",
            Box::new(|args| match args {
                [Datum::Integer(n)] => Ok(Datum::Integer(n * 3)),
                other => panic!("unexpected host args {other:?}"),
            }),
        )
        .unwrap();
    assert_eq!(engine.run("triple 7").unwrap().value(), Some(Datum::Integer(21)));
    // host actions compose with evaluation like any other action
    assert_eq!(engine.run("triple 1 + 2").unwrap().value(), Some(Datum::Integer(9)));
}

#[test]
fn host_action_errors_become_failures() {
    let mut engine = Engine::new();
    engine
        .register_action(
            "grumpy",
            "n [integer!]",
            Box::new(|_| Err(Error::new(ErrorKind::UserError, "no thanks"))),
        )
        .unwrap();
    let err = engine.run("grumpy 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UserError);
}
