//! Failure modes: raised errors, abrupt failures, protection, and
//! resource limits.

use pretty_assertions::assert_eq;
use quoth::{
    Datum, Engine, ErrorKind, LimitedTracker, NoopTracer, Outcome, ResourceLimits,
};

fn eval_err(src: &str) -> ErrorKind {
    Engine::new().run(src).unwrap_err().kind
}

#[test]
fn raise_produces_a_raised_error_outcome() {
    match Engine::new().run(r#"raise "boo""#).unwrap() {
        Outcome::Raised(err) => {
            assert_eq!(err.kind, ErrorKind::UserError);
            assert_eq!(err.message, "boo");
        }
        other => panic!("expected a raised outcome, got {other:?}"),
    }
}

#[test]
fn assignment_tolerates_raised_without_assigning() {
    let mut engine = Engine::new();
    match engine.run(r#"x: raise "boo""#).unwrap() {
        Outcome::Raised(_) => {}
        other => panic!("expected the raise to propagate, got {other:?}"),
    }
    // the variable was never assigned
    assert_eq!(engine.run("x").unwrap_err().kind, ErrorKind::UnsetVariable);
}

#[test]
fn consuming_a_raised_error_promotes_it() {
    assert_eq!(eval_err(r#"1 + raise "x""#), ErrorKind::UserError);
    // an unconsumed raise promotes at the next step
    assert_eq!(eval_err(r#"raise "x" 2"#), ErrorKind::UserError);
}

#[test]
fn try_defuses_raised_errors() {
    assert!(matches!(
        Engine::new().run(r#"try raise "boo""#).unwrap(),
        Outcome::Null
    ));
    assert_eq!(
        Engine::new().run("try 5").unwrap().value(),
        Some(Datum::Integer(5))
    );
}

#[test]
fn fail_is_abrupt_and_rescue_traps_it() {
    assert_eq!(eval_err(r#"fail "boom""#), ErrorKind::UserError);
    match Engine::new().run(r#"rescue [fail "boom"]"#).unwrap() {
        Outcome::Value(Datum::Error { kind, message }) => {
            assert_eq!(kind, ErrorKind::UserError);
            assert_eq!(message, "boom");
        }
        other => panic!("expected a reified error value, got {other:?}"),
    }
    assert!(matches!(
        Engine::new().run("rescue [1 + 2]").unwrap(),
        Outcome::Null
    ));
}

#[test]
fn rescue_traps_evaluator_failures_too() {
    match Engine::new().run("rescue [undefined-thing]").unwrap() {
        Outcome::Value(Datum::Error { kind, .. }) => {
            assert_eq!(kind, ErrorKind::UnsetVariable);
        }
        other => panic!("expected a reified error value, got {other:?}"),
    }
}

#[test]
fn error_values_are_contexts_with_fields() {
    let mut engine = Engine::new();
    engine.run(r#"e: rescue [fail "boom"]"#).unwrap();
    assert_eq!(
        engine.run("e.message").unwrap().value(),
        Some(Datum::Text("boom".to_owned()))
    );
    assert_eq!(
        engine.run("e.kind").unwrap().value(),
        Some(Datum::Word("user-error".to_owned()))
    );
}

#[test]
fn catch_does_not_intercept_failures() {
    assert_eq!(eval_err(r#"catch [fail "boom"]"#), ErrorKind::UserError);
}

#[test]
fn frozen_series_refuse_mutation() {
    let mut engine = Engine::new();
    engine.run("b: [1 2] freeze b").unwrap();
    assert_eq!(engine.run("append b 3").unwrap_err().kind, ErrorKind::FrozenSeries);
    // freezing is transitive
    engine.run("outer: [[inner]] freeze outer").unwrap();
    assert_eq!(
        engine.run("append first outer 'x").unwrap_err().kind,
        ErrorKind::FrozenSeries
    );
}

#[test]
fn live_feeds_hold_their_arrays_against_mutation() {
    // the block is being enumerated by `do` while append targets it
    let err = Engine::new().run("b: [append b 1] do b").unwrap_err();
    assert_eq!(err.kind, ErrorKind::SeriesHeld);
}

#[test]
fn math_errors() {
    assert_eq!(eval_err("1 / 0"), ErrorKind::ZeroDivide);
    assert_eq!(eval_err("9223372036854775807 + 1"), ErrorKind::Overflow);
}

#[test]
fn step_budget_is_enforced() {
    let limits = ResourceLimits {
        max_steps: Some(1_000),
        ..ResourceLimits::default()
    };
    let mut engine = Engine::new_with(LimitedTracker::new(limits), NoopTracer);
    let err = engine.run("while [true] [1]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::BudgetExceeded);
}

#[test]
fn frame_depth_is_bounded() {
    let limits = ResourceLimits {
        max_depth: 64,
        ..ResourceLimits::default()
    };
    let mut engine = Engine::new_with(LimitedTracker::new(limits), NoopTracer);
    let err = engine.run("f: func [] [f] f").unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn allocation_limit_is_enforced() {
    // generous enough for startup, small enough that a runaway
    // allocation loop trips it
    let limits = ResourceLimits {
        max_allocations: Some(5_000),
        ..ResourceLimits::default()
    };
    let mut engine = Engine::new_with(LimitedTracker::new(limits), NoopTracer);
    let err = engine.run("while [true] [copy [1 2 3]]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::AllocationLimit);
}

#[test]
fn errors_carry_a_source_excerpt() {
    let err = Engine::new().run("1 + 2 definitely-unset 4").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsetVariable);
    assert!(err.near.is_some(), "evaluation errors attach a near excerpt");
}

#[test]
fn halting_unwinds_from_outside() {
    let mut engine = Engine::new();
    let halt = engine.halt_handle();
    let ticker = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        halt.halt();
    });
    let err = engine.run("while [true] [1]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Halted);
    ticker.join().unwrap();
}
