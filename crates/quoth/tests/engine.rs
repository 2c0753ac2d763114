//! Embedding surface: single-stepping, handles, GC, tracing, and
//! startup/shutdown balance.

use pretty_assertions::assert_eq;
use quoth::{Datum, Engine, NoLimitTracker, Outcome, RecordingTracer, TraceEvent};

#[test]
fn stepper_evaluates_one_expression_at_a_time() {
    let mut engine = Engine::new();
    let mut stepper = engine.stepper("1 + 2 x: 30 x").unwrap();
    match stepper.step().unwrap() {
        Some(Outcome::Value(Datum::Integer(3))) => {}
        other => panic!("first step should be 3, got {other:?}"),
    }
    match stepper.step().unwrap() {
        Some(Outcome::Value(Datum::Integer(30))) => {}
        other => panic!("second step should be 30, got {other:?}"),
    }
    match stepper.step().unwrap() {
        Some(Outcome::Value(Datum::Integer(30))) => {}
        other => panic!("third step should fetch x, got {other:?}"),
    }
    assert!(stepper.step().unwrap().is_none(), "the feed is exhausted");
}

#[test]
fn stepper_reports_vanished_steps_as_void() {
    let mut engine = Engine::new();
    let mut stepper = engine.stepper(r#"comment "x" 5"#).unwrap();
    assert!(matches!(stepper.step().unwrap(), Some(Outcome::Void)));
    assert!(matches!(
        stepper.step().unwrap(),
        Some(Outcome::Value(Datum::Integer(5)))
    ));
}

#[test]
fn state_persists_across_runs() {
    let mut engine = Engine::new();
    engine.run("counter: 0").unwrap();
    engine.run("bump: does [counter: counter + 1]").unwrap();
    engine.run("bump bump bump").unwrap();
    assert_eq!(engine.run("counter").unwrap().value(), Some(Datum::Integer(3)));
}

#[test]
fn handles_root_values_against_the_gc() {
    let mut engine = Engine::new();
    let datum = Datum::Block(vec![Datum::Integer(1), Datum::Word("keep".to_owned())]);
    let handle = engine.alloc_handle(&datum).unwrap();
    engine.collect_garbage();
    assert_eq!(engine.handle_value(&handle).unwrap(), datum);

    engine.release_handle(handle).unwrap();
}

#[test]
fn released_handles_are_invalid() {
    let mut engine = Engine::new();
    let handle = engine.alloc_handle(&Datum::Integer(7)).unwrap();
    engine.release_handle(handle).unwrap();
    // the slot is recycled for the next allocation
    let second = engine.alloc_handle(&Datum::Integer(8)).unwrap();
    assert_eq!(engine.handle_value(&second).unwrap(), Datum::Integer(8));
    engine.release_handle(second).unwrap();
}

#[test]
fn garbage_collection_reclaims_unreachable_series() {
    let mut engine = Engine::new();
    engine.run("x: copy [1 2 3]").unwrap();
    let before = engine.heap_stats();
    // orphan the copy, then collect
    engine.run("x: 0").unwrap();
    let swept = engine.collect_garbage();
    assert!(swept >= 1, "the orphaned copy should be swept");
    let after = engine.heap_stats();
    assert!(after.live_series < before.live_series);
}

#[test]
fn forced_gc_every_step_does_not_disturb_evaluation() {
    let mut engine = Engine::new();
    engine.set_force_gc(true);
    assert_eq!(
        engine.run("f: func [x] [x + 1] f 41").unwrap().value(),
        Some(Datum::Integer(42))
    );
    assert_eq!(
        engine.run("[a b]: pack [10 20] a + b").unwrap().value(),
        Some(Datum::Integer(30))
    );
    assert_eq!(
        engine.run("catch [throw 42]").unwrap().value(),
        Some(Datum::Integer(42))
    );
}

#[test]
fn shutdown_sweeps_everything() {
    let mut engine = Engine::new();
    engine.run("x: copy [1 2 3] f: func [n] [n] f 1").unwrap();
    engine.shutdown().unwrap();
}

#[test]
fn fresh_engine_shuts_down_clean() {
    Engine::new().shutdown().unwrap();
}

#[test]
fn recording_tracer_sees_steps_and_calls() {
    let mut engine = Engine::new_with(NoLimitTracker, RecordingTracer::new());
    engine.run("1 + 2").unwrap();
    let events = engine.tracer().events();
    assert!(
        events.iter().any(|e| matches!(e, TraceEvent::Step { .. })),
        "steps are traced"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, TraceEvent::ActionCall { name: Some(n) } if n == "+")),
        "the enfix call is traced with its label"
    );
    assert!(
        events.iter().any(|e| matches!(e, TraceEvent::FramePush { .. })),
        "frame pushes are traced"
    );
}

#[test]
fn heap_stats_report_flavors() {
    let mut engine = Engine::new();
    engine.run("x: copy \"text\"").unwrap();
    let stats = engine.heap_stats();
    assert!(stats.live_series > 0);
    assert!(stats.series_by_flavor.contains_key("array"));
    assert!(stats.series_by_flavor.contains_key("text"));
    assert!(stats.series_by_flavor.contains_key("details"));
    assert!(stats.series_by_flavor.contains_key("context"));
}
