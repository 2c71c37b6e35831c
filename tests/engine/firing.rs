//! Integration tests for firing
//!
//! Tests chained actions, halting, limits, and action failures.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reticle_engine::{EngineConfig, FireOutcome, RuleDefinition, field};
use reticle_foundation::{Error, ErrorKind, Value};

use crate::fixtures::{Num, build, builder, num};

// =============================================================================
// Chaining
// =============================================================================

#[test]
fn actions_create_new_activations_in_same_call() {
    let countdown = RuleDefinition::new("countdown")
        .for_each("$n", "Num")
        .when(field("$n.value").gt(0))
        .then(|ctx| {
            let n = ctx.payload::<Num>("$n")?;
            let next = n.value.load(std::sync::atomic::Ordering::SeqCst) - 1;
            ctx.insert("Num", num(next, n.group))?;
            Ok(())
        });
    let mut session = build([countdown]);
    session.insert("Num", num(3, 0)).unwrap();

    let report = session.fire().unwrap();
    assert_eq!(report.fired, 3);
    assert_eq!(report.outcome, FireOutcome::Quiescent);
    assert_eq!(session.fact_count(), 4);
}

#[test]
fn action_updates_are_seen_by_later_selections() {
    let bump = RuleDefinition::new("bump")
        .with_salience(1)
        .for_each("$n", "Num")
        .when(field("$n.value").lt(3))
        .then(|ctx| {
            let n = ctx.payload::<Num>("$n")?;
            n.set(n.value.load(std::sync::atomic::Ordering::SeqCst) + 1);
            ctx.update_var("$n")
        });
    let done = RuleDefinition::new("done")
        .for_each("$n", "Num")
        .when(field("$n.value").equals(3))
        .then(|ctx| {
            assert_eq!(ctx.value("$n.value")?, Value::Int(3));
            Ok(())
        });
    let mut session = build([bump, done]);
    let h = session.insert("Num", num(0, 0)).unwrap();

    let report = session.fire().unwrap();
    assert_eq!(report.fired, 4);
    assert_eq!(session.value(h, "value").unwrap(), Value::Int(3));
}

#[test]
fn deleting_a_bound_fact_cancels_sibling_activations() {
    let consume = RuleDefinition::new("consume")
        .for_each("$t", "Tag")
        .for_each("$n", "Num")
        .when(field("$n.group").equals(field("$t.group")))
        .then(|ctx| ctx.delete_var("$t"));
    let mut session = build([consume]);
    session.insert("Tag", Arc::new(1_i64)).unwrap();
    session.insert("Num", num(1, 1)).unwrap();
    session.insert("Num", num(2, 1)).unwrap();
    assert_eq!(session.activation_count(), 2);

    assert_eq!(session.fire().unwrap().fired, 1);
    assert_eq!(session.agenda().live_count(), 0);
}

// =============================================================================
// Limits and halting
// =============================================================================

fn forever() -> RuleDefinition {
    RuleDefinition::new("forever")
        .for_each("$n", "Num")
        .then(|ctx| {
            ctx.insert("Num", num(0, 0))?;
            Ok(())
        })
}

#[test]
fn max_fires_bounds_runaway_rules() {
    let mut session = builder()
        .with_config(EngineConfig::default().with_max_fires(25))
        .with_rule(forever())
        .build()
        .unwrap()
        .new_session();
    session.insert("Num", num(0, 0)).unwrap();

    let report = session.fire().unwrap();
    assert_eq!(report.fired, 25);
    assert_eq!(report.outcome, FireOutcome::LimitReached);
    assert_eq!(session.activation_count(), 1);
}

#[test]
fn halt_from_another_thread() {
    let slow = RuleDefinition::new("slow")
        .for_each("$n", "Num")
        .then(|ctx| {
            thread::sleep(Duration::from_millis(2));
            ctx.insert("Num", num(0, 0))?;
            Ok(())
        });
    let mut session = build([slow]);
    session.insert("Num", num(0, 0)).unwrap();
    let halt = session.halt_handle();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        halt.halt();
    });
    let report = session.fire_until_halt().unwrap();
    stopper.join().unwrap();

    assert_eq!(report.outcome, FireOutcome::Halted);
    assert!(report.fired > 0);
    assert_eq!(session.activation_count(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn failed_action_keeps_partial_effects() {
    let half = RuleDefinition::new("half")
        .for_each("$t", "Tag")
        .then(|ctx| {
            ctx.insert("Num", num(1, 1))?;
            Err(Error::evaluation("gave up"))
        });
    let mut session = build([half]);
    session.insert("Tag", Arc::new(1_i64)).unwrap();

    let err = session.fire().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ActionExecution { ref rule, .. } if rule == "half"));
    assert_eq!(session.fact_count(), 2);
    assert_eq!(session.activation_count(), 1);
}

#[test]
fn action_reading_unknown_variable_fails() {
    let bad = RuleDefinition::new("bad")
        .for_each("$t", "Tag")
        .then(|ctx| ctx.value("$missing").map(|_| ()));
    let mut session = build([bad]);
    session.insert("Tag", Arc::new(1_i64)).unwrap();
    let err = session.fire().unwrap_err();
    let ErrorKind::ActionExecution { source, .. } = err.kind else {
        panic!("expected ActionExecution");
    };
    assert!(matches!(source.kind, ErrorKind::Evaluation(_)));
}

#[test]
fn stale_handles_are_rejected() {
    let mut session = builder().build().unwrap().new_session();
    let h = session.insert("Tag", Arc::new(1_i64)).unwrap();
    session.delete(h).unwrap();
    for err in [
        session.update(h).unwrap_err(),
        session.delete(h).unwrap_err(),
        session.replace(h, Arc::new(2_i64)).unwrap_err(),
    ] {
        assert!(matches!(err.kind, ErrorKind::InvalidHandle(x) if x == h));
    }
}
