//! Integration tests for the agenda
//!
//! Tests selection order, fired tracking, and cancellation.

use std::sync::Arc;

use parking_lot::Mutex;
use reticle_engine::{RuleDefinition, Tuple, field};

use crate::fixtures::{build, num};

fn recording(name: &str, salience: i32, log: &Arc<Mutex<Vec<String>>>) -> RuleDefinition {
    let log = Arc::clone(log);
    RuleDefinition::new(name)
        .with_salience(salience)
        .for_each("$n", "Num")
        .then(move |ctx| {
            let value = ctx.value("$n.value")?;
            log.lock().push(format!("{}:{value}", ctx.rule_name()));
            Ok(())
        })
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn higher_salience_fires_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut session = build([
        recording("low", -5, &log),
        recording("default", 0, &log),
        recording("high", 10, &log),
    ]);
    session.insert("Num", num(1, 0)).unwrap();
    session.fire().unwrap();

    assert_eq!(*log.lock(), vec!["high:1", "default:1", "low:1"]);
}

#[test]
fn equal_salience_fires_in_creation_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut session = build([recording("r", 0, &log)]);
    for value in [3, 1, 2] {
        session.insert("Num", num(value, 0)).unwrap();
    }
    let ids: Vec<_> = session.activations().iter().map(|a| a.id()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    session.fire().unwrap();
    assert_eq!(*log.lock(), vec!["r:3", "r:1", "r:2"]);
}

#[test]
fn activations_lists_pending_in_selection_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut session = build([recording("a", 1, &log), recording("b", 2, &log)]);
    let h = session.insert("Num", num(1, 0)).unwrap();

    let pending = session.activations();
    let names: Vec<_> = pending.iter().map(|a| a.rule_name().to_string()).collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(pending[0].salience(), 2);
    assert_eq!(pending[0].tuple(), &Tuple::single(h));
    assert_eq!(format!("{}", pending[0]), format!("b[{h}]"));
}

// =============================================================================
// Fired tracking
// =============================================================================

#[test]
fn fired_activation_stays_live_until_retracted() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut session = build([recording("r", 0, &log)]);
    let h = session.insert("Num", num(1, 0)).unwrap();
    session.fire().unwrap();

    let rule = session.network().rule_by_name("r").unwrap().id();
    let tuple = Tuple::single(h);
    assert!(session.agenda().contains(rule, &tuple));
    assert!(session.agenda().is_fired(rule, &tuple));
    assert_eq!(session.agenda().live_count(), 1);
    assert_eq!(session.activation_count(), 0);

    session.delete(h).unwrap();
    assert!(!session.agenda().contains(rule, &tuple));
}

#[test]
fn rederived_tuple_fires_again() {
    let rule = RuleDefinition::new("positive")
        .for_each("$n", "Num")
        .when(field("$n.value").gt(0))
        .then(|_| Ok(()));
    let mut session = build([rule]);
    let payload = num(1, 0);
    let h = session.insert("Num", payload.clone()).unwrap();
    let first = session.activations()[0].id();
    assert_eq!(session.fire().unwrap().fired, 1);

    payload.set(-1);
    session.update(h).unwrap();
    payload.set(2);
    session.update(h).unwrap();
    assert_eq!(session.activation_count(), 1);
    assert!(session.activations()[0].id() > first);
    assert_eq!(session.fire().unwrap().fired, 1);
}

#[test]
fn retracting_pending_activation_cancels_it() {
    let rule = RuleDefinition::new("positive")
        .for_each("$n", "Num")
        .when(field("$n.value").gt(0));
    let mut session = build([rule]);
    let payload = num(1, 0);
    let h = session.insert("Num", payload.clone()).unwrap();
    assert_eq!(session.activation_count(), 1);

    payload.set(0);
    session.update(h).unwrap();
    assert_eq!(session.activation_count(), 0);
    assert_eq!(session.agenda().live_count(), 0);
    assert_eq!(session.fire().unwrap().fired, 0);
}
