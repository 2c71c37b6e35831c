//! Integration tests for changing a live session's rules
//!
//! Tests adding rules to a session with facts, and swapping compiled
//! conditions in place.

use std::sync::Arc;

use reticle_engine::{AgendaEvent, Condition, EventLog, FactGroup, RuleDefinition, field};
use reticle_foundation::{ErrorKind, Value};

use crate::fixtures::{build, builder, empty, num};

fn positive() -> RuleDefinition {
    RuleDefinition::new("positive")
        .for_each("$n", "Num")
        .when(field("$n.value").gt(0))
}

// =============================================================================
// Adding rules
// =============================================================================

#[test]
fn added_rule_sees_existing_facts() {
    let mut session = empty();
    for value in [-1, 2, 3] {
        session.insert("Num", num(value, 0)).unwrap();
    }
    assert_eq!(session.activation_count(), 0);

    let id = session.add_rule(positive()).unwrap();
    assert_eq!(session.activation_count(), 2);
    assert!(session.activations().iter().all(|a| a.rule() == id));

    session.insert("Num", num(4, 0)).unwrap();
    assert_eq!(session.activation_count(), 3);
    assert_eq!(session.matches(), session.recompute_matches());
    assert_eq!(session.fire().unwrap().fired, 3);
}

#[test]
fn added_rule_reuses_populated_alpha_nodes() {
    let mut session = build([RuleDefinition::new("any").for_each("$n", "Num")]);
    session.insert("Num", num(1, 0)).unwrap();
    session.insert("Num", num(2, 0)).unwrap();
    let alpha = session.network().alpha_count();

    let pair = RuleDefinition::new("pair")
        .for_each("$a", "Num")
        .for_each("$b", "Num")
        .when(field("$a.value").lt(field("$b.value")));
    session.add_rule(pair).unwrap();

    assert_eq!(session.network().alpha_count(), alpha);
    let pair = session.network().rule_by_name("pair").unwrap().id();
    assert_eq!(session.matches().iter().filter(|(r, _)| *r == pair).count(), 1);
    assert_eq!(session.matches(), session.recompute_matches());
}

#[test]
fn added_rule_stays_in_its_session() {
    let kb = builder().with_rule(positive()).build().unwrap();
    let mut first = kb.new_session();
    let mut second = kb.new_session();

    first
        .add_rule(RuleDefinition::new("any").for_each("$n", "Num"))
        .unwrap();
    assert_eq!(first.network().rules().len(), 2);
    assert_eq!(second.network().rules().len(), 1);
    assert_eq!(kb.rule_names().count(), 1);

    first.insert("Num", num(1, 0)).unwrap();
    second.insert("Num", num(1, 0)).unwrap();
    assert_eq!(first.activation_count(), 2);
    assert_eq!(second.activation_count(), 1);
}

#[test]
fn rejected_rule_leaves_session_unchanged() {
    let mut session = build([positive()]);
    session.insert("Num", num(1, 0)).unwrap();

    let err = session.add_rule(positive()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidRule { .. }));
    let err = session
        .add_rule(RuleDefinition::new("ghost").for_each("$g", "Ghost"))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(_)));

    assert_eq!(session.network().rules().len(), 1);
    assert_eq!(session.activation_count(), 1);
}

#[test]
fn added_rule_with_group_is_gated() {
    let mut session = empty();
    session.insert("Num", num(1, 1)).unwrap();
    session.insert("Num", num(2, 2)).unwrap();
    session.insert("Tag", Arc::new(2_i64)).unwrap();

    let untagged = RuleDefinition::new("untagged").for_each("$n", "Num").not_exists(
        FactGroup::new()
            .for_each("$t", "Tag")
            .when(field("$t.group").equals(field("$n.group"))),
    );
    session.add_rule(untagged).unwrap();
    assert_eq!(session.activation_count(), 1);

    session.insert("Tag", Arc::new(1_i64)).unwrap();
    assert_eq!(session.activation_count(), 0);
    assert_eq!(session.matches(), session.recompute_matches());
}

// =============================================================================
// Replacing conditions
// =============================================================================

fn threshold(limit: i64) -> Condition {
    Condition::new(&["$n.value"], move |v| Ok(v[0].as_int() > Some(limit))).with_label("threshold")
}

fn above(limit: i64) -> impl Fn(&[Value]) -> reticle_foundation::Result<bool> + Send + Sync {
    move |v| Ok(v[0].as_int() > Some(limit))
}

#[test]
fn replacing_a_condition_rematches_facts() {
    let rule = RuleDefinition::new("big")
        .for_each("$n", "Num")
        .when_condition(threshold(5));
    let log = Arc::new(EventLog::new());
    let mut session = build([rule]);
    session.add_listener(log.clone());
    for value in [3, 7, 9] {
        session.insert("Num", num(value, 0)).unwrap();
    }
    assert_eq!(session.fire().unwrap().fired, 2);
    log.take();

    assert_eq!(session.replace_condition("threshold", above(1)).unwrap(), 1);
    // 7 and 9 already fired and keep that state; 3 is new
    assert_eq!(session.agenda().live_count(), 3);
    assert_eq!(session.activation_count(), 1);

    session.replace_condition("threshold", above(8)).unwrap();
    assert_eq!(session.agenda().live_count(), 1);
    assert_eq!(session.activation_count(), 0);
    assert_eq!(session.matches(), session.recompute_matches());

    let kinds: Vec<&str> = log.events().iter().map(AgendaEvent::kind).collect();
    assert_eq!(kinds, vec!["Created", "Cancelled"]);
}

#[test]
fn surviving_activations_keep_their_place() {
    let rule = RuleDefinition::new("big")
        .for_each("$n", "Num")
        .when_condition(threshold(0));
    let mut session = build([rule]);
    for value in [1, 2, 3] {
        session.insert("Num", num(value, 0)).unwrap();
    }
    let before: Vec<_> = session.activations().iter().map(|a| a.id()).collect();

    session.replace_condition("threshold", above(1)).unwrap();
    let after: Vec<_> = session.activations().iter().map(|a| a.id()).collect();
    assert_eq!(after, before[1..]);
}

#[test]
fn expression_conditions_are_labelled_by_their_text() {
    let mut session = build([positive()]);
    session.insert("Num", num(1, 0)).unwrap();
    assert_eq!(session.activation_count(), 1);

    session.replace_condition("$n.value > 0", above(10)).unwrap();
    assert_eq!(session.activation_count(), 0);
}

#[test]
fn unknown_label_is_rejected() {
    let mut session = build([positive()]);
    session.insert("Num", num(1, 0)).unwrap();

    let err = session.replace_condition("nope", above(0)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownCondition(ref label) if label == "nope"));
    assert_eq!(session.activation_count(), 1);
}

#[test]
fn replacement_stays_in_its_session() {
    let kb = builder()
        .with_rule(
            RuleDefinition::new("big")
                .for_each("$n", "Num")
                .when_condition(threshold(5)),
        )
        .build()
        .unwrap();
    let mut first = kb.new_session();
    let mut second = kb.new_session();
    first.replace_condition("threshold", above(0)).unwrap();

    first.insert("Num", num(2, 0)).unwrap();
    second.insert("Num", num(2, 0)).unwrap();
    assert_eq!(first.activation_count(), 1);
    assert_eq!(second.activation_count(), 0);
}

#[test]
fn replacing_a_join_condition() {
    let pair = RuleDefinition::new("pair")
        .for_each("$a", "Num")
        .for_each("$b", "Num")
        .when_condition(
            Condition::new(&["$a.value", "$b.value"], |v| Ok(v[0].as_int() < v[1].as_int()))
                .with_label("order"),
        );
    let mut session = build([pair]);
    session.insert("Num", num(1, 0)).unwrap();
    session.insert("Num", num(2, 0)).unwrap();
    assert_eq!(session.activation_count(), 1);

    session
        .replace_condition("order", |v: &[Value]| Ok(v[0] != v[1]))
        .unwrap();
    assert_eq!(session.activation_count(), 2);
    assert_eq!(session.matches(), session.recompute_matches());
}
