//! Integration tests for join propagation
//!
//! Every test checks the incremental matches against a full re-evaluation.

use std::sync::Arc;

use reticle_engine::{RuleDefinition, Session, Tuple, field};

use crate::fixtures::{build, num};

fn assert_consistent(session: &Session) {
    assert_eq!(session.matches(), session.recompute_matches());
}

fn tuples(session: &Session) -> Vec<Tuple> {
    session.matches().into_iter().map(|(_, t)| t).collect()
}

fn tagged() -> RuleDefinition {
    RuleDefinition::new("tagged")
        .for_each("$t", "Tag")
        .for_each("$n", "Num")
        .when(field("$n.group").equals(field("$t.group")))
}

// =============================================================================
// Two-way joins
// =============================================================================

#[test]
fn join_matches_in_either_insert_order() {
    let mut session = build([tagged()]);
    let n1 = session.insert("Num", num(1, 10)).unwrap();
    let t = session.insert("Tag", Arc::new(10_i64)).unwrap();
    let n2 = session.insert("Num", num(2, 10)).unwrap();
    session.insert("Num", num(3, 20)).unwrap();

    assert_eq!(
        tuples(&session),
        vec![Tuple::from(vec![t, n1]), Tuple::from(vec![t, n2])]
    );
    assert_consistent(&session);
}

#[test]
fn deleting_left_fact_drops_all_its_tuples() {
    let mut session = build([tagged()]);
    let t = session.insert("Tag", Arc::new(1_i64)).unwrap();
    for value in 0..5 {
        session.insert("Num", num(value, 1)).unwrap();
    }
    assert_eq!(session.activation_count(), 5);

    session.delete(t).unwrap();
    assert!(session.matches().is_empty());
    assert_eq!(session.activation_count(), 0);
    assert_consistent(&session);
}

#[test]
fn same_type_variables_may_bind_the_same_fact() {
    let rule = RuleDefinition::new("pairs")
        .for_each("$a", "Num")
        .for_each("$b", "Num");
    let mut session = build([rule]);
    let a = session.insert("Num", num(1, 0)).unwrap();
    assert_eq!(tuples(&session), vec![Tuple::from(vec![a, a])]);

    let b = session.insert("Num", num(2, 0)).unwrap();
    assert_eq!(session.matches().len(), 4);
    assert!(tuples(&session).contains(&Tuple::from(vec![b, a])));
    assert_consistent(&session);

    session.delete(a).unwrap();
    assert_eq!(tuples(&session), vec![Tuple::from(vec![b, b])]);
}

#[test]
fn ordered_pairs_with_inequality() {
    let rule = RuleDefinition::new("ascending")
        .for_each("$a", "Num")
        .for_each("$b", "Num")
        .when(field("$a.value").lt(field("$b.value")));
    let mut session = build([rule]);
    let handles: Vec<_> = (0..4)
        .map(|v| session.insert("Num", num(v, 0)).unwrap())
        .collect();

    // 4 choose 2
    assert_eq!(session.matches().len(), 6);
    assert!(
        tuples(&session)
            .iter()
            .all(|t| t.get(0).unwrap() < t.get(1).unwrap())
    );
    assert!(tuples(&session).contains(&Tuple::from(vec![handles[0], handles[3]])));
    assert_consistent(&session);
}

// =============================================================================
// Three-way joins
// =============================================================================

fn chain() -> RuleDefinition {
    RuleDefinition::new("chain")
        .for_each("$a", "Num")
        .for_each("$t", "Tag")
        .for_each("$b", "Num")
        .when(field("$a.group").equals(field("$t.group")))
        .when(field("$b.value").gt(field("$a.value")))
        .when(field("$b.group").equals(field("$t.group")))
}

#[test]
fn three_way_join_incremental() {
    let mut session = build([chain()]);
    let a = session.insert("Num", num(1, 7)).unwrap();
    let b = session.insert("Num", num(5, 7)).unwrap();
    assert!(session.matches().is_empty());

    let t = session.insert("Tag", Arc::new(7_i64)).unwrap();
    assert_eq!(tuples(&session), vec![Tuple::from(vec![a, t, b])]);

    let c = session.insert("Num", num(9, 7)).unwrap();
    assert_eq!(session.matches().len(), 3);
    assert!(tuples(&session).contains(&Tuple::from(vec![b, t, c])));
    assert_consistent(&session);

    // Removing the middle fact clears every level above it
    session.delete(t).unwrap();
    assert!(session.matches().is_empty());
    assert_consistent(&session);
}

#[test]
fn update_moves_fact_between_joins() {
    let mut session = build([chain()]);
    let low = num(1, 7);
    let a = session.insert("Num", low.clone()).unwrap();
    let b = session.insert("Num", num(5, 7)).unwrap();
    let t = session.insert("Tag", Arc::new(7_i64)).unwrap();
    assert_eq!(tuples(&session), vec![Tuple::from(vec![a, t, b])]);

    low.set(10);
    session.update(a).unwrap();
    assert_eq!(tuples(&session), vec![Tuple::from(vec![b, t, a])]);
    assert_consistent(&session);
}

// =============================================================================
// Updates
// =============================================================================

#[test]
fn update_of_unread_field_keeps_activation() {
    let rule = RuleDefinition::new("grouped")
        .for_each("$t", "Tag")
        .for_each("$n", "Num")
        .when(field("$n.group").equals(field("$t.group")));
    let mut session = build([rule]);
    session.insert("Tag", Arc::new(3_i64)).unwrap();
    let payload = num(0, 3);
    let n = session.insert("Num", payload.clone()).unwrap();
    let before = session.activations()[0].id();

    // `value` is never read by this rule
    payload.set(99);
    session.update(n).unwrap();
    assert_eq!(session.activations()[0].id(), before);
}

#[test]
fn update_of_join_field_rederives_activation() {
    let rule = RuleDefinition::new("bigger")
        .for_each("$a", "Num")
        .for_each("$b", "Num")
        .when(field("$a.group").equals(0))
        .when(field("$b.value").gt(field("$a.value")));
    let mut session = build([rule]);
    let a_payload = num(0, 0);
    let a = session.insert("Num", a_payload.clone()).unwrap();
    let b = session.insert("Num", num(10, 1)).unwrap();
    let before = session.activations();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].tuple(), &Tuple::from(vec![a, b]));

    // Still matches, but a joined field changed
    a_payload.set(1);
    session.update(a).unwrap();
    let after = session.activations();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].tuple(), before[0].tuple());
    assert!(after[0].id() > before[0].id());
    assert_consistent(&session);
}

#[test]
fn replace_swaps_identity() {
    let rule = RuleDefinition::new("big")
        .for_each("$n", "Num")
        .when(field("$n.value").ge(100));
    let mut session = build([rule]);
    let h = session.insert("Num", num(1, 0)).unwrap();
    assert_eq!(session.activation_count(), 0);

    session.replace(h, num(500, 0)).unwrap();
    assert_eq!(session.activation_count(), 1);
    assert_eq!(session.activations()[0].tuple(), &Tuple::single(h));
    assert_consistent(&session);
}
