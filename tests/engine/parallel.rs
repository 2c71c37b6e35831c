//! Integration tests for parallel matching
//!
//! Parallel evaluation must produce exactly what sequential evaluation does.

use std::collections::HashMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reticle_engine::{EngineConfig, ExecutionMode, RuleDefinition, Session, field};
use reticle_foundation::FactHandle;

use crate::fixtures::{Num, builder, num};

fn rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new("even")
            .for_each("$n", "Num")
            .when_fn(&["$n.value"], |v| Ok(v[0].as_int().is_some_and(|n| n % 2 == 0))),
        RuleDefinition::new("grouped")
            .for_each("$t", "Tag")
            .for_each("$n", "Num")
            .when(field("$n.group").equals(field("$t.group")))
            .when(field("$n.value").gt(50)),
        RuleDefinition::new("pair")
            .for_each("$a", "Num")
            .for_each("$b", "Num")
            .when(field("$a.group").equals(field("$b.group")))
            .when(field("$a.value").lt(field("$b.value"))),
    ]
}

fn session(config: EngineConfig) -> Session {
    let mut builder = builder().with_config(config);
    for rule in rules() {
        builder.add_rule(rule);
    }
    builder.build().unwrap().new_session()
}

/// Applies the same seeded workload and returns each step's activations.
fn run(mut session: Session) -> Vec<Vec<(String, Vec<u64>)>> {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut snapshots = Vec::new();
    let mut nums: Vec<(FactHandle, Arc<Num>)> = Vec::new();
    let mut ordinal = HashMap::new();

    for group in 0..4_i64 {
        let h = session.insert("Tag", Arc::new(group)).unwrap();
        ordinal.insert(h, ordinal.len() as u64);
    }
    for step in 0..200 {
        if step % 5 == 4 && !nums.is_empty() {
            let (h, _) = nums.swap_remove(rng.gen_range(0..nums.len()));
            session.delete(h).unwrap();
        } else if step % 3 == 2 && !nums.is_empty() {
            let (h, payload) = &nums[rng.gen_range(0..nums.len())];
            payload.set(rng.gen_range(0..100));
            session.update(*h).unwrap();
        } else {
            let payload = num(rng.gen_range(0..100), rng.gen_range(0..4));
            let h = session.insert("Num", payload.clone()).unwrap();
            ordinal.insert(h, ordinal.len() as u64);
            nums.push((h, payload));
        }

        // Handles differ between sessions, so compare by insertion ordinal
        snapshots.push(
            session
                .activations()
                .iter()
                .map(|a| {
                    let tuple = a.tuple().handles().iter().map(|h| ordinal[h]).collect();
                    (a.rule_name().to_string(), tuple)
                })
                .collect(),
        );
        assert_eq!(session.matches(), session.recompute_matches());
    }
    snapshots
}

#[test]
fn parallel_agrees_with_sequential() {
    let sequential = run(session(EngineConfig::sequential()));
    let parallel = run(session(
        EngineConfig::parallel()
            .with_parallel_threshold(1)
            .with_worker_threads(4),
    ));
    assert_eq!(sequential, parallel);
}

#[test]
fn parallel_config_is_reported() {
    let session = session(EngineConfig::parallel().with_worker_threads(2));
    assert_eq!(session.config().execution, ExecutionMode::Parallel);
    assert_eq!(session.config().worker_threads, Some(2));
}
