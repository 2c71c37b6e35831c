//! Reference evaluator.
//!
//! Computes every rule's fully bound tuples from scratch against the current
//! facts, ignoring all incremental state. Sessions use it to cross-check the
//! network (`Session::recompute_matches`); the two must always agree.

use std::collections::BTreeSet;

use reticle_foundation::FactHandle;
use reticle_memory::Fact;

use crate::beta::Tuple;
use crate::network::{CompiledVar, RuleId};
use crate::propagate::{GroupPools, MatchContext};

/// Fully bound tuples, keyed by rule, in a canonical order.
pub type MatchSet = BTreeSet<(RuleId, Tuple)>;

/// Evaluates every rule against every fact. Failing conditions count as
/// not matching, and so does a fact group whose conditions fail.
pub(crate) fn evaluate(ctx: MatchContext<'_>) -> MatchSet {
    let mut matches = MatchSet::new();

    for rule in ctx.network.rules() {
        let candidates: Vec<Vec<_>> = rule.vars.iter().map(|var| scan(ctx, var)).collect();
        let pools: GroupPools = rule
            .groups
            .iter()
            .map(|group| group.vars.iter().map(|var| scan(ctx, var)).collect())
            .collect();

        let mut tuples: Vec<Tuple> = candidates[0].iter().copied().map(Tuple::single).collect();
        for (level, right) in candidates.iter().enumerate().skip(1) {
            tuples = tuples
                .iter()
                .flat_map(|t| right.iter().map(move |h| t.extend(*h)))
                .filter(|t| ctx.join_holds(&rule.joins[level], t).unwrap_or(false))
                .collect();
        }

        matches.extend(
            tuples
                .into_iter()
                .filter(|t| ctx.groups_hold(rule, t, &pools).unwrap_or(false))
                .map(|t| (rule.id(), t)),
        );
    }

    matches
}

/// Facts passing a variable's alpha filter, in handle order.
fn scan(ctx: MatchContext<'_>, var: &CompiledVar) -> Vec<FactHandle> {
    ctx.store
        .of_type(var.type_id)
        .filter(|fact| ctx.alpha_holds(var.alpha, fact).unwrap_or(false))
        .map(Fact::handle)
        .collect()
}
