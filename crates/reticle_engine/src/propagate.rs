//! Incremental propagation of fact changes through the network.
//!
//! Every entry point runs synchronously. Predicate evaluation for a batch
//! of independent candidates (the alpha nodes of one fact's type, or the
//! candidate tuples of one join level) goes through the coordinator and may
//! fan out; memories and the agenda are only ever touched afterwards, on
//! the calling thread, in candidate order.
//!
//! Rules with fact groups gate their last level. A complete tuple is
//! admitted to the agenda only while its groups hold, and every change to a
//! group's alpha memories re-tests the rule's complete tuples afterwards.

use std::collections::BTreeSet;

use tracing::warn;

use reticle_foundation::{Error, FactHandle, Result};
use reticle_memory::{ChangedFields, Fact, FactStore, LogicalTypeId, TypeRegistry};

use crate::agenda::Agenda;
use crate::alpha::AlphaMemory;
use crate::beta::{RuleMemory, Tuple};
use crate::coordinator::ExecutionCoordinator;
use crate::network::{
    AlphaId, BoundCondition, CompiledGroup, CompiledRule, Consumer, Network, RuleId,
};
use crate::rule::Quantifier;

/// Candidate handles for each variable of each fact group of one rule.
pub(crate) type GroupPools = Vec<Vec<Vec<FactHandle>>>;

/// Read-only view of everything predicates may look at.
#[derive(Clone, Copy)]
pub(crate) struct MatchContext<'a> {
    pub network: &'a Network,
    pub registry: &'a TypeRegistry,
    pub store: &'a FactStore,
}

impl MatchContext<'_> {
    pub fn alpha_holds(self, alpha: AlphaId, fact: &Fact) -> Result<bool> {
        self.network.alpha[alpha.index()].matches(self.registry, fact)
    }

    /// Checks a level's join conditions against a candidate tuple, in
    /// declaration order, stopping at the first that fails.
    pub fn join_holds(self, conditions: &[BoundCondition], tuple: &Tuple) -> Result<bool> {
        for condition in conditions {
            let holds = condition.evaluate(self.registry, |position| {
                let handle = tuple
                    .get(position)
                    .ok_or_else(|| Error::internal(format!("tuple {tuple} has no position {position}")))?;
                self.store.get(handle)
            })?;
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Checks every fact group of a rule against one complete tuple.
    pub fn groups_hold(self, rule: &CompiledRule, tuple: &Tuple, pools: &GroupPools) -> Result<bool> {
        for (group, pool) in rule.groups.iter().zip(pools) {
            let found = self.group_match(group, tuple, 0, pool)?;
            let holds = match group.quantifier {
                Quantifier::Exists => found,
                Quantifier::NotExists => !found,
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Searches depth-first for one binding of the group variables from
    /// `level` on. Stops at the first complete binding.
    fn group_match(
        self,
        group: &CompiledGroup,
        partial: &Tuple,
        level: usize,
        pool: &[Vec<FactHandle>],
    ) -> Result<bool> {
        let Some(candidates) = pool.get(level) else {
            return Ok(true);
        };
        for handle in candidates {
            let extended = partial.extend(*handle);
            if self.join_holds(&group.joins[level], &extended)?
                && self.group_match(group, &extended, level + 1, pool)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Per-session memories of every network node.
#[derive(Clone, Debug)]
pub(crate) struct MatchState {
    pub alpha: Vec<AlphaMemory>,
    pub rules: Vec<RuleMemory>,
}

impl MatchState {
    pub fn new(network: &Network) -> Self {
        let mut state = Self {
            alpha: Vec::new(),
            rules: Vec::new(),
        };
        state.grow(network);
        state
    }

    /// Adds empty memories for nodes and rules compiled after this state
    /// was built.
    pub fn grow(&mut self, network: &Network) {
        self.alpha.resize(network.alpha.len(), AlphaMemory::new());
        for rule in &network.rules[self.rules.len()..] {
            self.rules
                .push(RuleMemory::new(rule.arity(), !rule.groups.is_empty()));
        }
    }
}

/// One propagation pass over a session's memories.
pub(crate) struct Propagator<'a> {
    pub ctx: MatchContext<'a>,
    pub coordinator: &'a ExecutionCoordinator,
    pub state: &'a mut MatchState,
    pub agenda: &'a mut Agenda,
    pub errors: &'a mut Vec<Error>,
}

impl Propagator<'_> {
    /// Propagates a freshly stored fact.
    pub fn assert_fact(&mut self, handle: FactHandle) -> Result<()> {
        let ctx = self.ctx;
        let fact = ctx.store.get(handle)?;
        let nodes = ctx.network.alpha_of_type(fact.type_id());
        let results = self.coordinator.map(nodes, |id| ctx.alpha_holds(*id, fact));

        let mut entered = Vec::new();
        for (id, result) in nodes.iter().zip(results) {
            if self.check(result) {
                self.state.alpha[id.index()].insert(handle);
                entered.push(*id);
            }
        }

        // All memberships are in place before any join runs, so a fact that
        // binds several variables of one rule meets itself.
        let mut dirty = BTreeSet::new();
        for id in entered {
            let node = &ctx.network.alpha[id.index()];
            for consumer in &node.consumers {
                self.activate(consumer.rule, consumer.position, handle);
            }
            dirty.extend(node.group_consumers.iter().map(|c| c.rule));
        }
        self.regate(dirty);
        Ok(())
    }

    /// Removes a fact from every memory. Runs before the store forgets it.
    pub fn retract_fact(&mut self, handle: FactHandle, type_id: LogicalTypeId) {
        let network = self.ctx.network;
        let mut dirty = BTreeSet::new();
        for id in network.alpha_of_type(type_id) {
            if self.state.alpha[id.index()].remove(handle) {
                let node = &network.alpha[id.index()];
                for consumer in &node.consumers {
                    self.retract(consumer.rule, consumer.position, handle);
                }
                dirty.extend(node.group_consumers.iter().map(|c| c.rule));
            }
        }
        self.regate(dirty);
    }

    /// Re-propagates a fact whose fields changed.
    ///
    /// Alpha nodes reading a changed field are re-evaluated. A rule variable
    /// bound to the fact is re-joined when any field its rule reads from it
    /// changed. All retractions happen before any re-derivation.
    pub fn update_fact(&mut self, handle: FactHandle, changed: &ChangedFields) -> Result<()> {
        if changed.is_empty() {
            return Ok(());
        }

        let ctx = self.ctx;
        let fact = ctx.store.get(handle)?;
        let nodes = ctx.network.alpha_of_type(fact.type_id());
        let touched: Vec<AlphaId> = nodes
            .iter()
            .copied()
            .filter(|id| {
                let node = &ctx.network.alpha[id.index()];
                changed.touches(&node.fields, node.identity)
            })
            .collect();
        let results = self.coordinator.map(&touched, |id| ctx.alpha_holds(*id, fact));
        let mut verdicts = Vec::with_capacity(touched.len());
        for (id, result) in touched.iter().zip(results) {
            verdicts.push((*id, self.check(result)));
        }

        let mut leaving = Vec::new();
        let mut entering = Vec::new();
        let mut retracts: Vec<Consumer> = Vec::new();
        let mut adds: Vec<Consumer> = Vec::new();
        let mut dirty = BTreeSet::new();

        for id in nodes {
            let node = &ctx.network.alpha[id.index()];
            let was = self.state.alpha[id.index()].contains(handle);
            let now = verdicts
                .iter()
                .find(|(v, _)| v == id)
                .map_or(was, |(_, now)| *now);

            match (was, now) {
                (true, false) => {
                    leaving.push(*id);
                    retracts.extend(&node.consumers);
                    dirty.extend(node.group_consumers.iter().map(|c| c.rule));
                }
                (false, true) => {
                    entering.push(*id);
                    adds.extend(&node.consumers);
                    dirty.extend(node.group_consumers.iter().map(|c| c.rule));
                }
                (true, true) => {
                    for consumer in &node.consumers {
                        let var = &ctx.network.rules[consumer.rule.index()].vars[consumer.position];
                        if changed.touches(&var.relevant_fields, var.relevant_identity) {
                            retracts.push(*consumer);
                            adds.push(*consumer);
                        }
                    }
                    for consumer in &node.group_consumers {
                        let rule = &ctx.network.rules[consumer.rule.index()];
                        let var = &rule.groups[consumer.group].vars[consumer.position];
                        if changed.touches(&var.relevant_fields, var.relevant_identity) {
                            dirty.insert(consumer.rule);
                        }
                    }
                }
                (false, false) => {}
            }
        }

        for id in leaving {
            self.state.alpha[id.index()].remove(handle);
        }
        for consumer in retracts {
            self.retract(consumer.rule, consumer.position, handle);
        }
        for id in entering {
            self.state.alpha[id.index()].insert(handle);
        }
        for consumer in adds {
            self.activate(consumer.rule, consumer.position, handle);
        }
        self.regate(dirty);
        Ok(())
    }

    /// Brings a rule compiled after the session started up to date with the
    /// facts already stored. Alpha nodes from `first_new_alpha` on are new
    /// and start empty; older ones are shared and already populated.
    pub fn seed_rule(&mut self, rule: RuleId, first_new_alpha: usize) {
        let ctx = self.ctx;
        for (index, node) in ctx.network.alpha.iter().enumerate().skip(first_new_alpha) {
            let facts: Vec<&Fact> = ctx.store.of_type(node.type_id).collect();
            let results = self
                .coordinator
                .map(&facts, |fact| node.matches(ctx.registry, fact));
            for (fact, result) in facts.iter().zip(results) {
                if self.check(result) {
                    self.state.alpha[index].insert(fact.handle());
                }
            }
        }

        let compiled = &ctx.network.rules[rule.index()];
        let seeds: Vec<FactHandle> = self.state.alpha[compiled.vars[0].alpha.index()]
            .iter()
            .collect();
        for handle in seeds {
            self.activate(rule, 0, handle);
        }
    }

    /// The fact entered the alpha memory feeding `position` of a rule.
    fn activate(&mut self, rule: RuleId, position: usize, handle: FactHandle) {
        let network = self.ctx.network;
        let rule = &network.rules[rule.index()];
        let arity = rule.arity();

        let mut frontier = if position == 0 {
            let seed = Tuple::single(handle);
            if self.state.rules[rule.id.index()].levels[0].insert(seed.clone()) {
                vec![seed]
            } else {
                Vec::new()
            }
        } else {
            // Right activation: pair the fact with every left partial match
            let candidates: Vec<Tuple> = self.state.rules[rule.id.index()].levels[position - 1]
                .iter()
                .map(|t| t.extend(handle))
                .collect();
            self.join(rule, position, candidates)
        };

        // Left activations: extend new partial matches one variable at a time
        let mut level = position;
        while level + 1 < arity && !frontier.is_empty() {
            level += 1;
            let right = &self.state.alpha[rule.vars[level].alpha.index()];
            let candidates: Vec<Tuple> = frontier
                .iter()
                .flat_map(|t| right.iter().map(move |h| t.extend(h)))
                .collect();
            frontier = self.join(rule, level, candidates);
        }

        if level + 1 == arity {
            self.admit(rule, frontier);
        }
    }

    /// Hands new complete tuples to the agenda, through the gate when the
    /// rule has fact groups.
    fn admit(&mut self, rule: &CompiledRule, tuples: Vec<Tuple>) {
        if rule.groups.is_empty() {
            for tuple in tuples {
                self.agenda.add(rule, tuple);
            }
            return;
        }

        let ctx = self.ctx;
        let pools = self.group_pools(rule);
        let results = self
            .coordinator
            .map(&tuples, |t| ctx.groups_hold(rule, t, &pools));
        let verdicts: Vec<bool> = results.into_iter().map(|r| self.check(r)).collect();
        for (tuple, holds) in tuples.into_iter().zip(verdicts) {
            let gate = self.state.rules[rule.id.index()].gated.as_mut();
            if holds && gate.is_some_and(|g| g.insert(tuple.clone())) {
                self.agenda.add(rule, tuple);
            }
        }
    }

    /// Re-tests the complete tuples of rules whose groups may have changed.
    /// Revoked tuples leave the agenda before newly admitted ones join it.
    fn regate(&mut self, rules: BTreeSet<RuleId>) {
        let ctx = self.ctx;
        for id in rules {
            let rule = &ctx.network.rules[id.index()];
            let Some(last) = self.state.rules[id.index()].levels.last() else {
                continue;
            };
            let candidates: Vec<Tuple> = last.iter().cloned().collect();
            let pools = self.group_pools(rule);
            let results = self
                .coordinator
                .map(&candidates, |t| ctx.groups_hold(rule, t, &pools));
            let verdicts: Vec<bool> = results.into_iter().map(|r| self.check(r)).collect();

            let Some(gate) = self.state.rules[id.index()].gated.as_mut() else {
                continue;
            };
            let mut admitted = Vec::new();
            for (tuple, holds) in candidates.into_iter().zip(verdicts) {
                if !holds {
                    if gate.remove(&tuple) {
                        self.agenda.remove(id, &tuple);
                    }
                } else if !gate.contains(&tuple) {
                    admitted.push(tuple);
                }
            }
            for tuple in admitted {
                gate.insert(tuple.clone());
                self.agenda.add(rule, tuple);
            }
        }
    }

    fn group_pools(&self, rule: &CompiledRule) -> GroupPools {
        rule.groups
            .iter()
            .map(|group| {
                group
                    .vars
                    .iter()
                    .map(|var| self.state.alpha[var.alpha.index()].iter().collect())
                    .collect()
            })
            .collect()
    }

    /// Filters candidates of one level and stores the new ones.
    fn join(&mut self, rule: &CompiledRule, level: usize, candidates: Vec<Tuple>) -> Vec<Tuple> {
        let conditions = &rule.joins[level];
        let passed: Vec<bool> = if conditions.is_empty() {
            vec![true; candidates.len()]
        } else {
            let ctx = self.ctx;
            let results = self
                .coordinator
                .map(&candidates, |t| ctx.join_holds(conditions, t));
            results.into_iter().map(|r| self.check(r)).collect()
        };

        let memory = &mut self.state.rules[rule.id.index()].levels[level];
        candidates
            .into_iter()
            .zip(passed)
            .filter_map(|(tuple, ok)| (ok && memory.insert(tuple.clone())).then_some(tuple))
            .collect()
    }

    /// The fact left the alpha memory feeding `position` of a rule.
    fn retract(&mut self, rule: RuleId, position: usize, handle: FactHandle) {
        let compiled = &self.ctx.network.rules[rule.index()];
        let last = compiled.arity() - 1;
        let memory = &mut self.state.rules[rule.index()];
        for level in position..=last {
            let removed = memory.levels[level].remove_at(position, handle);
            if level == last {
                for tuple in &removed {
                    let live = memory.gated.as_mut().is_none_or(|g| g.remove(tuple));
                    if live {
                        self.agenda.remove(rule, tuple);
                    }
                }
            }
        }
    }

    fn check(&mut self, result: Result<bool>) -> bool {
        match result {
            Ok(holds) => holds,
            Err(error) => {
                warn!(%error, "condition failed, treating as no match");
                self.errors.push(error);
                false
            }
        }
    }
}
