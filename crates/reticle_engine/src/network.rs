//! The compiled rule network.
//!
//! Compilation resolves every field reference against the type registry and
//! splits each rule's conditions by the variables they read:
//!
//! - conditions over one variable become the filter of an alpha node for
//!   that variable's type (nodes with identical filters are shared);
//! - conditions over several variables are attached to the join level of
//!   their highest-positioned variable, so each is evaluated as soon as all
//!   of its inputs are bound.
//!
//! Fact groups (`exists` / `not exists`) are split the same way. Their
//! variables take the tuple positions after the rule's own, and their join
//! levels are only walked when a complete rule tuple is tested.
//!
//! A knowledge base's network is immutable and shared by every session. A
//! session that deploys rules or swaps predicates works on its own copy.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reticle_foundation::{Error, ErrorContext, Result, Value};
use reticle_memory::{Fact, FieldId, LogicalType, LogicalTypeId, TypeRegistry};

use crate::condition::{Condition, ExpressionCompiler, PredicateFn};
use crate::rule::{ActionFn, ConditionSource, Quantifier, RuleDefinition};

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a compiled rule within its network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(u32);

impl RuleId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Index of an alpha node within its network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct AlphaId(u32);

impl AlphaId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Bound Conditions
// =============================================================================

/// A condition argument resolved to a variable position and field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ArgRef {
    pub position: usize,
    pub type_id: LogicalTypeId,
    /// `None` reads the fact object itself.
    pub field: Option<FieldId>,
}

/// A condition whose arguments are resolved against a rule's variables.
#[derive(Clone)]
pub(crate) struct BoundCondition {
    pub label: Arc<str>,
    pub args: Vec<ArgRef>,
    pub predicate: PredicateFn,
}

impl BoundCondition {
    /// Evaluates the condition, reading each argument from the fact bound at
    /// its position.
    ///
    /// A field value that does not fit the field's declared kind fails the
    /// condition.
    pub fn evaluate<'f, L>(&self, registry: &TypeRegistry, lookup: L) -> Result<bool>
    where
        L: Fn(usize) -> Result<&'f Fact>,
    {
        let mut values = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let fact = lookup(arg.position)?;
            let value = read_arg(registry, fact, arg)
                .map_err(|e| Error::condition_evaluation(&*self.label, e.to_string()))?;
            values.push(value);
        }
        (self.predicate)(&values)
            .map_err(|e| Error::condition_evaluation(&*self.label, e.to_string()))
    }
}

fn read_arg(registry: &TypeRegistry, fact: &Fact, arg: &ArgRef) -> Result<Value> {
    let Some(field) = arg.field else {
        return Ok(fact.identity());
    };
    let descriptor = registry
        .get(arg.type_id)
        .and_then(|ty| ty.field_by_id(field))
        .ok_or_else(|| Error::internal(format!("field {field:?} missing from registry")))?;
    let value = fact.value(descriptor);
    match value.kind() {
        Some(kind) if !descriptor.kind().accepts(&value) => Err(Error::type_mismatch(
            format!("{} for field `{}`", descriptor.kind(), descriptor.name()),
            kind.to_string(),
        )),
        _ => Ok(value),
    }
}

impl fmt::Debug for BoundCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCondition")
            .field("label", &self.label)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Alpha Nodes
// =============================================================================

/// A rule variable fed by an alpha node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Consumer {
    pub rule: RuleId,
    pub position: usize,
}

/// A fact-group variable fed by an alpha node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct GroupConsumer {
    pub rule: RuleId,
    pub group: usize,
    /// Index among the group's own variables.
    pub position: usize,
}

/// A single-type filter shared by every variable with the same type and conditions.
#[derive(Clone, Debug)]
pub(crate) struct AlphaNode {
    pub type_id: LogicalTypeId,
    pub conditions: Vec<BoundCondition>,
    /// Fields read by `conditions`.
    pub fields: Vec<FieldId>,
    /// Whether `conditions` read the fact object itself.
    pub identity: bool,
    pub consumers: Vec<Consumer>,
    pub group_consumers: Vec<GroupConsumer>,
}

impl AlphaNode {
    /// Runs the filter against one fact. Conditions short-circuit in order.
    pub fn matches(&self, registry: &TypeRegistry, fact: &Fact) -> Result<bool> {
        for condition in &self.conditions {
            if !condition.evaluate(registry, |_| Ok(fact))? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

type AlphaKey = (LogicalTypeId, Vec<(usize, Vec<Option<FieldId>>)>);

fn alpha_key(type_id: LogicalTypeId, conditions: &[BoundCondition]) -> AlphaKey {
    let signature = conditions
        .iter()
        .map(|c| {
            let predicate = Arc::as_ptr(&c.predicate).cast::<()>().addr();
            (predicate, c.args.iter().map(|a| a.field).collect())
        })
        .collect();
    (type_id, signature)
}

// =============================================================================
// Compiled Rules
// =============================================================================

/// A declared fact variable after compilation.
#[derive(Clone, Debug)]
pub(crate) struct CompiledVar {
    pub name: Arc<str>,
    pub type_id: LogicalTypeId,
    pub alpha: AlphaId,
    /// Every field of this variable read by any of the rule's conditions.
    pub relevant_fields: Vec<FieldId>,
    pub relevant_identity: bool,
}

/// A fact group after compilation.
#[derive(Clone, Debug)]
pub(crate) struct CompiledGroup {
    pub quantifier: Quantifier,
    /// Group variables. Variable `k` sits at tuple position `arity + k`.
    pub vars: Vec<CompiledVar>,
    /// `joins[k]` holds the conditions checked when group variable `k` is bound.
    pub joins: Vec<Vec<BoundCondition>>,
}

/// A rule after compilation into the network.
#[derive(Clone)]
pub struct CompiledRule {
    pub(crate) id: RuleId,
    pub(crate) name: Arc<str>,
    pub(crate) salience: i32,
    pub(crate) refire: bool,
    pub(crate) vars: Vec<CompiledVar>,
    /// `joins[k]` holds the conditions checked when variable `k` is bound.
    /// `joins[0]` is always empty.
    pub(crate) joins: Vec<Vec<BoundCondition>>,
    pub(crate) groups: Vec<CompiledGroup>,
    pub(crate) action: Option<ActionFn>,
}

impl CompiledRule {
    /// The rule id.
    #[must_use]
    pub fn id(&self) -> RuleId {
        self.id
    }

    /// The rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The salience.
    #[must_use]
    pub fn salience(&self) -> i32 {
        self.salience
    }

    /// Returns true if fired activations become eligible again on the next `fire` call.
    #[must_use]
    pub fn refire(&self) -> bool {
        self.refire
    }

    /// Number of fact variables.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.vars.len()
    }

    /// Variable names, in declaration order.
    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| &*v.name)
    }

    /// Position of a variable in the rule's tuples.
    #[must_use]
    pub fn position_of(&self, var: &str) -> Option<usize> {
        self.vars.iter().position(|v| &*v.name == var)
    }

    /// Number of join conditions (conditions over two or more variables).
    #[must_use]
    pub fn join_condition_count(&self) -> usize {
        self.joins.iter().map(Vec::len).sum()
    }

    /// Number of fact groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("vars", &self.vars)
            .field("joins", &self.joins)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Condition Binding
// =============================================================================

type Relevant = (Vec<FieldId>, bool);

/// Conditions of one scope after binding, indexed by variable position.
struct Bound {
    filters: Vec<Vec<BoundCondition>>,
    joins: Vec<Vec<BoundCondition>>,
}

/// Resolves conditions against the variables in `scope`.
///
/// Every condition must read at least one variable at or after `own`; the
/// earlier ones belong to the enclosing rule. Fields read are recorded in
/// `relevant`, which has one entry per scope variable.
fn bind_conditions(
    rule: &str,
    scope: &[(&str, &LogicalType)],
    own: usize,
    conditions: &[Condition],
    relevant: &mut [Relevant],
) -> Result<Bound> {
    let invalid = |message: String| Error::invalid_rule(rule, message);
    let mut bound = Bound {
        filters: vec![Vec::new(); scope.len()],
        joins: vec![Vec::new(); scope.len()],
    };

    for condition in conditions {
        let mut args = Vec::with_capacity(condition.args().len());
        for reference in condition.args() {
            let position = scope
                .iter()
                .position(|(v, _)| *v == reference.var())
                .ok_or_else(|| {
                    invalid(format!(
                        "condition `{}` references unknown variable {}",
                        condition.label(),
                        reference.var()
                    ))
                })?;
            let ty = scope[position].1;
            let field = match reference.field() {
                Some(field_name) => {
                    let id = ty.require_field(field_name)?.id();
                    if !relevant[position].0.contains(&id) {
                        relevant[position].0.push(id);
                    }
                    Some(id)
                }
                None => {
                    relevant[position].1 = true;
                    None
                }
            };
            args.push(ArgRef {
                position,
                type_id: ty.id(),
                field,
            });
        }

        let (Some(low), Some(high)) = (
            args.iter().map(|a| a.position).min(),
            args.iter().map(|a| a.position).max(),
        ) else {
            return Err(invalid(format!(
                "condition `{}` references no variables",
                condition.label()
            )));
        };
        if high < own {
            return Err(invalid(format!(
                "condition `{}` reads no variable of its fact group",
                condition.label()
            )));
        }

        let mut condition = BoundCondition {
            label: condition.label().into(),
            args,
            predicate: condition.predicate().clone(),
        };
        if low == high {
            // Alpha filters see a single fact at position 0
            for arg in &mut condition.args {
                arg.position = 0;
            }
            bound.filters[high].push(condition);
        } else {
            bound.joins[high].push(condition);
        }
    }
    Ok(bound)
}

fn compile_sources(
    sources: &[ConditionSource],
    compiler: &dyn ExpressionCompiler,
) -> Result<Vec<Condition>> {
    sources
        .iter()
        .map(|source| match source {
            ConditionSource::Compiled(condition) => Ok(condition.clone()),
            ConditionSource::Expression(expression) => compiler.compile(expression),
        })
        .collect()
}

/// A fact group resolved and bound, before alpha nodes are allocated.
struct GroupPlan<'r> {
    quantifier: Quantifier,
    vars: Vec<(&'r str, &'r LogicalType)>,
    filters: Vec<Vec<BoundCondition>>,
    joins: Vec<Vec<BoundCondition>>,
    relevant: Vec<Relevant>,
}

// =============================================================================
// Network
// =============================================================================

/// Alpha nodes and compiled rules of one knowledge base.
#[derive(Clone, Debug, Default)]
pub struct Network {
    pub(crate) rules: Vec<CompiledRule>,
    pub(crate) alpha: Vec<AlphaNode>,
    pub(crate) alpha_by_type: HashMap<LogicalTypeId, Vec<AlphaId>>,
    shared: HashMap<AlphaKey, AlphaId>,
}

impl Network {
    /// Compiles rule definitions against a registry.
    ///
    /// # Errors
    /// Returns `InvalidRule`, `UnknownType` or `UnknownField` for the first
    /// rule that does not compile, with the rule name in the error context.
    pub fn compile(
        registry: &TypeRegistry,
        definitions: &[RuleDefinition],
        compiler: &dyn ExpressionCompiler,
    ) -> Result<Self> {
        let mut network = Self::default();
        for definition in definitions {
            network.add_rule(registry, definition, compiler)?;
        }
        Ok(network)
    }

    /// Compiles one more rule, sharing alpha nodes with the rules already
    /// present. On error the network is left unchanged.
    ///
    /// # Errors
    /// Same as [`Network::compile`].
    pub fn add_rule(
        &mut self,
        registry: &TypeRegistry,
        definition: &RuleDefinition,
        compiler: &dyn ExpressionCompiler,
    ) -> Result<RuleId> {
        self.compile_rule(registry, definition, compiler)
            .map_err(|e| e.with_context(ErrorContext::new().with_rule(definition.name())))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn compile_rule(
        &mut self,
        registry: &TypeRegistry,
        definition: &RuleDefinition,
        compiler: &dyn ExpressionCompiler,
    ) -> Result<RuleId> {
        let name = definition.name();
        let invalid = |message: String| Error::invalid_rule(name, message);

        if self.rules.iter().any(|r| &*r.name == name) {
            return Err(invalid("duplicate rule name".to_string()));
        }

        let mut vars: Vec<(&str, &LogicalType)> = Vec::new();
        for (var, type_name) in definition.facts() {
            if vars.iter().any(|(v, _)| *v == var) {
                return Err(invalid(format!("variable {var} declared twice")));
            }
            vars.push((var, registry.resolve(type_name)?));
        }
        if vars.is_empty() {
            return Err(invalid("rule declares no facts".to_string()));
        }

        let arity = vars.len();
        let conditions = compile_sources(definition.condition_sources(), compiler)?;
        let mut relevant: Vec<Relevant> = vec![(Vec::new(), false); arity];
        let Bound { filters, joins } = bind_conditions(name, &vars, 0, &conditions, &mut relevant)?;

        // Groups read the rule's variables too, so every group is bound
        // before the rule's relevant fields are final.
        let mut plans = Vec::new();
        for (quantifier, group) in definition.groups() {
            let mut scope = vars.clone();
            for (var, type_name) in group.facts() {
                if scope.iter().any(|(v, _)| *v == var) {
                    return Err(invalid(format!("group variable {var} is already declared")));
                }
                scope.push((var, registry.resolve(type_name)?));
            }
            if scope.len() == arity {
                return Err(invalid(format!("{quantifier} group declares no facts")));
            }

            let conditions = compile_sources(group.condition_sources(), compiler)?;
            relevant.resize(scope.len(), (Vec::new(), false));
            let bound = bind_conditions(name, &scope, arity, &conditions, &mut relevant)?;
            plans.push(GroupPlan {
                quantifier,
                vars: scope.split_off(arity),
                filters: bound.filters.into_iter().skip(arity).collect(),
                joins: bound.joins.into_iter().skip(arity).collect(),
                relevant: relevant.split_off(arity),
            });
        }

        // Nothing below can fail
        let id = RuleId(self.rules.len() as u32);
        let mut compiled_vars = Vec::with_capacity(arity);
        for (position, ((var, ty), filter)) in vars.iter().zip(filters).enumerate() {
            let alpha = self.alpha_node(ty.id(), filter);
            self.alpha[alpha.index()].consumers.push(Consumer { rule: id, position });
            compiled_vars.push(compiled_var(var, ty, alpha, std::mem::take(&mut relevant[position])));
        }

        let mut groups = Vec::with_capacity(plans.len());
        for (group, plan) in plans.into_iter().enumerate() {
            let mut group_vars = Vec::with_capacity(plan.vars.len());
            let fields = plan.filters.into_iter().zip(plan.relevant);
            for (position, ((var, ty), (filter, relevant))) in plan.vars.iter().zip(fields).enumerate() {
                let alpha = self.alpha_node(ty.id(), filter);
                self.alpha[alpha.index()].group_consumers.push(GroupConsumer {
                    rule: id,
                    group,
                    position,
                });
                group_vars.push(compiled_var(var, ty, alpha, relevant));
            }
            groups.push(CompiledGroup {
                quantifier: plan.quantifier,
                vars: group_vars,
                joins: plan.joins,
            });
        }

        self.rules.push(CompiledRule {
            id,
            name: definition.name_arc(),
            salience: definition.salience(),
            refire: definition.refire(),
            vars: compiled_vars,
            joins,
            groups,
            action: definition.action().cloned(),
        });
        Ok(id)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn alpha_node(&mut self, type_id: LogicalTypeId, conditions: Vec<BoundCondition>) -> AlphaId {
        let key = alpha_key(type_id, &conditions);
        if let Some(id) = self.shared.get(&key) {
            return *id;
        }

        let mut fields = Vec::new();
        let mut identity = false;
        for arg in conditions.iter().flat_map(|c| &c.args) {
            match arg.field {
                Some(field) if !fields.contains(&field) => fields.push(field),
                Some(_) => {}
                None => identity = true,
            }
        }

        let id = AlphaId(self.alpha.len() as u32);
        self.alpha.push(AlphaNode {
            type_id,
            conditions,
            fields,
            identity,
            consumers: Vec::new(),
            group_consumers: Vec::new(),
        });
        self.alpha_by_type.entry(type_id).or_default().push(id);
        self.shared.insert(key, id);
        id
    }

    /// Returns true if any compiled condition carries this label.
    #[must_use]
    pub fn has_condition(&self, label: &str) -> bool {
        let alpha = self.alpha.iter().flat_map(|n| &n.conditions);
        let joins = self.rules.iter().flat_map(|r| {
            r.joins
                .iter()
                .chain(r.groups.iter().flat_map(|g| &g.joins))
                .flatten()
        });
        alpha.chain(joins).any(|c| &*c.label == label)
    }

    /// Swaps the predicate of every condition carrying `label`, keeping its
    /// arguments. Returns the number of conditions changed.
    ///
    /// Alpha nodes are shared by identical conditions, so a filter used by
    /// several rules changes for all of them.
    pub(crate) fn replace_predicate(&mut self, label: &str, predicate: &PredicateFn) -> usize {
        let mut replaced = 0;
        let mut swap = |condition: &mut BoundCondition| {
            if &*condition.label == label {
                condition.predicate = Arc::clone(predicate);
                replaced += 1;
            }
        };

        for node in &mut self.alpha {
            node.conditions.iter_mut().for_each(&mut swap);
        }
        for rule in &mut self.rules {
            rule.joins.iter_mut().flatten().for_each(&mut swap);
            for group in &mut rule.groups {
                group.joins.iter_mut().flatten().for_each(&mut swap);
            }
        }

        if replaced > 0 {
            self.reindex_alpha();
        }
        replaced
    }

    /// Rebuilds the sharing index after filters changed.
    #[allow(clippy::cast_possible_truncation)]
    fn reindex_alpha(&mut self) {
        self.shared.clear();
        for (index, node) in self.alpha.iter().enumerate() {
            self.shared
                .entry(alpha_key(node.type_id, &node.conditions))
                .or_insert(AlphaId(index as u32));
        }
    }

    /// All compiled rules, in definition order.
    #[must_use]
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&CompiledRule> {
        self.rules.get(id.index())
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn rule_by_name(&self, name: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    /// Number of distinct alpha nodes.
    #[must_use]
    pub fn alpha_count(&self) -> usize {
        self.alpha.len()
    }

    pub(crate) fn alpha_of_type(&self, type_id: LogicalTypeId) -> &[AlphaId] {
        self.alpha_by_type.get(&type_id).map_or(&[][..], Vec::as_slice)
    }
}

fn compiled_var(name: &str, ty: &LogicalType, alpha: AlphaId, relevant: Relevant) -> CompiledVar {
    let (relevant_fields, relevant_identity) = relevant;
    CompiledVar {
        name: name.into(),
        type_id: ty.id(),
        alpha,
        relevant_fields,
        relevant_identity,
    }
}
