//! Rule definitions.
//!
//! A rule declares fact variables with their logical types, a list of
//! conditions over those variables, and one action. It may also require that
//! some [`FactGroup`] has a match (or has none) without binding its facts.
//! Definitions are plain data; the [`KnowledgeBuilder`](crate::KnowledgeBuilder)
//! compiles them into the shared network.

use std::fmt;
use std::sync::Arc;

use reticle_foundation::{Result, Value};

use crate::condition::{Condition, Expression};
use crate::rhs::RhsContext;

/// Salience assigned to rules that do not set one.
pub const DEFAULT_SALIENCE: i32 = 0;

/// A rule action, run with the activation's bound facts.
pub type ActionFn = Arc<dyn Fn(&mut RhsContext<'_>) -> Result<()> + Send + Sync>;

/// A condition as written in a rule, before compilation.
#[derive(Clone, Debug)]
pub(crate) enum ConditionSource {
    Compiled(Condition),
    Expression(Expression),
}

/// Whether a fact group must have a match or must have none.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// At least one binding of the group satisfies its conditions.
    Exists,
    /// No binding of the group satisfies its conditions.
    NotExists,
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => write!(f, "exists"),
            Self::NotExists => write!(f, "not exists"),
        }
    }
}

/// Extra fact variables tested for existence only.
///
/// Group conditions may read the rule's own variables, but each must read at
/// least one variable of the group. Group facts never appear in activation
/// tuples.
///
/// ```
/// use reticle_engine::{FactGroup, RuleDefinition, field};
///
/// let idle = RuleDefinition::new("idle_worker")
///     .for_each("$w", "Worker")
///     .not_exists(
///         FactGroup::new()
///             .for_each("$t", "Task")
///             .when(field("$t.owner").equals(field("$w.id"))),
///     );
/// assert_eq!(idle.groups().count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct FactGroup {
    facts: Vec<(Arc<str>, Arc<str>)>,
    conditions: Vec<ConditionSource>,
}

impl FactGroup {
    /// Starts an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a group variable of a logical type.
    #[must_use]
    pub fn for_each(mut self, var: &str, type_name: &str) -> Self {
        self.facts.push((var.into(), type_name.into()));
        self
    }

    /// Adds a declarative condition.
    #[must_use]
    pub fn when(mut self, expression: Expression) -> Self {
        self.conditions.push(ConditionSource::Expression(expression));
        self
    }

    /// Adds an opaque predicate over the referenced fields.
    #[must_use]
    pub fn when_fn<F>(self, args: &[&str], predicate: F) -> Self
    where
        F: Fn(&[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        self.when_condition(Condition::new(args, predicate))
    }

    /// Adds an already compiled condition.
    #[must_use]
    pub fn when_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(ConditionSource::Compiled(condition));
        self
    }

    /// Declared group variables and their type names, in order.
    pub fn facts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.facts.iter().map(|(var, ty)| (&**var, &**ty))
    }

    pub(crate) fn condition_sources(&self) -> &[ConditionSource] {
        &self.conditions
    }
}

impl fmt::Debug for FactGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactGroup")
            .field("facts", &self.facts)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// Builder-style description of one production rule.
///
/// ```
/// use reticle_engine::{RuleDefinition, field};
///
/// let rule = RuleDefinition::new("R1")
///     .for_each("$g", "Guess")
///     .for_each("$p", "Player")
///     .when(field("$g.number").equals(field("$p.secret")))
///     .when(field("$p").differs(field("$g.author")))
///     .then(|ctx| ctx.delete_var("$p"));
/// assert_eq!(rule.name(), "R1");
/// ```
#[derive(Clone)]
pub struct RuleDefinition {
    name: Arc<str>,
    salience: i32,
    refire: bool,
    facts: Vec<(Arc<str>, Arc<str>)>,
    conditions: Vec<ConditionSource>,
    groups: Vec<(Quantifier, FactGroup)>,
    action: Option<ActionFn>,
}

impl RuleDefinition {
    /// Starts a rule with the given name.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            salience: DEFAULT_SALIENCE,
            refire: false,
            facts: Vec::new(),
            conditions: Vec::new(),
            groups: Vec::new(),
            action: None,
        }
    }

    /// Sets the salience. Higher fires first.
    #[must_use]
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    /// Lets fired activations become eligible again on the next `fire` call.
    #[must_use]
    pub fn with_refire(mut self, refire: bool) -> Self {
        self.refire = refire;
        self
    }

    /// Declares a fact variable of a logical type.
    #[must_use]
    pub fn for_each(mut self, var: &str, type_name: &str) -> Self {
        self.facts.push((var.into(), type_name.into()));
        self
    }

    /// Adds a declarative condition, compiled by the knowledge builder.
    #[must_use]
    pub fn when(mut self, expression: Expression) -> Self {
        self.conditions.push(ConditionSource::Expression(expression));
        self
    }

    /// Adds an opaque predicate over the referenced fields.
    #[must_use]
    pub fn when_fn<F>(self, args: &[&str], predicate: F) -> Self
    where
        F: Fn(&[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        self.when_condition(Condition::new(args, predicate))
    }

    /// Adds an already compiled condition.
    #[must_use]
    pub fn when_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(ConditionSource::Compiled(condition));
        self
    }

    /// Requires at least one match of the group.
    #[must_use]
    pub fn exists(mut self, group: FactGroup) -> Self {
        self.groups.push((Quantifier::Exists, group));
        self
    }

    /// Requires that the group has no match.
    #[must_use]
    pub fn not_exists(mut self, group: FactGroup) -> Self {
        self.groups.push((Quantifier::NotExists, group));
        self
    }

    /// Sets the action.
    #[must_use]
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut RhsContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
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

    /// Returns true if the rule re-fires on every `fire` call.
    #[must_use]
    pub fn refire(&self) -> bool {
        self.refire
    }

    /// Declared variables and their type names, in order.
    pub fn facts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.facts.iter().map(|(var, ty)| (&**var, &**ty))
    }

    /// Number of conditions.
    #[must_use]
    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    /// Fact groups with their quantifiers, in declaration order.
    pub fn groups(&self) -> impl Iterator<Item = (Quantifier, &FactGroup)> {
        self.groups.iter().map(|(q, g)| (*q, g))
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub(crate) fn condition_sources(&self) -> &[ConditionSource] {
        &self.conditions
    }

    pub(crate) fn action(&self) -> Option<&ActionFn> {
        self.action.as_ref()
    }
}

impl fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDefinition")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("refire", &self.refire)
            .field("facts", &self.facts)
            .field("conditions", &self.conditions.len())
            .field("groups", &self.groups)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}
