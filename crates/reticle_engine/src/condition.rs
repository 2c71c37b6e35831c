//! Compiled conditions and the declarative expressions they come from.
//!
//! The network only ever sees a [`Condition`]: an ordered list of field
//! references plus an opaque predicate over their values. How a predicate is
//! produced is up to an [`ExpressionCompiler`]; the built-in
//! [`ClosureCompiler`] turns an [`Expression`] tree into nested closures.

use std::fmt;
use std::sync::Arc;

use reticle_foundation::{Error, Result, Value};

// =============================================================================
// Field References
// =============================================================================

/// A reference to a field of a fact variable (`$g.number`) or to the fact
/// object itself (`$p`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    var: Arc<str>,
    field: Option<Arc<str>>,
}

impl FieldRef {
    /// A reference to a named field of a variable.
    #[must_use]
    pub fn new(var: &str, field: &str) -> Self {
        Self {
            var: var.into(),
            field: Some(field.into()),
        }
    }

    /// A reference to the fact object bound to a variable.
    #[must_use]
    pub fn identity(var: &str) -> Self {
        Self {
            var: var.into(),
            field: None,
        }
    }

    /// Parses `"$var.field"` or `"$var"`, splitting on the first dot.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.split_once('.') {
            Some((var, field)) => Self::new(var, field),
            None => Self::identity(text),
        }
    }

    /// The variable name, including its sigil.
    #[must_use]
    pub fn var(&self) -> &str {
        &self.var
    }

    /// The field name, or `None` for the fact object itself.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

impl From<&str> for FieldRef {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{field}", self.var),
            None => write!(f, "{}", self.var),
        }
    }
}

// =============================================================================
// Compiled Condition
// =============================================================================

/// A compiled predicate over the values of a condition's arguments, in order.
pub type PredicateFn = Arc<dyn Fn(&[Value]) -> Result<bool> + Send + Sync>;

/// An opaque predicate bound to the fields it reads.
///
/// A condition with one variable among its arguments is an alpha condition;
/// one with several is a join condition.
#[derive(Clone)]
pub struct Condition {
    label: Arc<str>,
    args: Vec<FieldRef>,
    predicate: PredicateFn,
}

impl Condition {
    /// Creates a condition from argument references and a predicate.
    ///
    /// ```
    /// use reticle_engine::Condition;
    /// use reticle_foundation::Value;
    ///
    /// let even = Condition::new(&["$p.secret"], |v: &[Value]| {
    ///     Ok(v[0].as_int().is_some_and(|n| n % 2 == 0))
    /// });
    /// assert_eq!(even.evaluate(&[Value::Int(4)]).unwrap(), true);
    /// ```
    pub fn new<F>(args: &[&str], predicate: F) -> Self
    where
        F: Fn(&[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        let args: Vec<FieldRef> = args.iter().map(|a| FieldRef::parse(a)).collect();
        Self::from_parts(args, Arc::new(predicate))
    }

    /// Creates a condition from already parsed references and a shared predicate.
    #[must_use]
    pub fn from_parts(args: Vec<FieldRef>, predicate: PredicateFn) -> Self {
        let label = format!(
            "fn({})",
            args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        );
        Self {
            label: label.into(),
            args,
            predicate,
        }
    }

    /// Replaces the diagnostic label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = label.into();
        self
    }

    /// The diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The argument references, in predicate order.
    #[must_use]
    pub fn args(&self) -> &[FieldRef] {
        &self.args
    }

    /// The shared predicate.
    #[must_use]
    pub fn predicate(&self) -> &PredicateFn {
        &self.predicate
    }

    /// Distinct variables referenced, in order of first appearance.
    #[must_use]
    pub fn vars(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        for arg in &self.args {
            if !vars.contains(&arg.var()) {
                vars.push(arg.var());
            }
        }
        vars
    }

    /// Runs the predicate.
    ///
    /// # Errors
    /// Propagates the predicate's own error.
    pub fn evaluate(&self, values: &[Value]) -> Result<bool> {
        (self.predicate)(values)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("label", &self.label)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Declarative Expressions
// =============================================================================

/// Comparison operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `==`, with numeric promotion.
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// The operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Applies the operator.
    ///
    /// # Errors
    /// Ordering operators fail on values that cannot be ordered.
    pub fn apply(self, left: &Value, right: &Value) -> Result<bool> {
        Ok(match self {
            Self::Eq => left.loosely_equals(right),
            Self::Ne => !left.loosely_equals(right),
            Self::Lt => left.compare(right)?.is_lt(),
            Self::Le => left.compare(right)?.is_le(),
            Self::Gt => left.compare(right)?.is_gt(),
            Self::Ge => left.compare(right)?.is_ge(),
        })
    }
}

/// One side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// A field (or fact object) of a variable.
    Field(FieldRef),
    /// A constant.
    Literal(Value),
}

/// Shorthand for a field operand: `field("$g.number")`.
#[must_use]
pub fn field(reference: &str) -> Operand {
    Operand::Field(FieldRef::parse(reference))
}

/// Shorthand for a literal operand: `lit(4)`.
#[must_use]
pub fn lit(value: impl Into<Value>) -> Operand {
    Operand::Literal(value.into())
}

impl From<FieldRef> for Operand {
    fn from(reference: FieldRef) -> Self {
        Self::Field(reference)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Self::Literal(Value::Int(n))
    }
}

impl From<i32> for Operand {
    fn from(n: i32) -> Self {
        Self::Literal(Value::from(n))
    }
}

impl From<f64> for Operand {
    fn from(n: f64) -> Self {
        Self::Literal(Value::Float(n))
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }
}

impl Operand {
    fn compare(self, op: CmpOp, other: impl Into<Operand>) -> Expression {
        Expression::Compare(self, op, other.into())
    }

    /// `self == other`
    #[must_use]
    pub fn equals(self, other: impl Into<Operand>) -> Expression {
        self.compare(CmpOp::Eq, other)
    }

    /// `self != other`
    #[must_use]
    pub fn differs(self, other: impl Into<Operand>) -> Expression {
        self.compare(CmpOp::Ne, other)
    }

    /// `self < other`
    #[must_use]
    pub fn lt(self, other: impl Into<Operand>) -> Expression {
        self.compare(CmpOp::Lt, other)
    }

    /// `self <= other`
    #[must_use]
    pub fn le(self, other: impl Into<Operand>) -> Expression {
        self.compare(CmpOp::Le, other)
    }

    /// `self > other`
    #[must_use]
    pub fn gt(self, other: impl Into<Operand>) -> Expression {
        self.compare(CmpOp::Gt, other)
    }

    /// `self >= other`
    #[must_use]
    pub fn ge(self, other: impl Into<Operand>) -> Expression {
        self.compare(CmpOp::Ge, other)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(reference) => write!(f, "{reference}"),
            Self::Literal(value) => write!(f, "{value:?}"),
        }
    }
}

/// A declarative boolean expression over fact fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// A binary comparison.
    Compare(Operand, CmpOp, Operand),
    /// All sub-expressions hold (true when empty).
    And(Vec<Expression>),
    /// At least one sub-expression holds (false when empty).
    Or(Vec<Expression>),
    /// The sub-expression does not hold.
    Not(Box<Expression>),
}

impl Expression {
    /// `self && other`
    #[must_use]
    pub fn and(self, other: Expression) -> Self {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// `self || other`
    #[must_use]
    pub fn or(self, other: Expression) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// `!self`
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Distinct field references, in order of first appearance.
    #[must_use]
    pub fn references(&self) -> Vec<FieldRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<FieldRef>) {
        match self {
            Self::Compare(left, _, right) => {
                for operand in [left, right] {
                    if let Operand::Field(reference) = operand {
                        if !refs.contains(reference) {
                            refs.push(reference.clone());
                        }
                    }
                }
            }
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Self::Not(inner) => inner.collect_references(refs),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Expression], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Compare(left, op, right) => write!(f, "{left} {} {right}", op.symbol()),
            Self::And(items) => join(f, items, "&&"),
            Self::Or(items) => join(f, items, "||"),
            Self::Not(inner) => write!(f, "!({inner})"),
        }
    }
}

// =============================================================================
// Expression Compilers
// =============================================================================

/// Turns declarative expressions into executable conditions.
pub trait ExpressionCompiler: Send + Sync {
    /// Compiles one expression.
    ///
    /// # Errors
    /// Returns an error if the expression cannot be compiled.
    fn compile(&self, expression: &Expression) -> Result<Condition>;
}

/// Compiles expressions into trees of nested closures.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClosureCompiler;

type Eval = Box<dyn Fn(&[Value]) -> Result<bool> + Send + Sync>;

#[derive(Clone)]
enum Slot {
    Arg(usize),
    Literal(Value),
}

impl Slot {
    fn resolve<'a>(&'a self, values: &'a [Value]) -> Result<&'a Value> {
        match self {
            Self::Arg(index) => values
                .get(*index)
                .ok_or_else(|| Error::internal(format!("missing argument {index}"))),
            Self::Literal(value) => Ok(value),
        }
    }
}

impl ClosureCompiler {
    fn slot(operand: &Operand, args: &[FieldRef]) -> Result<Slot> {
        match operand {
            Operand::Literal(value) => Ok(Slot::Literal(value.clone())),
            Operand::Field(reference) => args
                .iter()
                .position(|a| a == reference)
                .map(Slot::Arg)
                .ok_or_else(|| Error::internal(format!("unbound reference {reference}"))),
        }
    }

    fn build(expression: &Expression, args: &[FieldRef]) -> Result<Eval> {
        match expression {
            Expression::Compare(left, op, right) => {
                let (left, right, op) = (Self::slot(left, args)?, Self::slot(right, args)?, *op);
                Ok(Box::new(move |values| {
                    op.apply(left.resolve(values)?, right.resolve(values)?)
                }))
            }
            Expression::And(items) => {
                let items = items
                    .iter()
                    .map(|item| Self::build(item, args))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(move |values| {
                    for item in &items {
                        if !item(values)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }))
            }
            Expression::Or(items) => {
                let items = items
                    .iter()
                    .map(|item| Self::build(item, args))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(move |values| {
                    for item in &items {
                        if item(values)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }))
            }
            Expression::Not(inner) => {
                let inner = Self::build(inner, args)?;
                Ok(Box::new(move |values| Ok(!inner(values)?)))
            }
        }
    }
}

impl ExpressionCompiler for ClosureCompiler {
    fn compile(&self, expression: &Expression) -> Result<Condition> {
        let args = expression.references();
        let eval = Self::build(expression, &args)?;
        Ok(Condition::from_parts(args, Arc::from(eval)).with_label(expression.to_string()))
    }
}
