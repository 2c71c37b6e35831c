//! Error types for the Reticle system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::handle::FactHandle;
use crate::value::{Value, ValueKind};

/// The main error type for Reticle operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates an unknown type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        })
    }

    /// Creates a duplicate field error.
    #[must_use]
    pub fn duplicate_field(
        type_name: impl Into<String>,
        field: impl Into<String>,
        existing: ValueKind,
        requested: ValueKind,
    ) -> Self {
        Self::new(ErrorKind::DuplicateField {
            type_name: type_name.into(),
            field: field.into(),
            existing,
            requested,
        })
    }

    /// Creates an invalid handle error.
    #[must_use]
    pub fn invalid_handle(handle: FactHandle) -> Self {
        Self::new(ErrorKind::InvalidHandle(handle))
    }

    /// Creates a condition evaluation error.
    #[must_use]
    pub fn condition_evaluation(condition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConditionEvaluation {
            condition: condition.into(),
            message: message.into(),
        })
    }

    /// Wraps the failure of a rule action.
    #[must_use]
    pub fn action_execution(rule: impl Into<String>, source: Error) -> Self {
        let rule = rule.into();
        Self::new(ErrorKind::ActionExecution {
            rule: rule.clone(),
            source: Box::new(source),
        })
        .with_context(ErrorContext::new().with_rule(rule))
    }

    /// Creates an invalid rule error.
    #[must_use]
    pub fn invalid_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        })
    }

    /// Creates an error for a condition label that matches nothing.
    #[must_use]
    pub fn unknown_condition(label: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownCondition(label.into()))
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Creates a type mismatch error for two values that cannot be ordered.
    #[must_use]
    pub fn incomparable(left: &Value, right: &Value) -> Self {
        Self::type_mismatch(describe(left), describe(right))
    }

    /// Creates a generic evaluation error, for use inside predicates and actions.
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

fn describe(value: &Value) -> String {
    match value.kind() {
        Some(kind) => kind.to_string(),
        None => "nil".to_string(),
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// No logical type with this name is registered.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The logical type has no field with this name.
    #[error("unknown field: {field} on type {type_name}")]
    UnknownField {
        /// The logical type that was queried.
        type_name: String,
        /// The field name that was not found.
        field: String,
    },

    /// A field was re-declared with an incompatible kind.
    #[error("field {type_name}.{field} already declared as {existing}, cannot redeclare as {requested}")]
    DuplicateField {
        /// The logical type owning the field.
        type_name: String,
        /// The field name.
        field: String,
        /// The kind the field was first declared with.
        existing: ValueKind,
        /// The kind requested by the conflicting declaration.
        requested: ValueKind,
    },

    /// The handle is unknown or its fact was already deleted.
    #[error("invalid fact handle: {0}")]
    InvalidHandle(FactHandle),

    /// A compiled condition failed during propagation.
    #[error("condition `{condition}` failed: {message}")]
    ConditionEvaluation {
        /// Label of the failing condition.
        condition: String,
        /// Description of the failure.
        message: String,
    },

    /// A rule action failed while firing.
    #[error("action of rule `{rule}` failed: {source}")]
    ActionExecution {
        /// The rule whose action failed.
        rule: String,
        /// The error returned by the action.
        #[source]
        source: Box<Error>,
    },

    /// A rule definition cannot be compiled.
    #[error("invalid rule `{rule}`: {message}")]
    InvalidRule {
        /// The offending rule.
        rule: String,
        /// What is wrong with it.
        message: String,
    },

    /// No compiled condition carries this label.
    #[error("unknown condition: {0}")]
    UnknownCondition(String),

    /// Type mismatch during evaluation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: String,
        /// The actual type encountered.
        actual: String,
    },

    /// Failure raised by a user predicate or action.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule being compiled or fired.
    pub rule: Option<String>,
    /// Chain of operations leading to the error, outermost last.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule name.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "in rule {rule}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
