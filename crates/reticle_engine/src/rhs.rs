//! The context handed to rule actions.

use std::any::Any;
use std::sync::Arc;

use reticle_foundation::{Error, FactHandle, Payload, Result, Value};

use crate::agenda::Activation;
use crate::beta::Tuple;
use crate::condition::FieldRef;
use crate::network::CompiledRule;
use crate::session::Session;

/// Access to the firing activation's bound facts and to working memory.
///
/// Mutations made through the context propagate immediately, so their
/// consequences are already on the agenda when the action returns.
pub struct RhsContext<'s> {
    session: &'s mut Session,
    rule: &'s CompiledRule,
    activation: &'s Activation,
}

impl<'s> RhsContext<'s> {
    pub(crate) fn new(
        session: &'s mut Session,
        rule: &'s CompiledRule,
        activation: &'s Activation,
    ) -> Self {
        Self {
            session,
            rule,
            activation,
        }
    }

    /// The firing rule's name.
    #[must_use]
    pub fn rule_name(&self) -> &str {
        self.rule.name()
    }

    /// The firing activation.
    #[must_use]
    pub fn activation(&self) -> &Activation {
        self.activation
    }

    /// The bound facts, in variable order.
    #[must_use]
    pub fn tuple(&self) -> &Tuple {
        self.activation.tuple()
    }

    /// The fact bound to a variable.
    ///
    /// # Errors
    /// Returns an error if the rule declares no such variable.
    pub fn handle(&self, var: &str) -> Result<FactHandle> {
        self.rule
            .position_of(var)
            .and_then(|position| self.activation.tuple().get(position))
            .ok_or_else(|| {
                Error::evaluation(format!("rule {} has no variable {var}", self.rule.name()))
            })
    }

    /// Reads `"$var.field"`, or the fact object for `"$var"`.
    ///
    /// # Errors
    /// Fails for unknown variables or fields, or if the fact is gone.
    pub fn value(&self, reference: &str) -> Result<Value> {
        let reference = FieldRef::parse(reference);
        let handle = self.handle(reference.var())?;
        match reference.field() {
            Some(field) => self.session.value(handle, field),
            None => Ok(self.session.fact(handle)?.identity()),
        }
    }

    /// The payload bound to a variable, as a concrete type.
    ///
    /// # Errors
    /// Fails for unknown variables, deleted facts, or a different payload type.
    pub fn payload<T: Any + Send + Sync>(&self, var: &str) -> Result<Arc<T>> {
        self.session.payload(self.handle(var)?)
    }

    /// Inserts a new fact.
    ///
    /// # Errors
    /// Returns `UnknownType` if the type is not declared.
    pub fn insert(&mut self, type_name: &str, payload: Payload) -> Result<FactHandle> {
        self.session.insert(type_name, payload)
    }

    /// Re-reads a fact's fields after its payload was mutated.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact is gone.
    pub fn update(&mut self, handle: FactHandle) -> Result<()> {
        self.session.update(handle)
    }

    /// Swaps a fact's payload.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact is gone.
    pub fn replace(&mut self, handle: FactHandle, payload: Payload) -> Result<()> {
        self.session.replace(handle, payload)
    }

    /// Deletes a fact.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact is gone.
    pub fn delete(&mut self, handle: FactHandle) -> Result<()> {
        self.session.delete(handle)
    }

    /// Updates the fact bound to a variable.
    ///
    /// # Errors
    /// Fails for unknown variables or deleted facts.
    pub fn update_var(&mut self, var: &str) -> Result<()> {
        let handle = self.handle(var)?;
        self.update(handle)
    }

    /// Deletes the fact bound to a variable.
    ///
    /// # Errors
    /// Fails for unknown variables or deleted facts.
    pub fn delete_var(&mut self, var: &str) -> Result<()> {
        let handle = self.handle(var)?;
        self.delete(handle)
    }

    /// Stops firing once this action returns.
    pub fn halt(&self) {
        self.session.halt();
    }

    /// Read access to the session.
    #[must_use]
    pub fn session(&self) -> &Session {
        self.session
    }
}
