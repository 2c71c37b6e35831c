//! The agenda (conflict set).
//!
//! Holds one activation per live terminal tuple. Pending activations are
//! ordered by salience, highest first, then by insertion sequence, oldest
//! first. An activation that has fired stays in the agenda, marked fired,
//! until its tuple is retracted; it is never selected again unless its rule
//! re-fires.
//!
//! The activation being fired counts as consumed: if its own action retracts
//! its tuple, listeners hear `after_fire` but no cancellation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::beta::Tuple;
use crate::listener::AgendaListener;
use crate::network::{CompiledRule, RuleId};

/// Insertion sequence of an activation, unique within a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActivationId(u64);

impl ActivationId {
    /// Returns the raw sequence number.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A fully bound tuple of one rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    id: ActivationId,
    rule: RuleId,
    rule_name: Arc<str>,
    salience: i32,
    tuple: Tuple,
}

impl Activation {
    /// The insertion sequence.
    #[must_use]
    pub fn id(&self) -> ActivationId {
        self.id
    }

    /// The owning rule.
    #[must_use]
    pub fn rule(&self) -> RuleId {
        self.rule
    }

    /// The owning rule's name.
    #[must_use]
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// The owning rule's salience.
    #[must_use]
    pub fn salience(&self) -> i32 {
        self.salience
    }

    /// The bound facts, in variable order.
    #[must_use]
    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }

    pub(crate) fn rule_name_arc(&self) -> Arc<str> {
        self.rule_name.clone()
    }

    fn order_key(&self) -> OrderKey {
        (Reverse(self.salience), self.id)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rule_name, self.tuple)
    }
}

type OrderKey = (Reverse<i32>, ActivationId);
type EntryKey = (RuleId, Tuple);

#[derive(Debug)]
struct Entry {
    activation: Activation,
    fired: bool,
}

/// Live activations of one session.
#[derive(Default)]
pub struct Agenda {
    next_seq: u64,
    entries: HashMap<EntryKey, Entry>,
    pending: BTreeMap<OrderKey, EntryKey>,
    firing: Option<ActivationId>,
    listeners: Vec<Arc<dyn AgendaListener>>,
}

impl Agenda {
    /// Creates an empty agenda.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn add_listener(&mut self, listener: Arc<dyn AgendaListener>) {
        self.listeners.push(listener);
    }

    /// Creates a pending activation for a new terminal tuple.
    pub fn add(&mut self, rule: &CompiledRule, tuple: Tuple) -> ActivationId {
        let id = ActivationId(self.next_seq);
        self.next_seq += 1;

        let activation = Activation {
            id,
            rule: rule.id(),
            rule_name: rule.name_arc(),
            salience: rule.salience(),
            tuple: tuple.clone(),
        };
        trace!(activation = %activation, seq = id.0, "activation created");

        let key = (rule.id(), tuple);
        self.pending.insert(activation.order_key(), key.clone());
        for listener in &self.listeners {
            listener.activation_created(&activation);
        }
        if let Some(stale) = self.entries.insert(key, Entry { activation, fired: false }) {
            self.pending.remove(&stale.activation.order_key());
        }
        id
    }

    /// Drops the activation of a retracted terminal tuple.
    ///
    /// Listeners hear about the cancellation only if it had not fired yet.
    pub fn remove(&mut self, rule: RuleId, tuple: &Tuple) -> Option<Activation> {
        let entry = self.entries.remove(&(rule, tuple.clone()))?;
        if !entry.fired {
            self.pending.remove(&entry.activation.order_key());
            if self.firing == Some(entry.activation.id) {
                trace!(activation = %entry.activation, "firing activation retracted");
                return Some(entry.activation);
            }
            trace!(activation = %entry.activation, "activation cancelled");
            for listener in &self.listeners {
                listener.activation_cancelled(&entry.activation);
            }
        }
        Some(entry.activation)
    }

    /// The activation that would fire next.
    #[must_use]
    pub fn peek(&self) -> Option<&Activation> {
        let (_, key) = self.pending.first_key_value()?;
        self.entries.get(key).map(|e| &e.activation)
    }

    /// Marks a pending activation as fired.
    ///
    /// Returns false if it is no longer pending, either because its action
    /// retracted its own tuple or because it was re-derived under a new id.
    pub fn mark_fired(&mut self, activation: &Activation) -> bool {
        let key = (activation.rule, activation.tuple.clone());
        match self.entries.get_mut(&key) {
            Some(entry) if entry.activation.id == activation.id && !entry.fired => {
                entry.fired = true;
                self.pending.remove(&activation.order_key());
                true
            }
            _ => false,
        }
    }

    /// Makes every fired activation of a rule pending again, keeping their
    /// original sequence numbers.
    pub fn rearm(&mut self, rule: RuleId) -> usize {
        let mut rearmed = 0;
        for (key, entry) in &mut self.entries {
            if key.0 == rule && entry.fired {
                entry.fired = false;
                self.pending.insert(entry.activation.order_key(), key.clone());
                rearmed += 1;
            }
        }
        rearmed
    }

    /// Returns true if the tuple has a live activation, fired or not.
    #[must_use]
    pub fn contains(&self, rule: RuleId, tuple: &Tuple) -> bool {
        self.entries.contains_key(&(rule, tuple.clone()))
    }

    /// Returns true if the tuple's activation has fired.
    #[must_use]
    pub fn is_fired(&self, rule: RuleId, tuple: &Tuple) -> bool {
        self.entries
            .get(&(rule, tuple.clone()))
            .is_some_and(|e| e.fired)
    }

    /// Number of pending activations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is waiting to fire.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of live activations, fired or not.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Pending activations in selection order.
    pub fn iter(&self) -> impl Iterator<Item = &Activation> {
        self.pending
            .values()
            .filter_map(|key| self.entries.get(key).map(|e| &e.activation))
    }

    /// Keys of every live activation, fired or not, in rule then tuple order.
    pub(crate) fn live_keys(&self) -> Vec<(RuleId, Tuple)> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Marks an activation as firing and notifies listeners.
    pub(crate) fn begin_fire(&mut self, activation: &Activation) {
        self.firing = Some(activation.id);
        for listener in &self.listeners {
            listener.before_fire(activation);
        }
    }

    /// Ends the current firing. Listeners hear `after_fire` only when the
    /// action completed.
    pub(crate) fn end_fire(&mut self, activation: &Activation, completed: bool) {
        self.firing = None;
        if completed {
            for listener in &self.listeners {
                listener.after_fire(activation);
            }
        }
    }
}

impl fmt::Debug for Agenda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agenda")
            .field("pending", &self.pending.len())
            .field("live", &self.entries.len())
            .field("firing", &self.firing)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
