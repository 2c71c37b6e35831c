//! Agenda event hooks.
//!
//! Listeners observe the agenda synchronously at four points. They receive
//! the activation by reference and cannot affect matching.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::agenda::Activation;
use crate::beta::Tuple;

/// Receives agenda events. Every method defaults to doing nothing.
pub trait AgendaListener: Send + Sync {
    /// A tuple reached a rule's terminal memory.
    fn activation_created(&self, _activation: &Activation) {}

    /// A pending activation lost its tuple before it could fire. Not sent
    /// for the activation whose own action retracted it.
    fn activation_cancelled(&self, _activation: &Activation) {}

    /// The activation was selected and its action is about to run.
    fn before_fire(&self, _activation: &Activation) {}

    /// The action returned successfully.
    fn after_fire(&self, _activation: &Activation) {}
}

/// A recorded agenda event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgendaEvent {
    /// See [`AgendaListener::activation_created`].
    Created {
        /// Rule name.
        rule: Arc<str>,
        /// Bound tuple.
        tuple: Tuple,
    },
    /// See [`AgendaListener::activation_cancelled`].
    Cancelled {
        /// Rule name.
        rule: Arc<str>,
        /// Bound tuple.
        tuple: Tuple,
    },
    /// See [`AgendaListener::before_fire`].
    BeforeFire {
        /// Rule name.
        rule: Arc<str>,
        /// Bound tuple.
        tuple: Tuple,
    },
    /// See [`AgendaListener::after_fire`].
    AfterFire {
        /// Rule name.
        rule: Arc<str>,
        /// Bound tuple.
        tuple: Tuple,
    },
}

impl AgendaEvent {
    /// The variant name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "Created",
            Self::Cancelled { .. } => "Cancelled",
            Self::BeforeFire { .. } => "BeforeFire",
            Self::AfterFire { .. } => "AfterFire",
        }
    }

    /// The rule the event is about.
    #[must_use]
    pub fn rule(&self) -> &str {
        match self {
            Self::Created { rule, .. }
            | Self::Cancelled { rule, .. }
            | Self::BeforeFire { rule, .. }
            | Self::AfterFire { rule, .. } => rule,
        }
    }

    /// The tuple the event is about.
    #[must_use]
    pub fn tuple(&self) -> &Tuple {
        match self {
            Self::Created { tuple, .. }
            | Self::Cancelled { tuple, .. }
            | Self::BeforeFire { tuple, .. }
            | Self::AfterFire { tuple, .. } => tuple,
        }
    }
}

/// A listener that records every event in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<AgendaEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AgendaEvent> {
        self.events.lock().clone()
    }

    /// Drains the recorded events.
    pub fn take(&self) -> Vec<AgendaEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Names of the rules that finished firing, in order.
    #[must_use]
    pub fn fired_rules(&self) -> Vec<Arc<str>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                AgendaEvent::AfterFire { rule, .. } => Some(rule.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: AgendaEvent) {
        self.events.lock().push(event);
    }
}

impl AgendaListener for EventLog {
    fn activation_created(&self, activation: &Activation) {
        self.record(AgendaEvent::Created {
            rule: activation.rule_name_arc(),
            tuple: activation.tuple().clone(),
        });
    }

    fn activation_cancelled(&self, activation: &Activation) {
        self.record(AgendaEvent::Cancelled {
            rule: activation.rule_name_arc(),
            tuple: activation.tuple().clone(),
        });
    }

    fn before_fire(&self, activation: &Activation) {
        self.record(AgendaEvent::BeforeFire {
            rule: activation.rule_name_arc(),
            tuple: activation.tuple().clone(),
        });
    }

    fn after_fire(&self, activation: &Activation) {
        self.record(AgendaEvent::AfterFire {
            rule: activation.rule_name_arc(),
            tuple: activation.tuple().clone(),
        });
    }
}
