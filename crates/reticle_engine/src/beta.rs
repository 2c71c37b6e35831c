//! Tuples and beta memories.
//!
//! A rule with `n` variables keeps `n` levels of partial matches. Level `k`
//! holds the tuples of arity `k + 1` that pass the alpha filters of variables
//! `0..=k` and every join condition attached to levels `1..=k`. The last
//! level is the rule's terminal memory: each of its tuples is exactly one
//! live activation. Rules with fact groups add a gate after the last level
//! holding the tuples whose groups hold, and the gate is terminal instead.
//!
//! Every memory keeps a reverse index from fact handle to the tuples that
//! contain it, so retracting a fact costs a lookup instead of a scan.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use reticle_foundation::FactHandle;

/// An ordered binding of fact handles to a rule's variables.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple(Arc<[FactHandle]>);

impl Tuple {
    /// Builds a tuple from handles in variable order.
    #[must_use]
    pub fn new(handles: Vec<FactHandle>) -> Self {
        Self(handles.into())
    }

    /// A tuple binding only the first variable.
    #[must_use]
    pub fn single(handle: FactHandle) -> Self {
        Self(Arc::from([handle]))
    }

    /// A new tuple with one more handle bound at the end.
    #[must_use]
    pub fn extend(&self, handle: FactHandle) -> Self {
        let mut handles = Vec::with_capacity(self.0.len() + 1);
        handles.extend_from_slice(&self.0);
        handles.push(handle);
        Self(handles.into())
    }

    /// The handle bound at a position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<FactHandle> {
        self.0.get(position).copied()
    }

    /// All handles, in variable order.
    #[must_use]
    pub fn handles(&self) -> &[FactHandle] {
        &self.0
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty tuple.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the fact is bound at any position.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.0.contains(&handle)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, handle) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{handle}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<FactHandle>> for Tuple {
    fn from(handles: Vec<FactHandle>) -> Self {
        Self::new(handles)
    }
}

/// The tuples of one join level.
#[derive(Clone, Debug, Default)]
pub struct BetaMemory {
    tuples: BTreeSet<Tuple>,
    by_handle: HashMap<FactHandle, BTreeSet<Tuple>>,
}

impl BetaMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tuple. Returns false if it was already present.
    pub fn insert(&mut self, tuple: Tuple) -> bool {
        if !self.tuples.insert(tuple.clone()) {
            return false;
        }
        for handle in tuple.handles() {
            self.by_handle
                .entry(*handle)
                .or_default()
                .insert(tuple.clone());
        }
        true
    }

    /// Removes a tuple. Returns false if it was not present.
    pub fn remove(&mut self, tuple: &Tuple) -> bool {
        if !self.tuples.remove(tuple) {
            return false;
        }
        for handle in tuple.handles() {
            if let Some(set) = self.by_handle.get_mut(handle) {
                set.remove(tuple);
                if set.is_empty() {
                    self.by_handle.remove(handle);
                }
            }
        }
        true
    }

    /// Removes every tuple binding `handle` at `position`, returning them in order.
    pub fn remove_at(&mut self, position: usize, handle: FactHandle) -> Vec<Tuple> {
        let doomed: Vec<Tuple> = self
            .by_handle
            .get(&handle)
            .into_iter()
            .flatten()
            .filter(|t| t.get(position) == Some(handle))
            .cloned()
            .collect();
        for tuple in &doomed {
            self.remove(tuple);
        }
        doomed
    }

    /// Returns true if the tuple is present.
    #[must_use]
    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.tuples.contains(tuple)
    }

    /// Tuples binding `handle` at any position.
    pub fn containing(&self, handle: FactHandle) -> impl Iterator<Item = &Tuple> {
        self.by_handle.get(&handle).into_iter().flatten()
    }

    /// Number of tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns true if no tuple is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Iterates in tuple order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }
}

/// The join levels of one rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMemory {
    pub levels: Vec<BetaMemory>,
    /// Last-level tuples whose fact groups also hold. Only rules with
    /// groups keep one.
    pub gated: Option<BetaMemory>,
}

impl RuleMemory {
    pub fn new(arity: usize, grouped: bool) -> Self {
        Self {
            levels: vec![BetaMemory::new(); arity],
            gated: grouped.then(BetaMemory::new),
        }
    }

    /// The tuples that are live activations.
    pub fn terminal(&self) -> Option<&BetaMemory> {
        self.gated.as_ref().or(self.levels.last())
    }
}
