//! Fact handles.
//!
//! Handles are issued from a single process-wide counter, so a handle is never
//! reused: not by the same session after a delete, and not by another session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier bound to exactly one fact for its lifetime.
///
/// Handles are ordered by issue time: a handle issued later always compares
/// greater than one issued earlier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactHandle(u64);

impl FactHandle {
    /// Issues a fresh handle.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuilds a handle from its raw value.
    ///
    /// The result is only meaningful if the raw value came from [`FactHandle::raw`].
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactHandle({})", self.0)
    }
}

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
