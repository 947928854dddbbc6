//! Atom identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an atom.
///
/// Every state, computed and command atom gets a fresh ID when it is
/// constructed. Two atoms built from identical configuration never share an
/// ID; the store keys all out-of-band records on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    /// A leaf atom with a directly settable value.
    State,

    /// A derived atom evaluated from other atoms.
    Computed,

    /// A write-only function atom.
    Command,
}
