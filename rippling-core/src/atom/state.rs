//! State Atoms
//!
//! A state atom is a leaf of the dependency graph: it carries an initial value
//! and nothing else. The current value and its epoch live in the store that
//! reads or writes it, so one atom can be used with any number of stores.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::erased::{display_atom, AnyAtom, AtomNode, StateNode, Value};
use super::id::AtomId;
use super::Readable;

/// A leaf atom with a directly settable value.
///
/// # Example
///
/// ```rust
/// use rippling_core::{State, Store};
///
/// let count = State::new(0).with_label("count");
/// let store = Store::new();
///
/// store.set(&count, 5).unwrap();
/// assert_eq!(store.get(&count).unwrap(), 5);
/// ```
pub struct State<T> {
    inner: Arc<StateInner<T>>,
}

struct StateInner<T> {
    id: AtomId,
    init: T,
    label: OnceLock<String>,
}

impl<T> State<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new state atom with the given initial value.
    pub fn new(init: T) -> Self {
        Self {
            inner: Arc::new(StateInner {
                id: AtomId::next(),
                init,
                label: OnceLock::new(),
            }),
        }
    }

    /// Attach a debug label. The first label set wins.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        let _ = self.inner.label.set(label.into());
        self
    }

    pub fn id(&self) -> AtomId {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.get().map(String::as_str)
    }

    /// The value a store seeds on first access.
    pub fn initial(&self) -> &T {
        &self.inner.init
    }
}

impl<T> AtomNode for StateInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> AtomId {
        self.id
    }

    fn label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }
}

impl<T> StateNode for StateInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn initial_value(&self) -> Value {
        Arc::new(self.init.clone())
    }
}

impl<T> Readable for State<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn erase(&self) -> AnyAtom {
        AnyAtom::state(self.inner.clone())
    }
}

impl<T> From<&State<T>> for AnyAtom
where
    T: Clone + Send + Sync + 'static,
{
    fn from(atom: &State<T>) -> Self {
        atom.erase()
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for State<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for State<T> {}

impl<T> Hash for State<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label.get())
            .finish()
    }
}

impl<T> fmt::Display for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_atom(f, self.inner.label.get().map(String::as_str), self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_identity() {
        let a = State::new(1);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn identical_configuration_is_not_equal() {
        let a = State::new(1);
        let b = State::new(1);
        assert_ne!(a, b);
    }

    #[test]
    fn first_label_wins() {
        let a = State::new(()).with_label("first").with_label("second");
        assert_eq!(a.label(), Some("first"));
        assert_eq!(a.to_string(), "first");
    }
}
