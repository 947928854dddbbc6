//! Computed Atoms
//!
//! A computed atom is a derived value produced by a pure evaluation body.
//! The body reads other atoms through a [`Getter`]; every read is recorded as
//! a dependency, so the store knows exactly when the cached value goes stale.
//!
//! # Equality
//!
//! A recompute only bumps the atom's epoch when the new value differs from
//! the cached one under `PartialEq`. Downstream atoms whose inputs compare
//! equal therefore keep their cache.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::erased::{display_atom, AnyAtom, AtomNode, ComputedNode, Value};
use super::id::AtomId;
use super::Readable;
use crate::context::{Cancellation, Getter};
use crate::error::Result;

type ReadFn<T> = dyn Fn(&Getter, &Cancellation) -> Result<T> + Send + Sync;

/// A derived atom whose value is computed from other atoms.
///
/// # Example
///
/// ```rust
/// use rippling_core::{Computed, State, Store};
///
/// let count = State::new(2);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move |get| Ok(get.get(&count)? * 2)
/// });
///
/// let store = Store::new();
/// assert_eq!(store.get(&doubled).unwrap(), 4);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: AtomId,
    read: Box<ReadFn<T>>,
    label: OnceLock<String>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a computed atom from an evaluation body.
    ///
    /// The body is not run until the atom is first read.
    pub fn new<F>(read: F) -> Self
    where
        F: Fn(&Getter) -> Result<T> + Send + Sync + 'static,
    {
        Self::with_signal(move |get, _| read(get))
    }

    /// Create a computed atom whose body may request a cancellation signal.
    ///
    /// Asynchronous work started by the body should honour the signal from
    /// [`Cancellation::signal`], which fires once a newer evaluation asks for
    /// its own.
    pub fn with_signal<F>(read: F) -> Self
    where
        F: Fn(&Getter, &Cancellation) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputedInner {
                id: AtomId::next(),
                read: Box::new(read),
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
}

impl<T> AtomNode for ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> AtomId {
        self.id
    }

    fn label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }
}

impl<T> ComputedNode for ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn evaluate(&self, get: &Getter, cx: &Cancellation) -> Result<Value> {
        let value = (self.read)(get, cx)?;
        Ok(Arc::new(value))
    }

    fn same_value(&self, previous: &Value, next: &Value) -> bool {
        match (previous.downcast_ref::<T>(), next.downcast_ref::<T>()) {
            (Some(previous), Some(next)) => previous == next,
            _ => false,
        }
    }
}

impl<T> Readable for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = T;

    fn erase(&self) -> AnyAtom {
        AnyAtom::computed(self.inner.clone())
    }
}

impl<T> From<&Computed<T>> for AnyAtom
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn from(atom: &Computed<T>) -> Self {
        atom.erase()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Computed<T> {}

impl<T> Hash for Computed<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label.get())
            .finish()
    }
}

impl<T> fmt::Display for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_atom(f, self.inner.label.get().map(String::as_str), self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_uses_partial_eq() {
        let atom = Computed::new(|_| Ok(vec![1, 2]));
        let node = &atom.inner;
        let a: Value = Arc::new(vec![1, 2]);
        let b: Value = Arc::new(vec![1, 2]);
        let c: Value = Arc::new(vec![3]);
        assert!(node.same_value(&a, &b));
        assert!(!node.same_value(&a, &c));
    }

    #[test]
    fn same_value_is_false_for_mismatched_types() {
        let atom = Computed::new(|_| Ok(1_u32));
        let a: Value = Arc::new(1_u32);
        let b: Value = Arc::new(1_i64);
        assert!(!atom.inner.same_value(&a, &b));
    }

    #[test]
    fn clone_shares_identity() {
        let a = Computed::new(|_| Ok(0)).with_label("zero");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.label(), Some("zero"));
    }
}
