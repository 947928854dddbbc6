//! Command Atoms
//!
//! A command is a write-only function atom. It is run through
//! [`Store::call`], receives the store so it can read and write other atoms,
//! and all writes it performs are notified together once it returns.
//!
//! Subscription listeners are commands too: `Command<()>` compared by
//! identity, so one listener reached through several paths fires once.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::erased::display_atom;
use super::id::AtomId;
use crate::error::Result;
use crate::store::Store;

type RunFn<A, R> = dyn Fn(&Store, A) -> Result<R> + Send + Sync;

/// A write-only function atom.
///
/// # Example
///
/// ```rust
/// use rippling_core::{Command, State, Store};
///
/// let count = State::new(0);
/// let add = Command::new({
///     let count = count.clone();
///     move |store: &Store, n: i32| store.update(&count, |c| c + n)
/// });
///
/// let store = Store::new();
/// store.call(&add, 10).unwrap();
/// assert_eq!(store.get(&count).unwrap(), 10);
/// ```
pub struct Command<A = (), R = ()> {
    inner: Arc<CommandInner<A, R>>,
}

struct CommandInner<A, R> {
    id: AtomId,
    run: Box<RunFn<A, R>>,
    label: OnceLock<String>,
}

impl<A, R> Command<A, R>
where
    A: 'static,
    R: 'static,
{
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&Store, A) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(CommandInner {
                id: AtomId::next(),
                run: Box::new(run),
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

    /// Run the body without opening a batch.
    pub(crate) fn run(&self, store: &Store, args: A) -> Result<R> {
        (self.inner.run)(store, args)
    }
}

impl<A, R> Clone for Command<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> PartialEq for Command<A, R> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A, R> Eq for Command<A, R> {}

impl<A, R> Hash for Command<A, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<A, R> fmt::Debug for Command<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label.get())
            .finish()
    }
}

impl<A, R> fmt::Display for Command<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_atom(f, self.inner.label.get().map(String::as_str), self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_compare_by_identity() {
        let a: Command = Command::new(|_, ()| Ok(()));
        let b: Command = Command::new(|_, ()| Ok(()));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn run_passes_arguments_through() {
        let double = Command::new(|_, n: i32| Ok(n * 2));
        let store = Store::new();
        assert_eq!(double.run(&store, 21).unwrap(), 42);
    }
}
