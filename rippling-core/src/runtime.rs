//! Store Runtime
//!
//! The runtime is the state behind one store: the atom managers and the
//! pending listener set. It lives behind a reentrant mutex, so evaluation
//! bodies, interceptors and listeners running on the store's thread may call
//! back into the store, while other threads wait their turn.
//!
//! # Batching
//!
//! Every write-side entry point opens a batch. Listeners marked during a
//! batch stay pending until the outermost batch closes; the store then
//! drains them with the batch depth still at one, so writes made by
//! listeners join the same drain instead of starting a nested one.

use std::cell::Cell;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

use crate::manager::{AtomManager, ListenerManager};
use crate::store::StoreOptions;

/// A runtime shared between a store, its getters and its subscriptions.
pub(crate) type SharedRuntime = ReentrantMutex<Runtime>;

pub(crate) struct Runtime {
    pub atoms: AtomManager,
    pub listeners: ListenerManager,
    depth: Cell<usize>,
}

impl Runtime {
    /// Build a runtime whose managers can hand out weak handles to it.
    pub fn shared(options: &StoreOptions) -> Arc<SharedRuntime> {
        Arc::new_cyclic(|weak: &Weak<SharedRuntime>| {
            ReentrantMutex::new(Runtime {
                atoms: AtomManager::new(weak.clone(), options),
                listeners: ListenerManager::new(),
                depth: Cell::new(0),
            })
        })
    }

    /// Open a batch. It closes when the guard drops.
    pub fn enter_batch(&self) -> BatchGuard<'_> {
        self.depth.set(self.depth.get() + 1);
        BatchGuard { depth: &self.depth }
    }
}

/// Guard for an open batch.
///
/// Uses RAII so the depth is restored even if the batched work unwinds.
pub(crate) struct BatchGuard<'a> {
    depth: &'a Cell<usize>,
}

impl BatchGuard<'_> {
    /// True when no enclosing batch is open.
    pub fn is_outermost(&self) -> bool {
        self.depth.get() == 1
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_nest() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();

        let outer = runtime.enter_batch();
        assert!(outer.is_outermost());
        {
            let inner = runtime.enter_batch();
            assert!(!inner.is_outermost());
        }
        assert!(outer.is_outermost());
        drop(outer);

        let next = runtime.enter_batch();
        assert!(next.is_outermost());
    }

    #[test]
    fn managers_reach_their_runtime() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let upgraded = runtime.atoms.runtime().upgrade();
        assert!(upgraded.is_some_and(|other| Arc::ptr_eq(&other, &shared)));
    }
}
