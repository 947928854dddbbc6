//! Debug introspection.
//!
//! Read-only views into a store's graph, for tests and devtools.

mod event;
mod logging;

pub use event::{EventInterceptor, EventPhase, StoreEvent};
pub use logging::TracingInterceptor;

use crate::atom::{AnyAtom, Command, Computed, Readable};
use crate::store::Store;

impl Store {
    /// Listeners marked by a write but not yet run.
    ///
    /// Empty outside a batch. Inside one (a command body, a `Set` hook, or
    /// a listener during the drain) it holds what the batch has marked so
    /// far.
    pub fn pending_listeners(&self) -> Vec<Command> {
        self.runtime.lock().listeners.pending()
    }

    /// Every subscribed `(atom, listener)` pair, atoms in first-touch order.
    pub fn subscribe_graph(&self) -> Vec<(AnyAtom, Command)> {
        self.runtime.lock().atoms.subscribe_graph()
    }

    pub fn is_mounted<A: Readable>(&self, atom: &A) -> bool {
        self.runtime.lock().atoms.is_mounted(atom.erase().id())
    }

    /// The atom's epoch, or `None` if this store has never touched it.
    pub fn epoch<A: Readable>(&self, atom: &A) -> Option<i64> {
        self.runtime.lock().atoms.epoch(atom.erase().id())
    }

    /// Dependencies read by the atom's last completed evaluation.
    pub fn dependencies<T>(&self, atom: &Computed<T>) -> Vec<AnyAtom>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.runtime.lock().atoms.dependencies(atom.id())
    }

    /// Number of atom records currently held, reachable or not.
    pub fn record_count(&self) -> usize {
        self.runtime.lock().atoms.record_count()
    }

    /// Drop records of atoms that are gone and not mounted. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        self.runtime.lock().atoms.sweep()
    }
}
