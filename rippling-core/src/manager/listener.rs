//! Listener propagation.
//!
//! After a write, the atoms downstream of the written one are walked level
//! by level. Each visited atom is brought up to date first, then its
//! listeners join the pending set. The pending set dedups listeners by
//! identity and keeps first-insertion order; draining it is the caller's job.

use std::cell::RefCell;

use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use super::AtomManager;
use crate::atom::{AnyAtom, AtomId, Command};
use crate::error::Result;

type Frontier = SmallVec<[AnyAtom; 8]>;

#[derive(Default)]
pub(crate) struct ListenerManager {
    pending: RefCell<IndexMap<AtomId, Command>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk downstream from `atom`, refreshing every reached atom and
    /// collecting its listeners.
    ///
    /// Atoms are deduplicated within a level but not across levels: an atom
    /// reached again further down is re-validated after its upstream has
    /// been refreshed.
    ///
    /// An atom that fails to refresh is flagged for re-evaluation and its
    /// listeners are skipped, but the walk goes on so its siblings and
    /// dependents are still brought up to date. The first failure is
    /// returned once the walk is done.
    pub fn mark_pending_listeners(&self, atoms: &AtomManager, atom: &AnyAtom) -> Result<()> {
        let mut frontier: Frontier = smallvec![atom.clone()];
        let mut depth = 0_usize;
        let mut first_error = None;

        while !frontier.is_empty() {
            let mut next: IndexMap<AtomId, AnyAtom> = IndexMap::new();
            for atom in &frontier {
                let refreshed = atoms.read_atom_state(atom, true);
                if let Err(err) = &refreshed {
                    tracing::debug!(atom = %atom, error = %err, "failed to refresh mounted atom");
                    atoms.invalidate(atom.id());
                }

                let Some((listeners, downstream)) = atoms.mounted_edges(atom.id()) else {
                    if let Err(err) = refreshed {
                        first_error.get_or_insert(err);
                    }
                    continue;
                };
                match refreshed {
                    Ok(_) => {
                        let mut pending = self.pending.borrow_mut();
                        for listener in listeners {
                            pending.entry(listener.id()).or_insert(listener);
                        }
                    }
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
                for dependent in downstream {
                    next.entry(dependent.id()).or_insert(dependent);
                }
            }
            frontier = next.into_values().collect();
            depth += 1;
        }

        tracing::trace!(atom = %atom, depth, pending = self.pending.borrow().len(), "marked pending listeners");
        first_error.map_or(Ok(()), Err)
    }

    /// Take the pending set, leaving it empty.
    ///
    /// Listeners marked while the returned ones run land in a new set.
    pub fn notify(&self) -> Vec<Command> {
        std::mem::take(&mut *self.pending.borrow_mut())
            .into_values()
            .collect()
    }

    /// The pending set, in insertion order.
    pub fn pending(&self) -> Vec<Command> {
        self.pending.borrow().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::atom::{Computed, Readable, State};
    use crate::error::StoreError;
    use crate::runtime::Runtime;
    use crate::store::StoreOptions;

    #[test]
    fn diamond_marks_shared_listener_once() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();

        let base = State::new(1);
        let left = Computed::new({
            let base = base.clone();
            move |get| Ok(get.get(&base)? + 1)
        });
        let right = Computed::new({
            let base = base.clone();
            move |get| Ok(get.get(&base)? * 2)
        });
        let listener: Command = Command::new(|_, ()| Ok(()));

        for target in [left.erase(), right.erase()] {
            runtime.atoms.mount(&target).unwrap();
            runtime.atoms.add_listener(target.id(), &listener);
        }

        let base = base.erase();
        runtime
            .atoms
            .set_atom_state(&base, super::super::Write::Value(Arc::new(5)))
            .unwrap();
        runtime
            .listeners
            .mark_pending_listeners(&runtime.atoms, &base)
            .unwrap();

        assert_eq!(runtime.listeners.pending(), vec![listener.clone()]);
        assert_eq!(runtime.listeners.notify(), vec![listener]);
        assert!(runtime.listeners.is_empty());
    }

    #[test]
    fn failing_atom_does_not_stall_its_siblings() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();

        let base = State::new(0);
        let failing = Computed::new({
            let base = base.clone();
            move |get| match get.get(&base)? {
                1 => Err(StoreError::evaluation("rejected")),
                value => Ok(value),
            }
        });
        let healthy = Computed::new({
            let base = base.clone();
            move |get| Ok(get.get(&base)? * 10)
        });
        let failing_listener: Command = Command::new(|_, ()| Ok(()));
        let healthy_listener: Command = Command::new(|_, ()| Ok(()));

        for (target, listener) in [
            (failing.erase(), &failing_listener),
            (healthy.erase(), &healthy_listener),
        ] {
            runtime.atoms.mount(&target).unwrap();
            runtime.atoms.add_listener(target.id(), listener);
        }

        let base = base.erase();
        runtime
            .atoms
            .set_atom_state(&base, super::super::Write::Value(Arc::new(1)))
            .unwrap();
        let marked = runtime.listeners.mark_pending_listeners(&runtime.atoms, &base);

        assert!(matches!(marked, Err(StoreError::Evaluation(_))));
        assert_eq!(runtime.listeners.pending(), vec![healthy_listener]);
        let healthy = runtime.atoms.read_atom_state(&healthy.erase(), false).unwrap();
        assert_eq!(*healthy.value.downcast_ref::<i32>().unwrap(), 10);
        assert!(runtime.atoms.read_atom_state(&failing.erase(), false).is_err());
    }

    #[test]
    fn unmounted_atom_marks_nothing() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let base = State::new(0).erase();

        runtime
            .listeners
            .mark_pending_listeners(&runtime.atoms, &base)
            .unwrap();
        assert!(runtime.listeners.is_empty());
    }
}
