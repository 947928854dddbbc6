//! Atom Managers
//!
//! The managers own the store's out-of-band atom table and implement the
//! dependency-graph algorithms on top of it.
//!
//! # Overview
//!
//! - [`AtomManager`] is the dispatch façade. It routes reads, writes, mounts
//!   and unmounts to the sub-manager matching the atom kind.
//! - `StateManager` seeds and writes leaf records.
//! - `ComputedManager` memoizes evaluations, re-tracks dependencies on every
//!   run, cascades mounts into dependencies and issues cancellation signals.
//! - `MountManager` creates and tears down mount records.
//! - [`ListenerManager`] walks downstream edges after a write and collects
//!   the listeners that must fire.
//!
//! # Borrowing
//!
//! The table sits in a `RefCell`. Every borrow is confined to a block that
//! runs no user code and does not recurse into another manager call, so
//! evaluation bodies, interceptors and listeners may re-enter freely.

mod computed;
mod listener;
mod mount;
mod record;
mod state;

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::atom::{AnyAtom, AtomId, Command, Node, Value};
use crate::error::{Result, StoreError};
use crate::interceptor::{self, Hook, HookOutput, Interceptor};
use crate::runtime::SharedRuntime;
use crate::store::StoreOptions;

pub(crate) use computed::ComputedManager;
pub(crate) use listener::ListenerManager;
pub(crate) use mount::MountManager;
pub(crate) use record::{AtomSnapshot, Epoch, DEFAULT_SWEEP_THRESHOLD};
pub(crate) use state::StateManager;

use record::{AtomRecord, AtomTable};

/// A write to a state atom: either a replacement value or an updater that
/// receives the current value.
pub(crate) enum Write<'a> {
    Value(Value),
    Update(Box<dyn FnOnce(&Value) -> Result<Value> + 'a>),
}

/// Dispatch façade over the atom table.
pub(crate) struct AtomManager {
    table: RefCell<AtomTable>,
    interceptor: Option<Arc<dyn Interceptor>>,
    runtime: Weak<SharedRuntime>,
}

impl AtomManager {
    pub fn new(runtime: Weak<SharedRuntime>, options: &StoreOptions) -> Self {
        Self {
            table: RefCell::new(AtomTable::new(options.sweep_threshold())),
            interceptor: options.interceptor().cloned(),
            runtime,
        }
    }

    pub fn state(&self) -> StateManager<'_> {
        StateManager::new(self)
    }

    pub fn computed(&self) -> ComputedManager<'_> {
        ComputedManager::new(self)
    }

    pub fn mounts(&self) -> MountManager<'_> {
        MountManager::new(self)
    }

    /// Read an atom's current value and epoch.
    ///
    /// With `ignore_mounted`, mounted computed atoms re-validate their
    /// dependencies instead of trusting the eagerly maintained cache.
    pub fn read_atom_state(&self, atom: &AnyAtom, ignore_mounted: bool) -> Result<AtomSnapshot> {
        match atom.node() {
            Node::State(node) => Ok(self.state().read_atom_state(node)),
            Node::Computed(node) => self.computed().read_atom_state(atom, node, ignore_mounted),
        }
    }

    /// Write a state atom.
    ///
    /// An updater reads the current value first, which seeds the record,
    /// so the write that follows always bumps the epoch.
    pub fn set_atom_state(&self, atom: &AnyAtom, write: Write<'_>) -> Result<Value> {
        let Node::State(node) = atom.node() else {
            return Err(StoreError::NotWritable {
                atom: atom.to_string(),
            });
        };
        let value = match write {
            Write::Value(value) => value,
            Write::Update(update) => {
                let current = self.read_atom_state(atom, false)?;
                update(&current.value)?
            }
        };
        self.state().write(node, value.clone());
        Ok(value)
    }

    pub fn mount(&self, atom: &AnyAtom) -> Result<()> {
        match atom.node() {
            Node::State(node) => self.state().mount(atom, node),
            Node::Computed(node) => self.computed().mount(atom, node),
        }
    }

    pub fn unmount(&self, atom: &AnyAtom) -> Result<()> {
        match atom.node() {
            Node::State(_) => self.state().unmount(atom),
            Node::Computed(_) => self.computed().unmount(atom),
        }
    }

    pub fn intercept<R: HookOutput>(
        &self,
        hook: Hook,
        atom: &AnyAtom,
        body: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        interceptor::intercept(self.interceptor.as_ref(), hook, atom, body)
    }

    pub fn runtime(&self) -> &Weak<SharedRuntime> {
        &self.runtime
    }

    pub fn is_mounted(&self, id: AtomId) -> bool {
        self.table
            .borrow()
            .get(id)
            .is_some_and(|record| record.mounted().is_some())
    }

    pub fn epoch(&self, id: AtomId) -> Option<Epoch> {
        self.table.borrow().get(id).map(AtomRecord::epoch)
    }

    /// Dependencies recorded by the last completed evaluation, in read order.
    pub fn dependencies(&self, id: AtomId) -> Vec<AnyAtom> {
        self.table
            .borrow()
            .get(id)
            .and_then(AtomRecord::as_computed)
            .map(|record| {
                record
                    .dependencies
                    .values()
                    .map(|dependency| dependency.atom.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Force the next read of a computed atom to re-evaluate it.
    pub fn invalidate(&self, id: AtomId) {
        if let Some(record) = self
            .table
            .borrow_mut()
            .get_mut(id)
            .and_then(AtomRecord::as_computed_mut)
        {
            record.invalidated = true;
        }
    }

    /// Register `dependent` in the mount record of `dependency`.
    pub fn add_downstream(&self, dependency: AtomId, dependent: AtomId) {
        if let Some(mounted) = self
            .table
            .borrow_mut()
            .get_mut(dependency)
            .and_then(|record| record.mounted_mut().as_mut())
        {
            mounted.downstream.insert(dependent);
        }
    }

    /// Remove `dependent` from the mount record of `dependency`.
    ///
    /// Returns whether `dependency` was mounted.
    fn remove_downstream(&self, dependency: AtomId, dependent: AtomId) -> bool {
        match self
            .table
            .borrow_mut()
            .get_mut(dependency)
            .and_then(|record| record.mounted_mut().as_mut())
        {
            Some(mounted) => {
                mounted.downstream.shift_remove(&dependent);
                true
            }
            None => false,
        }
    }

    /// Drop the edge from `dependency` to `dependent` and try to unmount
    /// `dependency`, cascading further upstream.
    pub fn release(&self, dependency: &AnyAtom, dependent: AtomId) -> Result<()> {
        if self.remove_downstream(dependency.id(), dependent) {
            self.unmount(dependency)?;
        }
        Ok(())
    }

    pub fn add_listener(&self, atom: AtomId, listener: &Command) {
        if let Some(mounted) = self
            .table
            .borrow_mut()
            .get_mut(atom)
            .and_then(|record| record.mounted_mut().as_mut())
        {
            mounted
                .listeners
                .entry(listener.id())
                .or_insert_with(|| listener.clone());
        }
    }

    pub fn remove_listener(&self, atom: AtomId, listener: AtomId) -> Option<Command> {
        self.table
            .borrow_mut()
            .get_mut(atom)
            .and_then(|record| record.mounted_mut().as_mut())
            .and_then(|mounted| mounted.listeners.shift_remove(&listener))
    }

    /// Listeners and mounted downstream atoms of a mounted atom.
    pub fn mounted_edges(&self, id: AtomId) -> Option<(Vec<Command>, Vec<AnyAtom>)> {
        let table = self.table.borrow();
        let mounted = table.get(id)?.mounted()?;

        let listeners = mounted.listeners.values().cloned().collect();
        let downstream = mounted
            .downstream
            .iter()
            .filter_map(|dependent| table.get(*dependent)?.mounted().map(|m| m.atom.clone()))
            .collect();
        Some((listeners, downstream))
    }

    /// Every (atom, listener) pair, in record creation order.
    pub fn subscribe_graph(&self) -> Vec<(AnyAtom, Command)> {
        self.table
            .borrow()
            .records()
            .filter_map(AtomRecord::mounted)
            .flat_map(|mounted| {
                mounted
                    .listeners
                    .values()
                    .map(|listener| (mounted.atom.clone(), listener.clone()))
            })
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn sweep(&self) -> usize {
        self.table.borrow_mut().sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Computed, Readable, State};
    use crate::runtime::Runtime;

    fn with_atoms(f: impl FnOnce(&AtomManager)) {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        f(&runtime.atoms);
    }

    #[test]
    fn first_write_seeds_without_bumping() {
        with_atoms(|atoms| {
            let atom = State::new(1).erase();
            atoms.set_atom_state(&atom, Write::Value(Arc::new(2))).unwrap();
            assert_eq!(atoms.epoch(atom.id()), Some(0));

            atoms.set_atom_state(&atom, Write::Value(Arc::new(3))).unwrap();
            atoms.set_atom_state(&atom, Write::Value(Arc::new(3))).unwrap();
            assert_eq!(atoms.epoch(atom.id()), Some(2));
        });
    }

    #[test]
    fn updater_on_untracked_atom_bumps() {
        with_atoms(|atoms| {
            let atom = State::new(1).erase();
            let update = Write::Update(Box::new(|value: &Value| -> Result<Value> {
                let current = value.downcast_ref::<i32>().copied().unwrap_or_default();
                Ok(Arc::new(current + 1) as Value)
            }));
            atoms.set_atom_state(&atom, update).unwrap();

            let snapshot = atoms.read_atom_state(&atom, false).unwrap();
            assert_eq!(snapshot.epoch, 1);
            assert_eq!(snapshot.value.downcast_ref::<i32>(), Some(&2));
        });
    }

    #[test]
    fn writing_a_computed_atom_is_rejected() {
        with_atoms(|atoms| {
            let atom = Computed::new(|_| Ok(0)).erase();
            let Err(err) = atoms.set_atom_state(&atom, Write::Value(Arc::new(1))) else {
                panic!("computed atom accepted a write");
            };
            assert!(matches!(err, StoreError::NotWritable { .. }));
        });
    }

    #[test]
    fn mount_cascades_and_unmount_cleans_up() {
        with_atoms(|atoms| {
            let base = State::new(1);
            let derived = Computed::new({
                let base = base.clone();
                move |get| Ok(get.get(&base)? + 1)
            });
            let base = base.erase();
            let derived = derived.erase();

            atoms.mount(&derived).unwrap();
            assert!(atoms.is_mounted(derived.id()));
            assert!(atoms.is_mounted(base.id()));

            let (_, downstream) = atoms.mounted_edges(base.id()).unwrap();
            assert_eq!(downstream, vec![derived.clone()]);

            atoms.unmount(&derived).unwrap();
            assert!(!atoms.is_mounted(derived.id()));
            assert!(!atoms.is_mounted(base.id()));
        });
    }
}
