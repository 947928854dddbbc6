//! State atom records.

use std::sync::Arc;

use super::record::{AtomRecord, AtomSnapshot, StateRecord};
use super::AtomManager;
use crate::atom::{AnyAtom, StateNode, Value, WeakAtom};
use crate::error::Result;

pub(crate) struct StateManager<'a> {
    atoms: &'a AtomManager,
}

impl<'a> StateManager<'a> {
    pub fn new(atoms: &'a AtomManager) -> Self {
        Self { atoms }
    }

    /// Current value and epoch, seeding the record with the initial value
    /// at epoch 0 on first access.
    pub fn read_atom_state(&self, node: &Arc<dyn StateNode>) -> AtomSnapshot {
        let id = node.id();
        let mut table = self.atoms.table.borrow_mut();
        if let Some(AtomRecord::State(record)) = table.get(id) {
            return AtomSnapshot {
                value: record.value.clone(),
                epoch: record.epoch,
            };
        }

        let value = node.initial_value();
        table.insert(id, seed(node, value.clone()));
        AtomSnapshot { value, epoch: 0 }
    }

    /// Replace the value. An untracked atom is seeded at epoch 0; a tracked
    /// one bumps its epoch even when the new value is equal.
    pub fn write(&self, node: &Arc<dyn StateNode>, value: Value) {
        let id = node.id();
        let mut table = self.atoms.table.borrow_mut();
        match table.get_mut(id) {
            Some(AtomRecord::State(record)) => {
                record.value = value;
                record.epoch += 1;
                tracing::trace!(atom = %id, epoch = record.epoch, "state written");
            }
            _ => {
                table.insert(id, seed(node, value));
                tracing::trace!(atom = %id, "state seeded by write");
            }
        }
    }

    pub fn mount(&self, atom: &AnyAtom, node: &Arc<dyn StateNode>) -> Result<()> {
        self.atoms.mounts().mount(
            atom,
            || {
                self.read_atom_state(node);
                Ok(())
            },
            || Ok(()),
        )
    }

    pub fn unmount(&self, atom: &AnyAtom) -> Result<()> {
        self.atoms.mounts().unmount(atom, || Ok(()))
    }
}

fn seed(node: &Arc<dyn StateNode>, value: Value) -> AtomRecord {
    AtomRecord::State(StateRecord {
        atom: WeakAtom::State(Arc::downgrade(node)),
        value,
        epoch: 0,
        mounted: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Node, Readable, State};
    use crate::runtime::Runtime;
    use crate::store::StoreOptions;

    fn state_node(atom: &AnyAtom) -> Arc<dyn StateNode> {
        match atom.node() {
            Node::State(node) => node.clone(),
            Node::Computed(_) => unreachable!("not a state atom"),
        }
    }

    #[test]
    fn first_read_seeds_initial_value() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let atom = State::new(String::from("init")).erase();
        let node = state_node(&atom);

        let snapshot = runtime.atoms.state().read_atom_state(&node);
        assert_eq!(snapshot.epoch, 0);
        assert_eq!(
            snapshot.value.downcast_ref::<String>().map(String::as_str),
            Some("init")
        );
    }

    #[test]
    fn equal_writes_still_bump() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let atom = State::new(0_i32).erase();
        let node = state_node(&atom);
        let states = runtime.atoms.state();

        states.read_atom_state(&node);
        states.write(&node, Arc::new(0_i32));
        states.write(&node, Arc::new(0_i32));
        assert_eq!(states.read_atom_state(&node).epoch, 2);
    }
}
