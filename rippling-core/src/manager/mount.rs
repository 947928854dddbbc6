//! Mount records.
//!
//! A mounted atom has a live subscription somewhere downstream and is kept
//! fresh eagerly. The record is created once per mount and removed as soon
//! as it has neither listeners nor mounted dependents.

use super::record::Mounted;
use super::AtomManager;
use crate::atom::AnyAtom;
use crate::error::Result;
use crate::interceptor::Hook;

pub(crate) struct MountManager<'a> {
    atoms: &'a AtomManager,
}

impl<'a> MountManager<'a> {
    pub fn new(atoms: &'a AtomManager) -> Self {
        Self { atoms }
    }

    /// Mount `atom` unless it is already mounted.
    ///
    /// `read` brings the record up to date before the mount record is
    /// attached; `on_mount` runs afterwards and cascades into dependencies.
    pub fn mount(
        &self,
        atom: &AnyAtom,
        read: impl FnOnce() -> Result<()>,
        on_mount: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        if self.atoms.is_mounted(atom.id()) {
            return Ok(());
        }

        self.atoms.intercept(Hook::Mount, atom, || {
            read()?;
            {
                let mut table = self.atoms.table.borrow_mut();
                if let Some(record) = table.get_mut(atom.id()) {
                    record
                        .mounted_mut()
                        .get_or_insert_with(|| Mounted::new(atom.clone()));
                }
            }
            tracing::debug!(atom = %atom, "mounted");
            on_mount()
        })
    }

    /// Unmount `atom` if nothing keeps it mounted any more.
    ///
    /// `on_unmount` runs before the record is removed and releases the
    /// atom's own dependencies.
    pub fn unmount(&self, atom: &AnyAtom, on_unmount: impl FnOnce() -> Result<()>) -> Result<()> {
        let idle = self
            .atoms
            .table
            .borrow()
            .get(atom.id())
            .and_then(|record| record.mounted())
            .is_some_and(Mounted::is_idle);
        if !idle {
            return Ok(());
        }

        self.atoms.intercept(Hook::Unmount, atom, || {
            on_unmount()?;
            let removed = self
                .atoms
                .table
                .borrow_mut()
                .get_mut(atom.id())
                .and_then(|record| record.mounted_mut().take());
            // Dropped outside the borrow: the record may hold the last
            // strong handle to its atom.
            drop(removed);
            tracing::debug!(atom = %atom, "unmounted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::atom::{Readable, State};
    use crate::interceptor::{Interceptor, Outcome};
    use crate::runtime::Runtime;
    use crate::store::StoreOptions;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Interceptor for Recorder {
        fn mount(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
            self.0.lock().push(format!("mount {atom}"));
            next();
        }

        fn unmount(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
            self.0.lock().push(format!("unmount {atom}"));
            next();
        }
    }

    #[test]
    fn mount_and_unmount_fire_hooks_once() {
        let recorder = Arc::new(Recorder::default());
        let options = StoreOptions::default().with_interceptor(recorder.clone());
        let shared = Runtime::shared(&options);
        let runtime = shared.lock();
        let atom = State::new(0).with_label("leaf").erase();

        runtime.atoms.mount(&atom).unwrap();
        runtime.atoms.mount(&atom).unwrap();
        assert!(runtime.atoms.is_mounted(atom.id()));

        runtime.atoms.unmount(&atom).unwrap();
        runtime.atoms.unmount(&atom).unwrap();
        assert!(!runtime.atoms.is_mounted(atom.id()));

        assert_eq!(*recorder.0.lock(), vec!["mount leaf", "unmount leaf"]);
    }

    #[test]
    fn atom_with_listener_stays_mounted() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let atom = State::new(0).erase();
        let listener = crate::atom::Command::new(|_, ()| Ok(()));

        runtime.atoms.mount(&atom).unwrap();
        runtime.atoms.add_listener(atom.id(), &listener);
        runtime.atoms.unmount(&atom).unwrap();
        assert!(runtime.atoms.is_mounted(atom.id()));
    }
}
