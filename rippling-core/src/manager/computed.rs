//! Computed atom records.
//!
//! A computed record is trusted without re-validation while it is mounted,
//! because writes upstream refresh it eagerly. Otherwise each read compares
//! the epochs captured by the last evaluation with the current epochs of its
//! dependencies and re-evaluates on the first mismatch.
//!
//! Every evaluation starts from an empty dependency map and gets a fresh
//! evaluation token. Reads through a getter whose token is no longer the
//! latest still return values but leave the map alone, so late reads from
//! superseded asynchronous work cannot corrupt tracking.

use std::sync::Arc;

use smallvec::SmallVec;

use super::record::{AtomRecord, AtomSnapshot, AtomTable, ComputedRecord, Dependencies, Dependency};
use super::AtomManager;
use crate::atom::{AnyAtom, ComputedNode, Value};
use crate::cancel::{AbortController, AbortSignal};
use crate::context::{Cancellation, Getter};
use crate::error::{Result, StoreError};
use crate::interceptor::Hook;

type AtomList = SmallVec<[AnyAtom; 4]>;

pub(crate) struct ComputedManager<'a> {
    atoms: &'a AtomManager,
}

impl<'a> ComputedManager<'a> {
    pub fn new(atoms: &'a AtomManager) -> Self {
        Self { atoms }
    }

    pub fn read_atom_state(
        &self,
        atom: &AnyAtom,
        node: &Arc<dyn ComputedNode>,
        ignore_mounted: bool,
    ) -> Result<AtomSnapshot> {
        if let Some(snapshot) = self.cached(atom, ignore_mounted)? {
            tracing::trace!(atom = %atom, epoch = snapshot.epoch, "computed cache hit");
            return Ok(snapshot);
        }
        self.atoms
            .intercept(Hook::Compute, atom, || self.compute(atom, node))
    }

    /// The cached snapshot, if it is still valid.
    fn cached(&self, atom: &AnyAtom, ignore_mounted: bool) -> Result<Option<AtomSnapshot>> {
        let (snapshot, dependencies) = {
            let table = self.atoms.table.borrow();
            let Some(record) = table.get(atom.id()).and_then(AtomRecord::as_computed) else {
                return Ok(None);
            };
            let Some(value) = record.value.clone() else {
                return Ok(None);
            };
            if record.invalidated {
                return Ok(None);
            }

            let snapshot = AtomSnapshot {
                value,
                epoch: record.epoch,
            };
            if record.mounted.is_some() && !ignore_mounted {
                return Ok(Some(snapshot));
            }

            let dependencies: SmallVec<[(AnyAtom, i64); 4]> = record
                .dependencies
                .values()
                .map(|dependency| (dependency.atom.clone(), dependency.epoch))
                .collect();
            (snapshot, dependencies)
        };

        for (dependency, epoch) in &dependencies {
            if self.atoms.read_atom_state(dependency, false)?.epoch != *epoch {
                return Ok(None);
            }
        }
        Ok(Some(snapshot))
    }

    fn compute(&self, atom: &AnyAtom, node: &Arc<dyn ComputedNode>) -> Result<AtomSnapshot> {
        let (evaluation, previous) = {
            let mut table = self.atoms.table.borrow_mut();
            if !table.contains(atom.id()) {
                table.insert(
                    atom.id(),
                    AtomRecord::Computed(ComputedRecord::new(atom.downgrade())),
                );
            }
            let record = record_mut(&mut table, atom)?;
            record.evaluation += 1;
            (record.evaluation, std::mem::take(&mut record.dependencies))
        };

        let runtime = self.atoms.runtime().clone();
        let getter = Getter::new(runtime.clone(), node.clone(), evaluation);
        let cx = Cancellation::new(runtime, atom.clone());

        tracing::debug!(atom = %atom, evaluation, "evaluating computed atom");
        match node.evaluate(&getter, &cx) {
            Ok(value) => self.commit(atom, node, previous, value),
            Err(err) => self.rollback(atom, evaluation, previous, err),
        }
    }

    /// Store a fresh value, bumping the epoch only if it differs, and release
    /// dependencies the evaluation stopped reading.
    fn commit(
        &self,
        atom: &AnyAtom,
        node: &Arc<dyn ComputedNode>,
        previous: Dependencies,
        value: Value,
    ) -> Result<AtomSnapshot> {
        let cached = self
            .atoms
            .table
            .borrow()
            .get(atom.id())
            .and_then(AtomRecord::as_computed)
            .and_then(|record| record.value.clone());
        let changed = cached.map_or(true, |cached| !node.same_value(&cached, &value));

        let (snapshot, stale) = {
            let mut table = self.atoms.table.borrow_mut();
            let record = record_mut(&mut table, atom)?;
            if changed {
                record.value = Some(value);
                record.epoch += 1;
                tracing::debug!(atom = %atom, epoch = record.epoch, "computed value changed");
            }
            record.invalidated = false;

            let stale = dropped(previous, &record.dependencies);
            let snapshot = AtomSnapshot {
                value: record.value.clone().ok_or_else(|| StoreError::ValueType {
                    atom: atom.to_string(),
                })?,
                epoch: record.epoch,
            };
            (snapshot, stale)
        };

        for dependency in &stale {
            self.atoms.release(dependency, atom.id())?;
        }
        Ok(snapshot)
    }

    /// Restore the dependency map of the last completed evaluation and flag
    /// the record, keeping its value and epoch.
    fn rollback(
        &self,
        atom: &AnyAtom,
        evaluation: u64,
        previous: Dependencies,
        err: StoreError,
    ) -> Result<AtomSnapshot> {
        let added = {
            let mut table = self.atoms.table.borrow_mut();
            let record = record_mut(&mut table, atom)?;
            if record.evaluation != evaluation {
                return Err(err);
            }
            let attempted = std::mem::replace(&mut record.dependencies, previous);
            record.invalidated = true;
            dropped(attempted, &record.dependencies)
        };

        tracing::debug!(atom = %atom, error = %err, "evaluation failed, keeping previous value");
        for dependency in &added {
            if let Err(release) = self.atoms.release(dependency, atom.id()) {
                tracing::warn!(atom = %dependency, error = %release, "failed to release dependency");
            }
        }
        Err(err)
    }

    /// Read `dependency` on behalf of the evaluation identified by
    /// `evaluation`, recording the edge if that evaluation is still current.
    pub fn read_dependency(
        &self,
        consumer: &Arc<dyn ComputedNode>,
        evaluation: u64,
        dependency: &AnyAtom,
    ) -> Result<Value> {
        self.atoms.intercept(Hook::Get, dependency, || {
            let snapshot = self.atoms.read_atom_state(dependency, false)?;

            let consumer_mounted = {
                let mut table = self.atoms.table.borrow_mut();
                match table
                    .get_mut(consumer.id())
                    .and_then(AtomRecord::as_computed_mut)
                {
                    Some(record) if record.evaluation == evaluation => {
                        record.dependencies.insert(
                            dependency.id(),
                            Dependency {
                                atom: dependency.clone(),
                                epoch: snapshot.epoch,
                            },
                        );
                        Some(record.mounted.is_some())
                    }
                    _ => None,
                }
            };

            match consumer_mounted {
                Some(true) => {
                    self.atoms.mount(dependency)?;
                    self.atoms.add_downstream(dependency.id(), consumer.id());
                }
                Some(false) => {}
                None => tracing::trace!(atom = %dependency, "read from superseded evaluation"),
            }
            Ok(snapshot.value)
        })
    }

    pub fn mount(&self, atom: &AnyAtom, node: &Arc<dyn ComputedNode>) -> Result<()> {
        self.atoms.mounts().mount(
            atom,
            || self.read_atom_state(atom, node, false).map(drop),
            || {
                for dependency in self.atoms.dependencies(atom.id()) {
                    self.atoms.mount(&dependency)?;
                    self.atoms.add_downstream(dependency.id(), atom.id());
                }
                Ok(())
            },
        )
    }

    pub fn unmount(&self, atom: &AnyAtom) -> Result<()> {
        self.atoms.mounts().unmount(atom, || {
            for dependency in self.atoms.dependencies(atom.id()) {
                self.atoms.release(&dependency, atom.id())?;
            }
            Ok(())
        })
    }

    /// Issue a fresh signal for `atom`, aborting the one handed out before.
    pub fn renew_signal(&self, atom: &AnyAtom) -> AbortSignal {
        let controller = AbortController::new();
        let signal = controller.signal();
        let previous = {
            let mut table = self.atoms.table.borrow_mut();
            match table.get_mut(atom.id()).and_then(AtomRecord::as_computed_mut) {
                Some(record) => record.abort.replace(controller),
                None => None,
            }
        };
        if let Some(previous) = previous {
            tracing::debug!(atom = %atom, "aborting superseded signal");
            previous.abort(format!("abort {} atom", atom.label().unwrap_or("anonymous")));
        }
        signal
    }
}

fn record_mut<'t>(table: &'t mut AtomTable, atom: &AnyAtom) -> Result<&'t mut ComputedRecord> {
    table
        .get_mut(atom.id())
        .and_then(AtomRecord::as_computed_mut)
        .ok_or_else(|| StoreError::ValueType {
            atom: atom.to_string(),
        })
}

/// Atoms in `before` that `after` no longer contains.
fn dropped(before: Dependencies, after: &Dependencies) -> AtomList {
    before
        .into_values()
        .filter(|dependency| !after.contains_key(&dependency.atom.id()))
        .map(|dependency| dependency.atom)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::atom::{Computed, Readable, State};
    use crate::runtime::Runtime;
    use crate::store::StoreOptions;

    #[test]
    fn unmounted_reads_revalidate_by_epoch() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let runs = Arc::new(AtomicUsize::new(0));

        let base = State::new(1);
        let derived = Computed::new({
            let base = base.clone();
            let runs = runs.clone();
            move |get| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(get.get(&base)? % 2)
            }
        });
        let base = base.erase();
        let derived = derived.erase();

        let first = runtime.atoms.read_atom_state(&derived, false).unwrap();
        let again = runtime.atoms.read_atom_state(&derived, false).unwrap();
        assert_eq!(first.epoch, 0);
        assert_eq!(again.epoch, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let write = super::super::Write::Value(Arc::new(3));
        runtime.atoms.set_atom_state(&base, write).unwrap();
        let after = runtime.atoms.read_atom_state(&derived, false).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        // 3 % 2 == 1 % 2, so the epoch holds.
        assert_eq!(after.epoch, 0);
    }

    #[test]
    fn renewing_a_signal_aborts_the_previous_one() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();
        let atom = Computed::new(|_| Ok(0)).with_label("fetch").erase();
        runtime.atoms.read_atom_state(&atom, false).unwrap();

        let computed = runtime.atoms.computed();
        let first = computed.renew_signal(&atom);
        let second = computed.renew_signal(&atom);
        assert!(first.is_aborted());
        assert_eq!(first.reason().as_deref(), Some("abort fetch atom"));
        assert!(!second.is_aborted());
    }

    #[test]
    fn failed_evaluation_restores_dependencies() {
        let shared = Runtime::shared(&StoreOptions::default());
        let runtime = shared.lock();

        let fail = State::new(false);
        let derived = Computed::new({
            let fail = fail.clone();
            move |get| {
                if get.get(&fail)? {
                    return Err(StoreError::evaluation("broken"));
                }
                Ok(7)
            }
        });
        let fail = fail.erase();
        let derived = derived.erase();

        runtime.atoms.read_atom_state(&derived, false).unwrap();
        let write = super::super::Write::Value(Arc::new(true));
        runtime.atoms.set_atom_state(&fail, write).unwrap();
        assert!(runtime.atoms.read_atom_state(&derived, false).is_err());

        assert_eq!(runtime.atoms.dependencies(derived.id()), vec![fail.clone()]);
        assert_eq!(runtime.atoms.epoch(derived.id()), Some(0));
    }
}
