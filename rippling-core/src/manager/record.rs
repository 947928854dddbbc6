//! Atom Records
//!
//! Out-of-band state for every atom a store has touched, keyed by atom
//! identity. Records hold only a weak handle to their own atom; strong
//! handles live in dependency maps and mount records, so a record becomes
//! unreachable once nothing reads, mounts or holds its atom.

use indexmap::{IndexMap, IndexSet};

use crate::atom::{AnyAtom, AtomId, Command, Value, WeakAtom};
use crate::cancel::AbortController;

/// Per-atom version counter.
pub(crate) type Epoch = i64;

/// Epoch of a computed atom that has never completed an evaluation.
pub(crate) const UNEVALUATED: Epoch = -1;

/// Marks an atom as part of an active subscription tree.
pub(crate) struct Mounted {
    /// Strong handle to the mounted atom itself.
    pub atom: AnyAtom,
    pub listeners: IndexMap<AtomId, Command>,
    /// Atoms that read this one during their own mounted evaluation.
    pub downstream: IndexSet<AtomId>,
}

impl Mounted {
    pub fn new(atom: AnyAtom) -> Self {
        Self {
            atom,
            listeners: IndexMap::new(),
            downstream: IndexSet::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.listeners.is_empty() && self.downstream.is_empty()
    }
}

/// One dependency as seen by the last evaluation that read it.
pub(crate) struct Dependency {
    pub atom: AnyAtom,
    pub epoch: Epoch,
}

/// Dependencies in read order.
pub(crate) type Dependencies = IndexMap<AtomId, Dependency>;

pub(crate) struct StateRecord {
    pub atom: WeakAtom,
    pub value: Value,
    pub epoch: Epoch,
    pub mounted: Option<Mounted>,
}

pub(crate) struct ComputedRecord {
    pub atom: WeakAtom,
    /// `None` until the first evaluation completes.
    pub value: Option<Value>,
    pub epoch: Epoch,
    pub dependencies: Dependencies,
    /// Incremented whenever an evaluation starts; a getter only records
    /// reads while its evaluation is still the latest.
    pub evaluation: u64,
    /// Set when the last evaluation failed, so the next read re-runs it.
    pub invalidated: bool,
    pub abort: Option<AbortController>,
    pub mounted: Option<Mounted>,
}

impl ComputedRecord {
    pub fn new(atom: WeakAtom) -> Self {
        Self {
            atom,
            value: None,
            epoch: UNEVALUATED,
            dependencies: Dependencies::new(),
            evaluation: 0,
            invalidated: false,
            abort: None,
            mounted: None,
        }
    }
}

pub(crate) enum AtomRecord {
    State(StateRecord),
    Computed(ComputedRecord),
}

impl AtomRecord {
    pub fn mounted(&self) -> Option<&Mounted> {
        match self {
            AtomRecord::State(record) => record.mounted.as_ref(),
            AtomRecord::Computed(record) => record.mounted.as_ref(),
        }
    }

    pub fn mounted_mut(&mut self) -> &mut Option<Mounted> {
        match self {
            AtomRecord::State(record) => &mut record.mounted,
            AtomRecord::Computed(record) => &mut record.mounted,
        }
    }

    pub fn epoch(&self) -> Epoch {
        match self {
            AtomRecord::State(record) => record.epoch,
            AtomRecord::Computed(record) => record.epoch,
        }
    }

    pub fn as_computed(&self) -> Option<&ComputedRecord> {
        match self {
            AtomRecord::Computed(record) => Some(record),
            AtomRecord::State(_) => None,
        }
    }

    pub fn as_computed_mut(&mut self) -> Option<&mut ComputedRecord> {
        match self {
            AtomRecord::Computed(record) => Some(record),
            AtomRecord::State(_) => None,
        }
    }

    fn is_reachable(&self) -> bool {
        let atom = match self {
            AtomRecord::State(record) => &record.atom,
            AtomRecord::Computed(record) => &record.atom,
        };
        self.mounted().is_some() || atom.is_alive()
    }
}

/// A value together with the epoch it was read at.
#[derive(Clone)]
pub(crate) struct AtomSnapshot {
    pub value: Value,
    pub epoch: Epoch,
}

/// Default minimum record count before unreachable records are swept.
pub(crate) const DEFAULT_SWEEP_THRESHOLD: usize = 256;

/// Identity-keyed record storage.
pub(crate) struct AtomTable {
    records: IndexMap<AtomId, AtomRecord>,
    threshold: usize,
    sweep_at: usize,
}

impl AtomTable {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            records: IndexMap::new(),
            threshold,
            sweep_at: threshold,
        }
    }

    pub fn get(&self, id: AtomId) -> Option<&AtomRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: AtomId) -> Option<&mut AtomRecord> {
        self.records.get_mut(&id)
    }

    pub fn contains(&self, id: AtomId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &AtomRecord> {
        self.records.values()
    }

    /// Insert a new record, sweeping unreachable ones once the table has
    /// doubled since the last sweep.
    pub fn insert(&mut self, id: AtomId, record: AtomRecord) -> &mut AtomRecord {
        if self.records.len() >= self.sweep_at {
            self.sweep();
        }
        self.records.entry(id).or_insert(record)
    }

    pub fn sweep(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_reachable());
        self.sweep_at = (self.records.len() * 2).max(self.threshold);

        let removed = before - self.records.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.records.len(), "swept unreachable atom records");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::State;
    use std::sync::Arc;

    fn state_record(atom: &AnyAtom) -> AtomRecord {
        AtomRecord::State(StateRecord {
            atom: atom.downgrade(),
            value: Arc::new(0_i32),
            epoch: 0,
            mounted: None,
        })
    }

    #[test]
    fn mounted_is_idle_until_something_attaches() {
        let atom = AnyAtom::from(&State::new(0));
        let mut mounted = Mounted::new(atom.clone());
        assert!(mounted.is_idle());

        mounted.downstream.insert(atom.id());
        assert!(!mounted.is_idle());
    }

    #[test]
    fn sweep_drops_records_of_dropped_atoms() {
        let mut table = AtomTable::new(16);

        let kept = State::new(0);
        let kept_any = AnyAtom::from(&kept);
        table.insert(kept_any.id(), state_record(&kept_any));

        let dropped_id = {
            let dropped = AnyAtom::from(&State::new(0));
            table.insert(dropped.id(), state_record(&dropped));
            dropped.id()
        };

        assert_eq!(table.sweep(), 1);
        assert!(table.contains(kept_any.id()));
        assert!(!table.contains(dropped_id));
    }

    #[test]
    fn sweep_keeps_mounted_records() {
        let mut table = AtomTable::new(16);
        let id = {
            let atom = AnyAtom::from(&State::new(0));
            let record = table.insert(atom.id(), state_record(&atom));
            *record.mounted_mut() = Some(Mounted::new(atom.clone()));
            atom.id()
        };

        assert_eq!(table.sweep(), 0);
        assert!(table.get(id).and_then(AtomRecord::mounted).is_some());
    }

    #[test]
    fn insert_sweeps_once_threshold_reached() {
        let mut table = AtomTable::new(2);
        for _ in 0..2 {
            let atom = AnyAtom::from(&State::new(0));
            table.insert(atom.id(), state_record(&atom));
        }
        assert_eq!(table.len(), 2);

        let live = AnyAtom::from(&State::new(0));
        table.insert(live.id(), state_record(&live));
        assert_eq!(table.len(), 1);
    }
}
