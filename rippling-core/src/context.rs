//! Evaluation Context
//!
//! An evaluation body receives a [`Getter`] for reading other atoms and a
//! [`Cancellation`] for requesting an abort signal. Both are owned handles:
//! they may be cloned into asynchronous work and used after the body has
//! returned. Reads made that late still return current values, but they
//! only count as dependencies while the evaluation that issued the getter
//! is the latest one for its atom.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::atom::{downcast, AnyAtom, ComputedNode, Readable};
use crate::cancel::AbortSignal;
use crate::error::{Result, StoreError};
use crate::runtime::SharedRuntime;

/// Dependency-tracking reader handed to evaluation bodies.
#[derive(Clone)]
pub struct Getter {
    runtime: Weak<SharedRuntime>,
    consumer: Arc<dyn ComputedNode>,
    evaluation: u64,
}

impl Getter {
    pub(crate) fn new(
        runtime: Weak<SharedRuntime>,
        consumer: Arc<dyn ComputedNode>,
        evaluation: u64,
    ) -> Self {
        Self {
            runtime,
            consumer,
            evaluation,
        }
    }

    /// Read `atom` and record it as a dependency of the evaluating atom.
    pub fn get<A: Readable>(&self, atom: &A) -> Result<A::Value> {
        let runtime = self.runtime.upgrade().ok_or(StoreError::StoreDropped)?;
        let runtime = runtime.lock();
        let atom = atom.erase();
        let value = runtime
            .atoms
            .computed()
            .read_dependency(&self.consumer, self.evaluation, &atom)?;
        downcast(&value, &atom)
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter")
            .field("consumer", &self.consumer.id())
            .field("evaluation", &self.evaluation)
            .finish()
    }
}

/// Access to the evaluating atom's abort signal.
#[derive(Clone)]
pub struct Cancellation {
    runtime: Weak<SharedRuntime>,
    atom: AnyAtom,
}

impl Cancellation {
    pub(crate) fn new(runtime: Weak<SharedRuntime>, atom: AnyAtom) -> Self {
        Self { runtime, atom }
    }

    /// A fresh signal for this atom.
    ///
    /// Each call aborts the signal returned by the previous call for the
    /// same atom, with reason `abort <label> atom`. Call it once per
    /// evaluation and keep the result.
    pub fn signal(&self) -> AbortSignal {
        let Some(runtime) = self.runtime.upgrade() else {
            return AbortSignal::aborted_with("store dropped");
        };
        let runtime = runtime.lock();
        let signal = runtime.atoms.computed().renew_signal(&self.atom);
        signal
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("atom", &self.atom)
            .finish()
    }
}
