//! Logging interceptor.
//!
//! [`TracingInterceptor`] runs every continuation inside a `tracing` span and
//! follows it with an event carrying the outcome, so store activity shows up
//! in whatever subscriber the application installs.

use indexmap::IndexSet;

use crate::atom::{AnyAtom, AtomId, IntoTargets};
use crate::interceptor::{Hook, Interceptor, Outcome};

/// Interceptor that logs hooks through `tracing`.
///
/// Completed hooks log at `DEBUG`, failed ones at `WARN`.
#[derive(Debug, Default)]
pub struct TracingInterceptor {
    watched: Option<IndexSet<AtomId>>,
}

impl TracingInterceptor {
    /// Log hooks on every atom.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log only hooks whose target is one of `targets`.
    pub fn watching(targets: impl IntoTargets) -> Self {
        Self {
            watched: Some(targets.into_targets().iter().map(AnyAtom::id).collect()),
        }
    }

    fn watches(&self, atom: &AnyAtom) -> bool {
        self.watched
            .as_ref()
            .map_or(true, |watched| watched.contains(&atom.id()))
    }

    fn wrap(&self, hook: Hook, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        if !self.watches(atom) {
            next();
            return;
        }

        let span = tracing::debug_span!("store_hook", %hook, %atom);
        match span.in_scope(next) {
            Outcome::Success(_) => tracing::debug!(%hook, %atom, "store hook completed"),
            Outcome::Error(error) => tracing::warn!(%hook, %atom, %error, "store hook failed"),
        }
    }
}

impl Interceptor for TracingInterceptor {
    fn get(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Get, atom, next)
    }

    fn compute(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Compute, atom, next)
    }

    fn set(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Set, atom, next)
    }

    fn mount(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Mount, atom, next)
    }

    fn unmount(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Unmount, atom, next)
    }

    fn subscribe(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Subscribe, atom, next)
    }

    fn unsubscribe(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        self.wrap(Hook::Unsubscribe, atom, next)
    }
}
