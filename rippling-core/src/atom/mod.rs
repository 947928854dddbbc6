//! Atoms
//!
//! Atoms are cheap identity tokens. They carry configuration (an initial
//! value, an evaluation body, a command body) but never state: values,
//! epochs, dependency maps and mount records live in the [`Store`] that
//! touches them, keyed by [`AtomId`].
//!
//! [`Store`]: crate::Store

mod command;
mod computed;
mod erased;
mod id;
mod state;

use smallvec::{smallvec, SmallVec};

pub use command::Command;
pub use computed::Computed;
pub use erased::{AnyAtom, Value};
pub use id::{AtomId, AtomKind};
pub use state::State;

pub(crate) use erased::{downcast, ComputedNode, Node, StateNode, WeakAtom};

/// An atom whose value can be read through a store or getter.
pub trait Readable {
    type Value: Clone + Send + Sync + 'static;

    /// Erase the value type.
    fn erase(&self) -> AnyAtom;
}

/// The atoms a single subscription covers.
pub type Targets = SmallVec<[AnyAtom; 2]>;

/// Anything [`Store::subscribe`](crate::Store::subscribe) accepts as targets:
/// a single atom, or a list of erased atoms.
pub trait IntoTargets {
    fn into_targets(self) -> Targets;
}

impl<A: Readable> IntoTargets for &A {
    fn into_targets(self) -> Targets {
        smallvec![self.erase()]
    }
}

impl IntoTargets for Vec<AnyAtom> {
    fn into_targets(self) -> Targets {
        self.into_iter().collect()
    }
}

impl<const N: usize> IntoTargets for [AnyAtom; N] {
    fn into_targets(self) -> Targets {
        self.into_iter().collect()
    }
}

impl IntoTargets for &[AnyAtom] {
    fn into_targets(self) -> Targets {
        self.iter().cloned().collect()
    }
}
