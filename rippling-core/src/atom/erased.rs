//! Type-erased atom handles.
//!
//! The store keeps atoms of every value type in one table, so it works with
//! erased nodes: values travel as `Arc<dyn Any>` and are downcast again at
//! the typed API boundary.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::id::{AtomId, AtomKind};
use crate::context::{Cancellation, Getter};
use crate::error::{Result, StoreError};

/// An erased atom value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Behaviour shared by every erased atom node.
pub(crate) trait AtomNode: Send + Sync {
    fn id(&self) -> AtomId;

    fn label(&self) -> Option<&str>;
}

/// A leaf atom node.
pub(crate) trait StateNode: AtomNode {
    /// A fresh copy of the initial value.
    fn initial_value(&self) -> Value;
}

/// A derived atom node.
pub(crate) trait ComputedNode: AtomNode {
    /// Run the evaluation body.
    fn evaluate(&self, get: &Getter, cx: &Cancellation) -> Result<Value>;

    /// Equality used to decide whether a recompute bumps the epoch.
    fn same_value(&self, previous: &Value, next: &Value) -> bool;
}

#[derive(Clone)]
pub(crate) enum Node {
    State(Arc<dyn StateNode>),
    Computed(Arc<dyn ComputedNode>),
}

/// Identity-comparable handle to a state or computed atom of any value type.
///
/// Interceptors, multi-atom subscriptions and introspection work with this
/// handle. Cloning it never creates a new atom.
#[derive(Clone)]
pub struct AnyAtom {
    node: Node,
}

impl AnyAtom {
    pub(crate) fn state(node: Arc<dyn StateNode>) -> Self {
        Self {
            node: Node::State(node),
        }
    }

    pub(crate) fn computed(node: Arc<dyn ComputedNode>) -> Self {
        Self {
            node: Node::Computed(node),
        }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    pub fn id(&self) -> AtomId {
        match &self.node {
            Node::State(node) => node.id(),
            Node::Computed(node) => node.id(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.node {
            Node::State(node) => node.label(),
            Node::Computed(node) => node.label(),
        }
    }

    pub fn kind(&self) -> AtomKind {
        match &self.node {
            Node::State(_) => AtomKind::State,
            Node::Computed(_) => AtomKind::Computed,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakAtom {
        match &self.node {
            Node::State(node) => WeakAtom::State(Arc::downgrade(node)),
            Node::Computed(node) => WeakAtom::Computed(Arc::downgrade(node)),
        }
    }
}

impl PartialEq for AnyAtom {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AnyAtom {}

impl Hash for AnyAtom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for AnyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_atom(f, self.label(), self.id())
    }
}

impl fmt::Debug for AnyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyAtom")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("label", &self.label())
            .finish()
    }
}

/// Render an atom as its debug label, falling back to `anonymous#<id>`.
pub(crate) fn display_atom(
    f: &mut fmt::Formatter<'_>,
    label: Option<&str>,
    id: AtomId,
) -> fmt::Result {
    match label {
        Some(label) => f.write_str(label),
        None => write!(f, "anonymous{id}"),
    }
}

/// Non-owning handle kept by atom records.
#[derive(Clone)]
pub(crate) enum WeakAtom {
    State(Weak<dyn StateNode>),
    Computed(Weak<dyn ComputedNode>),
}

impl WeakAtom {
    pub(crate) fn is_alive(&self) -> bool {
        match self {
            WeakAtom::State(node) => node.strong_count() > 0,
            WeakAtom::Computed(node) => node.strong_count() > 0,
        }
    }
}

/// Downcast an erased value back to the type its atom declares.
pub(crate) fn downcast<T: Clone + 'static>(value: &Value, atom: &AnyAtom) -> Result<T> {
    let any: &(dyn Any + Send + Sync) = value.as_ref();
    any.downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| StoreError::ValueType {
            atom: atom.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Computed, State};

    #[test]
    fn identity_not_configuration_decides_equality() {
        let a = AnyAtom::from(&State::new(1));
        let b = AnyAtom::from(&State::new(1));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn display_falls_back_to_anonymous() {
        let labelled = State::new(0).with_label("count");
        let anonymous = Computed::new(|_| Ok(1));

        assert_eq!(AnyAtom::from(&labelled).to_string(), "count");
        let erased = AnyAtom::from(&anonymous);
        assert_eq!(erased.to_string(), format!("anonymous#{}", erased.id().raw()));
        assert_eq!(erased.kind(), AtomKind::Computed);
    }

    #[test]
    fn weak_handle_tracks_liveness() {
        let atom = State::new(String::from("x"));
        let weak = AnyAtom::from(&atom).downgrade();
        assert!(weak.is_alive());
        drop(atom);
        assert!(!weak.is_alive());
    }

    #[test]
    fn downcast_rejects_foreign_types() {
        let atom = AnyAtom::from(&State::new(0_u8));
        let value: Value = Arc::new(5_i32);
        assert_eq!(downcast::<i32>(&value, &atom).ok(), Some(5));
        assert!(matches!(
            downcast::<u8>(&value, &atom),
            Err(StoreError::ValueType { .. })
        ));
    }
}
