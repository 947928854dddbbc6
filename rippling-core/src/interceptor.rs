//! Interceptors
//!
//! An interceptor observes the store from the inside: every hook receives
//! the target atom and a continuation that performs the actual work. The
//! continuation must be called exactly once before the hook returns. The
//! store counts invocations and fails the surrounding call otherwise, since
//! a deferred or skipped continuation would leave dependency tracking
//! half-done.
//!
//! The continuation returns an [`Outcome`], so a hook can tell a failed
//! operation from a successful one and see the value it produced.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::atom::{AnyAtom, Value};
use crate::error::{Result, StoreError};
use crate::manager::AtomSnapshot;

/// The store operation an interceptor hook wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    /// A read, either from a store caller or from inside an evaluation body.
    Get,
    /// A whole computed evaluation (cache miss only).
    Compute,
    /// A write to a state atom.
    Set,
    /// Creation of a mount record.
    Mount,
    /// Removal of a mount record.
    Unmount,
    /// A listener being attached to one target atom.
    Subscribe,
    /// A listener being detached from one target atom.
    Unsubscribe,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Get => "get",
            Hook::Compute => "compute",
            Hook::Set => "set",
            Hook::Mount => "mount",
            Hook::Unmount => "unmount",
            Hook::Subscribe => "subscribe",
            Hook::Unsubscribe => "unsubscribe",
        };
        f.write_str(name)
    }
}

/// What a continuation did.
#[derive(Clone)]
pub enum Outcome {
    /// The operation completed. Carries the value read, computed or written
    /// for `Get`, `Compute` and `Set`; `None` for the other hooks.
    Success(Option<Value>),
    /// The operation failed with this message.
    Error(String),
}

impl Outcome {
    fn of<R: HookOutput>(result: &Result<R>) -> Self {
        match result {
            Ok(output) => Outcome::Success(output.hook_value()),
            Err(err) => Outcome::Error(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Success(value) => value.as_ref(),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Error(message) => Some(message),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(value) => f
                .debug_tuple("Success")
                .field(&value.as_ref().map(|_| ".."))
                .finish(),
            Outcome::Error(message) => f.debug_tuple("Error").field(message).finish(),
        }
    }
}

/// Output of an intercepted body that an [`Outcome`] can carry.
pub(crate) trait HookOutput {
    fn hook_value(&self) -> Option<Value>;
}

impl HookOutput for () {
    fn hook_value(&self) -> Option<Value> {
        None
    }
}

impl HookOutput for Value {
    fn hook_value(&self) -> Option<Value> {
        Some(self.clone())
    }
}

impl HookOutput for AtomSnapshot {
    fn hook_value(&self) -> Option<Value> {
        Some(self.value.clone())
    }
}

/// Synchronous observability hooks.
///
/// Every method defaults to calling `next` straight away.
pub trait Interceptor: Send + Sync {
    fn get(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }

    fn compute(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }

    fn set(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }

    fn mount(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }

    fn unmount(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }

    fn subscribe(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }

    fn unsubscribe(&self, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let _ = atom;
        next();
    }
}

impl Hook {
    fn dispatch(
        self,
        interceptor: &dyn Interceptor,
        atom: &AnyAtom,
        next: &mut dyn FnMut() -> Outcome,
    ) {
        match self {
            Hook::Get => interceptor.get(atom, next),
            Hook::Compute => interceptor.compute(atom, next),
            Hook::Set => interceptor.set(atom, next),
            Hook::Mount => interceptor.mount(atom, next),
            Hook::Unmount => interceptor.unmount(atom, next),
            Hook::Subscribe => interceptor.subscribe(atom, next),
            Hook::Unsubscribe => interceptor.unsubscribe(atom, next),
        }
    }
}

/// Run `body` through the matching hook, enforcing exactly one continuation.
pub(crate) fn intercept<R: HookOutput>(
    interceptor: Option<&Arc<dyn Interceptor>>,
    hook: Hook,
    atom: &AnyAtom,
    body: impl FnOnce() -> Result<R>,
) -> Result<R> {
    let Some(interceptor) = interceptor else {
        return body();
    };

    let mut body = Some(body);
    let mut output = None;
    let mut calls = 0_u32;
    let mut next = || {
        calls += 1;
        match body.take() {
            Some(body) => {
                let result = body();
                let outcome = Outcome::of(&result);
                output = Some(result);
                outcome
            }
            None => Outcome::Error(format!("{hook} continuation already invoked")),
        }
    };
    hook.dispatch(interceptor.as_ref(), atom, &mut next);

    match (calls, output) {
        (1, Some(output)) => output,
        (0, _) => Err(StoreError::ContinuationNotInvoked {
            hook,
            atom: atom.to_string(),
        }),
        (calls, _) => Err(StoreError::ContinuationReinvoked {
            hook,
            atom: atom.to_string(),
            calls,
        }),
    }
}
