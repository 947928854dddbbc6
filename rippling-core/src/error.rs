//! Store errors.
//!
//! Usage errors (a misbehaving interceptor) and evaluation errors (a computed
//! body that failed) share one enum so evaluation bodies can propagate both
//! with `?` through the getter.

use thiserror::Error;

use crate::cancel::Aborted;
use crate::interceptor::Hook;

/// Boxed error produced by user evaluation bodies and commands.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An interceptor returned without calling its continuation.
    #[error("interceptor did not invoke continuation synchronously ({hook} hook on {atom})")]
    ContinuationNotInvoked { hook: Hook, atom: String },

    /// An interceptor called its continuation more than once.
    #[error("interceptor invoked continuation {calls} times ({hook} hook on {atom})")]
    ContinuationReinvoked { hook: Hook, atom: String, calls: u32 },

    /// A write targeted an atom that has no settable value.
    #[error("atom {atom} is not writable")]
    NotWritable { atom: String },

    /// Work was abandoned because its cancellation signal fired.
    #[error(transparent)]
    Aborted(#[from] Aborted),

    /// A getter or subscription outlived the store it was issued by.
    #[error("store has been dropped")]
    StoreDropped,

    /// A stored value did not have the type its atom declares.
    #[error("stored value of {atom} has an unexpected type")]
    ValueType { atom: String },

    /// An evaluation body or command reported a failure.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] BoxError),
}

impl StoreError {
    /// Wrap an arbitrary error raised by an evaluation body or command.
    pub fn evaluation(err: impl Into<BoxError>) -> Self {
        Self::Evaluation(err.into())
    }

    /// True for programmer errors that must not be retried.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::ContinuationNotInvoked { .. }
                | Self::ContinuationReinvoked { .. }
                | Self::NotWritable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_wraps_strings() {
        let err = StoreError::evaluation("boom");
        assert_eq!(err.to_string(), "evaluation failed: boom");
        assert!(!err.is_usage_error());
    }

    #[test]
    fn continuation_message_names_hook_and_atom() {
        let err = StoreError::ContinuationNotInvoked {
            hook: Hook::Compute,
            atom: "total".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "interceptor did not invoke continuation synchronously (compute hook on total)"
        );
        assert!(err.is_usage_error());
    }
}
