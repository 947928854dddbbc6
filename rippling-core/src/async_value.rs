//! Asynchronous Values
//!
//! A computed atom may return an [`AsyncValue`]: a cloneable handle to a
//! shared future. The store treats it like any other value, comparing
//! handles by identity, so every evaluation that starts new work bumps the
//! atom's epoch while re-reading a cached one does not.
//!
//! Pairing the future with the evaluation's abort signal makes superseded
//! work resolve to [`Aborted`] instead of a stale value.
//!
//! ```rust
//! use rippling_core::{AsyncValue, Computed, State, Store};
//!
//! let id = State::new(1_u32);
//! let user = Computed::with_signal({
//!     let id = id.clone();
//!     move |get, cx| {
//!         let id = get.get(&id)?;
//!         Ok(AsyncValue::with_signal(cx.signal(), async move { format!("user {id}") }))
//!     }
//! });
//!
//! let store = Store::new();
//! let pending = store.get(&user).unwrap();
//! store.set(&id, 2).unwrap();
//! let current = store.get(&user).unwrap();
//! assert_ne!(pending, current);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::cancel::{AbortSignal, Aborted};

/// Output of an [`AsyncValue`].
pub type AsyncResult<T> = Result<T, Aborted>;

/// A shared, identity-compared future value.
pub struct AsyncValue<T> {
    id: u64,
    future: Shared<BoxFuture<'static, AsyncResult<T>>>,
}

impl<T> AsyncValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::from_result(future.map(Ok))
    }

    /// Race `future` against `signal`; an abort wins ties.
    pub fn with_signal<F>(signal: AbortSignal, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::from_result(async move {
            tokio::select! {
                biased;
                aborted = signal.aborted() => Err(aborted),
                value = future => Ok(value),
            }
        })
    }

    /// A value that is already resolved.
    pub fn ready(value: T) -> Self {
        Self::from_result(futures_util::future::ready(Ok(value)))
    }

    fn from_result<F>(future: F) -> Self
    where
        F: Future<Output = AsyncResult<T>> + Send + 'static,
    {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            future: future.boxed().shared(),
        }
    }

    /// Wait for the value. Every clone observes the same result.
    pub async fn resolve(&self) -> AsyncResult<T> {
        self.future.clone().await
    }

    /// The result, if some clone has already driven the future to completion.
    pub fn peek(&self) -> Option<AsyncResult<T>> {
        self.future.peek().cloned()
    }
}

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            future: self.future.clone(),
        }
    }
}

impl<T> PartialEq for AsyncValue<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for AsyncValue<T> {}

impl<T> fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::AbortController;

    #[tokio::test]
    async fn clones_share_one_result() {
        let value = AsyncValue::new(async { 41 + 1 });
        let other = value.clone();
        assert_eq!(value, other);
        assert_eq!(value.resolve().await, Ok(42));
        assert_eq!(other.peek(), Some(Ok(42)));
    }

    #[tokio::test]
    async fn abort_resolves_to_error() {
        let controller = AbortController::new();
        let value = AsyncValue::with_signal(controller.signal(), std::future::pending::<u8>());
        controller.abort("abort fetch atom");

        let err = value.resolve().await.unwrap_err();
        assert_eq!(err.reason, "abort fetch atom");
    }

    #[test]
    fn identity_not_content_decides_equality() {
        let a = AsyncValue::ready(1);
        let b = AsyncValue::ready(1);
        assert_ne!(a, b);
        assert_eq!(a.peek(), None);
    }
}
