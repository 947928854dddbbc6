//! Cooperative Cancellation
//!
//! Computed atoms that start asynchronous work can ask for an [`AbortSignal`].
//! The store keeps at most one live signal per atom: asking again aborts the
//! previous one. Cancellation is cooperative, so the work itself has to watch
//! the signal, either by polling [`AbortSignal::is_aborted`], awaiting
//! [`AbortSignal::aborted`], or registering an [`AbortSignal::on_abort`]
//! callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Error returned by work abandoned through its signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("aborted: {reason}")]
pub struct Aborted {
    pub reason: String,
}

type AbortCallback = Box<dyn FnOnce(&str) + Send>;

/// Key of a callback registered with [`AbortSignal::on_abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortRegistration(u64);

struct SignalState {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
    next_callback: AtomicU64,
    callbacks: Mutex<IndexMap<u64, AbortCallback>>,
}

/// The receiving half of a cancellation pair.
#[derive(Clone)]
pub struct AbortSignal {
    state: Arc<SignalState>,
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            state: Arc::new(SignalState {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
                next_callback: AtomicU64::new(0),
                callbacks: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// A signal that is already aborted.
    pub fn aborted_with(reason: impl Into<String>) -> Self {
        let signal = Self::new();
        signal.abort(reason.into());
        signal
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.state.reason.lock().clone()
    }

    /// `Err` once the signal has fired.
    pub fn check(&self) -> Result<(), Aborted> {
        if self.is_aborted() {
            return Err(self.to_aborted());
        }
        Ok(())
    }

    /// Resolves once the signal fires.
    pub async fn aborted(&self) -> Aborted {
        loop {
            // Registered before the flag check so a concurrent abort
            // between the check and the await still wakes us.
            let notified = self.state.notify.notified();
            if self.is_aborted() {
                return self.to_aborted();
            }
            notified.await;
        }
    }

    /// Run `callback` with the abort reason when the signal fires.
    ///
    /// Runs immediately if the signal has already fired. The returned key
    /// removes the callback again through [`AbortSignal::remove_on_abort`].
    pub fn on_abort<F>(&self, callback: F) -> AbortRegistration
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let key = self.state.next_callback.fetch_add(1, Ordering::Relaxed);
        let mut callbacks = self.state.callbacks.lock();
        if !self.is_aborted() {
            callbacks.insert(key, Box::new(callback));
            return AbortRegistration(key);
        }
        drop(callbacks);
        let reason = self.reason().unwrap_or_default();
        callback(&reason);
        AbortRegistration(key)
    }

    /// Drop a callback that has not run yet. Returns whether it was still
    /// registered.
    pub fn remove_on_abort(&self, registration: AbortRegistration) -> bool {
        let removed = self.state.callbacks.lock().shift_remove(&registration.0);
        removed.is_some()
    }

    #[cfg(test)]
    pub(crate) fn registered_callbacks(&self) -> usize {
        self.state.callbacks.lock().len()
    }

    fn abort(&self, reason: String) {
        {
            let mut slot = self.state.reason.lock();
            if self.is_aborted() {
                return;
            }
            *slot = Some(reason.clone());
            self.state.aborted.store(true, Ordering::Release);
        }
        self.state.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.state.callbacks.lock());
        for callback in callbacks.into_values() {
            callback(&reason);
        }
    }

    fn to_aborted(&self) -> Aborted {
        Aborted {
            reason: self.reason().unwrap_or_default(),
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

/// The sending half of a cancellation pair.
#[derive(Debug)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire the signal. Later calls are ignored.
    pub fn abort(&self, reason: impl Into<String>) {
        self.signal.abort(reason.into());
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}
