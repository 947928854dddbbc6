//! Store
//!
//! A [`Store`] holds the values of every atom it touches. Atoms themselves are
//! configuration only, so the same atom read through two stores has two
//! independent values.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use rippling_core::{Command, Computed, State, Store, SubscribeOptions};
//!
//! let count = State::new(1);
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move |get| Ok(get.get(&count)? * 2)
//! });
//!
//! let store = Store::new();
//! let calls = Arc::new(AtomicUsize::new(0));
//! let listener = Command::new({
//!     let calls = calls.clone();
//!     move |_, ()| {
//!         calls.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     }
//! });
//!
//! let subscription = store
//!     .subscribe(&doubled, &listener, SubscribeOptions::default())
//!     .unwrap();
//! store.set(&count, 2).unwrap();
//! assert_eq!(store.get(&doubled).unwrap(), 4);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//!
//! subscription.unsubscribe().unwrap();
//! ```
//!
//! # Threads
//!
//! A store is `Send + Sync`. Calls from the thread currently inside the store
//! (evaluation bodies, interceptors, commands, listeners) re-enter directly;
//! calls from other threads block until it leaves.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::atom::{downcast, AnyAtom, Command, IntoTargets, Readable, State, Targets, Value};
use crate::cancel::{AbortRegistration, AbortSignal};
use crate::error::{Result, StoreError};
use crate::interceptor::{Hook, Interceptor};
use crate::manager::{Write, DEFAULT_SWEEP_THRESHOLD};
use crate::runtime::{BatchGuard, Runtime, SharedRuntime};

/// Container for atom values.
///
/// Cloning a store yields another handle to the same values.
#[derive(Clone)]
pub struct Store {
    pub(crate) runtime: Arc<SharedRuntime>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            runtime: Runtime::shared(&options),
        }
    }

    /// Read the current value of a state or computed atom.
    pub fn get<A: Readable>(&self, atom: &A) -> Result<A::Value> {
        let atom = atom.erase();
        let runtime = self.runtime.lock();
        let snapshot = runtime.atoms.intercept(Hook::Get, &atom, || {
            runtime.atoms.read_atom_state(&atom, false)
        })?;
        downcast(&snapshot.value, &atom)
    }

    /// Replace the value of a state atom and notify affected listeners.
    pub fn set<T>(&self, atom: &State<T>, value: T) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.write(&atom.erase(), Write::Value(Arc::new(value)))
    }

    /// Derive the next value of a state atom from its current one.
    pub fn update<T, F>(&self, atom: &State<T>, update: F) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> T,
    {
        let erased = atom.erase();
        let updater = |current: &Value| -> Result<Value> {
            let current = current
                .downcast_ref::<T>()
                .ok_or_else(|| StoreError::ValueType {
                    atom: erased.to_string(),
                })?;
            let next: Value = Arc::new(update(current));
            Ok(next)
        };
        self.write(&erased, Write::Update(Box::new(updater)))
    }

    fn write(&self, atom: &AnyAtom, write: Write<'_>) -> Result<()> {
        let runtime = self.runtime.lock();
        let batch = runtime.enter_batch();
        let result = runtime.atoms.intercept(Hook::Set, atom, || {
            let value = runtime.atoms.set_atom_state(atom, write)?;
            runtime.listeners.mark_pending_listeners(&runtime.atoms, atom)?;
            Ok(value)
        });
        self.close_batch(&runtime, batch, result).map(drop)
    }

    /// Run a command. Listeners affected by its writes fire once it returns.
    pub fn call<A, R>(&self, command: &Command<A, R>, args: A) -> Result<R>
    where
        A: 'static,
        R: 'static,
    {
        let runtime = self.runtime.lock();
        let batch = runtime.enter_batch();
        let result = command.run(self, args);
        self.close_batch(&runtime, batch, result)
    }

    /// Drain pending listeners if `batch` is the outermost one.
    ///
    /// The drain runs whether or not the batched work succeeded, since a
    /// failing command may already have written.
    fn close_batch<R>(&self, runtime: &Runtime, batch: BatchGuard<'_>, result: Result<R>) -> Result<R> {
        if !batch.is_outermost() {
            return result;
        }
        let drained = self.drain(runtime);
        drop(batch);

        let value = result?;
        drained?;
        Ok(value)
    }

    fn drain(&self, runtime: &Runtime) -> Result<()> {
        let mut first_error = None;
        let mut rounds = 0_usize;
        while !runtime.listeners.is_empty() {
            rounds += 1;
            for listener in runtime.listeners.notify() {
                if let Err(err) = listener.run(self, ()) {
                    tracing::warn!(listener = %listener, error = %err, "listener failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if rounds > 0 {
            tracing::debug!(rounds, "drained pending listeners");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Attach `listener` to every target atom.
    ///
    /// Each target is mounted, cascading mounts into its dependencies, and
    /// the listener fires after writes that reach any of them. The returned
    /// handle unsubscribes on drop; an aborted `options.signal` unsubscribes
    /// too. If the signal has already fired the subscription is inert.
    pub fn subscribe(
        &self,
        targets: impl IntoTargets,
        listener: &Command,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let inner = Arc::new(SubscriptionInner {
            runtime: Arc::downgrade(&self.runtime),
            targets: targets.into_targets(),
            listener: listener.clone(),
            active: AtomicBool::new(false),
            abort: Mutex::new(None),
        });
        if options.signal.as_ref().is_some_and(AbortSignal::is_aborted) {
            return Ok(Subscription::new(inner));
        }

        {
            let runtime = self.runtime.lock();
            for (index, target) in inner.targets.iter().enumerate() {
                let attached = runtime.atoms.intercept(Hook::Subscribe, target, || {
                    runtime.atoms.mount(target)?;
                    runtime.atoms.add_listener(target.id(), listener);
                    Ok(())
                });
                if let Err(err) = attached {
                    for target in &inner.targets[..=index] {
                        runtime.atoms.remove_listener(target.id(), listener.id());
                        if let Err(rollback) = runtime.atoms.unmount(target) {
                            tracing::warn!(atom = %target, error = %rollback, "failed to roll back subscription");
                        }
                    }
                    return Err(err);
                }
            }
            inner.active.store(true, Ordering::Release);
        }
        tracing::debug!(listener = %listener, targets = inner.targets.len(), "subscribed");

        if let Some(signal) = options.signal {
            let registration = signal.on_abort({
                let inner = inner.clone();
                move |reason| {
                    tracing::debug!(listener = %inner.listener, reason, "subscription aborted");
                    if let Err(err) = inner.release() {
                        tracing::warn!(error = %err, "failed to release aborted subscription");
                    }
                }
            });
            *inner.abort.lock() = Some((signal, registration));
        }
        Ok(Subscription::new(inner))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

struct SubscriptionInner {
    runtime: Weak<SharedRuntime>,
    targets: Targets,
    listener: Command,
    active: AtomicBool,
    /// The abort callback, removed again on release so a long-lived signal
    /// does not collect dead subscriptions.
    abort: Mutex<Option<(AbortSignal, AbortRegistration)>>,
}

impl SubscriptionInner {
    /// Detach the listener from every target and unmount what became idle.
    /// Only the first call does anything.
    fn release(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let abort = self.abort.lock().take();
        if let Some((signal, registration)) = abort {
            signal.remove_on_abort(registration);
        }
        let Some(runtime) = self.runtime.upgrade() else {
            return Ok(());
        };
        let runtime = runtime.lock();

        let mut first_error = None;
        for target in &self.targets {
            let detached = runtime.atoms.intercept(Hook::Unsubscribe, target, || {
                runtime.atoms.remove_listener(target.id(), self.listener.id());
                runtime.atoms.unmount(target)
            });
            if let Err(err) = detached {
                first_error.get_or_insert(err);
            }
        }
        tracing::debug!(listener = %self.listener, "unsubscribed");
        first_error.map_or(Ok(()), Err)
    }
}

/// Handle to an active subscription.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
    detached: bool,
}

impl Subscription {
    fn new(inner: Arc<SubscriptionInner>) -> Self {
        Self {
            inner,
            detached: false,
        }
    }

    /// Unsubscribe now, reporting interceptor or unmount errors.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.detached = true;
        self.inner.release()
    }

    /// Keep the subscription alive without the handle.
    ///
    /// It then ends only when its abort signal fires, or never if it was
    /// created without one.
    pub fn detach(mut self) {
        self.detached = true;
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn targets(&self) -> &[AnyAtom] {
        &self.inner.targets
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Err(err) = self.inner.release() {
            tracing::warn!(error = %err, "failed to release dropped subscription");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.inner.listener)
            .field("targets", &self.inner.targets)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Per-subscription options.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Unsubscribes when it fires.
    pub signal: Option<AbortSignal>,
}

impl SubscribeOptions {
    pub fn with_signal(signal: AbortSignal) -> Self {
        Self {
            signal: Some(signal),
        }
    }
}

/// Store construction options.
#[derive(Clone)]
pub struct StoreOptions {
    interceptor: Option<Arc<dyn Interceptor>>,
    sweep_threshold: usize,
}

impl StoreOptions {
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Minimum number of records before unreachable ones are swept.
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    pub(crate) fn interceptor(&self) -> Option<&Arc<dyn Interceptor>> {
        self.interceptor.as_ref()
    }

    pub(crate) fn sweep_threshold(&self) -> usize {
        self.sweep_threshold
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            interceptor: None,
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("interceptor", &self.interceptor.is_some())
            .field("sweep_threshold", &self.sweep_threshold)
            .finish()
    }
}
