//! Rippling Core
//!
//! This crate provides the core of the Rippling atom store. It implements:
//!
//! - Atoms: state atoms, computed atoms and command atoms
//! - A store that keeps per-atom values, epochs and dependency maps
//! - Mount tracking and listener propagation for subscriptions
//! - Cooperative cancellation for asynchronous computed values
//! - Synchronous interceptor hooks for observability
//!
//! Atoms are configuration only. A [`Store`] creates the state of an atom the
//! first time it reads or writes it, so one atom can be shared by any number
//! of stores.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `atom`: Atom handles and their type-erased forms
//! - `manager`: The atom table and the graph algorithms over it
//! - `store`: The public store API, batching and subscriptions
//! - `cancel`: Abort controllers and signals
//! - `interceptor`: Hook points around every store operation
//! - `debug`: Introspection plus the event and tracing interceptors
//!
//! # Example
//!
//! ```rust
//! use rippling_core::{Command, Computed, State, Store, SubscribeOptions};
//!
//! // Create a state atom
//! let count = State::new(0);
//!
//! // Create a derived atom
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move |get| Ok(get.get(&count)? * 2)
//! });
//!
//! // Subscribe a listener to the derived atom
//! let store = Store::new();
//! let log = Command::new({
//!     let doubled = doubled.clone();
//!     move |store: &Store, ()| {
//!         println!("doubled: {}", store.get(&doubled)?);
//!         Ok(())
//!     }
//! });
//! let _subscription = store
//!     .subscribe(&doubled, &log, SubscribeOptions::default())
//!     .unwrap();
//!
//! // Update the state atom
//! store.set(&count, 5).unwrap();
//! // Listener runs, prints: "doubled: 10"
//! ```

pub mod atom;
pub mod async_value;
pub mod cancel;
pub mod context;
pub mod debug;
pub mod error;
pub mod interceptor;
mod manager;
mod runtime;
pub mod store;

pub use async_value::{AsyncResult, AsyncValue};
pub use atom::{AnyAtom, AtomId, AtomKind, Command, Computed, IntoTargets, Readable, State, Value};
pub use cancel::{AbortController, AbortRegistration, AbortSignal, Aborted};
pub use context::{Cancellation, Getter};
pub use debug::{EventInterceptor, EventPhase, StoreEvent, TracingInterceptor};
pub use error::{BoxError, Result, StoreError};
pub use interceptor::{Hook, Interceptor, Outcome};
pub use store::{Store, StoreOptions, SubscribeOptions, Subscription};
