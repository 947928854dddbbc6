//! Store events.
//!
//! [`EventInterceptor`] reports every hook as a pair of events sharing one
//! `event_id`: `Begin` before the continuation runs, then `Success` or
//! `Error` once it returns. The events serialize with serde, so a devtools
//! bridge can forward them as-is.
//!
//! Atom values are type-erased, so an event only carries `data` for value
//! types registered with [`EventInterceptor::render`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::atom::{AnyAtom, Value};
use crate::interceptor::{Hook, Interceptor, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPhase {
    Begin,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEvent {
    pub event_id: u64,
    pub hook: Hook,
    pub phase: EventPhase,
    /// Label of the target atom, or `anonymous#<id>`.
    pub target: String,
    /// The value read, computed or written, for `Success` events of value
    /// types with a registered renderer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure message of an `Error` event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type EventListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;
type Renderer = fn(&Value) -> Option<serde_json::Value>;

fn render_as<T: Serialize + 'static>(value: &Value) -> Option<serde_json::Value> {
    let value = value.downcast_ref::<T>()?;
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::debug!(error = %err, "failed to render event data");
            None
        }
    }
}

/// Interceptor that fans hook activity out to event listeners.
#[derive(Default)]
pub struct EventInterceptor {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(Option<Hook>, EventListener)>>,
    renderers: RwLock<HashMap<TypeId, Renderer>>,
}

impl EventInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one hook, or for all hooks with `None`.
    pub fn add_listener<F>(&self, hook: Option<Hook>, listener: F)
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push((hook, Arc::new(listener)));
    }

    /// Attach values of type `T` to events as JSON.
    pub fn render<T>(&self)
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.renderers
            .write()
            .insert(TypeId::of::<T>(), render_as::<T> as Renderer);
    }

    fn data(&self, value: &Value) -> Option<serde_json::Value> {
        let renderer = *self.renderers.read().get(&Any::type_id(&**value))?;
        renderer(value)
    }

    fn emit(&self, event: &StoreEvent) {
        let listeners: Vec<EventListener> = self
            .listeners
            .read()
            .iter()
            .filter(|(hook, _)| hook.map_or(true, |hook| hook == event.hook))
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn wrap(&self, hook: Hook, atom: &AnyAtom, next: &mut dyn FnMut() -> Outcome) {
        let mut event = StoreEvent {
            event_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            hook,
            phase: EventPhase::Begin,
            target: atom.to_string(),
            data: None,
            error: None,
        };
        self.emit(&event);

        match next() {
            Outcome::Success(value) => {
                event.phase = EventPhase::Success;
                event.data = value.as_ref().and_then(|value| self.data(value));
            }
            Outcome::Error(message) => {
                event.phase = EventPhase::Error;
                event.error = Some(message);
            }
        }
        self.emit(&event);
    }
}

impl Interceptor for EventInterceptor {
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

impl fmt::Debug for EventInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventInterceptor")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("listeners", &self.listeners.read().len())
            .field("renderers", &self.renderers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Computed, State};
    use crate::error::StoreError;
    use crate::store::{Store, StoreOptions};
    use parking_lot::Mutex;

    fn collect(interceptor: &EventInterceptor, hook: Option<Hook>) -> Arc<Mutex<Vec<StoreEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        interceptor.add_listener(hook, move |event| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn set_emits_begin_and_success() {
        let interceptor = Arc::new(EventInterceptor::new());
        let events = collect(&interceptor, Some(Hook::Set));
        let store = Store::with_options(StoreOptions::default().with_interceptor(interceptor.clone()));

        let count = State::new(0).with_label("count");
        store.set(&count, 1).unwrap();
        store.get(&count).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, EventPhase::Begin);
        assert_eq!(events[1].phase, EventPhase::Success);
        assert_eq!(events[0].event_id, events[1].event_id);
        assert_eq!(events[0].target, "count");
    }

    #[test]
    fn registered_types_carry_data() {
        let interceptor = Arc::new(EventInterceptor::new());
        interceptor.render::<i32>();
        let events = collect(&interceptor, None);
        let store = Store::with_options(StoreOptions::default().with_interceptor(interceptor.clone()));

        let count = State::new(0).with_label("count");
        let label = State::new("unrendered".to_string()).with_label("label");
        store.set(&count, 7).unwrap();
        store.get(&count).unwrap();
        store.get(&label).unwrap();

        let data: Vec<_> = events
            .lock()
            .iter()
            .filter(|event| event.phase == EventPhase::Success)
            .map(|event| (event.hook, event.data.clone()))
            .collect();
        assert_eq!(
            data,
            vec![
                (Hook::Set, Some(serde_json::json!(7))),
                (Hook::Get, Some(serde_json::json!(7))),
                (Hook::Get, None),
            ]
        );
    }

    #[test]
    fn failed_compute_reports_error() {
        let interceptor = Arc::new(EventInterceptor::new());
        let events = collect(&interceptor, Some(Hook::Compute));
        let store = Store::with_options(StoreOptions::default().with_interceptor(interceptor.clone()));

        let broken = Computed::new(|_| -> crate::error::Result<i32> {
            Err(StoreError::evaluation("offline"))
        })
        .with_label("broken");
        assert!(store.get(&broken).is_err());

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].phase, EventPhase::Error);
        assert_eq!(events[1].error.as_deref(), Some("evaluation failed: offline"));
        assert_eq!(events[1].data, None);
    }

    #[test]
    fn events_serialize_in_camel_case() {
        let event = StoreEvent {
            event_id: 3,
            hook: Hook::Get,
            phase: EventPhase::Success,
            target: "count".to_string(),
            data: Some(serde_json::json!(1)),
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "eventId": 3,
                "hook": "get",
                "phase": "success",
                "target": "count",
                "data": 1,
            })
        );
    }

    #[test]
    fn unfiltered_listener_sees_every_hook() {
        let interceptor = Arc::new(EventInterceptor::new());
        let events = collect(&interceptor, None);
        let store = Store::with_options(StoreOptions::default().with_interceptor(interceptor.clone()));

        let count = State::new(0).with_label("count");
        store.get(&count).unwrap();

        let hooks: Vec<Hook> = events.lock().iter().map(|event| event.hook).collect();
        assert_eq!(hooks, vec![Hook::Get, Hook::Get]);
    }
}
