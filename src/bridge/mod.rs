//! Event bridge: typed publish/subscribe between the producer of job events
//! and any number of subscribers.
//!
//! - Listeners fire in registration order for every matching occurrence.
//! - A failing or panicking listener is logged and skipped; the others still run.
//! - [`ListenerHandle::dispose`] is idempotent and safe after the bridge is gone.
//! - [`ListenerSet`] disposes everything it holds when dropped.

pub mod boundary;

use crate::events::{BridgeEvent, EventName, IdentityFilter};
use crate::utils::lock_mutex_recover;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

/// A subscriber's own processing of an event failed
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&BridgeEvent) -> HandlerResult + Send + Sync>;

/// Anything job events can be published to: a local bridge or the process boundary
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BridgeEvent);
}

struct Registration {
    id: u64,
    name: EventName,
    filter: IdentityFilter,
    handler: Handler,
    active: Arc<AtomicBool>,
    once: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl Registry {
    fn remove(&mut self, id: u64) {
        self.registrations.retain(|registration| registration.id != id);
    }
}

/// Registers listeners and dispatches events to them
#[derive(Clone, Default)]
pub struct EventBridge {
    registry: Arc<Mutex<Registry>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every occurrence of `name` that passes `filter`
    pub fn register<F>(&self, name: EventName, filter: IdentityFilter, handler: F) -> ListenerHandle
    where
        F: Fn(&BridgeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(name, filter, Arc::new(handler), false)
    }

    /// Like [`EventBridge::register`], but the registration expires after its first delivery
    pub fn once<F>(&self, name: EventName, filter: IdentityFilter, handler: F) -> ListenerHandle
    where
        F: Fn(&BridgeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(name, filter, Arc::new(handler), true)
    }

    fn add(
        &self,
        name: EventName,
        filter: IdentityFilter,
        handler: Handler,
        once: bool,
    ) -> ListenerHandle {
        let active = Arc::new(AtomicBool::new(true));
        let mut registry = lock_mutex_recover(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.registrations.push(Registration {
            id,
            name,
            filter: filter.clone(),
            handler,
            active: active.clone(),
            once,
        });

        log::trace!(
            "[EventBridge] Registered listener {} for {} ({:?})",
            id,
            name,
            filter
        );

        ListenerHandle {
            registry: Arc::downgrade(&self.registry),
            id,
            name,
            active,
        }
    }

    /// Deliver `event` to every matching listener, in registration order.
    /// Returns the number of listeners that handled it without failing.
    pub fn dispatch(&self, event: &BridgeEvent) -> usize {
        let name = event.name();

        // Snapshot under the lock, call outside it: handlers may register or dispose
        let targets: Vec<(u64, Handler, Arc<AtomicBool>, bool)> = {
            let mut registry = lock_mutex_recover(&self.registry);
            let targets: Vec<_> = registry
                .registrations
                .iter()
                .filter(|r| r.name == name && r.filter.matches(event))
                .map(|r| (r.id, r.handler.clone(), r.active.clone(), r.once))
                .collect();

            for (id, _, active, once) in &targets {
                if *once && active.swap(false, Ordering::SeqCst) {
                    registry.remove(*id);
                }
            }
            targets
        };

        let mut delivered = 0;
        for (id, handler, active, once) in targets {
            // Disposed by an earlier handler during this same dispatch
            if !once && !active.load(Ordering::SeqCst) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    log::warn!("[EventBridge] Listener {} for {} failed: {}", id, name, e);
                }
                Err(_) => {
                    log::warn!("[EventBridge] Listener {} for {} panicked", id, name);
                }
            }
        }

        log::trace!("[EventBridge] {} delivered to {} listener(s)", name, delivered);
        delivered
    }

    pub fn listener_count(&self) -> usize {
        lock_mutex_recover(&self.registry).registrations.len()
    }

    pub fn listener_count_for(&self, name: EventName) -> usize {
        lock_mutex_recover(&self.registry)
            .registrations
            .iter()
            .filter(|r| r.name == name)
            .count()
    }
}

impl EventSink for EventBridge {
    fn emit(&self, event: BridgeEvent) {
        self.dispatch(&event);
    }
}

/// Disposer for exactly one registration.
///
/// Dropping a handle does not unregister; put it in a [`ListenerSet`] for
/// scoped teardown.
#[must_use = "a dropped handle can no longer unregister its listener"]
pub struct ListenerHandle {
    registry: Weak<Mutex<Registry>>,
    id: u64,
    name: EventName,
    active: Arc<AtomicBool>,
}

impl ListenerHandle {
    /// Unregister the listener. Returns true only for the first call on a live handle.
    pub fn dispose(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }

        match self.registry.upgrade() {
            Some(registry) => {
                lock_mutex_recover(&registry).remove(self.id);
                log::trace!("[EventBridge] Disposed listener {} for {}", self.id, self.name);
            }
            None => {
                log::trace!(
                    "[EventBridge] Listener {} outlived its bridge; nothing to remove",
                    self.id
                );
            }
        }
        true
    }

    /// False once disposed or, for `once` listeners, after delivery
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.registry.strong_count() > 0
    }

    pub fn event_name(&self) -> EventName {
        self.name
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handles torn down together, explicitly or on drop
#[derive(Debug, Default)]
#[must_use = "dropping a ListenerSet disposes its listeners immediately"]
pub struct ListenerSet {
    handles: Vec<ListenerHandle>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: ListenerHandle) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, other: ListenerSet) {
        let mut other = other;
        self.handles.append(&mut other.handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Invoke every held disposer exactly once, including ones whose
    /// registration already expired. Returns how many were still live.
    pub fn dispose_all(&mut self) -> usize {
        self.handles
            .drain(..)
            .filter(|handle| handle.dispose())
            .count()
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
