//! Change observation for collections
//!
//! Listeners register a selector and a callback. Every committed mutation is
//! translated per listener into `Added` / `Changed` / `Removed` relative to
//! that listener's selector, so a document that stops matching is reported
//! as removed.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use super::query::Selector;
use crate::types::Setting;

/// Event delivered to an observer callback
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(Setting),
    Changed { old: Setting, new: Setting },
    Removed(Setting),
}

impl ChangeEvent {
    /// Document after the event (`None` for removals)
    pub fn document(&self) -> Option<&Setting> {
        match self {
            ChangeEvent::Added(doc) => Some(doc),
            ChangeEvent::Changed { new, .. } => Some(new),
            ChangeEvent::Removed(_) => None,
        }
    }
}

/// Raw mutation recorded by a collection before per-listener translation
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Inserted(Setting),
    Updated { old: Setting, new: Setting },
    Removed(Setting),
}

impl Mutation {
    fn event_for(&self, selector: &Selector) -> Option<ChangeEvent> {
        match self {
            Mutation::Inserted(doc) => {
                selector.matches(doc).then(|| ChangeEvent::Added(doc.clone()))
            }
            Mutation::Removed(doc) => {
                selector.matches(doc).then(|| ChangeEvent::Removed(doc.clone()))
            }
            Mutation::Updated { old, new } => match (selector.matches(old), selector.matches(new)) {
                (true, true) => Some(ChangeEvent::Changed {
                    old: old.clone(),
                    new: new.clone(),
                }),
                (false, true) => Some(ChangeEvent::Added(new.clone())),
                (true, false) => Some(ChangeEvent::Removed(old.clone())),
                (false, false) => None,
            },
        }
    }
}

pub(crate) type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Listener {
    id: u64,
    selector: Selector,
    callback: Callback,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Set of live observers attached to one collection
#[derive(Clone, Default)]
pub(crate) struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Registry {
    pub(crate) fn register(&self, selector: Selector, callback: Callback) -> ObserveHandle {
        let active = Arc::new(AtomicBool::new(true));
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push(Listener {
            id,
            selector,
            callback,
            active: Arc::clone(&active),
        });
        trace!(listener = id, total = inner.listeners.len(), "Observer registered");

        ObserveHandle {
            id,
            registry: Arc::downgrade(&self.inner),
            active,
        }
    }

    /// Deliver mutations to every listener whose selector they touch.
    /// Must be called without holding the collection's document lock.
    pub(crate) fn dispatch(&self, mutations: &[Mutation]) {
        if mutations.is_empty() {
            return;
        }

        let listeners: Vec<(Selector, Callback, Arc<AtomicBool>)> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|l| (l.selector.clone(), Arc::clone(&l.callback), Arc::clone(&l.active)))
            .collect();

        for mutation in mutations {
            for (selector, callback, active) in &listeners {
                // A callback earlier in this loop may have stopped this listener
                if !active.load(Ordering::Acquire) {
                    continue;
                }
                if let Some(event) = mutation.event_for(selector) {
                    callback(&event);
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle to a running observation; stopping is idempotent and happens on drop
pub struct ObserveHandle {
    id: u64,
    registry: Weak<Mutex<RegistryInner>>,
    active: Arc<AtomicBool>,
}

impl ObserveHandle {
    /// Stop delivering events. Returns true only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().listeners.retain(|l| l.id != self.id);
        }
        trace!(listener = self.id, "Observer stopped");
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ObserveHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ObserveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserveHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
