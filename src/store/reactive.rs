//! Derived values that follow a collection
//!
//! A `Computed` declares its dependency as a selector. Whenever a mutation
//! touches a document matching that selector (before or after the change),
//! the value is recomputed synchronously and published on a watch channel,
//! but only if it actually differs from the previous value.

use tokio::sync::watch;

use super::observe::ObserveHandle;
use super::query::Selector;
use super::Collection;

pub struct Computed<T> {
    receiver: watch::Receiver<T>,
    _handle: ObserveHandle,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new<F>(collection: &Collection, dependency: Selector, compute: F) -> Self
    where
        F: Fn(&Collection) -> T + Send + Sync + 'static,
    {
        let (sender, receiver) = watch::channel(compute(collection));
        let source = collection.clone();
        let handle = collection.watch(dependency, move |_event| {
            let next = compute(&source);
            sender.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
        });

        Self {
            receiver,
            _handle: handle,
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Receiver notified each time the value changes
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.receiver.clone()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Computed").field(&*self.receiver.borrow()).finish()
    }
}
