//! Cancel-and-reschedule debouncer
//!
//! Each `call` replaces the pending payload and restarts the timer; when the
//! timer fires only the most recent payload is applied. Outside a tokio
//! runtime there is no timer, so payloads are applied immediately.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

struct Shared<T> {
    pending: Mutex<Option<T>>,
    apply: Box<dyn Fn(T) + Send + Sync>,
}

impl<T> Shared<T> {
    /// Apply the pending payload, if any. Taking it under the lock makes a
    /// payload apply at most once even if a timer and a flush race.
    fn fire(&self) -> bool {
        let payload = self.pending.lock().take();
        match payload {
            Some(payload) => {
                (self.apply)(payload);
                true
            }
            None => false,
        }
    }
}

pub struct Debouncer<T: Send + 'static> {
    delay: Duration,
    shared: Arc<Shared<T>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    runtime: Option<Handle>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, apply: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            shared: Arc::new(Shared {
                pending: Mutex::new(None),
                apply: Box::new(apply),
            }),
            timer: Mutex::new(None),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn call(&self, payload: T) {
        *self.shared.pending.lock() = Some(payload);

        let Some(runtime) = &self.runtime else {
            self.shared.fire();
            return;
        };

        let shared = Arc::clone(&self.shared);
        let delay = self.delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.fire() {
                trace!(delay_ms = delay.as_millis() as u64, "Debounced payload applied");
            }
        });

        if let Some(previous) = self.timer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Apply the pending payload now. Returns whether anything was pending.
    pub fn flush(&self) -> bool {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.shared.fire()
    }

    /// Drop the pending payload without applying it
    pub fn cancel(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.shared.pending.lock().take();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.pending.lock().is_some()
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.flush();
    }
}
