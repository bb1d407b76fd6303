//! Change notification bus.
//!
//! Publishes a payload-less "data changed" signal so screens can re-fetch
//! after offline writes are captured or synced.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::error;

type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler)>>,
}

/// Fan-out of data-changed events to registered handlers.
#[derive(Clone, Default)]
pub struct ChangeBus {
    inner: Arc<Subscribers>,
}

/// Handle returned by [`ChangeBus::subscribe`].
#[must_use = "dropping the subscription keeps the handler registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    bus: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Ok(mut handlers) = bus.handlers.lock() {
                handlers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut handlers) = self.inner.handlers.lock() {
            handlers.push((id, Arc::new(handler)));
        }
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver one event to every handler registered right now.
    ///
    /// A panicking handler is logged and does not stop delivery to the rest.
    pub fn publish(&self) {
        let handlers: Vec<Handler> = match self.inner.handlers.lock() {
            Ok(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => return,
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                error!("[ChangeBus] Data-changed handler panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}
