//! Post-commit observer registries.
//!
//! Events are collected while a write transaction is open and run only
//! after it commits, so observer failures can never poison ledger state.

use parking_lot::Mutex;

/// A list of subscriber callbacks for one event kind.
pub struct CallbackList<T> {
    callbacks: Mutex<Vec<Box<dyn Fn(&T) + Send + Sync>>>,
}

impl<T> CallbackList<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    pub fn notify(&self, event: &T) {
        for callback in self.callbacks.lock().iter() {
            callback(event);
        }
    }
}

impl<T> Default for CallbackList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CallbackList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CallbackList(len = {})", self.callbacks.lock().len())
    }
}

/// Deferred closures staged during a batch and executed after commit.
#[derive(Default)]
pub struct BlockPostEvents {
    events: Vec<Box<dyn FnOnce() + Send>>,
}

impl BlockPostEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, event: impl FnOnce() + Send + 'static) {
        self.events.push(Box::new(event));
    }

    /// Runs and drains every staged event.
    pub fn run(self) {
        for event in self.events {
            event();
        }
    }
}

impl std::fmt::Debug for BlockPostEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockPostEvents(len = {})", self.events.len())
    }
}
