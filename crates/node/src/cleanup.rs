//! Periodic purge of stale unchecked entries.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ferrite_ledger::Ledger;
use ferrite_primitives::seconds_since_epoch;
use ferrite_store::Table;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Deletes unchecked entries older than the configured cutoff. Bootstrap
/// traces that rely on retained entries disable this via node flags.
pub struct UncheckedCleanup {
    ledger: Arc<Ledger>,
    cutoff: Duration,
    interval: Duration,
    stopped: Mutex<bool>,
    condvar: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UncheckedCleanup {
    pub fn new(ledger: Arc<Ledger>, cutoff: Duration, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            cutoff,
            interval,
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
            thread: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("unchecked_clean".to_string())
            .spawn(move || this.run())
            .expect("spawn unchecked cleanup thread");
        *self.thread.lock() = Some(handle);
    }

    pub fn stop(&self) {
        {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
        }
        self.condvar.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            let _ = self.condvar.wait_for(&mut stopped, self.interval);
            if *stopped {
                break;
            }
            drop(stopped);
            self.run_once();
            stopped = self.stopped.lock();
        }
    }

    /// One purge pass; public so tests can drive it directly.
    pub fn run_once(&self) {
        let cutoff = seconds_since_epoch().saturating_sub(self.cutoff.as_secs());
        let stale: Vec<_> = {
            let txn = self.ledger.store.tx_begin_read();
            self.ledger
                .store
                .unchecked_iter(&txn)
                .filter(|(_, info)| info.modified < cutoff)
                .map(|(key, _)| key)
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let mut txn = self.ledger.store.tx_begin_write(vec![Table::Unchecked]);
        let count = stale.len();
        for key in stale {
            self.ledger.store.unchecked_del(&mut txn, &key);
        }
        if self.ledger.store.commit(txn).is_ok() {
            self.ledger.cache.add_unchecked(-(count as i64));
            debug!(count, "purged stale unchecked entries");
        }
    }
}

impl std::fmt::Debug for UncheckedCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UncheckedCleanup")
            .field("cutoff", &self.cutoff)
            .finish_non_exhaustive()
    }
}

impl Drop for UncheckedCleanup {
    fn drop(&mut self) {
        self.stop();
    }
}
