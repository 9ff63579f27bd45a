//! Asynchronous confirmation-height processor.
//!
//! Given target hashes, cements every ancestor across every dependent
//! chain. Two walk implementations exist: bounded (eager writes, bounded
//! memory) and unbounded (deferred in-memory plans for very long chains);
//! `automatic` picks per target by the number of uncemented blocks.

mod bounded;
mod unbounded;
mod walk;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ferrite_config::ConfirmationHeightMode;
use ferrite_ledger::Ledger;
use ferrite_ledger_types::Block;
use ferrite_primitives::BlockHash;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::observers::CallbackList;
use crate::write_queue::WriteQueue;

use bounded::BoundedMode;
use unbounded::UnboundedMode;
use walk::CementWriter;

/// Uncemented-block count above which `automatic` picks the unbounded
/// walk. Tuned for typical disk batch characteristics.
pub const UNBOUNDED_CUTOFF: u64 = 16_384;

/// Blocks cemented per write transaction.
pub const DEFAULT_BATCH_WRITE_SIZE: usize = 4_096;

#[derive(Debug, Default)]
struct ProcessorQueue {
    awaiting: VecDeque<BlockHash>,
    awaiting_set: HashSet<BlockHash>,
    current: Option<BlockHash>,
    /// Whether the unbounded walk holds plans not yet written to disk.
    deferred_writes: bool,
    paused: bool,
    stopped: bool,
}

/// See module docs.
pub struct ConfirmationHeightProcessor {
    ledger: Arc<Ledger>,
    write_queue: Arc<WriteQueue>,
    mode: ConfirmationHeightMode,
    batch_write_size: usize,
    batch_min_time: Duration,
    state: Mutex<ProcessorQueue>,
    condvar: Condvar,
    /// Fired once per newly cemented block, outside any transaction.
    pub cemented_observers: Arc<CallbackList<Arc<Block>>>,
    /// Fired for targets already at or below their confirmation height.
    pub already_cemented_observers: Arc<CallbackList<BlockHash>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmationHeightProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        mode: ConfirmationHeightMode,
        batch_min_time: Duration,
    ) -> Arc<Self> {
        Self::with_batch_write_size(
            ledger,
            write_queue,
            mode,
            batch_min_time,
            DEFAULT_BATCH_WRITE_SIZE,
        )
    }

    pub fn with_batch_write_size(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        mode: ConfirmationHeightMode,
        batch_min_time: Duration,
        batch_write_size: usize,
    ) -> Arc<Self> {
        let processor = Arc::new(Self {
            ledger,
            write_queue,
            mode,
            batch_write_size,
            batch_min_time,
            state: Mutex::new(ProcessorQueue::default()),
            condvar: Condvar::new(),
            cemented_observers: Arc::new(CallbackList::new()),
            already_cemented_observers: Arc::new(CallbackList::new()),
            thread: Mutex::new(None),
        });
        let this = Arc::clone(&processor);
        let handle = std::thread::Builder::new()
            .name("conf_height".to_string())
            .spawn(move || this.run())
            .expect("spawn confirmation height thread");
        *processor.thread.lock() = Some(handle);
        processor
    }

    /// Queues a block for cementing.
    pub fn add(&self, hash: BlockHash) {
        {
            let mut state = self.state.lock();
            if state.stopped || !state.awaiting_set.insert(hash) {
                return;
            }
            state.awaiting.push_back(hash);
        }
        self.condvar.notify_all();
    }

    /// The hash being processed right now, if any.
    pub fn current(&self) -> Option<BlockHash> {
        self.state.lock().current
    }

    pub fn awaiting_processing_size(&self) -> usize {
        self.state.lock().awaiting.len()
    }

    /// Whether `hash` is queued or in flight.
    pub fn is_processing_block(&self, hash: &BlockHash) -> bool {
        let state = self.state.lock();
        state.current == Some(*hash) || state.awaiting_set.contains(hash)
    }

    /// Stops starting new walks; the in-flight one completes.
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn unpause(&self) {
        self.state.lock().paused = false;
        self.condvar.notify_all();
    }

    /// Blocks until the queue is drained and deferred writes are flushed.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        while !state.stopped
            && (!state.awaiting.is_empty()
                || state.current.is_some()
                || state.deferred_writes
                || state.paused)
        {
            self.condvar.wait(&mut state);
        }
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.condvar.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn make_writer(&self) -> CementWriter {
        CementWriter::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.write_queue),
            self.batch_write_size,
            self.batch_min_time,
            Arc::clone(&self.cemented_observers),
        )
    }

    fn run(&self) {
        let mut bounded = BoundedMode::new(self.make_writer());
        let mut unbounded = UnboundedMode::new(self.make_writer());
        let mut state = self.state.lock();
        while !state.stopped {
            if state.paused {
                self.condvar.wait(&mut state);
                continue;
            }
            if let Some(hash) = state.awaiting.pop_front() {
                state.awaiting_set.remove(&hash);
                state.current = Some(hash);
                drop(state);

                let use_unbounded = match self.mode {
                    ConfirmationHeightMode::Bounded => false,
                    ConfirmationHeightMode::Unbounded => true,
                    ConfirmationHeightMode::Automatic => {
                        !unbounded.pending_empty() || self.uncemented_gap(&hash) >= UNBOUNDED_CUTOFF
                    }
                };
                let progressed = if use_unbounded {
                    unbounded.process(&hash)
                } else {
                    // Deferred plans commit before the bounded walk runs.
                    unbounded.flush_pending();
                    bounded.process(&hash)
                };
                if !progressed {
                    debug!(%hash, "target already cemented");
                    self.already_cemented_observers.notify(&hash);
                }

                state = self.state.lock();
                state.current = None;
                state.deferred_writes = !unbounded.pending_empty();
            } else {
                drop(state);
                // Nothing queued; persist whatever the unbounded walk holds.
                unbounded.flush_pending();
                state = self.state.lock();
                state.deferred_writes = false;
                if state.awaiting.is_empty() && !state.stopped {
                    self.condvar.notify_all();
                    self.condvar.wait(&mut state);
                }
            }
        }
        drop(state);
        unbounded.flush_pending();
    }

    /// Blocks above the confirmation height on the target's own chain.
    fn uncemented_gap(&self, hash: &BlockHash) -> u64 {
        let txn = self.ledger.store.tx_begin_read();
        let Some((_, sideband)) = self.ledger.store.block_get(&txn, hash) else {
            return 0;
        };
        let confirmed = self
            .ledger
            .store
            .confirmation_height_get(&txn, &sideband.account)
            .map(|info| info.height)
            .unwrap_or(0);
        sideband.height.saturating_sub(confirmed)
    }
}

impl std::fmt::Debug for ConfirmationHeightProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConfirmationHeightProcessor")
            .field("mode", &self.mode)
            .field("awaiting", &state.awaiting.len())
            .field("current", &state.current)
            .finish_non_exhaustive()
    }
}

impl Drop for ConfirmationHeightProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
