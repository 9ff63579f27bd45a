//! Fair FIFO queue granting exclusive write access to the store.
//!
//! Every component that mutates the ledger declares a writer class and
//! waits its turn; the holder releases by dropping the guard. Components
//! poll [`WriteQueue::contains`] to yield when a preferred class is queued.

use parking_lot::{Condvar, Mutex};

/// Writer classes, one per mutating component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    ProcessBatch,
    ConfirmationHeight,
    Testing,
}

#[derive(Debug, Default)]
struct QueueState {
    // Front entry holds the write lock.
    entries: Vec<(u64, Writer)>,
    next_ticket: u64,
}

/// See module docs.
#[derive(Debug, Default)]
pub struct WriteQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until this caller holds the write lock.
    pub fn wait(&self, writer: Writer) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.entries.push((ticket, writer));
        while state.entries.first().map(|(t, _)| *t) != Some(ticket) {
            self.condvar.wait(&mut state);
        }
        WriteGuard {
            queue: self,
            ticket,
        }
    }

    /// Whether any waiter (or the holder) has the given class.
    pub fn contains(&self, writer: Writer) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|(_, w)| *w == writer)
    }

    /// Acquires immediately if nobody holds or awaits the lock.
    pub fn process(&self, writer: Writer) -> Option<WriteGuard<'_>> {
        let mut state = self.state.lock();
        if !state.entries.is_empty() {
            return None;
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.entries.push((ticket, writer));
        Some(WriteGuard {
            queue: self,
            ticket,
        })
    }

    fn release(&self, ticket: u64) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.entries.first().map(|(t, _)| *t), Some(ticket));
        state.entries.retain(|(t, _)| *t != ticket);
        drop(state);
        self.condvar.notify_all();
    }
}

/// Exclusive write permission; releases on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    queue: &'a WriteQueue,
    ticket: u64,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.queue.release(self.ticket);
    }
}
