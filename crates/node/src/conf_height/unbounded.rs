//! Deferred cementing for long chains with cross-chain receives.
//!
//! Walk results accumulate in memory across several targets and are
//! committed together, amortizing transaction and lock costs over chains
//! far longer than the bounded cutoff. Pending plans are never dropped on
//! a mode change; the processor drains them before the bounded path runs.

use std::collections::{HashMap, VecDeque};

use ferrite_primitives::{Account, BlockHash};

use super::walk::{collect_cement_targets, CementWriter, WalkOutcome, WriteDetails};

#[derive(Debug)]
pub(super) struct UnboundedMode {
    writer: CementWriter,
    planned: HashMap<Account, u64>,
    writes: VecDeque<WriteDetails>,
    total_pending: u64,
}

impl UnboundedMode {
    pub(super) fn new(writer: CementWriter) -> Self {
        Self {
            writer,
            planned: HashMap::new(),
            writes: VecDeque::new(),
            total_pending: 0,
        }
    }

    pub(super) fn pending_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Walks `target`, deferring the disk write. Returns false when the
    /// target was already cemented and nothing remains pending for it.
    pub(super) fn process(&mut self, target: &BlockHash) -> bool {
        let txn = self.writer.ledger.store.tx_begin_read();
        let outcome = collect_cement_targets(
            &self.writer.ledger,
            &txn,
            target,
            &mut self.planned,
            &mut self.writes,
            &mut self.total_pending,
        );
        drop(txn);
        if self.total_pending as usize >= self.writer.batch_write_size {
            self.flush_pending();
        }
        !matches!(outcome, WalkOutcome::AlreadyCemented)
    }

    /// Commits every deferred plan.
    pub(super) fn flush_pending(&mut self) {
        if self.writes.is_empty() {
            return;
        }
        self.writer.flush(&mut self.writes);
        self.planned.clear();
        self.total_pending = 0;
    }
}
