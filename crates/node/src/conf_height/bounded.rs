//! Eager cementing for short pending chains.
//!
//! Each target is walked and written out immediately, so memory stays
//! proportional to the number of touched accounts, not chain length.

use std::collections::{HashMap, VecDeque};

use ferrite_primitives::{Account, BlockHash};

use super::walk::{collect_cement_targets, CementWriter, WalkOutcome, WriteDetails};

#[derive(Debug)]
pub(super) struct BoundedMode {
    writer: CementWriter,
}

impl BoundedMode {
    pub(super) fn new(writer: CementWriter) -> Self {
        Self { writer }
    }

    /// Cements `target` and all of its uncemented ancestry. Returns false
    /// when the target was already at or below its confirmation height.
    pub(super) fn process(&mut self, target: &BlockHash) -> bool {
        let txn = self.writer.ledger.store.tx_begin_read();
        let mut planned: HashMap<Account, u64> = HashMap::new();
        let mut writes: VecDeque<WriteDetails> = VecDeque::new();
        let mut total_pending = 0u64;
        let outcome = collect_cement_targets(
            &self.writer.ledger,
            &txn,
            target,
            &mut planned,
            &mut writes,
            &mut total_pending,
        );
        drop(txn);
        match outcome {
            WalkOutcome::Planned => {
                self.writer.flush(&mut writes);
                true
            }
            WalkOutcome::AlreadyCemented => false,
            WalkOutcome::Missing => true,
        }
    }
}
