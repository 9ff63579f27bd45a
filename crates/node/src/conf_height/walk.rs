//! Dependency walk and batched cement writes shared by both cementing
//! modes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrite_ledger::Ledger;
use ferrite_ledger_types::{Block, BlockSideband, ConfirmationHeightInfo};
use ferrite_primitives::{Account, BlockHash};
use ferrite_store::{CacheCount, Table, Txn};
use tracing::{debug, warn};

use crate::observers::CallbackList;
use crate::write_queue::{WriteQueue, Writer};

/// One planned confirmation-height raise: a contiguous run on one account.
#[derive(Debug, Clone, Copy)]
pub(super) struct WriteDetails {
    pub account: Account,
    pub bottom_height: u64,
    pub top_height: u64,
    pub top_hash: BlockHash,
}

pub(super) enum WalkOutcome {
    /// New cementations were planned.
    Planned,
    /// The target was at or below its confirmation height already.
    AlreadyCemented,
    /// The target vanished before the walk began (rolled back).
    Missing,
}

/// The source a block received from, when it is a receive.
fn receive_source(block: &Block, sideband: &BlockSideband) -> Option<BlockHash> {
    if let Some(source) = block.source() {
        return Some(source);
    }
    if sideband.details.is_receive {
        return Some(block.link().as_block_hash());
    }
    None
}

/// Walks the ancestry of `target` across receive links, planning
/// confirmation-height raises deepest-dependency-first.
///
/// `planned` carries heights promised by earlier, not yet committed plans;
/// both modes thread it through so repeated walks never double-plan.
pub(super) fn collect_cement_targets(
    ledger: &Ledger,
    txn: &dyn Txn,
    target: &BlockHash,
    planned: &mut HashMap<Account, u64>,
    writes: &mut VecDeque<WriteDetails>,
    total_pending: &mut u64,
) -> WalkOutcome {
    let store = &ledger.store;
    if !store.block_exists(txn, target) {
        warn!(%target, "cement target not in ledger; dropped");
        return WalkOutcome::Missing;
    }

    let confirmed_height = |planned: &HashMap<Account, u64>, account: &Account| {
        planned.get(account).copied().unwrap_or_else(|| {
            store
                .confirmation_height_get(txn, account)
                .map(|info| info.height)
                .unwrap_or(0)
        })
    };

    let mut planned_any = false;
    let mut stack: Vec<BlockHash> = vec![*target];
    while let Some(top_hash) = stack.last().copied() {
        let Some((_, top_sideband)) = store.block_get(txn, &top_hash) else {
            panic!("block {top_hash} disappeared while walking for cementing");
        };
        let account = top_sideband.account;
        let confirmed = confirmed_height(planned, &account);
        if top_sideband.height <= confirmed {
            stack.pop();
            continue;
        }

        // Scan down to the first uncemented height, remembering the lowest
        // receive whose cross-account source still needs cementing.
        let mut cursor = top_hash;
        let mut unmet_source: Option<BlockHash> = None;
        loop {
            let Some((block, sideband)) = store.block_get(txn, &cursor) else {
                panic!("block {cursor} disappeared while walking for cementing");
            };
            if let Some(source) = receive_source(&block, &sideband) {
                if let Some((_, source_sideband)) = store.block_get(txn, &source) {
                    let source_account = source_sideband.account;
                    if source_account != account
                        && source_sideband.height > confirmed_height(planned, &source_account)
                    {
                        // Keep overwriting so we end at the lowest one.
                        unmet_source = Some(source);
                    }
                } else {
                    panic!("source {source} of cemented walk disappeared");
                }
            }
            if sideband.height <= confirmed + 1 {
                break;
            }
            cursor = block.previous();
        }

        if let Some(source) = unmet_source {
            stack.push(source);
            continue;
        }

        writes.push_back(WriteDetails {
            account,
            bottom_height: confirmed + 1,
            top_height: top_sideband.height,
            top_hash,
        });
        *total_pending += top_sideband.height - confirmed;
        planned.insert(account, top_sideband.height);
        planned_any = true;
        stack.pop();
    }

    if planned_any {
        WalkOutcome::Planned
    } else {
        WalkOutcome::AlreadyCemented
    }
}

/// Commits planned raises in slices of at most `batch_write_size` blocks,
/// yielding the write lock between slices and re-verifying every block
/// under the write transaction before it is cemented. Observer callbacks
/// run strictly outside the transaction.
pub(super) struct CementWriter {
    pub ledger: Arc<Ledger>,
    pub write_queue: Arc<WriteQueue>,
    pub batch_write_size: usize,
    pub batch_min_time: Duration,
    pub cemented_observers: Arc<CallbackList<Arc<Block>>>,
    last_write: Option<Instant>,
}

impl CementWriter {
    pub(super) fn new(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        batch_write_size: usize,
        batch_min_time: Duration,
        cemented_observers: Arc<CallbackList<Arc<Block>>>,
    ) -> Self {
        Self {
            ledger,
            write_queue,
            batch_write_size,
            batch_min_time,
            cemented_observers,
            last_write: None,
        }
    }

    pub(super) fn flush(&mut self, writes: &mut VecDeque<WriteDetails>) {
        while let Some(details) = writes.pop_front() {
            self.write_one(details);
        }
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_write {
            let elapsed = last.elapsed();
            if elapsed < self.batch_min_time {
                std::thread::sleep(self.batch_min_time - elapsed);
            }
        }
    }

    fn write_one(&mut self, details: WriteDetails) {
        loop {
            self.pace();
            let store = &self.ledger.store;
            let guard = self.write_queue.wait(Writer::ConfirmationHeight);
            let mut txn = store.tx_begin_write(vec![Table::ConfirmationHeight, Table::Meta]);

            let confirmed = store
                .confirmation_height_get(&txn, &details.account)
                .map(|info| info.height)
                .unwrap_or(0);
            if confirmed >= details.top_height {
                return;
            }
            let bottom = details.bottom_height.max(confirmed + 1);

            // Cement at most one slice per transaction, lowest first.
            let slice_top = (bottom + self.batch_write_size as u64 - 1).min(details.top_height);
            // Walk down from the recorded top to the slice, verifying that
            // the chain still contains every block about to be cemented.
            let mut cursor = details.top_hash;
            let mut height = details.top_height;
            let mut slice_blocks: Vec<Arc<Block>> = Vec::new();
            let mut slice_top_hash = details.top_hash;
            while height >= bottom {
                let Some((block, sideband)) = store.block_get(&txn, &cursor) else {
                    panic!("block {cursor} disappeared before cementing");
                };
                debug_assert_eq!(sideband.height, height, "chain height mismatch mid-cement");
                debug_assert_eq!(
                    sideband.account, details.account,
                    "chain owner changed mid-cement"
                );
                if height == slice_top {
                    slice_top_hash = cursor;
                }
                let previous = block.previous();
                if height <= slice_top {
                    slice_blocks.push(Arc::new(block));
                }
                cursor = previous;
                height -= 1;
            }
            slice_blocks.reverse();

            store.confirmation_height_put(
                &mut txn,
                &details.account,
                &ConfirmationHeightInfo::new(slice_top, slice_top_hash),
            );
            let delta = (slice_top - confirmed) as i64;
            store.count_add(&mut txn, CacheCount::Cemented, delta);
            if let Err(error) = store.commit(txn) {
                tracing::error!(%error, "cement batch commit failed; batch dropped");
                return;
            }
            self.ledger.cache.add_cemented(delta);
            drop(guard);
            self.last_write = Some(Instant::now());
            debug!(
                account = %details.account,
                from = confirmed,
                to = slice_top,
                "cemented blocks"
            );

            for block in &slice_blocks {
                self.cemented_observers.notify(block);
            }

            if slice_top >= details.top_height {
                return;
            }
        }
    }
}

impl std::fmt::Debug for CementWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CementWriter")
            .field("batch_write_size", &self.batch_write_size)
            .finish_non_exhaustive()
    }
}
