//! Single-writer block application pipeline.
//!
//! Blocks enter through [`add`], get their signatures checked off-thread,
//! then a dedicated worker applies them in batches under the write queue.
//! Observer events collected during a batch run strictly after commit.
//!
//! [`add`]: BlockProcessor::add

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use ferrite_config::{NodeConfig, NodeFlags};
use ferrite_ledger::{CacheDelta, Ledger, ProcessResult, ProcessReturn};
use ferrite_ledger_types::{Block, BlockType, SignatureVerification, UncheckedInfo, UncheckedKey};
use ferrite_primitives::{seconds_since_epoch, Account, BlockHash};
use ferrite_store::{Table, WriteTransaction};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::{
    filters::{BlockArrival, GapCache},
    observers::{BlockPostEvents, CallbackList},
    signature_checker::SignatureChecker,
    state_block_signature_verification::StateBlockSignatureVerification,
    vote_generator::VotesCache,
    write_queue::{WriteQueue, Writer},
};

#[derive(Default)]
struct ProcessorState {
    blocks: VecDeque<UncheckedInfo>,
    forced: VecDeque<Arc<Block>>,
    active: bool,
    awaiting_write: bool,
    stopped: bool,
}

/// See module docs.
pub struct BlockProcessor {
    ledger: Arc<Ledger>,
    write_queue: Arc<WriteQueue>,
    config: NodeConfig,
    flags: NodeFlags,
    checker: Arc<SignatureChecker>,
    verification: Arc<StateBlockSignatureVerification>,
    state: Mutex<ProcessorState>,
    condvar: Condvar,
    pub gap_cache: Arc<GapCache>,
    pub block_arrival: Arc<BlockArrival>,
    /// Applied blocks that arrived live, fired post-commit.
    pub block_processed: Arc<CallbackList<(ProcessReturn, Arc<Block>)>>,
    /// Duplicate submissions, fired post-commit.
    pub block_old: Arc<CallbackList<Arc<Block>>>,
    /// Blocks losing to an existing chain position, fired post-commit.
    pub fork: Arc<CallbackList<Arc<Block>>>,
    /// Blocks removed by forced fork replacement, fired post-commit like
    /// every other batch event (election erase and the like).
    pub rolled_back: Arc<CallbackList<Arc<Block>>>,
    votes_cache: Mutex<Option<Arc<VotesCache>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BlockProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        config: NodeConfig,
        flags: NodeFlags,
    ) -> Arc<Self> {
        let checker = Arc::new(SignatureChecker::new(
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1),
            flags.block_processor_verification_size,
        ));
        let verification = StateBlockSignatureVerification::new(
            Arc::clone(&checker),
            ledger.constants.epochs.clone(),
            flags.block_processor_verification_size,
        );
        let processor = Arc::new(Self {
            ledger,
            write_queue,
            config,
            flags,
            checker,
            verification: Arc::clone(&verification),
            state: Mutex::new(ProcessorState::default()),
            condvar: Condvar::new(),
            gap_cache: Arc::new(GapCache::default()),
            block_arrival: Arc::new(BlockArrival::default()),
            block_processed: Arc::new(CallbackList::new()),
            block_old: Arc::new(CallbackList::new()),
            fork: Arc::new(CallbackList::new()),
            rolled_back: Arc::new(CallbackList::new()),
            votes_cache: Mutex::new(None),
            thread: Mutex::new(None),
        });

        let weak = Arc::downgrade(&processor);
        verification.set_blocks_verified_callback(move |items| {
            if let Some(processor) = weak.upgrade() {
                processor.receive_verified(items);
            }
        });
        let weak = Arc::downgrade(&processor);
        verification.set_transition_inactive_callback(move || {
            if let Some(processor) = weak.upgrade() {
                processor.condvar.notify_all();
            }
        });
        verification.start();

        let this = Arc::clone(&processor);
        let handle = std::thread::Builder::new()
            .name("blck_processing".to_string())
            .spawn(move || this.process_blocks())
            .expect("spawn block processor thread");
        *processor.thread.lock() = Some(handle);
        processor
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
        self.verification.stop();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Installs the votes cache so forced fork replacement evicts votes
    /// for every block it rolls back.
    pub fn set_votes_cache(&self, cache: Arc<VotesCache>) {
        *self.votes_cache.lock() = Some(cache);
    }

    /// Queues a block that just arrived.
    pub fn add_block(&self, block: Arc<Block>) {
        let info = UncheckedInfo::new(block, Account::zero(), seconds_since_epoch());
        self.add(info, false);
    }

    pub fn add(&self, info: UncheckedInfo, push_front_preference: bool) {
        let quarter_full = self.size() > self.flags.block_processor_full_size / 4;
        let needs_verification = info.verified == SignatureVerification::Unknown
            && (matches!(info.block.block_type(), BlockType::State | BlockType::Open)
                || !info.account.is_zero());
        if needs_verification {
            self.verification.add(info);
            return;
        }
        {
            let mut state = self.state.lock();
            if push_front_preference && !quarter_full {
                // Requeued dependents jump the line so one write transaction
                // resolves as much of the unchecked tree as possible.
                state.blocks.push_front(info);
            } else {
                state.blocks.push_back(info);
            }
        }
        self.condvar.notify_all();
    }

    /// Queues a fork winner: whatever occupies its chain position will be
    /// rolled back before this block is applied.
    pub fn force(&self, block: Arc<Block>) {
        {
            let mut state = self.state.lock();
            state.forced.push_back(block);
        }
        self.condvar.notify_all();
    }

    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state.blocks.len() + state.forced.len() + self.verification.size()
    }

    pub fn full(&self) -> bool {
        self.size() >= self.flags.block_processor_full_size
    }

    pub fn half_full(&self) -> bool {
        self.size() >= self.flags.block_processor_full_size / 2
    }

    /// Asks the worker to commit its current batch at the next iteration,
    /// letting a waiting writer take the lock sooner.
    pub fn wait_write(&self) {
        self.state.lock().awaiting_write = true;
    }

    /// Blocks until every queued item has been applied or parked in
    /// `unchecked`.
    pub fn flush(&self) {
        self.checker.flush();
        let mut state = self.state.lock();
        while !state.stopped
            && (!state.blocks.is_empty()
                || !state.forced.is_empty()
                || state.active
                || self.verification.is_active())
        {
            self.condvar.wait(&mut state);
        }
    }

    fn receive_verified(&self, items: Vec<UncheckedInfo>) {
        {
            let mut state = self.state.lock();
            for info in items {
                match info.verified {
                    SignatureVerification::Valid | SignatureVerification::ValidEpoch => {
                        state.blocks.push_back(info);
                    }
                    _ => {
                        // Rejected before reaching the ledger; the block is
                        // dropped and may return through bootstrap.
                        warn!(hash = %info.block.hash(), "dropping block with invalid signature");
                    }
                }
            }
        }
        self.condvar.notify_all();
    }

    fn process_blocks(self: Arc<Self>) {
        let mut state = self.state.lock();
        while !state.stopped {
            if !state.blocks.is_empty() || !state.forced.is_empty() {
                state.active = true;
                drop(state);
                self.process_batch();
                state = self.state.lock();
                state.active = false;
            } else {
                self.condvar.notify_all();
                self.condvar.wait(&mut state);
            }
        }
    }

    fn batch_tables() -> Vec<Table> {
        vec![
            Table::Accounts,
            Table::Blocks,
            Table::Pending,
            Table::ConfirmationHeight,
            Table::Frontiers,
            Table::Unchecked,
            Table::Meta,
        ]
    }

    fn process_batch(&self) {
        let guard = self.write_queue.wait(Writer::ProcessBatch);
        let mut post_events = BlockPostEvents::new();
        let mut batch_delta = CacheDelta::new();
        let mut txn = self.ledger.store.tx_begin_write(Self::batch_tables());
        let deadline = Instant::now() + self.config.block_processor_batch_max_time();
        let mut processed = 0usize;
        let mut forced_count = 0usize;

        let mut state = self.state.lock();
        while (!state.blocks.is_empty() || !state.forced.is_empty())
            && (Instant::now() < deadline || processed < self.flags.block_processor_batch_size)
            && !state.awaiting_write
        {
            let (info, force) = match state.forced.pop_front() {
                Some(block) => (
                    UncheckedInfo::new(block, Account::zero(), seconds_since_epoch()),
                    true,
                ),
                None => (
                    state.blocks.pop_front().expect("loop condition held"),
                    false,
                ),
            };
            drop(state);
            if force {
                forced_count += 1;
                self.replace_chain_position(
                    &mut txn,
                    &info.block,
                    &mut post_events,
                    &mut batch_delta,
                );
            }
            processed += 1;
            self.process_one(&mut txn, &mut post_events, &mut batch_delta, info);
            state = self.state.lock();
        }
        state.awaiting_write = false;
        drop(state);

        match self.ledger.store.commit(txn) {
            Ok(()) => {
                self.ledger.cache.apply(batch_delta);
                drop(guard);
                post_events.run();
            }
            Err(error) => {
                // Nothing persisted: the cache delta and every staged
                // observer event are discarded with the batch.
                error!(%error, "failed to commit block processor batch; dropping its events");
                drop(guard);
                drop(post_events);
            }
        }
        self.condvar.notify_all();
        if processed > 0 {
            debug!(processed, forced = forced_count, "processed block batch");
        }
    }

    /// Rolls back whatever currently occupies the forced block's position.
    /// Vote eviction and rollback notifications wait for the commit.
    fn replace_chain_position(
        &self,
        txn: &mut WriteTransaction<'_>,
        block: &Arc<Block>,
        post_events: &mut BlockPostEvents,
        batch_delta: &mut CacheDelta,
    ) {
        let hash = block.hash();
        let Some(occupant) = self.ledger.successor(&*txn, &block.qualified_root()) else {
            return;
        };
        if occupant.hash() == hash {
            return;
        }
        info!(rolling_back = %occupant.hash(), replacing_with = %hash, "fork replacement");
        match self.ledger.rollback(txn, &occupant.hash()) {
            Ok((rolled, delta)) => {
                debug!(count = rolled.len(), "blocks rolled back");
                batch_delta.merge(delta);
                let votes_cache = self.votes_cache.lock().clone();
                let observers = Arc::clone(&self.rolled_back);
                post_events.stage(move || {
                    for removed in rolled {
                        if let Some(cache) = &votes_cache {
                            cache.remove(&removed.hash());
                        }
                        observers.notify(&Arc::new(removed));
                    }
                });
            }
            Err(error) => {
                error!(hash = %occupant.hash(), %error, "failed to roll back fork loser");
            }
        }
    }

    fn process_one(
        &self,
        txn: &mut WriteTransaction<'_>,
        post_events: &mut BlockPostEvents,
        batch_delta: &mut CacheDelta,
        info: UncheckedInfo,
    ) -> ProcessReturn {
        let block = Arc::clone(&info.block);
        let hash = block.hash();
        let (result, delta) = self.ledger.process(txn, &block, info.verified);
        batch_delta.merge(delta);
        match result.code {
            ProcessResult::Progress => {
                if info.modified > seconds_since_epoch().saturating_sub(300)
                    && self.block_arrival.recent(&hash)
                {
                    let observers = Arc::clone(&self.block_processed);
                    let block = Arc::clone(&block);
                    post_events.stage(move || observers.notify(&(result, block)));
                }
                self.queue_unchecked(txn, batch_delta, &hash);
            }
            ProcessResult::GapPrevious => {
                trace!(%hash, "gap previous");
                self.insert_unchecked(txn, batch_delta, block.previous(), info, result.verified);
                self.gap_cache.add(hash);
            }
            ProcessResult::GapSource => {
                trace!(%hash, "gap source");
                let dependency = self.ledger.block_source(&*txn, &block);
                self.insert_unchecked(txn, batch_delta, dependency, info, result.verified);
                self.gap_cache.add(hash);
            }
            ProcessResult::Old => {
                let observers = Arc::clone(&self.block_old);
                post_events.stage(move || observers.notify(&block));
            }
            ProcessResult::BadSignature => {
                // Parked so a later legitimate sibling can replace it.
                trace!(%hash, "bad signature");
                self.insert_unchecked(
                    txn,
                    batch_delta,
                    block.previous(),
                    info,
                    SignatureVerification::Unknown,
                );
            }
            ProcessResult::Fork => {
                trace!(%hash, root = %block.root(), "fork");
                let observers = Arc::clone(&self.fork);
                post_events.stage(move || observers.notify(&block));
            }
            ProcessResult::OpenedBurnAccount => {
                warn!(%hash, "rejecting open block for the burn account");
            }
            _ => {
                trace!(%hash, code = ?result.code, "block rejected");
            }
        }
        result
    }

    fn insert_unchecked(
        &self,
        txn: &mut WriteTransaction<'_>,
        batch_delta: &mut CacheDelta,
        dependency: BlockHash,
        mut info: UncheckedInfo,
        verified: SignatureVerification,
    ) {
        info.verified = verified;
        if info.modified == 0 {
            info.modified = seconds_since_epoch();
        }
        let key = UncheckedKey::new(dependency, info.block.hash());
        let exists = self.ledger.store.unchecked_exists(&*txn, &key);
        self.ledger.store.unchecked_put(txn, &key, &info);
        if !exists {
            batch_delta.add_unchecked(1);
        }
    }

    /// Requeues everything that was waiting on `hash`.
    fn queue_unchecked(
        &self,
        txn: &mut WriteTransaction<'_>,
        batch_delta: &mut CacheDelta,
        hash: &BlockHash,
    ) {
        let dependents = self.ledger.store.unchecked_for_dependency(&*txn, hash);
        for (key, dependent) in dependents {
            if !self.flags.disable_unchecked_deletion {
                self.ledger.store.unchecked_del(txn, &key);
                batch_delta.add_unchecked(-1);
            }
            self.add(dependent, true);
        }
        self.gap_cache.erase(hash);
    }
}

impl std::fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockProcessor")
            .field("queued", &state.blocks.len())
            .field("forced", &state.forced.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BlockProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
