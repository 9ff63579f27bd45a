//! Local vote issuance and the replay cache.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ferrite_ledger::Ledger;
use ferrite_ledger_types::{Vote, VOTE_MAX_HASHES};
use ferrite_primitives::{BlockHash, Keypair};
use ferrite_store::Table;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::observers::CallbackList;

/// Recently issued votes by block hash, replayed on duplicate requests
/// instead of burning a new sequence number.
pub struct VotesCache {
    cache: Mutex<LruCache<BlockHash, Vec<Arc<Vote>>>>,
}

impl VotesCache {
    /// Capacity scales down with the number of local voting accounts, so
    /// the per-account memory stays flat.
    pub fn new(max_size: usize, voting_accounts: usize) -> Self {
        let capacity = (max_size / voting_accounts.max(1)).max(1);
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity is at least one"),
            )),
        }
    }

    pub fn add(&self, vote: &Arc<Vote>) {
        let mut cache = self.cache.lock();
        for hash in &vote.hashes {
            if let Some(votes) = cache.get_mut(hash) {
                // One live vote per representative and hash.
                votes.retain(|existing| existing.account != vote.account);
                votes.push(Arc::clone(vote));
            } else {
                cache.put(*hash, vec![Arc::clone(vote)]);
            }
        }
    }

    pub fn votes(&self, hash: &BlockHash) -> Vec<Arc<Vote>> {
        self.cache.lock().get(hash).cloned().unwrap_or_default()
    }

    /// Must be called when a block is rolled back.
    pub fn remove(&self, hash: &BlockHash) {
        self.cache.lock().pop(hash);
    }
}

impl std::fmt::Debug for VotesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VotesCache(len = {})", self.cache.lock().len())
    }
}

#[derive(Default)]
struct GeneratorState {
    hashes: VecDeque<BlockHash>,
    stopped: bool,
}

/// Batches vote requests within a delay window and issues multi-hash votes
/// with monotone, persisted sequence numbers.
pub struct VoteGenerator {
    ledger: Arc<Ledger>,
    cache: Arc<VotesCache>,
    delay: Duration,
    threshold: usize,
    representatives: Mutex<Vec<Keypair>>,
    state: Mutex<GeneratorState>,
    condvar: Condvar,
    pub vote_observers: Arc<CallbackList<Arc<Vote>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteGenerator {
    pub fn new(
        ledger: Arc<Ledger>,
        cache: Arc<VotesCache>,
        delay: Duration,
        threshold: usize,
    ) -> Arc<Self> {
        let generator = Arc::new(Self {
            ledger,
            cache,
            delay,
            threshold,
            representatives: Mutex::new(Vec::new()),
            state: Mutex::new(GeneratorState::default()),
            condvar: Condvar::new(),
            vote_observers: Arc::new(CallbackList::new()),
            thread: Mutex::new(None),
        });
        let this = Arc::clone(&generator);
        let handle = std::thread::Builder::new()
            .name("voting".to_string())
            .spawn(move || this.run())
            .expect("spawn vote generator thread");
        *generator.thread.lock() = Some(handle);
        generator
    }

    /// Installs the local voting representatives.
    pub fn set_representatives(&self, representatives: Vec<Keypair>) {
        *self.representatives.lock() = representatives;
    }

    /// Requests a vote for `hash`. Ignored unless the block's dependencies
    /// are confirmed enough to justify one.
    pub fn add(&self, hash: BlockHash) {
        let can_vote = {
            let txn = self.ledger.store.tx_begin_read();
            self.ledger
                .store
                .block_get(&txn, &hash)
                .is_some_and(|(block, _)| self.ledger.can_vote(&txn, &block))
        };
        if !can_vote {
            debug!(%hash, "vote request skipped; dependencies unconfirmed");
            return;
        }
        {
            let mut state = self.state.lock();
            if state.stopped || state.hashes.contains(&hash) {
                return;
            }
            state.hashes.push_back(hash);
        }
        self.condvar.notify_all();
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

    fn run(&self) {
        let mut state = self.state.lock();
        while !state.stopped {
            if state.hashes.is_empty() {
                self.condvar.wait(&mut state);
                continue;
            }
            if state.hashes.len() < VOTE_MAX_HASHES {
                // Batching window: give more requests a chance to coalesce.
                let _ = self.condvar.wait_for(&mut state, self.delay);
                if state.hashes.len() < self.threshold && !state.stopped {
                    let _ = self.condvar.wait_for(&mut state, self.delay);
                }
            }
            if state.stopped {
                break;
            }
            let take = state.hashes.len().min(VOTE_MAX_HASHES);
            let batch: Vec<BlockHash> = state.hashes.drain(..take).collect();
            drop(state);
            self.generate(&batch);
            state = self.state.lock();
        }
    }

    /// Issues one vote per local representative over `hashes`, persisting
    /// each representative's advanced sequence.
    pub fn generate(&self, hashes: &[BlockHash]) -> Vec<Arc<Vote>> {
        debug_assert!(hashes.len() <= VOTE_MAX_HASHES);
        let representatives = self.representatives.lock().clone();
        if representatives.is_empty() || hashes.is_empty() {
            return Vec::new();
        }
        let mut txn = self.ledger.store.tx_begin_write(vec![Table::Vote]);
        let mut votes = Vec::with_capacity(representatives.len());
        for representative in &representatives {
            let sequence = self
                .ledger
                .store
                .vote_get(&txn, &representative.account())
                .map(|vote| vote.sequence + 1)
                .unwrap_or(1);
            let vote = Arc::new(Vote::new(representative, sequence, hashes.to_vec()));
            self.ledger.store.vote_put(&mut txn, &vote);
            votes.push(vote);
        }
        if let Err(e) = self.ledger.store.commit(txn) {
            error!(error = %e, "failed to persist vote sequences");
            return Vec::new();
        }
        for vote in &votes {
            self.cache.add(vote);
            self.vote_observers.notify(vote);
        }
        debug!(count = votes.len(), hashes = hashes.len(), "generated votes");
        votes
    }
}

impl std::fmt::Debug for VoteGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteGenerator")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl Drop for VoteGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
