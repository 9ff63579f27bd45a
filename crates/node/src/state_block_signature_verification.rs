//! Asynchronous signature verification stage in front of the block
//! processor.
//!
//! State blocks carrying an epoch link are checked against both candidate
//! signers (the stated account and the epoch signer) in the same batch, so
//! the processor can tell an epoch upgrade from a mis-signed block without
//! extra passes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use ferrite_ledger_types::{Block, SignatureVerification, UncheckedInfo};
use ferrite_primitives::{Account, Epochs};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::signature_checker::{SignatureCheckSet, SignatureChecker};

type VerifiedCallback = Box<dyn Fn(Vec<UncheckedInfo>) + Send + Sync>;
type InactiveCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct VerificationState {
    blocks: VecDeque<UncheckedInfo>,
    active: bool,
    stopped: bool,
}

/// See module docs.
pub struct StateBlockSignatureVerification {
    checker: Arc<SignatureChecker>,
    epochs: Epochs,
    max_batch: usize,
    state: Mutex<VerificationState>,
    condvar: Condvar,
    blocks_verified: Mutex<Option<VerifiedCallback>>,
    transition_inactive: Mutex<Option<InactiveCallback>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StateBlockSignatureVerification {
    pub fn new(checker: Arc<SignatureChecker>, epochs: Epochs, verification_size: usize) -> Arc<Self> {
        Arc::new(Self {
            checker,
            epochs,
            max_batch: if verification_size == 0 { 256 } else { verification_size },
            state: Mutex::new(VerificationState::default()),
            condvar: Condvar::new(),
            blocks_verified: Mutex::new(None),
            transition_inactive: Mutex::new(None),
            thread: Mutex::new(None),
        })
    }

    pub fn set_blocks_verified_callback(&self, callback: impl Fn(Vec<UncheckedInfo>) + Send + Sync + 'static) {
        *self.blocks_verified.lock() = Some(Box::new(callback));
    }

    pub fn set_transition_inactive_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.transition_inactive.lock() = Some(Box::new(callback));
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("state_block_sig".to_string())
            .spawn(move || this.run())
            .expect("spawn verification thread");
        *self.thread.lock() = Some(handle);
    }

    pub fn add(&self, info: UncheckedInfo) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.blocks.push_back(info);
        }
        self.condvar.notify_all();
    }

    pub fn size(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        state.active || !state.blocks.is_empty()
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
            if state.blocks.is_empty() {
                if state.active {
                    state.active = false;
                    drop(state);
                    if let Some(callback) = self.transition_inactive.lock().as_ref() {
                        callback();
                    }
                    state = self.state.lock();
                    continue;
                }
                self.condvar.wait(&mut state);
                continue;
            }
            state.active = true;
            let take = state.blocks.len().min(self.max_batch);
            let items: Vec<UncheckedInfo> = state.blocks.drain(..take).collect();
            drop(state);
            self.verify_batch(items);
            state = self.state.lock();
        }
    }

    fn signer(&self, info: &UncheckedInfo) -> Account {
        if !info.account.is_zero() {
            return info.account;
        }
        info.block.account_field().unwrap_or_else(Account::zero)
    }

    fn verify_batch(&self, mut items: Vec<UncheckedInfo>) {
        let mut set = SignatureCheckSet::default();
        // Per item: index of the account entry, and of the epoch-signer
        // entry when the block is an epoch candidate.
        let mut entry_indices = Vec::with_capacity(items.len());
        for info in &items {
            let hash = info.block.hash();
            let account_index = set.len();
            set.push(
                hash.as_bytes().to_vec(),
                self.signer(info),
                *info.block.signature(),
            );
            let epoch_index = match info.block.as_ref() {
                Block::State(state)
                    if !state.link.is_zero() && self.epochs.is_epoch_link(&state.link) =>
                {
                    self.epochs.signer(&state.link).map(|signer| {
                        let index = set.len();
                        set.push(hash.as_bytes().to_vec(), signer, state.signature);
                        index
                    })
                }
                _ => None,
            };
            entry_indices.push((account_index, epoch_index));
        }

        self.checker.verify(&mut set);

        for (info, (account_index, epoch_index)) in items.iter_mut().zip(entry_indices) {
            info.verified = if set.verifications[account_index] == 1 {
                SignatureVerification::Valid
            } else if epoch_index.is_some_and(|index| set.verifications[index] == 1) {
                SignatureVerification::ValidEpoch
            } else {
                warn!(hash = %info.block.hash(), "signature verification rejected block");
                SignatureVerification::Invalid
            };
        }
        debug!(count = items.len(), "verified state block batch");

        if let Some(callback) = self.blocks_verified.lock().as_ref() {
            callback(items);
        }
    }
}

impl std::fmt::Debug for StateBlockSignatureVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateBlockSignatureVerification")
            .field("max_batch", &self.max_batch)
            .finish_non_exhaustive()
    }
}

impl Drop for StateBlockSignatureVerification {
    fn drop(&mut self) {
        self.stop();
    }
}
