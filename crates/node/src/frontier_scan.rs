//! Priority scanning of uncemented account frontiers.
//!
//! Long-dormant chains have no live traffic to trigger confirmation; this
//! scanner periodically surfaces their frontiers, ordered by how many
//! blocks each has above its confirmation height, with a separate track
//! for accounts whose keys are held locally.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ferrite_config::FrontiersConfirmationMode;
use ferrite_ledger::Ledger;
use ferrite_primitives::{Account, BlockHash};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::observers::CallbackList;

/// A frontier eligible for confirmation prioritization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritizedFrontier {
    pub account: Account,
    pub frontier: BlockHash,
    pub uncemented: u64,
    /// Whether the account's key is held by a local wallet.
    pub wallet: bool,
}

/// See module docs.
pub struct FrontierScan {
    ledger: Arc<Ledger>,
    mode: FrontiersConfirmationMode,
    interval: Duration,
    max_priority_wallet: usize,
    wallet_accounts: Mutex<HashSet<Account>>,
    /// Consumers (election scheduling, explicit cementing) subscribe here.
    pub frontier_observers: Arc<CallbackList<PrioritizedFrontier>>,
    stopped: Mutex<bool>,
    condvar: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FrontierScan {
    pub fn new(
        ledger: Arc<Ledger>,
        mode: FrontiersConfirmationMode,
        interval: Duration,
        max_priority_wallet: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            mode,
            interval,
            max_priority_wallet,
            wallet_accounts: Mutex::new(HashSet::new()),
            frontier_observers: Arc::new(CallbackList::new()),
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
            thread: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("frontier_scan".to_string())
            .spawn(move || this.run())
            .expect("spawn frontier scanner thread");
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

    pub fn set_wallet_accounts(&self, accounts: impl IntoIterator<Item = Account>) {
        *self.wallet_accounts.lock() = accounts.into_iter().collect();
    }

    fn run(&self) {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            let _ = self.condvar.wait_for(&mut stopped, self.interval);
            if *stopped {
                break;
            }
            drop(stopped);
            for frontier in self.run_once() {
                self.frontier_observers.notify(&frontier);
            }
            stopped = self.stopped.lock();
        }
    }

    /// One scan pass: every account with uncemented blocks, wallet accounts
    /// first, each track ordered by uncemented count descending.
    pub fn run_once(&self) -> Vec<PrioritizedFrontier> {
        if self.mode == FrontiersConfirmationMode::Disabled {
            return Vec::new();
        }
        let wallet_accounts = self.wallet_accounts.lock().clone();
        let mut wallet = Vec::new();
        let mut general = Vec::new();
        let accounts: Vec<_> = {
            let txn = self.ledger.store.tx_begin_read();
            self.ledger.store.accounts_iter(&txn).collect()
        };
        let mut txn = self.ledger.store.tx_begin_read();
        for (scanned, (account, info)) in accounts.into_iter().enumerate() {
            if scanned % 4_096 == 0 {
                txn.refresh();
            }
            let confirmed = self
                .ledger
                .store
                .confirmation_height_get(&txn, &account)
                .map(|height| height.height)
                .unwrap_or(0);
            let uncemented = info.block_count.saturating_sub(confirmed);
            if uncemented == 0 {
                continue;
            }
            let is_wallet = wallet_accounts.contains(&account);
            let entry = PrioritizedFrontier {
                account,
                frontier: info.head,
                uncemented,
                wallet: is_wallet,
            };
            if is_wallet {
                if wallet.len() < self.max_priority_wallet {
                    wallet.push(entry);
                }
            } else {
                general.push(entry);
            }
        }
        wallet.sort_by(|a, b| b.uncemented.cmp(&a.uncemented));
        general.sort_by(|a, b| b.uncemented.cmp(&a.uncemented));
        debug!(
            wallet = wallet.len(),
            general = general.len(),
            "prioritized uncemented frontiers"
        );
        wallet.extend(general);
        wallet
    }
}

impl std::fmt::Debug for FrontierScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontierScan")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Drop for FrontierScan {
    fn drop(&mut self) {
        self.stop();
    }
}
