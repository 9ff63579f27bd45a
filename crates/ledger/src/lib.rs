//! Ledger semantics over the block store: validation, application,
//! rollback, and queries.

mod cache;
mod process;
mod rollback;

use std::sync::Arc;

use ferrite_config::LedgerConstants;
use ferrite_ledger_types::{
    Block, BlockDetails, BlockSideband, ConfirmationHeightInfo, SignatureVerification,
};
use ferrite_primitives::{
    seconds_since_epoch, Account, Amount, BlockHash, Epoch, QualifiedRoot,
};
use ferrite_store::{Store, StoreResult, Table, Txn, WriteTransaction};
use tracing::info;

pub use cache::{CacheDelta, LedgerCache, RepWeights};
pub use process::{ProcessResult, ProcessReturn};
pub use rollback::RollbackError;

/// Pure ledger logic over an explicit store transaction.
#[derive(Debug)]
pub struct Ledger {
    pub store: Arc<Store>,
    pub constants: LedgerConstants,
    pub cache: LedgerCache,
}

impl Ledger {
    /// Builds the ledger over `store`, seeding genesis on first run and
    /// rebuilding the in-memory caches from a full scan.
    pub fn new(store: Arc<Store>, constants: LedgerConstants) -> StoreResult<Self> {
        let ledger = Self {
            store,
            constants,
            cache: LedgerCache::default(),
        };
        ledger.seed_genesis()?;
        ledger.build_cache();
        Ok(ledger)
    }

    fn seed_genesis(&self) -> StoreResult<()> {
        let genesis = &self.constants.genesis_block;
        let hash = genesis.hash();
        if self
            .store
            .block_exists(&self.store.tx_begin_read(), &hash)
        {
            return Ok(());
        }
        info!(%hash, "initializing ledger with genesis block");
        let mut txn = self.store.tx_begin_write(vec![
            Table::Accounts,
            Table::Blocks,
            Table::ConfirmationHeight,
            Table::Frontiers,
            Table::Meta,
        ]);
        let account = self.constants.genesis_account;
        let sideband = BlockSideband::new(
            account,
            BlockHash::zero(),
            self.constants.genesis_amount,
            1,
            seconds_since_epoch(),
            BlockDetails::new(Epoch::Epoch0, false, true, false),
        );
        self.store.block_put(&mut txn, &hash, genesis, &sideband);
        self.store.account_put(
            &mut txn,
            &account,
            &ferrite_ledger_types::AccountInfo {
                head: hash,
                representative: account,
                open_block: hash,
                balance: self.constants.genesis_amount,
                modified: seconds_since_epoch(),
                block_count: 1,
                epoch: Epoch::Epoch0,
            },
        );
        self.store.confirmation_height_put(
            &mut txn,
            &account,
            &ConfirmationHeightInfo::new(1, hash),
        );
        self.store.frontier_put(&mut txn, &hash, &account);
        self.store
            .count_add(&mut txn, ferrite_store::CacheCount::Open, 1);
        self.store
            .count_add(&mut txn, ferrite_store::CacheCount::Accounts, 1);
        self.store
            .count_add(&mut txn, ferrite_store::CacheCount::Cemented, 1);
        self.store.commit(txn)
    }

    fn build_cache(&self) {
        use std::sync::atomic::Ordering;

        let txn = self.store.tx_begin_read();
        self.cache
            .block_count
            .store(self.store.block_count_total(&txn), Ordering::Relaxed);
        self.cache.cemented_count.store(
            self.store.count_get(&txn, ferrite_store::CacheCount::Cemented),
            Ordering::Relaxed,
        );
        self.cache
            .account_count
            .store(self.store.account_count(&txn), Ordering::Relaxed);
        self.cache
            .unchecked_count
            .store(self.store.unchecked_count(&txn), Ordering::Relaxed);
        for (_, account_info) in self.store.accounts_iter(&txn) {
            self.cache
                .rep_weights
                .representation_add(account_info.representative, account_info.balance);
        }
    }

    /// Validates `block` and applies it on success.
    ///
    /// Counter and weight effects come back as a [`CacheDelta`]; the caller
    /// feeds it to [`LedgerCache::apply`] once the transaction commits and
    /// drops it otherwise, so a failed commit never skews the cache.
    pub fn process(
        &self,
        txn: &mut WriteTransaction<'_>,
        block: &Block,
        verification: SignatureVerification,
    ) -> (ProcessReturn, CacheDelta) {
        process::process(self, txn, block, verification)
    }

    /// Rolls back `hash` and every later block on its chain, cascading into
    /// chains that received from it. Returns the removed blocks in their
    /// original application order, with the pending cache effects handled
    /// as in [`Ledger::process`]. Fails without effect if any block in the
    /// removal set is cemented.
    pub fn rollback(
        &self,
        txn: &mut WriteTransaction<'_>,
        hash: &BlockHash,
    ) -> Result<(Vec<Block>, CacheDelta), RollbackError> {
        rollback::rollback(self, txn, hash)
    }

    // Queries.

    /// Head block of `account`, if opened.
    pub fn latest(&self, txn: &dyn Txn, account: &Account) -> Option<BlockHash> {
        self.store.account_get(txn, account).map(|info| info.head)
    }

    /// Root for the next block on `account`: the head hash, or the account
    /// itself when unopened.
    pub fn latest_root(&self, txn: &dyn Txn, account: &Account) -> ferrite_primitives::Root {
        match self.latest(txn, account) {
            Some(head) => head.into(),
            None => (*account).into(),
        }
    }

    /// Chain owner of a stored block.
    pub fn account(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<Account> {
        self.store
            .block_get(txn, hash)
            .map(|(_, sideband)| sideband.account)
    }

    /// Balance after the given block.
    pub fn balance(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<Amount> {
        if hash.is_zero() {
            return Some(Amount::zero());
        }
        self.store
            .block_get(txn, hash)
            .map(|(_, sideband)| sideband.balance)
    }

    /// Value moved by the given block.
    pub fn amount(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<Amount> {
        let (block, sideband) = self.store.block_get(txn, hash)?;
        let previous = block.previous();
        let previous_balance = if previous.is_zero() {
            Amount::zero()
        } else {
            self.balance(txn, &previous)?
        };
        Some(if sideband.balance >= previous_balance {
            sideband.balance.checked_sub(previous_balance)?
        } else {
            previous_balance.checked_sub(sideband.balance)?
        })
    }

    /// Voting weight delegated to `account`.
    pub fn weight(&self, account: &Account) -> Amount {
        self.cache.rep_weights.representation_get(account)
    }

    /// Representative in effect at `hash`, walking back to the nearest
    /// block that names one.
    pub fn representative(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<Account> {
        let mut cursor = *hash;
        loop {
            let (block, _) = self.store.block_get(txn, &cursor)?;
            if let Some(representative) = block.representative() {
                return Some(representative);
            }
            cursor = block.previous();
        }
    }

    /// The block currently occupying the chain position identified by
    /// `root`, if any.
    pub fn successor(&self, txn: &dyn Txn, root: &QualifiedRoot) -> Option<Block> {
        let successor_hash = if root.previous.is_zero() {
            let account = Account::from_bytes(*root.root.as_bytes());
            self.store.account_get(txn, &account)?.open_block
        } else {
            self.store.block_successor(txn, &root.previous)?
        };
        self.store
            .block_get(txn, &successor_hash)
            .map(|(block, _)| block)
    }

    /// Whether `hash` is at or below its account's confirmation height.
    pub fn block_confirmed(&self, txn: &dyn Txn, hash: &BlockHash) -> bool {
        let Some((_, sideband)) = self.store.block_get(txn, hash) else {
            return false;
        };
        let confirmed = self
            .store
            .confirmation_height_get(txn, &sideband.account)
            .map(|info| info.height)
            .unwrap_or(0);
        sideband.height <= confirmed
    }

    /// Whether a locally generated vote for `block` is justified: every
    /// dependency must already be confirmed.
    pub fn can_vote(&self, txn: &dyn Txn, block: &Block) -> bool {
        let previous = block.previous();
        if !previous.is_zero() && !self.block_confirmed(txn, &previous) {
            return false;
        }
        let source = self.receive_source(txn, block);
        match source {
            Some(source) => self.block_confirmed(txn, &source),
            None => true,
        }
    }

    /// The missing-dependency hash used to key `unchecked` entries for a
    /// block that returned a source gap.
    pub fn block_source(&self, txn: &dyn Txn, block: &Block) -> BlockHash {
        let _ = txn;
        block
            .source()
            .unwrap_or_else(|| block.link().as_block_hash())
    }

    fn receive_source(&self, txn: &dyn Txn, block: &Block) -> Option<BlockHash> {
        if let Some(source) = block.source() {
            return Some(source);
        }
        if let Block::State(state) = block {
            if state.link.is_zero() || self.is_epoch_link(&state.link) {
                return None;
            }
            let previous_balance = if state.previous.is_zero() {
                Amount::zero()
            } else {
                self.balance(txn, &state.previous)?
            };
            if state.balance > previous_balance {
                return Some(state.link.as_block_hash());
            }
        }
        None
    }

    pub fn is_epoch_link(&self, link: &ferrite_primitives::Link) -> bool {
        self.constants.epochs.is_epoch_link(link)
    }

    pub fn epoch_signer(&self, link: &ferrite_primitives::Link) -> Option<Account> {
        self.constants.epochs.signer(link)
    }

    /// Human-readable rendering of a stored block, for logs.
    pub fn block_text(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<String> {
        self.store
            .block_get(txn, hash)
            .map(|(block, _)| format!("{block:?}"))
    }

    /// Whether a state block is a send, judged against its stored previous.
    pub fn is_send(&self, txn: &dyn Txn, block: &Block) -> bool {
        match block {
            Block::Send(_) => true,
            Block::State(state) => {
                if state.previous.is_zero() {
                    return false;
                }
                match self.balance(txn, &state.previous) {
                    Some(previous_balance) => state.balance < previous_balance,
                    None => false,
                }
            }
            _ => false,
        }
    }
}
