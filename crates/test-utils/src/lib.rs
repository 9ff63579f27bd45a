//! Shared fixtures for ledger and pipeline tests: a genesis-seeded ledger
//! over a temporary store, and chain-building helpers with valid work.

use std::sync::Arc;

use ferrite_config::LedgerConstants;
use ferrite_ledger::{Ledger, ProcessResult};
use ferrite_ledger_types::{
    Block, OpenBlock, ReceiveBlock, SendBlock, SignatureVerification, StateBlock,
};
use ferrite_primitives::{work, Account, Amount, BlockHash, Epoch, Keypair, Link, Root, WorkNonce};
use ferrite_store::{Store, StoreOptions, Table, WriteTransaction};
use tempfile::TempDir;

/// A dev-network ledger over a temporary directory.
#[derive(Debug)]
pub struct TestLedger {
    _dir: TempDir,
    pub ledger: Arc<Ledger>,
}

impl TestLedger {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create tempdir");
        let constants = LedgerConstants::dev();
        let options = StoreOptions {
            backup_before_upgrade: false,
            epochs: constants.epochs.clone(),
        };
        let store = Arc::new(Store::open(dir.path(), &options).expect("open store"));
        let ledger = Arc::new(Ledger::new(store, constants).expect("open ledger"));
        Self { _dir: dir, ledger }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.ledger.store
    }

    /// A write transaction declaring every table the ledger mutates.
    pub fn write_txn(&self) -> WriteTransaction<'_> {
        self.ledger.store.tx_begin_write(ledger_tables())
    }

    /// Applies a block, panicking unless it progresses. The cache delta is
    /// applied immediately, treating the in-flight transaction as if it
    /// were already committed.
    pub fn apply(&self, txn: &mut WriteTransaction<'_>, block: &Block) {
        let (result, delta) = self
            .ledger
            .process(txn, block, SignatureVerification::Unknown);
        assert_eq!(result.code, ProcessResult::Progress, "block failed to apply");
        self.ledger.cache.apply(delta);
    }

    /// Valid work for the next block on `root` under dev thresholds.
    pub fn work(&self, root: Root, epoch: Epoch, is_receive: bool) -> WorkNonce {
        work::generate(
            &root,
            self.ledger.constants.work.threshold(epoch, is_receive),
        )
    }

    pub fn genesis_key(&self) -> Keypair {
        LedgerConstants::dev_genesis_key()
    }

    /// Legacy send off an account's current head.
    pub fn send_block(
        &self,
        txn: &WriteTransaction<'_>,
        key: &Keypair,
        destination: Account,
        new_balance: Amount,
    ) -> Block {
        let previous = self
            .ledger
            .latest(txn, &key.account())
            .expect("sender not opened");
        let work = self.work(previous.into(), Epoch::Epoch0, false);
        Block::Send(SendBlock::new(previous, destination, new_balance, key, work))
    }

    /// Legacy open receiving `source`.
    pub fn open_block(&self, key: &Keypair, source: BlockHash, representative: Account) -> Block {
        let work = self.work(key.account().into(), Epoch::Epoch0, true);
        Block::Open(OpenBlock::new(source, representative, key, work))
    }

    /// Legacy receive on an opened chain.
    pub fn receive_block(
        &self,
        txn: &WriteTransaction<'_>,
        key: &Keypair,
        source: BlockHash,
    ) -> Block {
        let previous = self
            .ledger
            .latest(txn, &key.account())
            .expect("receiver not opened");
        let work = self.work(previous.into(), Epoch::Epoch0, true);
        Block::Receive(ReceiveBlock::new(previous, source, key, work))
    }

    /// State block with explicit fields, signed by `key`.
    #[allow(clippy::too_many_arguments, reason = "mirrors the block hashables")]
    pub fn state_block(
        &self,
        key: &Keypair,
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
        epoch: Epoch,
        is_receive: bool,
    ) -> Block {
        let root: Root = if previous.is_zero() {
            account.into()
        } else {
            previous.into()
        };
        let work = self.work(root, epoch, is_receive);
        Block::State(StateBlock::new(
            account,
            previous,
            representative,
            balance,
            link,
            key,
            work,
        ))
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// The table set a block-processing transaction declares.
pub fn ledger_tables() -> Vec<Table> {
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
