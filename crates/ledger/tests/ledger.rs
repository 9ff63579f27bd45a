//! End-to-end ledger semantics over a real store.

use std::sync::Arc;

use ferrite_config::LedgerConstants;
use ferrite_ledger::{Ledger, ProcessResult, RollbackError};
use ferrite_ledger_types::{
    Block, ChangeBlock, ConfirmationHeightInfo, OpenBlock, PendingKey, ReceiveBlock, SendBlock,
    SignatureVerification, StateBlock,
};
use ferrite_primitives::{
    work, Account, Amount, BlockHash, Epoch, Keypair, Link, Root, WorkNonce,
};
use ferrite_store::{Store, StoreOptions, Table, WriteTransaction};
use tempfile::TempDir;

struct Ctx {
    _dir: TempDir,
    ledger: Ledger,
}

fn ctx() -> Ctx {
    let dir = TempDir::new().unwrap();
    let constants = LedgerConstants::dev();
    let options = StoreOptions {
        backup_before_upgrade: false,
        epochs: constants.epochs.clone(),
    };
    let store = Arc::new(Store::open(dir.path(), &options).unwrap());
    let ledger = Ledger::new(store, constants).unwrap();
    Ctx { _dir: dir, ledger }
}

fn write_txn(ledger: &Ledger) -> WriteTransaction<'_> {
    ledger.store.tx_begin_write(
        vec![
            Table::Accounts,
            Table::Blocks,
            Table::Pending,
            Table::ConfirmationHeight,
            Table::Frontiers,
            Table::Meta,
        ],
    )
}

fn work_for(ledger: &Ledger, root: Root, epoch: Epoch, is_receive: bool) -> WorkNonce {
    work::generate(&root, ledger.constants.work.threshold(epoch, is_receive))
}

fn genesis_key() -> Keypair {
    LedgerConstants::dev_genesis_key()
}

/// Processes a block and applies its cache delta right away, treating the
/// in-flight transaction as committed.
fn process(ledger: &Ledger, txn: &mut WriteTransaction<'_>, block: &Block) -> ProcessResult {
    let (result, delta) = ledger.process(txn, block, SignatureVerification::Unknown);
    ledger.cache.apply(delta);
    result.code
}

/// Rolls back and applies the cache delta, as [`process`] does.
fn rollback(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    hash: &BlockHash,
) -> Result<Vec<Block>, RollbackError> {
    let (removed, delta) = ledger.rollback(txn, hash)?;
    ledger.cache.apply(delta);
    Ok(removed)
}

/// A legacy send off the genesis chain.
fn genesis_send(ledger: &Ledger, txn: &WriteTransaction<'_>, destination: Account, balance: Amount) -> Block {
    let key = genesis_key();
    let previous = ledger.latest(txn, &key.account()).unwrap();
    let work = work_for(ledger, previous.into(), Epoch::Epoch0, false);
    Block::Send(SendBlock::new(previous, destination, balance, &key, work))
}

#[test]
fn genesis_seeded_once() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let txn = ledger.store.tx_begin_read();
    let genesis_account = ledger.constants.genesis_account;
    let genesis_hash = ledger.constants.genesis_block.hash();

    assert_eq!(ledger.latest(&txn, &genesis_account), Some(genesis_hash));
    assert_eq!(ledger.balance(&txn, &genesis_hash), Some(Amount::MAX));
    assert_eq!(ledger.weight(&genesis_account), Amount::MAX);
    assert_eq!(ledger.cache.block_count(), 1);
    assert_eq!(ledger.cache.cemented_count(), 1);
    assert_eq!(ledger.cache.account_count(), 1);
    let height = ledger
        .store
        .confirmation_height_get(&txn, &genesis_account)
        .unwrap();
    assert_eq!(height, ConfirmationHeightInfo::new(1, genesis_hash));
    assert!(ledger.block_confirmed(&txn, &genesis_hash));
}

#[test]
fn send_and_open_across_two_accounts() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let balance_after = Amount::MAX.checked_sub(Amount::raw(100)).unwrap();
    let send = genesis_send(ledger, &txn, key1.account(), balance_after);
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);

    // The pending entry exists with the sent amount.
    let pending = ledger
        .store
        .pending_get(&txn, &PendingKey::new(key1.account(), send.hash()))
        .unwrap();
    assert_eq!(pending.amount, Amount::raw(100));
    assert_eq!(pending.source, genesis.account());

    let open = Block::Open(OpenBlock::new(
        send.hash(),
        genesis.account(),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &open), ProcessResult::Progress);

    assert_eq!(
        ledger.balance(&txn, &send.hash()),
        Some(balance_after)
    );
    assert_eq!(ledger.balance(&txn, &open.hash()), Some(Amount::raw(100)));
    assert!(ledger
        .store
        .pending_get(&txn, &PendingKey::new(key1.account(), send.hash()))
        .is_none());
    assert_eq!(ledger.cache.block_count(), 3);
    assert_eq!(ledger.cache.account_count(), 2);
    // All weight is delegated to genesis as representative.
    assert_eq!(ledger.weight(&genesis.account()), Amount::MAX);
    ledger.store.commit(txn).unwrap();
}

#[test]
fn fork_rejected_second_send_same_root() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let key2 = Keypair::from_seed([2u8; 32]);
    let mut txn = write_txn(ledger);

    let balance_after = Amount::MAX.checked_sub(Amount::raw(100)).unwrap();
    let send1 = genesis_send(ledger, &txn, key1.account(), balance_after);
    assert_eq!(process(ledger, &mut txn, &send1), ProcessResult::Progress);

    let genesis = genesis_key();
    let work = work_for(ledger, send1.previous().into(), Epoch::Epoch0, false);
    let send2 = Block::Send(SendBlock::new(
        send1.previous(),
        key2.account(),
        balance_after,
        &genesis,
        work,
    ));
    let block_count_before = ledger.cache.block_count();
    assert_eq!(process(ledger, &mut txn, &send2), ProcessResult::Fork);
    assert_eq!(ledger.cache.block_count(), block_count_before);
    assert!(!ledger.store.block_exists(&txn, &send2.hash()));
}

#[test]
fn process_twice_returns_old() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(1)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);
    let count = ledger.cache.block_count();
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Old);
    assert_eq!(ledger.cache.block_count(), count);
}

#[test]
fn epoch_upgrade_state_block() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let mut txn = write_txn(ledger);

    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let link = ledger.constants.epochs.link(Epoch::Epoch1).unwrap();
    let weight_before = ledger.weight(&genesis.account());
    let epoch_block = Block::State(StateBlock::new(
        genesis.account(),
        head,
        genesis.account(),
        Amount::MAX,
        link,
        &genesis, // dev epoch signer is the genesis key
        work_for(ledger, head.into(), Epoch::Epoch1, false),
    ));
    assert_eq!(process(ledger, &mut txn, &epoch_block), ProcessResult::Progress);

    let info = ledger.store.account_get(&txn, &genesis.account()).unwrap();
    assert_eq!(info.epoch, Epoch::Epoch1);
    assert_eq!(ledger.weight(&genesis.account()), weight_before);
    let (_, sideband) = ledger.store.block_get(&txn, &epoch_block.hash()).unwrap();
    assert!(sideband.details.is_epoch);
    assert!(!sideband.details.is_send);
    assert_eq!(sideband.details.epoch, Epoch::Epoch1);
}

#[test]
fn epoch_upgrade_must_be_sequential() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let mut txn = write_txn(ledger);

    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let link_v2 = ledger.constants.epochs.link(Epoch::Epoch2).unwrap();
    let skip = Block::State(StateBlock::new(
        genesis.account(),
        head,
        genesis.account(),
        Amount::MAX,
        link_v2,
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch2, false),
    ));
    assert_eq!(process(ledger, &mut txn, &skip), ProcessResult::BlockPosition);
}

#[test]
fn epoch_upgrade_rejects_representative_change() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let mut txn = write_txn(ledger);

    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let link = ledger.constants.epochs.link(Epoch::Epoch1).unwrap();
    let other_rep = Keypair::from_seed([9u8; 32]).account();
    let epoch_block = Block::State(StateBlock::new(
        genesis.account(),
        head,
        other_rep,
        Amount::MAX,
        link,
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch1, false),
    ));
    assert_eq!(
        process(ledger, &mut txn, &epoch_block),
        ProcessResult::RepresentativeMismatch
    );
}

#[test]
fn state_receive_requires_pending() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let mut txn = write_txn(ledger);

    // Points at an existing block that never sent to genesis.
    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let bogus = Block::State(StateBlock::new(
        genesis.account(),
        head,
        genesis.account(),
        Amount::MAX, // unchanged balance plus non-epoch link claims a receive
        Link::from(head),
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch0, true),
    ));
    let count = ledger.cache.block_count();
    assert_eq!(process(ledger, &mut txn, &bogus), ProcessResult::Unreceivable);
    assert_eq!(ledger.cache.block_count(), count);
}

#[test]
fn gap_results_for_missing_dependencies() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    // Send whose previous does not exist.
    let missing = BlockHash::from_bytes([0x55; 32]);
    let orphan_send = Block::Send(SendBlock::new(
        missing,
        key1.account(),
        Amount::raw(1),
        &genesis,
        work_for(ledger, missing.into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &orphan_send), ProcessResult::GapPrevious);

    // Open whose source does not exist.
    let orphan_open = Block::Open(OpenBlock::new(
        missing,
        genesis.account(),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &orphan_open), ProcessResult::GapSource);
}

#[test]
fn bad_signature_and_insufficient_work() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let head = ledger.latest(&txn, &genesis_key().account()).unwrap();
    // Signed by the wrong key.
    let forged = Block::Send(SendBlock::new(
        head,
        key1.account(),
        Amount::raw(0),
        &key1,
        work_for(ledger, head.into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &forged), ProcessResult::BadSignature);

    // Properly signed, but with a nonce below the threshold.
    let mut nonce = u64::MAX;
    while ferrite_primitives::work_value(&Root::from(head), WorkNonce(nonce))
        >= ledger.constants.work.epoch_1
    {
        nonce -= 1;
    }
    let lazy = Block::Send(SendBlock::new(
        head,
        key1.account(),
        Amount::raw(0),
        &genesis_key(),
        WorkNonce(nonce),
    ));
    assert_eq!(process(ledger, &mut txn, &lazy), ProcessResult::InsufficientWork);
}

#[test]
fn negative_spend_rejected() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(50)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);

    // "Balance" above the current balance is a negative spend.
    let head = ledger.latest(&txn, &genesis_key().account()).unwrap();
    let overdraw = Block::Send(SendBlock::new(
        head,
        key1.account(),
        Amount::MAX,
        &genesis_key(),
        work_for(ledger, head.into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &overdraw), ProcessResult::NegativeSpend);
}

#[test]
fn state_receive_amount_must_match() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);

    // State open claiming more than was sent.
    let wrong = Block::State(StateBlock::new(
        key1.account(),
        BlockHash::zero(),
        key1.account(),
        Amount::raw(150),
        Link::from(send.hash()),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &wrong), ProcessResult::BalanceMismatch);

    // Exact amount succeeds.
    let right = Block::State(StateBlock::new(
        key1.account(),
        BlockHash::zero(),
        key1.account(),
        Amount::raw(100),
        Link::from(send.hash()),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &right), ProcessResult::Progress);
}

#[test]
fn legacy_cannot_extend_state_chain() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    // Convert the genesis chain to state blocks with a state send.
    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let state_send = Block::State(StateBlock::new(
        genesis.account(),
        head,
        genesis.account(),
        Amount::MAX.checked_sub(Amount::raw(10)).unwrap(),
        Link::from(key1.account()),
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &state_send), ProcessResult::Progress);

    let legacy = Block::Send(SendBlock::new(
        state_send.hash(),
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(20)).unwrap(),
        &genesis,
        work_for(ledger, state_send.hash().into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &legacy), ProcessResult::BlockPosition);
}

#[test]
fn change_block_moves_weight() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let rep = Keypair::from_seed([7u8; 32]);
    let mut txn = write_txn(ledger);

    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let change = Block::Change(ChangeBlock::new(
        head,
        rep.account(),
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &change), ProcessResult::Progress);
    assert_eq!(ledger.weight(&genesis.account()), Amount::zero());
    assert_eq!(ledger.weight(&rep.account()), Amount::MAX);
    assert_eq!(
        ledger.representative(&txn, &change.hash()),
        Some(rep.account())
    );
}

#[test]
fn legacy_receive_of_upgraded_pending_unreceivable() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    // Open key1 with some funds first.
    let send0 = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(5)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send0), ProcessResult::Progress);
    let open = Block::Open(OpenBlock::new(
        send0.hash(),
        genesis.account(),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &open), ProcessResult::Progress);

    // Upgrade genesis to epoch 1, then send with a state block.
    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let link = ledger.constants.epochs.link(Epoch::Epoch1).unwrap();
    let upgrade = Block::State(StateBlock::new(
        genesis.account(),
        head,
        genesis.account(),
        Amount::MAX.checked_sub(Amount::raw(5)).unwrap(),
        link,
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch1, false),
    ));
    assert_eq!(process(ledger, &mut txn, &upgrade), ProcessResult::Progress);
    let send1 = Block::State(StateBlock::new(
        genesis.account(),
        upgrade.hash(),
        genesis.account(),
        Amount::MAX.checked_sub(Amount::raw(15)).unwrap(),
        Link::from(key1.account()),
        &genesis,
        work_for(ledger, upgrade.hash().into(), Epoch::Epoch1, false),
    ));
    assert_eq!(process(ledger, &mut txn, &send1), ProcessResult::Progress);

    // A legacy receive cannot consume epoch-1 pending funds.
    let legacy_receive = Block::Receive(ReceiveBlock::new(
        open.hash(),
        send1.hash(),
        &key1,
        work_for(ledger, open.hash().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(
        process(ledger, &mut txn, &legacy_receive),
        ProcessResult::Unreceivable
    );

    // A state receive consumes them and upgrades the account's epoch.
    let state_receive = Block::State(StateBlock::new(
        key1.account(),
        open.hash(),
        genesis.account(),
        Amount::raw(15),
        Link::from(send1.hash()),
        &key1,
        work_for(ledger, open.hash().into(), Epoch::Epoch1, true),
    ));
    assert_eq!(
        process(ledger, &mut txn, &state_receive),
        ProcessResult::Progress
    );
    let info = ledger.store.account_get(&txn, &key1.account()).unwrap();
    assert_eq!(info.epoch, Epoch::Epoch1);
}

#[test]
fn rollback_cascade_and_replay() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    // Build: genesis send -> key1 open -> key1 send back -> genesis receive.
    let send1 = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send1), ProcessResult::Progress);
    let open = Block::Open(OpenBlock::new(
        send1.hash(),
        genesis.account(),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &open), ProcessResult::Progress);
    let send_back = Block::Send(SendBlock::new(
        open.hash(),
        genesis.account(),
        Amount::raw(40),
        &key1,
        work_for(ledger, open.hash().into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &send_back), ProcessResult::Progress);
    let receive = Block::Receive(ReceiveBlock::new(
        send1.hash(),
        send_back.hash(),
        &genesis,
        work_for(ledger, send1.hash().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &receive), ProcessResult::Progress);
    assert_eq!(ledger.cache.block_count(), 5);

    // Rolling back the original send must cascade through the receiving
    // chain and the cross-chain receive.
    let removed = rollback(ledger, &mut txn, &send1.hash()).unwrap();
    assert_eq!(removed.len(), 4);
    // Application order: the original send comes back first.
    assert_eq!(removed[0].hash(), send1.hash());
    assert_eq!(ledger.cache.block_count(), 1);
    assert_eq!(ledger.cache.account_count(), 1);
    assert_eq!(
        ledger.latest(&txn, &genesis.account()),
        Some(ledger.constants.genesis_block.hash())
    );
    assert!(ledger.latest(&txn, &key1.account()).is_none());
    assert_eq!(ledger.weight(&genesis.account()), Amount::MAX);
    assert_eq!(ledger.store.pending_count(&txn), 0);

    // Replaying the removed blocks in order restores every effect.
    for block in &removed {
        assert_eq!(process(ledger, &mut txn, block), ProcessResult::Progress);
    }
    assert_eq!(ledger.cache.block_count(), 5);
    assert_eq!(
        ledger.latest(&txn, &genesis.account()),
        Some(receive.hash())
    );
    assert_eq!(ledger.latest(&txn, &key1.account()), Some(send_back.hash()));
    assert_eq!(
        ledger.balance(&txn, &send_back.hash()),
        Some(Amount::raw(40))
    );
    assert_eq!(ledger.weight(&genesis.account()), Amount::MAX);
}

#[test]
fn rollback_refuses_cemented_blocks() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);

    // Cement the send.
    let genesis_account = genesis_key().account();
    ledger.store.confirmation_height_put(
        &mut txn,
        &genesis_account,
        &ConfirmationHeightInfo::new(2, send.hash()),
    );

    let pending_before = ledger.store.pending_count(&txn);
    match rollback(ledger, &mut txn, &send.hash()) {
        Err(RollbackError::Cemented { height, confirmed, .. }) => {
            assert_eq!(height, 2);
            assert_eq!(confirmed, 2);
        }
        other => panic!("expected cemented error, got {other:?}"),
    }
    // State is untouched.
    assert!(ledger.store.block_exists(&txn, &send.hash()));
    assert_eq!(ledger.store.pending_count(&txn), pending_before);
}

#[test]
fn rollback_chain_of_ten_to_height_one() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(1000)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);
    let open = Block::Open(OpenBlock::new(
        send.hash(),
        genesis.account(),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &open), ProcessResult::Progress);

    // Nine more sends to the burn account on key1's chain.
    let mut head = open.hash();
    let mut balance = Amount::raw(1000);
    let mut second_block = None;
    for i in 0..9u64 {
        balance = balance.checked_sub(Amount::raw(1)).unwrap();
        let block = Block::Send(SendBlock::new(
            head,
            Account::zero(),
            balance,
            &key1,
            work_for(ledger, head.into(), Epoch::Epoch0, false),
        ));
        assert_eq!(process(ledger, &mut txn, &block), ProcessResult::Progress);
        if i == 0 {
            second_block = Some(block.hash());
        }
        head = block.hash();
    }
    let info = ledger.store.account_get(&txn, &key1.account()).unwrap();
    assert_eq!(info.block_count, 10);

    let removed = rollback(ledger, &mut txn, &second_block.unwrap()).unwrap();
    assert_eq!(removed.len(), 9);
    let info = ledger.store.account_get(&txn, &key1.account()).unwrap();
    assert_eq!(info.block_count, 1);
    assert_eq!(info.head, open.hash());
    assert_eq!(info.balance, Amount::raw(1000));
    // Pending entries created by the rolled-back sends are gone.
    assert_eq!(
        ledger
            .store
            .pending_iter_account(&txn, Account::zero())
            .count(),
        0
    );
    assert_eq!(ledger.store.block_successor(&txn, &open.hash()), None);
}

#[test]
fn successor_and_qualified_root_queries() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);

    // The block occupying send's position is send itself.
    let occupying = ledger.successor(&txn, &send.qualified_root()).unwrap();
    assert_eq!(occupying.hash(), send.hash());
    // A would-be fork at the same root resolves to the existing winner.
    let fork_root = send.qualified_root();
    let winner = ledger.successor(&txn, &fork_root).unwrap();
    assert_eq!(winner.hash(), send.hash());
}

#[test]
fn can_vote_requires_confirmed_dependencies() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let key1 = Keypair::from_seed([1u8; 32]);
    let mut txn = write_txn(ledger);

    let send = genesis_send(
        ledger,
        &txn,
        key1.account(),
        Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
    );
    assert_eq!(process(ledger, &mut txn, &send), ProcessResult::Progress);
    // Previous (genesis) is confirmed, so the send is votable.
    assert!(ledger.can_vote(&txn, &send));

    let open = Block::Open(OpenBlock::new(
        send.hash(),
        key1.account(),
        &key1,
        work_for(ledger, key1.account().into(), Epoch::Epoch0, true),
    ));
    assert_eq!(process(ledger, &mut txn, &open), ProcessResult::Progress);
    // The open's source (the send) is unconfirmed.
    assert!(!ledger.can_vote(&txn, &open));

    let genesis_account = genesis_key().account();
    ledger.store.confirmation_height_put(
        &mut txn,
        &genesis_account,
        &ConfirmationHeightInfo::new(2, send.hash()),
    );
    assert!(ledger.can_vote(&txn, &open));
}

#[test]
fn state_chain_drops_legacy_frontier() {
    let ctx = ctx();
    let ledger = &ctx.ledger;
    let genesis = genesis_key();
    let mut txn = write_txn(ledger);

    let genesis_hash = ledger.constants.genesis_block.hash();
    assert_eq!(
        ledger.store.frontier_get(&txn, &genesis_hash),
        Some(genesis.account())
    );
    let head = ledger.latest(&txn, &genesis.account()).unwrap();
    let state_send = Block::State(StateBlock::new(
        genesis.account(),
        head,
        genesis.account(),
        Amount::MAX.checked_sub(Amount::raw(10)).unwrap(),
        Link::from(Keypair::from_seed([1u8; 32]).account()),
        &genesis,
        work_for(ledger, head.into(), Epoch::Epoch0, false),
    ));
    assert_eq!(process(ledger, &mut txn, &state_send), ProcessResult::Progress);
    // State heads are tracked in `accounts` only.
    assert_eq!(ledger.store.frontier_get(&txn, &genesis_hash), None);
    assert_eq!(ledger.store.frontier_get(&txn, &state_send.hash()), None);

    // Rolling the state block back restores the legacy frontier.
    rollback(ledger, &mut txn, &state_send.hash()).unwrap();
    assert_eq!(
        ledger.store.frontier_get(&txn, &genesis_hash),
        Some(genesis.account())
    );
}
