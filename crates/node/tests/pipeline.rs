//! End-to-end pipeline tests: block processing, cementing, and votes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ferrite_config::{ConfirmationHeightMode, FrontiersConfirmationMode, NodeConfig, NodeFlags};
use ferrite_ledger_types::{Block, ConfirmationHeightInfo};
use ferrite_node::{
    BlockProcessor, ConfirmationHeightProcessor, FrontierScan, UncheckedCleanup, VoteGenerator,
    VotesCache, WriteQueue,
};
use ferrite_primitives::{Account, Amount, BlockHash, Keypair};
use ferrite_test_utils::TestLedger;

const TIMEOUT: Duration = Duration::from_secs(10);

fn processor(fixture: &TestLedger) -> (Arc<WriteQueue>, Arc<BlockProcessor>) {
    let write_queue = Arc::new(WriteQueue::new());
    let processor = BlockProcessor::new(
        Arc::clone(&fixture.ledger),
        Arc::clone(&write_queue),
        NodeConfig::default(),
        NodeFlags::default(),
    );
    (write_queue, processor)
}

fn cementer(
    fixture: &TestLedger,
    write_queue: &Arc<WriteQueue>,
    mode: ConfirmationHeightMode,
) -> Arc<ConfirmationHeightProcessor> {
    ConfirmationHeightProcessor::new(
        Arc::clone(&fixture.ledger),
        Arc::clone(write_queue),
        mode,
        Duration::from_millis(0),
    )
}

#[test]
fn processor_applies_in_order_blocks() {
    let fixture = TestLedger::new();
    let (_queue, processor) = processor(&fixture);
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);

    let (send, open) = {
        let txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        let open = fixture.open_block(&key1, send.hash(), genesis.account());
        (send, open)
    };

    processor.add_block(Arc::new(send.clone()));
    processor.add_block(Arc::new(open.clone()));
    processor.flush();
    assert_eq!(processor.size(), 0);

    let txn = fixture.store().tx_begin_read();
    assert!(fixture.store().block_exists(&txn, &send.hash()));
    assert!(fixture.store().block_exists(&txn, &open.hash()));
    assert_eq!(fixture.ledger.cache.block_count(), 3);
    processor.stop();
}

#[test]
fn processor_parks_and_requeues_unchecked() {
    let fixture = TestLedger::new();
    let (_queue, processor) = processor(&fixture);
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);

    let (send, open) = {
        let txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        let open = fixture.open_block(&key1, send.hash(), genesis.account());
        (send, open)
    };

    // The dependent arrives first and must be parked on its dependency.
    processor.add_block(Arc::new(open.clone()));
    processor.flush();
    {
        let txn = fixture.store().tx_begin_read();
        assert!(!fixture.store().block_exists(&txn, &open.hash()));
        assert_eq!(fixture.store().unchecked_count(&txn), 1);
        assert_eq!(fixture.ledger.cache.unchecked_count(), 1);
    }

    // The dependency arrives; both blocks land and unchecked drains.
    processor.add_block(Arc::new(send.clone()));
    processor.flush();
    let txn = fixture.store().tx_begin_read();
    assert!(fixture.store().block_exists(&txn, &send.hash()));
    assert!(fixture.store().block_exists(&txn, &open.hash()));
    assert_eq!(fixture.store().unchecked_count(&txn), 0);
    assert_eq!(fixture.ledger.cache.unchecked_count(), 0);
    processor.stop();
}

#[test]
fn forced_block_replaces_fork_loser() {
    let fixture = TestLedger::new();
    let (_queue, processor) = processor(&fixture);
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let key2 = Keypair::from_seed([2u8; 32]);

    let (loser, winner) = {
        let txn = fixture.write_txn();
        let loser = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        let winner = fixture.send_block(
            &txn,
            &genesis,
            key2.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        (loser, winner)
    };

    let rolled_back = Arc::new(AtomicUsize::new(0));
    {
        let rolled_back = Arc::clone(&rolled_back);
        processor.rolled_back.add(move |_| {
            rolled_back.fetch_add(1, Ordering::SeqCst);
        });
    }
    let votes_cache = Arc::new(VotesCache::new(128, 1));
    processor.set_votes_cache(Arc::clone(&votes_cache));

    processor.add_block(Arc::new(loser.clone()));
    processor.flush();
    {
        let txn = fixture.store().tx_begin_read();
        assert!(fixture.store().block_exists(&txn, &loser.hash()));
    }
    // A cached vote for the loser must not survive its rollback.
    votes_cache.add(&Arc::new(ferrite_ledger_types::Vote::new(
        &genesis,
        1,
        vec![loser.hash()],
    )));

    processor.force(Arc::new(winner.clone()));
    processor.flush();
    let txn = fixture.store().tx_begin_read();
    assert!(!fixture.store().block_exists(&txn, &loser.hash()));
    assert!(fixture.store().block_exists(&txn, &winner.hash()));
    assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
    assert!(votes_cache.votes(&loser.hash()).is_empty());
    processor.stop();
}

#[test]
fn fork_submission_leaves_ledger_unchanged() {
    let fixture = TestLedger::new();
    let (_queue, processor) = processor(&fixture);
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let key2 = Keypair::from_seed([2u8; 32]);

    let (first, second) = {
        let txn = fixture.write_txn();
        let first = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        let second = fixture.send_block(
            &txn,
            &genesis,
            key2.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        (first, second)
    };

    let forks = Arc::new(AtomicUsize::new(0));
    {
        let forks = Arc::clone(&forks);
        processor.fork.add(move |_| {
            forks.fetch_add(1, Ordering::SeqCst);
        });
    }
    processor.add_block(Arc::new(first.clone()));
    processor.add_block(Arc::new(second.clone()));
    processor.flush();

    let txn = fixture.store().tx_begin_read();
    assert!(fixture.store().block_exists(&txn, &first.hash()));
    assert!(!fixture.store().block_exists(&txn, &second.hash()));
    assert_eq!(forks.load(Ordering::SeqCst), 1);
    processor.stop();
}

fn cement_and_wait(
    fixture: &TestLedger,
    cementer: &Arc<ConfirmationHeightProcessor>,
    target: BlockHash,
    expected_new: usize,
) {
    let (sender, receiver) = mpsc::channel();
    cementer.cemented_observers.add(move |block: &Arc<Block>| {
        let _ = sender.send(block.hash());
    });
    cementer.add(target);
    let mut cemented = Vec::new();
    while cemented.len() < expected_new {
        match receiver.recv_timeout(TIMEOUT) {
            Ok(hash) => cemented.push(hash),
            Err(e) => panic!(
                "timed out waiting for cementing ({e}); got {} of {expected_new}",
                cemented.len()
            ),
        }
    }
    assert!(cemented.contains(&target));
    let txn = fixture.store().tx_begin_read();
    assert!(fixture.ledger.block_confirmed(&txn, &target));
}

#[test]
fn cement_single_chain() {
    let fixture = TestLedger::new();
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let write_queue = Arc::new(WriteQueue::new());

    let send = {
        let mut txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        fixture.apply(&mut txn, &send);
        fixture.store().commit(txn).unwrap();
        send
    };

    let cementer = cementer(&fixture, &write_queue, ConfirmationHeightMode::Bounded);
    let before = fixture.ledger.cache.cemented_count();
    cement_and_wait(&fixture, &cementer, send.hash(), 1);
    assert_eq!(fixture.ledger.cache.cemented_count(), before + 1);
    let txn = fixture.store().tx_begin_read();
    let info = fixture
        .store()
        .confirmation_height_get(&txn, &genesis.account())
        .unwrap();
    assert_eq!(info, ConfirmationHeightInfo::new(2, send.hash()));
    cementer.stop();
}

fn build_cross_chain(fixture: &TestLedger) -> (Vec<Block>, BlockHash) {
    let genesis = fixture.genesis_key();
    let keys: Vec<Keypair> = (1u8..=3).map(|i| Keypair::from_seed([i; 32])).collect();
    let mut blocks = Vec::new();
    let mut txn = fixture.write_txn();

    // GEN -> K1 -> K2 -> K3, then K3 sends back to GEN which receives.
    let send1 = fixture.send_block(
        &txn,
        &genesis,
        keys[0].account(),
        Amount::MAX.checked_sub(Amount::raw(1000)).unwrap(),
    );
    fixture.apply(&mut txn, &send1);
    blocks.push(send1.clone());
    let open1 = fixture.open_block(&keys[0], send1.hash(), genesis.account());
    fixture.apply(&mut txn, &open1);
    blocks.push(open1);

    let send2 = fixture.send_block(&txn, &keys[0], keys[1].account(), Amount::raw(400));
    fixture.apply(&mut txn, &send2);
    blocks.push(send2.clone());
    let open2 = fixture.open_block(&keys[1], send2.hash(), genesis.account());
    fixture.apply(&mut txn, &open2);
    blocks.push(open2);

    let send3 = fixture.send_block(&txn, &keys[1], keys[2].account(), Amount::raw(200));
    fixture.apply(&mut txn, &send3);
    blocks.push(send3.clone());
    let open3 = fixture.open_block(&keys[2], send3.hash(), genesis.account());
    fixture.apply(&mut txn, &open3);
    blocks.push(open3);

    let send4 = fixture.send_block(&txn, &keys[2], genesis.account(), Amount::raw(100));
    fixture.apply(&mut txn, &send4);
    blocks.push(send4.clone());
    let receive = fixture.receive_block(&txn, &genesis, send4.hash());
    fixture.apply(&mut txn, &receive);
    blocks.push(receive.clone());

    fixture.store().commit(txn).unwrap();
    (blocks, receive.hash())
}

fn assert_fully_cemented(fixture: &TestLedger) {
    let txn = fixture.store().tx_begin_read();
    for (account, info) in fixture.store().accounts_iter(&txn) {
        let height = fixture
            .store()
            .confirmation_height_get(&txn, &account)
            .map(|h| h.height)
            .unwrap_or(0);
        assert_eq!(
            height, info.block_count,
            "account {account} is not fully cemented"
        );
    }
    assert_eq!(
        fixture.ledger.cache.cemented_count(),
        fixture.ledger.cache.block_count()
    );
}

#[test]
fn cement_cross_chain_receives_bounded() {
    let fixture = TestLedger::new();
    let write_queue = Arc::new(WriteQueue::new());
    let (blocks, target) = build_cross_chain(&fixture);
    assert_eq!(fixture.ledger.cache.block_count(), blocks.len() as u64 + 1);

    let cementer = cementer(&fixture, &write_queue, ConfirmationHeightMode::Bounded);
    cement_and_wait(&fixture, &cementer, target, blocks.len());
    assert_fully_cemented(&fixture);
    cementer.stop();
}

#[test]
fn cement_cross_chain_receives_unbounded() {
    let fixture = TestLedger::new();
    let write_queue = Arc::new(WriteQueue::new());
    let (blocks, target) = build_cross_chain(&fixture);

    let cementer = cementer(&fixture, &write_queue, ConfirmationHeightMode::Unbounded);
    cement_and_wait(&fixture, &cementer, target, blocks.len());
    assert_fully_cemented(&fixture);
    cementer.stop();
}

#[test]
fn already_cemented_targets_are_reported() {
    let fixture = TestLedger::new();
    let write_queue = Arc::new(WriteQueue::new());
    let cementer = cementer(&fixture, &write_queue, ConfirmationHeightMode::Bounded);

    let (sender, receiver) = mpsc::channel();
    cementer
        .already_cemented_observers
        .add(move |hash: &BlockHash| {
            let _ = sender.send(*hash);
        });
    // Genesis is cemented at initialization.
    let genesis_hash = fixture.ledger.constants.genesis_block.hash();
    cementer.add(genesis_hash);
    assert_eq!(receiver.recv_timeout(TIMEOUT).unwrap(), genesis_hash);
    cementer.stop();
}

#[test]
fn pause_defers_new_walks() {
    let fixture = TestLedger::new();
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);
    let write_queue = Arc::new(WriteQueue::new());
    let cementer = cementer(&fixture, &write_queue, ConfirmationHeightMode::Bounded);

    let send = {
        let mut txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        fixture.apply(&mut txn, &send);
        fixture.store().commit(txn).unwrap();
        send
    };

    cementer.pause();
    cementer.add(send.hash());
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fixture.ledger.cache.cemented_count(), 1);
    assert_eq!(cementer.awaiting_processing_size(), 1);

    let (sender, receiver) = mpsc::channel();
    cementer.cemented_observers.add(move |block: &Arc<Block>| {
        let _ = sender.send(block.hash());
    });
    cementer.unpause();
    assert_eq!(receiver.recv_timeout(TIMEOUT).unwrap(), send.hash());
    assert_eq!(fixture.ledger.cache.cemented_count(), 2);
    cementer.stop();
}

#[test]
fn vote_generator_sequences_and_cache() {
    let fixture = TestLedger::new();
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);

    let send = {
        let mut txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        fixture.apply(&mut txn, &send);
        fixture.store().commit(txn).unwrap();
        send
    };

    let cache = Arc::new(VotesCache::new(128, 1));
    let generator = VoteGenerator::new(
        Arc::clone(&fixture.ledger),
        Arc::clone(&cache),
        Duration::from_millis(10),
        1,
    );
    generator.set_representatives(vec![genesis.clone()]);

    let first = generator.generate(&[send.hash()]);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].sequence, 1);
    assert!(first[0].validate());

    let second = generator.generate(&[send.hash()]);
    assert_eq!(second[0].sequence, 2);

    // The cache replays the newest vote for the hash.
    let cached = cache.votes(&send.hash());
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].sequence, 2);

    // Sequences survive a restart of the generator.
    generator.stop();
    drop(generator);
    let generator = VoteGenerator::new(
        Arc::clone(&fixture.ledger),
        Arc::clone(&cache),
        Duration::from_millis(10),
        1,
    );
    generator.set_representatives(vec![genesis]);
    let third = generator.generate(&[send.hash()]);
    assert_eq!(third[0].sequence, 3);
    generator.stop();
}

#[test]
fn vote_generator_batches_through_add() {
    let fixture = TestLedger::new();
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);

    let send = {
        let mut txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        fixture.apply(&mut txn, &send);
        // Cement it so dependents are votable.
        fixture.store().confirmation_height_put(
            &mut txn,
            &genesis.account(),
            &ConfirmationHeightInfo::new(2, send.hash()),
        );
        fixture.store().commit(txn).unwrap();
        send
    };

    let cache = Arc::new(VotesCache::new(128, 1));
    let generator = VoteGenerator::new(
        Arc::clone(&fixture.ledger),
        Arc::clone(&cache),
        Duration::from_millis(20),
        1,
    );
    generator.set_representatives(vec![genesis]);
    let (sender, receiver) = mpsc::channel();
    generator.vote_observers.add(move |vote| {
        let _ = sender.send(Arc::clone(vote));
    });

    generator.add(send.hash());
    let vote = receiver.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(vote.hashes, vec![send.hash()]);
    generator.stop();
}

#[test]
fn unchecked_cleanup_purges_stale_entries() {
    let fixture = TestLedger::new();
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);

    // Park an entry with an ancient arrival time.
    {
        let mut txn = fixture.write_txn();
        let send = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        let open = fixture.open_block(&key1, send.hash(), genesis.account());
        let key = ferrite_ledger_types::UncheckedKey::new(send.hash(), open.hash());
        let mut info = ferrite_ledger_types::UncheckedInfo::new(
            Arc::new(open),
            Account::zero(),
            1, // long past any cutoff
        );
        info.verified = ferrite_ledger_types::SignatureVerification::Valid;
        fixture.store().unchecked_put(&mut txn, &key, &info);
        fixture.store().commit(txn).unwrap();
        fixture.ledger.cache.add_unchecked(1);
    }

    let cleanup = UncheckedCleanup::new(
        Arc::clone(&fixture.ledger),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    );
    cleanup.run_once();
    let txn = fixture.store().tx_begin_read();
    assert_eq!(fixture.store().unchecked_count(&txn), 0);
    assert_eq!(fixture.ledger.cache.unchecked_count(), 0);
    cleanup.stop();
}

#[test]
fn frontier_scan_prioritizes_uncemented() {
    let fixture = TestLedger::new();
    let genesis = fixture.genesis_key();
    let key1 = Keypair::from_seed([1u8; 32]);

    // Genesis gains two uncemented blocks; key1 gains one.
    {
        let mut txn = fixture.write_txn();
        let send1 = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(100)).unwrap(),
        );
        fixture.apply(&mut txn, &send1);
        let send2 = fixture.send_block(
            &txn,
            &genesis,
            key1.account(),
            Amount::MAX.checked_sub(Amount::raw(200)).unwrap(),
        );
        fixture.apply(&mut txn, &send2);
        let open = fixture.open_block(&key1, send1.hash(), genesis.account());
        fixture.apply(&mut txn, &open);
        fixture.store().commit(txn).unwrap();
    }

    let scanner = FrontierScan::new(
        Arc::clone(&fixture.ledger),
        FrontiersConfirmationMode::Automatic,
        Duration::from_secs(3600),
        16,
    );
    let frontiers = scanner.run_once();
    assert_eq!(frontiers.len(), 2);
    // Genesis has more uncemented blocks and sorts first.
    assert_eq!(frontiers[0].account, genesis.account());
    assert_eq!(frontiers[0].uncemented, 2);
    assert_eq!(frontiers[1].account, key1.account());

    // Wallet accounts take the priority track.
    scanner.set_wallet_accounts([key1.account()]);
    let frontiers = scanner.run_once();
    assert_eq!(frontiers[0].account, key1.account());
    assert!(frontiers[0].wallet);
    scanner.stop();
}

#[test]
fn disabled_frontier_scan_returns_nothing() {
    let fixture = TestLedger::new();
    let scanner = FrontierScan::new(
        Arc::clone(&fixture.ledger),
        FrontiersConfirmationMode::Disabled,
        Duration::from_secs(3600),
        16,
    );
    assert!(scanner.run_once().is_empty());
    scanner.stop();
}
