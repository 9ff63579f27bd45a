//! Ordered, idempotent schema upgrade steps.
//!
//! Each step moves the database exactly one version forward inside its own
//! write transaction, so a crash mid-upgrade resumes at the incomplete
//! step. Legacy value layouts are parsed here and nowhere else.

use ferrite_ledger_types::{
    ser::Reader, AccountInfo, Block, BlockSideband, BlockType, ConfirmationHeightInfo, PendingInfo,
    PendingKey,
};
use ferrite_primitives::{Account, Amount, BlockHash, Epochs};
use tracing::debug;

use crate::{
    error::{StoreError, StoreResult},
    schema::Table,
    store::{Store, StoreOptions, VERSION_MAX, VERSION_MINIMUM},
    tables::CacheCount,
    transaction::{Txn, WriteTransaction},
};

pub(crate) fn run(store: &Store, options: &StoreOptions) -> StoreResult<()> {
    loop {
        let version = store
            .version_get(&store.tx_begin_read())
            .unwrap_or(VERSION_MAX);
        if version >= VERSION_MAX {
            return Ok(());
        }
        if version < VERSION_MINIMUM {
            return Err(StoreError::Init(format!(
                "database version {version} predates the supported minimum {VERSION_MINIMUM}"
            )));
        }
        debug!(from = version, "running schema upgrade step");
        match version {
            2 => upgrade_v2_v3(store)?,
            3 => upgrade_v3_v4(store)?,
            4 => upgrade_v4_v5(store)?,
            6 => upgrade_v6_v7(store)?,
            8 => upgrade_v8_v9(store)?,
            11 => upgrade_v11_v12(store)?,
            12 => upgrade_v12_v13(store)?,
            13 => upgrade_v13_v14(store)?,
            14 => upgrade_v14_v15(store)?,
            15 => upgrade_v15_v16(store)?,
            16 => upgrade_v16_v17(store)?,
            17 => upgrade_v17_v18(store, &options.epochs)?,
            other => bump_version(store, other)?,
        }
    }
}

/// Steps with no data change of their own.
fn bump_version(store: &Store, from: u64) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Meta]);
    store.version_put(&mut txn, from + 1);
    store.commit(txn)
}

/// Account values carried the confirmation height inline before v15.
fn parse_account_legacy(bytes: &[u8]) -> (AccountInfo, Option<u64>) {
    if bytes.len() == 129 + 8 {
        let info = AccountInfo::from_bytes(&bytes[..129])
            .unwrap_or_else(|e| panic!("corrupt legacy account record: {e}"));
        let mut height = [0u8; 8];
        height.copy_from_slice(&bytes[129..]);
        (info, Some(u64::from_be_bytes(height)))
    } else {
        let info = AccountInfo::from_bytes(bytes)
            .unwrap_or_else(|e| panic!("corrupt account record: {e}"));
        (info, None)
    }
}

fn accounts_legacy(store: &Store, txn: &dyn Txn) -> Vec<(Account, AccountInfo, Option<u64>)> {
    store
        .raw_iter_from(txn, Table::Accounts, &[])
        .map(|(k, v)| {
            let mut key = [0u8; 32];
            key.copy_from_slice(&k);
            let (info, height) = parse_account_legacy(&v);
            (Account::from_bytes(key), info, height)
        })
        .collect()
}

/// v2 -> v3: rebuild the representation table from account balances.
fn upgrade_v2_v3(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Accounts, Table::Representation, Table::Meta]);
    store.raw_clear(&mut txn, Table::Representation);
    let accounts = accounts_legacy(store, &txn);
    for (_, info, _) in accounts {
        let key = info.representative.as_bytes().to_vec();
        let current = store
            .raw_get(&txn, Table::Representation, &key)
            .map(|bytes| {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(&bytes);
                Amount::from_be_bytes(buf)
            })
            .unwrap_or_default();
        let next = current.checked_add(info.balance).unwrap_or(Amount::MAX);
        store.raw_put(&mut txn, Table::Representation, &key, next.to_be_bytes().to_vec());
    }
    store.version_put(&mut txn, 3);
    store.commit(txn)
}

/// v3 -> v4: re-key pending from the send hash alone to
/// `(destination, send hash)`. The old value carried the destination.
fn upgrade_v3_v4(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Pending, Table::Meta]);
    let legacy: Vec<(Vec<u8>, Vec<u8>)> = store
        .raw_iter_from(&txn, Table::Pending, &[])
        .filter(|(k, _)| k.len() == 32)
        .collect();
    for (key, value) in legacy {
        let mut reader = Reader::new(&value);
        let source = Account::from_bytes(
            reader
                .read_array()
                .map_err(StoreError::corruption("legacy pending"))?,
        );
        let amount = Amount::from_be_bytes(
            reader
                .read_array()
                .map_err(StoreError::corruption("legacy pending"))?,
        );
        let destination = Account::from_bytes(
            reader
                .read_array()
                .map_err(StoreError::corruption("legacy pending"))?,
        );
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&key);
        let new_key = PendingKey::new(destination, BlockHash::from_bytes(hash));
        let info = PendingInfo::new(source, amount, ferrite_primitives::Epoch::Epoch0);
        store.raw_del(&mut txn, Table::Pending, &key);
        store.pending_put(&mut txn, &new_key, &info);
    }
    store.version_put(&mut txn, 4);
    store.commit(txn)
}

/// Walks every account chain and rewrites heights, owning accounts and
/// successor pointers. Balances that a block does not carry itself are
/// preserved from the stored sideband.
fn rebuild_sidebands(store: &Store, txn: &mut WriteTransaction<'_>) {
    let accounts = accounts_legacy(store, &*txn);
    for (account, info, _) in accounts {
        let mut chain = Vec::with_capacity(info.block_count as usize);
        let mut cursor = info.head;
        while !cursor.is_zero() {
            let (block, _) = store
                .block_get(&*txn, &cursor)
                .unwrap_or_else(|| panic!("chain walk hit missing block {cursor}"));
            let previous = block.previous();
            chain.push(cursor);
            cursor = previous;
        }
        chain.reverse();
        for (index, hash) in chain.iter().enumerate() {
            let (block, mut sideband) = store
                .block_get(&*txn, hash)
                .unwrap_or_else(|| panic!("chain walk hit missing block {hash}"));
            sideband.account = account;
            sideband.height = index as u64 + 1;
            sideband.successor = chain
                .get(index + 1)
                .copied()
                .unwrap_or_else(BlockHash::zero);
            sideband.restore(&block);
            store.block_put(txn, hash, &block, &sideband);
        }
    }
}

/// v4 -> v5: persist successor pointers.
fn upgrade_v4_v5(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Accounts, Table::Blocks, Table::Meta]);
    rebuild_sidebands(store, &mut txn);
    store.version_put(&mut txn, 5);
    store.commit(txn)
}

/// v6 -> v7: recompute heights and chain ownership.
fn upgrade_v6_v7(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Accounts, Table::Blocks, Table::Meta]);
    rebuild_sidebands(store, &mut txn);
    store.version_put(&mut txn, 7);
    store.commit(txn)
}

/// v8 -> v9: the vote record format changed incompatibly; stored votes are
/// regenerated from scratch.
fn upgrade_v8_v9(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Vote, Table::Meta]);
    store.raw_clear(&mut txn, Table::Vote);
    store.version_put(&mut txn, 9);
    store.commit(txn)
}

/// v11 -> v12: drain the per-type block tables into the unified table.
/// Legacy values are the block body without a type tag, followed by the
/// sideband in the same per-type layout used today.
fn upgrade_v11_v12(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![
        Table::Blocks,
        Table::SendBlocks,
        Table::ReceiveBlocks,
        Table::OpenBlocks,
        Table::ChangeBlocks,
        Table::StateBlocks,
        Table::Meta,
    ]);
    let legacy_tables = [
        (Table::SendBlocks, BlockType::Send),
        (Table::ReceiveBlocks, BlockType::Receive),
        (Table::OpenBlocks, BlockType::Open),
        (Table::ChangeBlocks, BlockType::Change),
        (Table::StateBlocks, BlockType::State),
    ];
    for (table, block_type) in legacy_tables {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = store.raw_iter_from(&txn, table, &[]).collect();
        let count = entries.len() as i64;
        for (key, value) in entries {
            let mut reader = Reader::new(&value);
            let block = Block::deserialize(&mut reader, block_type)
                .map_err(StoreError::corruption("legacy block"))?;
            let mut sideband = BlockSideband::deserialize(&mut reader, block_type)
                .map_err(StoreError::corruption("legacy sideband"))?;
            sideband.restore(&block);
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key);
            store.block_put(&mut txn, &BlockHash::from_bytes(hash), &block, &sideband);
        }
        store.count_add(&mut txn, CacheCount::for_block_type(block_type), count);
        store.raw_clear(&mut txn, table);
    }
    store.version_put(&mut txn, 12);
    store.commit(txn)
}

/// v12 -> v13: persist full sidebands for every chain.
fn upgrade_v12_v13(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Accounts, Table::Blocks, Table::Meta]);
    rebuild_sidebands(store, &mut txn);
    store.version_put(&mut txn, 13);
    store.commit(txn)
}

/// v13 -> v14: introduce confirmation heights at zero and drop the node id
/// row that used to live in `meta`.
fn upgrade_v13_v14(store: &Store) -> StoreResult<()> {
    let mut txn =
        store.tx_begin_write(vec![Table::Accounts, Table::ConfirmationHeight, Table::Meta]);
    let accounts = accounts_legacy(store, &txn);
    for (account, _, _) in accounts {
        if store.confirmation_height_get(&txn, &account).is_none() {
            store.confirmation_height_put(
                &mut txn,
                &account,
                &ConfirmationHeightInfo::default(),
            );
        }
    }
    store.raw_del(&mut txn, Table::Meta, b"node_id");
    store.version_put(&mut txn, 14);
    store.commit(txn)
}

/// v14 -> v15: move the confirmation height out of the account value into
/// its own table, and stop tracking frontiers for state-block chains.
fn upgrade_v14_v15(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![
        Table::Accounts,
        Table::Blocks,
        Table::ConfirmationHeight,
        Table::Frontiers,
        Table::Meta,
    ]);
    let accounts = accounts_legacy(store, &txn);
    let mut cemented = 0u64;
    for (account, info, height) in accounts {
        if let Some(height) = height {
            store.account_put(&mut txn, &account, &info);
            store.confirmation_height_put(
                &mut txn,
                &account,
                &ConfirmationHeightInfo::new(height, BlockHash::zero()),
            );
            cemented += height;
        }
        if let Some((head, _)) = store.block_get(&txn, &info.head) {
            if head.block_type() == BlockType::State {
                store.frontier_del(&mut txn, &info.head);
            }
        }
    }
    store.count_put(&mut txn, CacheCount::Cemented, cemented);
    store.version_put(&mut txn, 15);
    store.commit(txn)
}

/// v15 -> v16: representative weights are rebuilt in memory at open; the
/// standalone table goes away.
fn upgrade_v15_v16(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Representation, Table::Meta]);
    store.raw_clear(&mut txn, Table::Representation);
    store.version_put(&mut txn, 16);
    store.commit(txn)
}

/// v16 -> v17: backfill `frontier` on confirmation heights by walking each
/// chain down from its head to the cemented height.
fn upgrade_v16_v17(store: &Store) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![
        Table::Accounts,
        Table::Blocks,
        Table::ConfirmationHeight,
        Table::Meta,
    ]);
    let entries: Vec<(Account, ConfirmationHeightInfo)> =
        store.confirmation_height_iter(&txn).collect();
    for (account, mut info) in entries {
        if info.height == 0 || !info.frontier.is_zero() {
            continue;
        }
        let Some(account_info) = store.account_get(&txn, &account) else {
            continue;
        };
        let mut cursor = account_info.head;
        let mut steps = account_info.block_count.saturating_sub(info.height);
        while steps > 0 {
            let (block, _) = store
                .block_get(&txn, &cursor)
                .unwrap_or_else(|| panic!("chain walk hit missing block {cursor}"));
            cursor = block.previous();
            steps -= 1;
        }
        info.frontier = cursor;
        store.confirmation_height_put(&mut txn, &account, &info);
    }
    store.version_put(&mut txn, 17);
    store.commit(txn)
}

/// v17 -> v18: backfill operation flags on state-block sidebands from the
/// balance delta and the epoch link registry.
fn upgrade_v17_v18(store: &Store, epochs: &Epochs) -> StoreResult<()> {
    let mut txn = store.tx_begin_write(vec![Table::Blocks, Table::Meta]);
    let state_blocks: Vec<(BlockHash, Block, BlockSideband)> = store
        .blocks_iter(&txn)
        .filter(|(_, block, _)| block.block_type() == BlockType::State)
        .collect();
    for (hash, block, mut sideband) in state_blocks {
        let previous = block.previous();
        let previous_balance = if previous.is_zero() {
            Amount::zero()
        } else {
            store
                .block_get(&txn, &previous)
                .map(|(_, s)| s.balance)
                .unwrap_or_else(|| panic!("chain walk hit missing block {previous}"))
        };
        let balance = block.balance_field().unwrap_or_default();
        let link = block.link();
        sideband.details.is_send = balance < previous_balance;
        sideband.details.is_epoch =
            balance == previous_balance && !link.is_zero() && epochs.is_epoch_link(&link);
        sideband.details.is_receive =
            !sideband.details.is_send && !sideband.details.is_epoch && !link.is_zero();
        store.block_put(&mut txn, &hash, &block, &sideband);
    }
    store.version_put(&mut txn, 18);
    store.commit(txn)
}
