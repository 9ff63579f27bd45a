//! Rollback of uncemented blocks, cascading through receiving chains.

use ferrite_ledger_types::{AccountInfo, Block, PendingInfo, PendingKey};
use ferrite_primitives::{seconds_since_epoch, Account, Amount, BlockHash};
use ferrite_store::{CacheCount, WriteTransaction};
use thiserror::Error;
use tracing::debug;

use crate::{CacheDelta, Ledger};

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("block {0} is not in the ledger")]
    BlockNotFound(BlockHash),
    /// The removal set reaches at or below a confirmation height.
    #[error("block {hash} at height {height} is cemented (confirmation height {confirmed})")]
    Cemented {
        hash: BlockHash,
        height: u64,
        confirmed: u64,
    },
    /// The ledger contradicted itself mid-walk. Not recoverable.
    #[error("ledger inconsistent during rollback: {0}")]
    Inconsistent(String),
}

pub(crate) fn rollback(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    hash: &BlockHash,
) -> Result<(Vec<Block>, CacheDelta), RollbackError> {
    let savepoint = txn.savepoint();
    let mut removed = Vec::new();
    let mut delta = CacheDelta::new();
    match rollback_to(ledger, txn, hash, &mut removed, &mut delta) {
        Ok(()) => {
            // Walk order is newest first; callers replay oldest first.
            removed.reverse();
            Ok((removed, delta))
        }
        Err(error) => {
            // Buffered store changes rewind; the untouched cache delta is
            // simply dropped with the error.
            txn.rollback_to(savepoint);
            Err(error)
        }
    }
}

/// Rolls chain heads back until `target` itself has been removed.
fn rollback_to(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    target: &BlockHash,
    removed: &mut Vec<Block>,
    delta: &mut CacheDelta,
) -> Result<(), RollbackError> {
    let Some((_, sideband)) = ledger.store.block_get(&*txn, target) else {
        return Err(RollbackError::BlockNotFound(*target));
    };
    let account = sideband.account;
    while ledger.store.block_exists(&*txn, target) {
        let info = ledger.store.account_get(&*txn, &account).ok_or_else(|| {
            RollbackError::Inconsistent(format!("account {account} lost during rollback"))
        })?;
        rollback_head(ledger, txn, &info.head, removed, delta)?;
    }
    Ok(())
}

/// Undoes the head block of one account chain.
fn rollback_head(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    hash: &BlockHash,
    removed: &mut Vec<Block>,
    delta: &mut CacheDelta,
) -> Result<(), RollbackError> {
    let Some((block, sideband)) = ledger.store.block_get(&*txn, hash) else {
        return Err(RollbackError::BlockNotFound(*hash));
    };
    let account = sideband.account;
    let confirmed = ledger
        .store
        .confirmation_height_get(&*txn, &account)
        .map(|info| info.height)
        .unwrap_or(0);
    if sideband.height <= confirmed {
        return Err(RollbackError::Cemented {
            hash: *hash,
            height: sideband.height,
            confirmed,
        });
    }
    let info = ledger.store.account_get(&*txn, &account).ok_or_else(|| {
        RollbackError::Inconsistent(format!("account {account} missing for head {hash}"))
    })?;
    debug_assert_eq!(info.head, *hash, "rollback must start at the chain head");

    let previous = block.previous();
    let previous_balance = if previous.is_zero() {
        Amount::zero()
    } else {
        ledger.balance(&*txn, &previous).ok_or_else(|| {
            RollbackError::Inconsistent(format!("previous block {previous} missing"))
        })?
    };

    // Undo the variant-specific effects.
    match &block {
        Block::Send(send) => {
            undo_send(ledger, txn, hash, send.destination, removed, delta)?;
            // A send keeps the representative; the amount flows back.
            let amount = previous_balance
                .checked_sub(sideband.balance)
                .unwrap_or_default();
            delta.representation_add(info.representative, amount);
        }
        Block::Receive(receive) => {
            restore_pending(ledger, txn, account, receive.source)?;
            let amount = sideband
                .balance
                .checked_sub(previous_balance)
                .unwrap_or_default();
            delta.representation_sub(info.representative, amount);
        }
        Block::Open(open) => {
            restore_pending(ledger, txn, account, open.source)?;
            delta.representation_sub(open.representative, sideband.balance);
        }
        Block::Change(change) => {
            let previous_representative =
                representative_at(ledger, txn, &previous).ok_or_else(|| {
                    RollbackError::Inconsistent(format!(
                        "no representative below change block {hash}"
                    ))
                })?;
            delta.representation_sub(change.representative, sideband.balance);
            delta.representation_add(previous_representative, sideband.balance);
        }
        Block::State(state) => {
            if sideband.details.is_send {
                undo_send(ledger, txn, hash, state.link.as_account(), removed, delta)?;
            } else if sideband.details.is_receive {
                restore_pending(ledger, txn, account, state.link.as_block_hash())?;
            }
            delta.representation_sub(state.representative, sideband.balance);
            if !previous.is_zero() {
                let previous_representative =
                    representative_at(ledger, txn, &previous).ok_or_else(|| {
                        RollbackError::Inconsistent(format!(
                            "no representative below state block {hash}"
                        ))
                    })?;
                delta.representation_add(previous_representative, previous_balance);
            }
        }
    }

    // Remove the block and restore the account record.
    ledger.store.block_del(txn, hash);
    ledger
        .store
        .count_add(txn, CacheCount::for_block_type(block.block_type()), -1);
    delta.add_blocks(-1);
    if ledger.store.frontier_get(&*txn, hash) == Some(account) {
        ledger.store.frontier_del(txn, hash);
    }

    if previous.is_zero() {
        ledger.store.account_del(txn, &account);
        ledger.store.confirmation_height_del(txn, &account);
        ledger.store.count_add(txn, CacheCount::Accounts, -1);
        delta.add_accounts(-1);
    } else {
        ledger.store.block_successor_clear(txn, &previous);
        let (previous_block, previous_sideband) =
            ledger.store.block_get(&*txn, &previous).ok_or_else(|| {
                RollbackError::Inconsistent(format!("previous block {previous} missing"))
            })?;
        let representative = representative_at(ledger, txn, &previous).ok_or_else(|| {
            RollbackError::Inconsistent(format!("no representative at {previous}"))
        })?;
        ledger.store.account_put(
            txn,
            &account,
            &AccountInfo {
                head: previous,
                representative,
                open_block: info.open_block,
                balance: previous_balance,
                modified: seconds_since_epoch(),
                block_count: info.block_count - 1,
                epoch: previous_sideband.details.epoch,
            },
        );
        // A legacy predecessor becomes the frontier again.
        if previous_block.block_type() != ferrite_ledger_types::BlockType::State {
            ledger.store.frontier_put(txn, &previous, &account);
        }
    }

    debug!(%hash, %account, "rolled back block");
    removed.push(block);
    Ok(())
}

/// Deletes the pending entry a send created, first rolling back whatever
/// received it.
fn undo_send(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    hash: &BlockHash,
    destination: Account,
    removed: &mut Vec<Block>,
    delta: &mut CacheDelta,
) -> Result<(), RollbackError> {
    let pending_key = PendingKey::new(destination, *hash);
    while !ledger.store.pending_exists(&*txn, &pending_key) {
        let destination_info =
            ledger.store.account_get(&*txn, &destination).ok_or_else(|| {
                RollbackError::Inconsistent(format!(
                    "send {hash} was received but destination {destination} is unknown"
                ))
            })?;
        rollback_head(ledger, txn, &destination_info.head, removed, delta)?;
    }
    ledger.store.pending_del(txn, &pending_key);
    Ok(())
}

/// Re-creates the pending entry a receive consumed.
fn restore_pending(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    account: Account,
    source: BlockHash,
) -> Result<(), RollbackError> {
    let (_, source_sideband) = ledger.store.block_get(&*txn, &source).ok_or_else(|| {
        RollbackError::Inconsistent(format!("source block {source} missing"))
    })?;
    let amount = ledger.amount(&*txn, &source).ok_or_else(|| {
        RollbackError::Inconsistent(format!("cannot compute amount of source {source}"))
    })?;
    ledger.store.pending_put(
        txn,
        &PendingKey::new(account, source),
        &PendingInfo::new(source_sideband.account, amount, source_sideband.details.epoch),
    );
    Ok(())
}

/// The representative in effect at `hash`.
fn representative_at(
    ledger: &Ledger,
    txn: &WriteTransaction<'_>,
    hash: &BlockHash,
) -> Option<Account> {
    ledger.representative(txn, hash)
}
