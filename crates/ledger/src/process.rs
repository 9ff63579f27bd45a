//! Block validation and application.

use ferrite_ledger_types::{
    AccountInfo, Block, BlockDetails, BlockSideband, ChangeBlock, ConfirmationHeightInfo,
    OpenBlock, PendingInfo, PendingKey, ReceiveBlock, SendBlock, SignatureVerification,
    StateBlock,
};
use ferrite_primitives::{
    seconds_since_epoch, validate_message, Account, Amount, BlockHash, Epoch,
};
use ferrite_store::{CacheCount, WriteTransaction};
use tracing::trace;

use crate::{CacheDelta, Ledger};

/// Outcome of validating one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Block applied.
    Progress,
    BadSignature,
    /// Already in the ledger.
    Old,
    NegativeSpend,
    /// A different block occupies this chain position.
    Fork,
    Unreceivable,
    GapPrevious,
    GapSource,
    OpenedBurnAccount,
    BalanceMismatch,
    RepresentativeMismatch,
    /// A legacy block may not follow a state block, or an epoch is skipped.
    BlockPosition,
    InsufficientWork,
}

/// Validation outcome plus the facts callers need post-commit.
#[derive(Debug, Clone, Copy)]
pub struct ProcessReturn {
    pub code: ProcessResult,
    /// Chain owner, set on `Progress`.
    pub account: Account,
    /// Value moved, set on `Progress`.
    pub amount: Amount,
    /// Balance before the block, set on `Progress`.
    pub previous_balance: Amount,
    /// Signature knowledge to retain when the block is requeued.
    pub verified: SignatureVerification,
}

impl ProcessReturn {
    fn new(code: ProcessResult) -> Self {
        Self {
            code,
            account: Account::zero(),
            amount: Amount::zero(),
            previous_balance: Amount::zero(),
            verified: SignatureVerification::Unknown,
        }
    }

    fn verified(code: ProcessResult, verified: SignatureVerification) -> Self {
        let mut result = Self::new(code);
        result.verified = verified;
        result
    }
}

pub(crate) fn process(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    verification: SignatureVerification,
) -> (ProcessReturn, CacheDelta) {
    let hash = block.hash();
    let mut delta = CacheDelta::new();
    if ledger.store.block_exists(&*txn, &hash) {
        return (ProcessReturn::new(ProcessResult::Old), delta);
    }
    let result = match block {
        Block::Open(open) => open_impl(ledger, txn, block, open, hash, verification, &mut delta),
        Block::Send(send) => send_impl(ledger, txn, block, send, hash, verification, &mut delta),
        Block::Receive(receive) => {
            receive_impl(ledger, txn, block, receive, hash, verification, &mut delta)
        }
        Block::Change(change) => {
            change_impl(ledger, txn, block, change, hash, verification, &mut delta)
        }
        Block::State(state) => {
            state_impl(ledger, txn, block, state, hash, verification, &mut delta)
        }
    };
    trace!(%hash, code = ?result.code, "processed block");
    (result, delta)
}

fn legacy_signature_ok(
    verification: SignatureVerification,
    account: &Account,
    hash: &BlockHash,
    signature: &ferrite_primitives::Signature,
) -> bool {
    verification == SignatureVerification::Valid
        || validate_message(account, hash.as_bytes(), signature).is_ok()
}

/// Resolved chain context for a non-open legacy block.
struct LegacyPosition {
    account: Account,
    info: AccountInfo,
}

fn resolve_legacy_position(
    ledger: &Ledger,
    txn: &WriteTransaction<'_>,
    block: &Block,
    previous: &BlockHash,
) -> Result<LegacyPosition, ProcessResult> {
    let Some((previous_block, previous_sideband)) = ledger.store.block_get(txn, previous) else {
        return Err(ProcessResult::GapPrevious);
    };
    if !block.valid_predecessor(previous_block.block_type()) {
        return Err(ProcessResult::BlockPosition);
    }
    let account = previous_sideband.account;
    let Some(info) = ledger.store.account_get(txn, &account) else {
        return Err(ProcessResult::GapPrevious);
    };
    if info.head != *previous {
        return Err(ProcessResult::Fork);
    }
    Ok(LegacyPosition { account, info })
}

/// Shared application tail: store the block, link it into the chain, move
/// the legacy frontier, and refresh the account record.
#[allow(clippy::too_many_arguments, reason = "one call site per block kind")]
fn apply_block(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    hash: BlockHash,
    account: Account,
    info: Option<&AccountInfo>,
    balance: Amount,
    representative: Account,
    details: BlockDetails,
    maintain_frontier: bool,
    delta: &mut CacheDelta,
) {
    let height = info.map(|info| info.block_count + 1).unwrap_or(1);
    let sideband = BlockSideband::new(
        account,
        BlockHash::zero(),
        balance,
        height,
        seconds_since_epoch(),
        details,
    );
    ledger.store.block_put(txn, &hash, block, &sideband);

    let previous = block.previous();
    if !previous.is_zero() {
        ledger.store.block_successor_set(txn, &previous, hash);
        if ledger.store.frontier_get(&*txn, &previous) == Some(account) {
            ledger.store.frontier_del(txn, &previous);
        }
    }
    if maintain_frontier {
        ledger.store.frontier_put(txn, &hash, &account);
    }

    let new_info = AccountInfo {
        head: hash,
        representative,
        open_block: info.map(|info| info.open_block).unwrap_or(hash),
        balance,
        modified: seconds_since_epoch(),
        block_count: height,
        epoch: details.epoch,
    };
    ledger.store.account_put(txn, &account, &new_info);
    if info.is_none() {
        ledger.store.confirmation_height_put(
            txn,
            &account,
            &ConfirmationHeightInfo::default(),
        );
        ledger.store.count_add(txn, CacheCount::Accounts, 1);
        delta.add_accounts(1);
    }
    ledger
        .store
        .count_add(txn, CacheCount::for_block_type(block.block_type()), 1);
    delta.add_blocks(1);
}

fn send_impl(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    send: &SendBlock,
    hash: BlockHash,
    verification: SignatureVerification,
    delta: &mut CacheDelta,
) -> ProcessReturn {
    let position = match resolve_legacy_position(ledger, txn, block, &send.previous) {
        Ok(position) => position,
        Err(code) => return ProcessReturn::verified(code, verification),
    };
    let LegacyPosition { account, info, .. } = position;
    if !legacy_signature_ok(verification, &account, &hash, &send.signature) {
        return ProcessReturn::new(ProcessResult::BadSignature);
    }
    let Some(amount) = info.balance.checked_sub(send.balance) else {
        return ProcessReturn::new(ProcessResult::NegativeSpend);
    };
    let details = BlockDetails::new(Epoch::Epoch0, true, false, false);
    if !ledger
        .constants
        .work
        .validate(details.epoch, false, &block.root(), block.work())
    {
        return ProcessReturn::new(ProcessResult::InsufficientWork);
    }

    ledger.store.pending_put(
        txn,
        &PendingKey::new(send.destination, hash),
        &PendingInfo::new(account, amount, Epoch::Epoch0),
    );
    delta.representation_sub(info.representative, amount);
    apply_block(
        ledger,
        txn,
        block,
        hash,
        account,
        Some(&info),
        send.balance,
        info.representative,
        details,
        true,
        delta,
    );
    ProcessReturn {
        code: ProcessResult::Progress,
        account,
        amount,
        previous_balance: info.balance,
        verified: SignatureVerification::Valid,
    }
}

fn receive_impl(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    receive: &ReceiveBlock,
    hash: BlockHash,
    verification: SignatureVerification,
    delta: &mut CacheDelta,
) -> ProcessReturn {
    let position = match resolve_legacy_position(ledger, txn, block, &receive.previous) {
        Ok(position) => position,
        Err(code) => return ProcessReturn::verified(code, verification),
    };
    let LegacyPosition { account, info, .. } = position;
    if !legacy_signature_ok(verification, &account, &hash, &receive.signature) {
        return ProcessReturn::new(ProcessResult::BadSignature);
    }
    if !ledger.store.block_exists(&*txn, &receive.source) {
        return ProcessReturn::verified(ProcessResult::GapSource, SignatureVerification::Valid);
    }
    let pending_key = PendingKey::new(account, receive.source);
    let Some(pending) = ledger.store.pending_get(&*txn, &pending_key) else {
        return ProcessReturn::new(ProcessResult::Unreceivable);
    };
    if pending.epoch > Epoch::Epoch0 {
        // Upgraded funds require a state receive.
        return ProcessReturn::new(ProcessResult::Unreceivable);
    }
    let Some(balance) = info.balance.checked_add(pending.amount) else {
        return ProcessReturn::new(ProcessResult::BalanceMismatch);
    };
    let details = BlockDetails::new(Epoch::Epoch0, false, true, false);
    if !ledger
        .constants
        .work
        .validate(details.epoch, true, &block.root(), block.work())
    {
        return ProcessReturn::new(ProcessResult::InsufficientWork);
    }

    ledger.store.pending_del(txn, &pending_key);
    delta.representation_add(info.representative, pending.amount);
    apply_block(
        ledger,
        txn,
        block,
        hash,
        account,
        Some(&info),
        balance,
        info.representative,
        details,
        true,
        delta,
    );
    ProcessReturn {
        code: ProcessResult::Progress,
        account,
        amount: pending.amount,
        previous_balance: info.balance,
        verified: SignatureVerification::Valid,
    }
}

fn open_impl(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    open: &OpenBlock,
    hash: BlockHash,
    verification: SignatureVerification,
    delta: &mut CacheDelta,
) -> ProcessReturn {
    let account = open.account;
    if account == ledger.constants.burn_account {
        return ProcessReturn::new(ProcessResult::OpenedBurnAccount);
    }
    if !legacy_signature_ok(verification, &account, &hash, &open.signature) {
        return ProcessReturn::new(ProcessResult::BadSignature);
    }
    if !ledger.store.block_exists(&*txn, &open.source) {
        return ProcessReturn::verified(ProcessResult::GapSource, SignatureVerification::Valid);
    }
    if ledger.store.account_get(&*txn, &account).is_some() {
        return ProcessReturn::new(ProcessResult::Fork);
    }
    let pending_key = PendingKey::new(account, open.source);
    let Some(pending) = ledger.store.pending_get(&*txn, &pending_key) else {
        return ProcessReturn::new(ProcessResult::Unreceivable);
    };
    if pending.epoch > Epoch::Epoch0 {
        return ProcessReturn::new(ProcessResult::Unreceivable);
    }
    let details = BlockDetails::new(Epoch::Epoch0, false, true, false);
    if !ledger
        .constants
        .work
        .validate(details.epoch, true, &block.root(), block.work())
    {
        return ProcessReturn::new(ProcessResult::InsufficientWork);
    }

    ledger.store.pending_del(txn, &pending_key);
    delta.representation_add(open.representative, pending.amount);
    apply_block(
        ledger,
        txn,
        block,
        hash,
        account,
        None,
        pending.amount,
        open.representative,
        details,
        true,
        delta,
    );
    ProcessReturn {
        code: ProcessResult::Progress,
        account,
        amount: pending.amount,
        previous_balance: Amount::zero(),
        verified: SignatureVerification::Valid,
    }
}

fn change_impl(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    change: &ChangeBlock,
    hash: BlockHash,
    verification: SignatureVerification,
    delta: &mut CacheDelta,
) -> ProcessReturn {
    let position = match resolve_legacy_position(ledger, txn, block, &change.previous) {
        Ok(position) => position,
        Err(code) => return ProcessReturn::verified(code, verification),
    };
    let LegacyPosition { account, info, .. } = position;
    if !legacy_signature_ok(verification, &account, &hash, &change.signature) {
        return ProcessReturn::new(ProcessResult::BadSignature);
    }
    let details = BlockDetails::new(Epoch::Epoch0, false, false, false);
    if !ledger
        .constants
        .work
        .validate(details.epoch, false, &block.root(), block.work())
    {
        return ProcessReturn::new(ProcessResult::InsufficientWork);
    }

    delta.representation_sub(info.representative, info.balance);
    delta.representation_add(change.representative, info.balance);
    apply_block(
        ledger,
        txn,
        block,
        hash,
        account,
        Some(&info),
        info.balance,
        change.representative,
        details,
        true,
        delta,
    );
    ProcessReturn {
        code: ProcessResult::Progress,
        account,
        amount: Amount::zero(),
        previous_balance: info.balance,
        verified: SignatureVerification::Valid,
    }
}

/// Resolves which signer a state block verifies under, trying the account
/// first and the epoch signer second for epoch-link candidates.
fn resolve_state_signature(
    ledger: &Ledger,
    state: &StateBlock,
    hash: &BlockHash,
    verification: SignatureVerification,
    epoch_candidate: bool,
) -> SignatureVerification {
    match verification {
        SignatureVerification::Valid => SignatureVerification::Valid,
        SignatureVerification::ValidEpoch => SignatureVerification::ValidEpoch,
        _ => {
            if validate_message(&state.account, hash.as_bytes(), &state.signature).is_ok() {
                SignatureVerification::Valid
            } else if epoch_candidate {
                match ledger.epoch_signer(&state.link) {
                    Some(signer)
                        if validate_message(&signer, hash.as_bytes(), &state.signature)
                            .is_ok() =>
                    {
                        SignatureVerification::ValidEpoch
                    }
                    _ => SignatureVerification::Invalid,
                }
            } else {
                SignatureVerification::Invalid
            }
        }
    }
}

#[allow(clippy::too_many_arguments, reason = "dispatch site threads the batch delta")]
fn state_impl(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    state: &StateBlock,
    hash: BlockHash,
    verification: SignatureVerification,
    delta: &mut CacheDelta,
) -> ProcessReturn {
    let account = state.account;
    if account == ledger.constants.burn_account {
        return ProcessReturn::new(ProcessResult::OpenedBurnAccount);
    }
    let epoch_candidate = !state.link.is_zero() && ledger.is_epoch_link(&state.link);
    let resolved = resolve_state_signature(ledger, state, &hash, verification, epoch_candidate);
    if resolved == SignatureVerification::Invalid {
        return ProcessReturn::new(ProcessResult::BadSignature);
    }

    let info = ledger.store.account_get(&*txn, &account);
    let previous_sideband = if state.previous.is_zero() {
        None
    } else {
        match ledger.store.block_get(&*txn, &state.previous) {
            Some((_, sideband)) => Some(sideband),
            None => return ProcessReturn::verified(ProcessResult::GapPrevious, resolved),
        }
    };
    match (&info, state.previous.is_zero()) {
        (Some(_), true) => return ProcessReturn::verified(ProcessResult::Fork, resolved),
        (Some(info), false) if info.head != state.previous => {
            return ProcessReturn::verified(ProcessResult::Fork, resolved)
        }
        (None, false) => {
            return ProcessReturn::verified(ProcessResult::GapPrevious, resolved)
        }
        _ => {}
    }
    let previous_balance = previous_sideband
        .as_ref()
        .map(|sideband| sideband.balance)
        .unwrap_or_default();

    if epoch_candidate && state.balance == previous_balance {
        return epoch_impl(
            ledger,
            txn,
            block,
            state,
            hash,
            resolved,
            info,
            previous_balance,
            delta,
        );
    }
    if resolved != SignatureVerification::Valid {
        // The account's own signature failed; epoch-signing covers only
        // balance-neutral upgrades.
        return ProcessReturn::new(ProcessResult::BadSignature);
    }

    // Classify the operation by balance delta and link.
    let mut amount = Amount::zero();
    let mut is_send = false;
    let mut is_receive = false;
    let mut source_epoch = Epoch::Epoch0;
    if state.balance < previous_balance {
        is_send = true;
        amount = previous_balance
            .checked_sub(state.balance)
            .expect("comparison established the order");
    } else if state.balance > previous_balance {
        if state.link.is_zero() {
            return ProcessReturn::verified(ProcessResult::BalanceMismatch, resolved);
        }
        is_receive = true;
        let source = state.link.as_block_hash();
        if !ledger.store.block_exists(&*txn, &source) {
            return ProcessReturn::verified(ProcessResult::GapSource, resolved);
        }
        let pending_key = PendingKey::new(account, source);
        let Some(pending) = ledger.store.pending_get(&*txn, &pending_key) else {
            return ProcessReturn::verified(ProcessResult::Unreceivable, resolved);
        };
        let delta = state
            .balance
            .checked_sub(previous_balance)
            .expect("comparison established the order");
        if pending.amount != delta {
            return ProcessReturn::verified(ProcessResult::BalanceMismatch, resolved);
        }
        amount = delta;
        source_epoch = pending.epoch;
    } else if !state.link.is_zero() {
        // Equal balance with a non-epoch link claims a zero-value receive,
        // which no pending entry can back.
        return ProcessReturn::verified(ProcessResult::Unreceivable, resolved);
    }

    let current_epoch = info.as_ref().map(|info| info.epoch).unwrap_or(Epoch::Epoch0);
    let epoch = if is_receive {
        current_epoch.max(source_epoch)
    } else {
        current_epoch
    };
    let details = BlockDetails::new(epoch, is_send, is_receive, false);
    if !ledger
        .constants
        .work
        .validate(epoch, is_receive, &block.root(), block.work())
    {
        return ProcessReturn::verified(ProcessResult::InsufficientWork, resolved);
    }

    // Apply.
    if is_send {
        ledger.store.pending_put(
            txn,
            &PendingKey::new(state.link.as_account(), hash),
            &PendingInfo::new(account, amount, epoch),
        );
    } else if is_receive {
        ledger
            .store
            .pending_del(txn, &PendingKey::new(account, state.link.as_block_hash()));
    }
    if let Some(info) = &info {
        delta.representation_sub(info.representative, previous_balance);
    }
    delta.representation_add(state.representative, state.balance);
    apply_block(
        ledger,
        txn,
        block,
        hash,
        account,
        info.as_ref(),
        state.balance,
        state.representative,
        details,
        false,
        delta,
    );
    ProcessReturn {
        code: ProcessResult::Progress,
        account,
        amount,
        previous_balance,
        verified: SignatureVerification::Valid,
    }
}

#[allow(clippy::too_many_arguments, reason = "dispatched from state_impl")]
fn epoch_impl(
    ledger: &Ledger,
    txn: &mut WriteTransaction<'_>,
    block: &Block,
    state: &StateBlock,
    hash: BlockHash,
    resolved: SignatureVerification,
    info: Option<AccountInfo>,
    previous_balance: Amount,
    delta: &mut CacheDelta,
) -> ProcessReturn {
    // The upgrade must verify under the epoch signer. An account-signed
    // result still qualifies when the account is itself the epoch signer.
    let epoch_signer = ledger.epoch_signer(&state.link);
    let signer_ok = match resolved {
        SignatureVerification::ValidEpoch => true,
        SignatureVerification::Valid => epoch_signer == Some(state.account),
        _ => false,
    };
    if !signer_ok {
        return ProcessReturn::new(ProcessResult::BadSignature);
    }
    // Epoch upgrades extend existing chains only.
    let Some(info) = info else {
        return ProcessReturn::verified(ProcessResult::GapPrevious, resolved);
    };
    if state.representative != info.representative {
        return ProcessReturn::verified(ProcessResult::RepresentativeMismatch, resolved);
    }
    let target_epoch = ledger
        .constants
        .epochs
        .epoch(&state.link)
        .expect("dispatch checked the link is registered");
    if !Epoch::is_sequential(info.epoch, target_epoch) {
        return ProcessReturn::verified(ProcessResult::BlockPosition, resolved);
    }
    let details = BlockDetails::new(target_epoch, false, false, true);
    if !ledger
        .constants
        .work
        .validate(target_epoch, false, &block.root(), block.work())
    {
        return ProcessReturn::verified(ProcessResult::InsufficientWork, resolved);
    }

    // Balance and representative are untouched, so weights are too.
    apply_block(
        ledger,
        txn,
        block,
        hash,
        state.account,
        Some(&info),
        state.balance,
        info.representative,
        details,
        false,
        delta,
    );
    ProcessReturn {
        code: ProcessResult::Progress,
        account: state.account,
        amount: Amount::zero(),
        previous_balance,
        verified: SignatureVerification::ValidEpoch,
    }
}
