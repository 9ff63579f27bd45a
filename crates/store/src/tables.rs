//! Typed per-table operations.

use ferrite_ledger_types::{
    ser::Reader, AccountInfo, Block, BlockSideband, BlockType, ConfirmationHeightInfo,
    EndpointKey, PendingInfo, PendingKey, UncheckedInfo, UncheckedKey, Vote,
};
use ferrite_primitives::{Account, Amount, BlockHash};
use rand::RngCore;

use crate::{
    schema::Table,
    store::Store,
    transaction::{Txn, WriteTransaction},
};

/// Counters cached in `meta` so totals never require a table scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCount {
    Send,
    Receive,
    Open,
    Change,
    State,
    Cemented,
    Unchecked,
    Accounts,
}

impl CacheCount {
    fn meta_key(self) -> &'static [u8] {
        match self {
            CacheCount::Send => b"count:send",
            CacheCount::Receive => b"count:receive",
            CacheCount::Open => b"count:open",
            CacheCount::Change => b"count:change",
            CacheCount::State => b"count:state",
            CacheCount::Cemented => b"count:cemented",
            CacheCount::Unchecked => b"count:unchecked",
            CacheCount::Accounts => b"count:accounts",
        }
    }

    pub fn for_block_type(block_type: BlockType) -> CacheCount {
        match block_type {
            BlockType::Send => CacheCount::Send,
            BlockType::Receive => CacheCount::Receive,
            BlockType::Open => CacheCount::Open,
            BlockType::Change => CacheCount::Change,
            BlockType::State => CacheCount::State,
        }
    }
}

fn decode<T>(
    context: &'static str,
    result: Result<T, ferrite_ledger_types::ser::WireError>,
) -> T {
    result.unwrap_or_else(|e| panic!("corrupt {context} record: {e}"))
}

impl Store {
    // Accounts.

    pub fn account_put(&self, txn: &mut WriteTransaction<'_>, account: &Account, info: &AccountInfo) {
        self.raw_put(txn, Table::Accounts, account.as_bytes(), info.to_bytes());
    }

    pub fn account_get(&self, txn: &dyn Txn, account: &Account) -> Option<AccountInfo> {
        self.raw_get(txn, Table::Accounts, account.as_bytes())
            .map(|bytes| decode("account", AccountInfo::from_bytes(&bytes)))
    }

    pub fn account_del(&self, txn: &mut WriteTransaction<'_>, account: &Account) {
        self.raw_del(txn, Table::Accounts, account.as_bytes());
    }

    pub fn account_exists(&self, txn: &dyn Txn, account: &Account) -> bool {
        self.raw_exists(txn, Table::Accounts, account.as_bytes())
    }

    pub fn accounts_iter<'a>(
        &'a self,
        txn: &'a dyn Txn,
    ) -> impl Iterator<Item = (Account, AccountInfo)> + 'a {
        self.raw_iter_from(txn, Table::Accounts, &[]).map(|(k, v)| {
            let mut key = [0u8; 32];
            key.copy_from_slice(&k);
            (
                Account::from_bytes(key),
                decode("account", AccountInfo::from_bytes(&v)),
            )
        })
    }

    pub fn account_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::Accounts)
    }

    // Blocks. The stored value is the type tag, the block body, then the
    // sideband in its per-type layout.

    pub fn block_put(
        &self,
        txn: &mut WriteTransaction<'_>,
        hash: &BlockHash,
        block: &Block,
        sideband: &BlockSideband,
    ) {
        debug_assert_eq!(*hash, block.hash());
        let mut value = Vec::new();
        block.serialize_with_type(&mut value);
        sideband.serialize(&mut value, block.block_type());
        self.raw_put(txn, Table::Blocks, hash.as_bytes(), value);
    }

    pub fn block_get(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<(Block, BlockSideband)> {
        self.raw_get(txn, Table::Blocks, hash.as_bytes())
            .map(|bytes| decode("block", parse_block_entry(&bytes)))
    }

    pub fn block_del(&self, txn: &mut WriteTransaction<'_>, hash: &BlockHash) {
        self.raw_del(txn, Table::Blocks, hash.as_bytes());
    }

    pub fn block_exists(&self, txn: &dyn Txn, hash: &BlockHash) -> bool {
        self.raw_exists(txn, Table::Blocks, hash.as_bytes())
    }

    pub fn block_successor(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<BlockHash> {
        self.block_get(txn, hash).and_then(|(_, sideband)| {
            (!sideband.successor.is_zero()).then_some(sideband.successor)
        })
    }

    /// Rewrites the stored sideband with a new successor pointer.
    pub fn block_successor_set(
        &self,
        txn: &mut WriteTransaction<'_>,
        hash: &BlockHash,
        successor: BlockHash,
    ) {
        let (block, mut sideband) = self
            .block_get(txn, hash)
            .unwrap_or_else(|| panic!("successor update for missing block {hash}"));
        sideband.successor = successor;
        self.block_put(txn, hash, &block, &sideband);
    }

    pub fn block_successor_clear(&self, txn: &mut WriteTransaction<'_>, hash: &BlockHash) {
        self.block_successor_set(txn, hash, BlockHash::zero());
    }

    pub fn blocks_iter<'a>(
        &'a self,
        txn: &'a dyn Txn,
    ) -> impl Iterator<Item = (BlockHash, Block, BlockSideband)> + 'a {
        self.raw_iter_from(txn, Table::Blocks, &[]).map(|(k, v)| {
            let mut key = [0u8; 32];
            key.copy_from_slice(&k);
            let (block, sideband) = decode("block", parse_block_entry(&v));
            (BlockHash::from_bytes(key), block, sideband)
        })
    }

    /// Uniform-ish random sample of the blocks table: probe at a random key
    /// and take the next entry, wrapping to the front.
    pub fn block_random(&self, txn: &dyn Txn) -> Option<(BlockHash, Block)> {
        let mut probe = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut probe);
        let entry = self
            .raw_iter_from(txn, Table::Blocks, &probe)
            .next()
            .or_else(|| self.raw_iter_from(txn, Table::Blocks, &[]).next())?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&entry.0);
        let (block, _) = decode("block", parse_block_entry(&entry.1));
        Some((BlockHash::from_bytes(key), block))
    }

    // Pending.

    pub fn pending_put(
        &self,
        txn: &mut WriteTransaction<'_>,
        key: &PendingKey,
        info: &PendingInfo,
    ) {
        self.raw_put(txn, Table::Pending, &key.to_bytes(), info.to_bytes());
    }

    pub fn pending_get(&self, txn: &dyn Txn, key: &PendingKey) -> Option<PendingInfo> {
        self.raw_get(txn, Table::Pending, &key.to_bytes())
            .map(|bytes| decode("pending", PendingInfo::from_bytes(&bytes)))
    }

    pub fn pending_del(&self, txn: &mut WriteTransaction<'_>, key: &PendingKey) {
        self.raw_del(txn, Table::Pending, &key.to_bytes());
    }

    pub fn pending_exists(&self, txn: &dyn Txn, key: &PendingKey) -> bool {
        self.raw_exists(txn, Table::Pending, &key.to_bytes())
    }

    /// All pending entries whose destination is `account`.
    pub fn pending_iter_account<'a>(
        &'a self,
        txn: &'a dyn Txn,
        account: Account,
    ) -> impl Iterator<Item = (PendingKey, PendingInfo)> + 'a {
        self.raw_iter_from(txn, Table::Pending, account.as_bytes())
            .take_while(move |(k, _)| k[..32] == *account.as_bytes())
            .map(|(k, v)| {
                (
                    decode("pending key", PendingKey::from_bytes(&k)),
                    decode("pending", PendingInfo::from_bytes(&v)),
                )
            })
    }

    pub fn pending_iter<'a>(
        &'a self,
        txn: &'a dyn Txn,
    ) -> impl Iterator<Item = (PendingKey, PendingInfo)> + 'a {
        self.raw_iter_from(txn, Table::Pending, &[]).map(|(k, v)| {
            (
                decode("pending key", PendingKey::from_bytes(&k)),
                decode("pending", PendingInfo::from_bytes(&v)),
            )
        })
    }

    pub fn pending_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::Pending)
    }

    // Confirmation height.

    pub fn confirmation_height_put(
        &self,
        txn: &mut WriteTransaction<'_>,
        account: &Account,
        info: &ConfirmationHeightInfo,
    ) {
        self.raw_put(
            txn,
            Table::ConfirmationHeight,
            account.as_bytes(),
            info.to_bytes().to_vec(),
        );
    }

    pub fn confirmation_height_get(
        &self,
        txn: &dyn Txn,
        account: &Account,
    ) -> Option<ConfirmationHeightInfo> {
        self.raw_get(txn, Table::ConfirmationHeight, account.as_bytes())
            .map(|bytes| decode("confirmation height", ConfirmationHeightInfo::from_bytes(&bytes)))
    }

    pub fn confirmation_height_del(&self, txn: &mut WriteTransaction<'_>, account: &Account) {
        self.raw_del(txn, Table::ConfirmationHeight, account.as_bytes());
    }

    pub fn confirmation_height_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::ConfirmationHeight)
    }

    pub fn confirmation_height_clear(&self, txn: &mut WriteTransaction<'_>) {
        self.raw_clear(txn, Table::ConfirmationHeight);
    }

    pub fn confirmation_height_iter<'a>(
        &'a self,
        txn: &'a dyn Txn,
    ) -> impl Iterator<Item = (Account, ConfirmationHeightInfo)> + 'a {
        self.raw_iter_from(txn, Table::ConfirmationHeight, &[])
            .map(|(k, v)| {
                let mut key = [0u8; 32];
                key.copy_from_slice(&k);
                (
                    Account::from_bytes(key),
                    decode("confirmation height", ConfirmationHeightInfo::from_bytes(&v)),
                )
            })
    }

    // Unchecked. A multi-map keyed on the missing dependency.

    pub fn unchecked_put(
        &self,
        txn: &mut WriteTransaction<'_>,
        key: &UncheckedKey,
        info: &UncheckedInfo,
    ) {
        self.raw_put(txn, Table::Unchecked, &key.to_bytes(), info.to_bytes());
    }

    pub fn unchecked_get(&self, txn: &dyn Txn, key: &UncheckedKey) -> Option<UncheckedInfo> {
        self.raw_get(txn, Table::Unchecked, &key.to_bytes())
            .map(|bytes| decode("unchecked", UncheckedInfo::from_bytes(&bytes)))
    }

    pub fn unchecked_del(&self, txn: &mut WriteTransaction<'_>, key: &UncheckedKey) {
        self.raw_del(txn, Table::Unchecked, &key.to_bytes());
    }

    pub fn unchecked_exists(&self, txn: &dyn Txn, key: &UncheckedKey) -> bool {
        self.raw_exists(txn, Table::Unchecked, &key.to_bytes())
    }

    /// Every entry waiting on `dependency`.
    pub fn unchecked_for_dependency(
        &self,
        txn: &dyn Txn,
        dependency: &BlockHash,
    ) -> Vec<(UncheckedKey, UncheckedInfo)> {
        self.raw_iter_from(txn, Table::Unchecked, dependency.as_bytes())
            .take_while(|(k, _)| k[..32] == *dependency.as_bytes())
            .map(|(k, v)| {
                (
                    decode("unchecked key", UncheckedKey::from_bytes(&k)),
                    decode("unchecked", UncheckedInfo::from_bytes(&v)),
                )
            })
            .collect()
    }

    pub fn unchecked_iter<'a>(
        &'a self,
        txn: &'a dyn Txn,
    ) -> impl Iterator<Item = (UncheckedKey, UncheckedInfo)> + 'a {
        self.raw_iter_from(txn, Table::Unchecked, &[]).map(|(k, v)| {
            (
                decode("unchecked key", UncheckedKey::from_bytes(&k)),
                decode("unchecked", UncheckedInfo::from_bytes(&v)),
            )
        })
    }

    pub fn unchecked_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::Unchecked)
    }

    pub fn unchecked_clear(&self, txn: &mut WriteTransaction<'_>) {
        self.raw_clear(txn, Table::Unchecked);
    }

    // Frontiers (legacy head hash -> account mapping).

    pub fn frontier_put(&self, txn: &mut WriteTransaction<'_>, hash: &BlockHash, account: &Account) {
        self.raw_put(txn, Table::Frontiers, hash.as_bytes(), account.as_bytes().to_vec());
    }

    pub fn frontier_get(&self, txn: &dyn Txn, hash: &BlockHash) -> Option<Account> {
        self.raw_get(txn, Table::Frontiers, hash.as_bytes()).map(|bytes| {
            let mut buf = [0u8; 32];
            buf.copy_from_slice(&bytes);
            Account::from_bytes(buf)
        })
    }

    pub fn frontier_del(&self, txn: &mut WriteTransaction<'_>, hash: &BlockHash) {
        self.raw_del(txn, Table::Frontiers, hash.as_bytes());
    }

    pub fn frontier_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::Frontiers)
    }

    // Local votes.

    pub fn vote_put(&self, txn: &mut WriteTransaction<'_>, vote: &Vote) {
        self.raw_put(txn, Table::Vote, vote.account.as_bytes(), vote.to_bytes());
    }

    pub fn vote_get(&self, txn: &dyn Txn, account: &Account) -> Option<Vote> {
        self.raw_get(txn, Table::Vote, account.as_bytes())
            .map(|bytes| decode("vote", Vote::from_bytes(&bytes)))
    }

    // Online weight samples, keyed by sample timestamp.

    pub fn online_weight_put(&self, txn: &mut WriteTransaction<'_>, timestamp: u64, weight: Amount) {
        self.raw_put(
            txn,
            Table::OnlineWeight,
            &timestamp.to_be_bytes(),
            weight.to_be_bytes().to_vec(),
        );
    }

    pub fn online_weight_del(&self, txn: &mut WriteTransaction<'_>, timestamp: u64) {
        self.raw_del(txn, Table::OnlineWeight, &timestamp.to_be_bytes());
    }

    pub fn online_weight_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::OnlineWeight)
    }

    /// Samples newest first.
    pub fn online_weight_iter_rev<'a>(
        &'a self,
        txn: &'a dyn Txn,
    ) -> impl Iterator<Item = (u64, Amount)> + 'a {
        self.raw_iter_rev(txn, Table::OnlineWeight).map(|(k, v)| {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&k);
            let mut amount = [0u8; 16];
            amount.copy_from_slice(&v);
            (u64::from_be_bytes(ts), Amount::from_be_bytes(amount))
        })
    }

    /// Deletes samples older than `cutoff`, keeping at most `max_samples`
    /// of the newest.
    pub fn online_weight_trim(
        &self,
        txn: &mut WriteTransaction<'_>,
        cutoff: u64,
        max_samples: u64,
    ) {
        let timestamps: Vec<u64> = self.online_weight_iter_rev(txn).map(|(ts, _)| ts).collect();
        for (index, timestamp) in timestamps.into_iter().enumerate() {
            if index as u64 >= max_samples || timestamp < cutoff {
                self.online_weight_del(txn, timestamp);
            }
        }
    }

    // Peers.

    pub fn peer_put(&self, txn: &mut WriteTransaction<'_>, endpoint: &EndpointKey) {
        self.raw_put(txn, Table::Peers, &endpoint.to_bytes(), Vec::new());
    }

    pub fn peer_del(&self, txn: &mut WriteTransaction<'_>, endpoint: &EndpointKey) {
        self.raw_del(txn, Table::Peers, &endpoint.to_bytes());
    }

    pub fn peer_exists(&self, txn: &dyn Txn, endpoint: &EndpointKey) -> bool {
        self.raw_exists(txn, Table::Peers, &endpoint.to_bytes())
    }

    pub fn peer_count(&self, txn: &dyn Txn) -> u64 {
        self.raw_count(txn, Table::Peers)
    }

    pub fn peers_clear(&self, txn: &mut WriteTransaction<'_>) {
        self.raw_clear(txn, Table::Peers);
    }

    pub fn peers_iter<'a>(&'a self, txn: &'a dyn Txn) -> impl Iterator<Item = EndpointKey> + 'a {
        self.raw_iter_from(txn, Table::Peers, &[])
            .map(|(k, _)| decode("endpoint key", EndpointKey::from_bytes(&k)))
    }

    // Cached counters.

    pub fn count_get(&self, txn: &dyn Txn, count: CacheCount) -> u64 {
        self.raw_get(txn, Table::Meta, count.meta_key())
            .map(|bytes| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                u64::from_be_bytes(buf)
            })
            .unwrap_or(0)
    }

    pub fn count_put(&self, txn: &mut WriteTransaction<'_>, count: CacheCount, value: u64) {
        self.raw_put(txn, Table::Meta, count.meta_key(), value.to_be_bytes().to_vec());
    }

    pub fn count_add(&self, txn: &mut WriteTransaction<'_>, count: CacheCount, delta: i64) {
        let current = self.count_get(txn, count);
        let next = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        self.count_put(txn, count, next);
    }

    /// Total block count across all types.
    pub fn block_count_total(&self, txn: &dyn Txn) -> u64 {
        [
            CacheCount::Send,
            CacheCount::Receive,
            CacheCount::Open,
            CacheCount::Change,
            CacheCount::State,
        ]
        .into_iter()
        .map(|count| self.count_get(txn, count))
        .sum()
    }
}

pub(crate) fn parse_block_entry(
    bytes: &[u8],
) -> Result<(Block, BlockSideband), ferrite_ledger_types::ser::WireError> {
    let mut reader = Reader::new(bytes);
    let block = Block::deserialize_with_type(&mut reader)?;
    let mut sideband = BlockSideband::deserialize(&mut reader, block.block_type())?;
    reader.finish()?;
    sideband.restore(&block);
    Ok((block, sideband))
}
