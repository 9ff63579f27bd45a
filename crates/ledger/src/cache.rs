//! In-memory ledger caches: counters and representative weights.
//!
//! Every value here is recomputed from the store at open. Mutations made
//! inside a write transaction are collected in a [`CacheDelta`] and applied
//! through [`LedgerCache::apply`] only once that transaction has committed,
//! so readers may consult the cache without a transaction and a failed
//! commit leaves it untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ferrite_primitives::{Account, Amount};
use parking_lot::Mutex;

/// Representative -> total delegated balance.
#[derive(Debug, Default)]
pub struct RepWeights {
    weights: Mutex<HashMap<Account, u128>>,
}

impl RepWeights {
    pub fn representation_add(&self, representative: Account, amount: Amount) {
        let mut weights = self.weights.lock();
        let entry = weights.entry(representative).or_insert(0);
        *entry = entry.saturating_add(amount.number());
    }

    pub fn representation_sub(&self, representative: Account, amount: Amount) {
        let mut weights = self.weights.lock();
        if let Some(entry) = weights.get_mut(&representative) {
            *entry = entry.saturating_sub(amount.number());
            if *entry == 0 {
                weights.remove(&representative);
            }
        }
    }

    pub fn representation_get(&self, representative: &Account) -> Amount {
        Amount::raw(
            self.weights
                .lock()
                .get(representative)
                .copied()
                .unwrap_or(0),
        )
    }

    pub fn to_map(&self) -> HashMap<Account, Amount> {
        self.weights
            .lock()
            .iter()
            .map(|(account, weight)| (*account, Amount::raw(*weight)))
            .collect()
    }
}

/// Atomically readable ledger totals.
#[derive(Debug, Default)]
pub struct LedgerCache {
    pub block_count: AtomicU64,
    pub cemented_count: AtomicU64,
    pub account_count: AtomicU64,
    pub unchecked_count: AtomicU64,
    pub rep_weights: RepWeights,
}

impl LedgerCache {
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }

    pub fn cemented_count(&self) -> u64 {
        self.cemented_count.load(Ordering::Relaxed)
    }

    pub fn account_count(&self) -> u64 {
        self.account_count.load(Ordering::Relaxed)
    }

    pub fn unchecked_count(&self) -> u64 {
        self.unchecked_count.load(Ordering::Relaxed)
    }

    pub fn add_blocks(&self, delta: i64) {
        add_signed(&self.block_count, delta);
    }

    pub fn add_cemented(&self, delta: i64) {
        add_signed(&self.cemented_count, delta);
    }

    pub fn add_accounts(&self, delta: i64) {
        add_signed(&self.account_count, delta);
    }

    pub fn add_unchecked(&self, delta: i64) {
        add_signed(&self.unchecked_count, delta);
    }
}

fn add_signed(counter: &AtomicU64, delta: i64) {
    if delta >= 0 {
        counter.fetch_add(delta as u64, Ordering::Relaxed);
    } else {
        counter.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
struct RepChange {
    representative: Account,
    amount: Amount,
    negate: bool,
}

/// Cache mutations buffered while a write transaction is open.
///
/// `process` and `rollback` record their counter and weight effects here
/// instead of touching [`LedgerCache`]; the caller applies the delta after
/// its transaction commits and drops it on failure, keeping the cache and
/// the store in lockstep.
#[derive(Debug, Default)]
pub struct CacheDelta {
    block_count: i64,
    account_count: i64,
    unchecked_count: i64,
    rep_changes: Vec<RepChange>,
}

impl CacheDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_blocks(&mut self, delta: i64) {
        self.block_count += delta;
    }

    pub fn add_accounts(&mut self, delta: i64) {
        self.account_count += delta;
    }

    pub fn add_unchecked(&mut self, delta: i64) {
        self.unchecked_count += delta;
    }

    pub fn representation_add(&mut self, representative: Account, amount: Amount) {
        self.rep_changes.push(RepChange {
            representative,
            amount,
            negate: false,
        });
    }

    pub fn representation_sub(&mut self, representative: Account, amount: Amount) {
        self.rep_changes.push(RepChange {
            representative,
            amount,
            negate: true,
        });
    }

    /// Folds `other` in after this delta, preserving weight-change order.
    pub fn merge(&mut self, other: CacheDelta) {
        self.block_count += other.block_count;
        self.account_count += other.account_count;
        self.unchecked_count += other.unchecked_count;
        self.rep_changes.extend(other.rep_changes);
    }
}

impl LedgerCache {
    /// Applies a delta whose transaction has committed.
    pub fn apply(&self, delta: CacheDelta) {
        self.add_blocks(delta.block_count);
        self.add_accounts(delta.account_count);
        self.add_unchecked(delta.unchecked_count);
        for change in delta.rep_changes {
            if change.negate {
                self.rep_weights
                    .representation_sub(change.representative, change.amount);
            } else {
                self.rep_weights
                    .representation_add(change.representative, change.amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_accumulate_and_drain() {
        let weights = RepWeights::default();
        let rep = Account::from_bytes([1u8; 32]);
        weights.representation_add(rep, Amount::raw(100));
        weights.representation_add(rep, Amount::raw(50));
        assert_eq!(weights.representation_get(&rep), Amount::raw(150));
        weights.representation_sub(rep, Amount::raw(150));
        assert_eq!(weights.representation_get(&rep), Amount::zero());
        assert!(weights.to_map().is_empty());
    }

    #[test]
    fn delta_applies_in_recorded_order() {
        let cache = LedgerCache::default();
        let old_rep = Account::from_bytes([1u8; 32]);
        let new_rep = Account::from_bytes([2u8; 32]);
        cache.rep_weights.representation_add(old_rep, Amount::raw(100));

        let mut delta = CacheDelta::new();
        delta.add_blocks(2);
        delta.add_accounts(1);
        delta.representation_sub(old_rep, Amount::raw(100));
        delta.representation_add(new_rep, Amount::raw(100));
        let mut other = CacheDelta::new();
        other.add_blocks(-1);
        other.add_unchecked(3);
        delta.merge(other);

        cache.apply(delta);
        assert_eq!(cache.block_count(), 1);
        assert_eq!(cache.account_count(), 1);
        assert_eq!(cache.unchecked_count(), 3);
        assert_eq!(cache.rep_weights.representation_get(&old_rep), Amount::zero());
        assert_eq!(
            cache.rep_weights.representation_get(&new_rep),
            Amount::raw(100)
        );
    }
}
