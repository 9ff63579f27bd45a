//! Batched Ed25519 verification over a worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use ferrite_primitives::{validate_message_batch, Account, Signature};
use parking_lot::{Condvar, Mutex};
use threadpool::ThreadPool;
use tracing::trace;

/// One batch of `(message, account, signature)` triples and their verdicts.
#[derive(Debug, Default)]
pub struct SignatureCheckSet {
    pub messages: Vec<Vec<u8>>,
    pub accounts: Vec<Account>,
    pub signatures: Vec<Signature>,
    /// Filled by [`SignatureChecker::verify`]: 1 verified, 0 rejected.
    pub verifications: Vec<i32>,
}

impl SignatureCheckSet {
    pub fn push(&mut self, message: Vec<u8>, account: Account, signature: Signature) {
        self.messages.push(message);
        self.accounts.push(account);
        self.signatures.push(signature);
        self.verifications.push(-1);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Splits large check sets across a thread pool, using the batched curve
/// primitive per slice with a per-item fallback inside.
pub struct SignatureChecker {
    pool: ThreadPool,
    batch_size: usize,
    tasks: AtomicUsize,
    flush_lock: Mutex<()>,
    flushed: Condvar,
}

impl SignatureChecker {
    pub fn new(num_threads: usize, batch_size: usize) -> Self {
        let threads = num_threads.max(1);
        let batch = if batch_size == 0 { 256 } else { batch_size };
        Self {
            pool: ThreadPool::with_name("signature_check".to_string(), threads),
            batch_size: batch,
            tasks: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
            flushed: Condvar::new(),
        }
    }

    /// Fills `set.verifications` with one verdict per entry.
    pub fn verify(&self, set: &mut SignatureCheckSet) {
        if set.is_empty() {
            return;
        }
        if set.len() <= self.batch_size {
            Self::verify_chunk(
                &set.messages,
                &set.accounts,
                &set.signatures,
                &mut set.verifications,
            );
            return;
        }

        let (sender, receiver) = mpsc::channel();
        let mut dispatched = 0usize;
        let mut start = 0usize;
        while start < set.len() {
            let end = (start + self.batch_size).min(set.len());
            let messages = set.messages[start..end].to_vec();
            let accounts = set.accounts[start..end].to_vec();
            let signatures = set.signatures[start..end].to_vec();
            let sender = sender.clone();
            self.tasks.fetch_add(1, Ordering::SeqCst);
            self.pool.execute(move || {
                let mut verifications = vec![-1; messages.len()];
                Self::verify_chunk(&messages, &accounts, &signatures, &mut verifications);
                // Receiver outlives the workers within verify().
                let _ = sender.send((start, verifications));
            });
            dispatched += 1;
            start = end;
        }
        drop(sender);
        for _ in 0..dispatched {
            let (offset, verifications) = receiver
                .recv()
                .expect("verification worker dropped its result");
            set.verifications[offset..offset + verifications.len()]
                .copy_from_slice(&verifications);
            if self.tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.flushed.notify_all();
            }
        }
        trace!(len = set.len(), "verified signature batch");
    }

    /// Blocks until every dispatched chunk has reported.
    pub fn flush(&self) {
        let mut lock = self.flush_lock.lock();
        while self.tasks.load(Ordering::SeqCst) != 0 {
            self.flushed.wait(&mut lock);
        }
    }

    fn verify_chunk(
        messages: &[Vec<u8>],
        accounts: &[Account],
        signatures: &[Signature],
        verifications: &mut [i32],
    ) {
        let message_refs: Vec<&[u8]> = messages.iter().map(|m| m.as_slice()).collect();
        validate_message_batch(&message_refs, accounts, signatures, verifications);
    }
}

impl std::fmt::Debug for SignatureChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureChecker")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use ferrite_primitives::Keypair;

    use super::*;

    fn filled_set(count: usize, tamper: Option<usize>) -> SignatureCheckSet {
        let mut set = SignatureCheckSet::default();
        for i in 0..count {
            let key = Keypair::from_seed([(i % 250) as u8 + 1; 32]);
            let message = vec![i as u8; 32];
            let mut signature = key.sign(&message);
            if tamper == Some(i) {
                signature = key.sign(b"tampered");
            }
            set.push(message, key.account(), signature);
        }
        set
    }

    #[test]
    fn small_batch_inline() {
        let checker = SignatureChecker::new(2, 256);
        let mut set = filled_set(8, Some(3));
        checker.verify(&mut set);
        for (i, verification) in set.verifications.iter().enumerate() {
            assert_eq!(*verification, i32::from(i != 3), "entry {i}");
        }
    }

    #[test]
    fn large_batch_spans_workers() {
        let checker = SignatureChecker::new(4, 16);
        let mut set = filled_set(100, Some(57));
        checker.verify(&mut set);
        checker.flush();
        for (i, verification) in set.verifications.iter().enumerate() {
            assert_eq!(*verification, i32::from(i != 57), "entry {i}");
        }
    }
}
