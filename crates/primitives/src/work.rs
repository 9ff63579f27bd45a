//! Proof-of-work difficulty evaluation.
//!
//! The work value of a block is the 8-byte Blake2b digest of the work nonce
//! (little-endian) followed by the block root, interpreted little-endian.
//! Validity is a per-epoch threshold comparison; receive-side operations on
//! upgraded chains use a reduced threshold.

use blake2::{
    digest::{Update, VariableOutput},
    Blake2bVar,
};

use crate::{Epoch, Root, WorkNonce};

/// Computes the difficulty value of `work` against `root`.
pub fn work_value(root: &Root, work: WorkNonce) -> u64 {
    let mut hasher = Blake2bVar::new(8).expect("8 is a valid blake2b output length");
    hasher.update(&work.number().to_le_bytes());
    hasher.update(root.as_bytes());
    let mut out = [0u8; 8];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer matches digest length");
    u64::from_le_bytes(out)
}

/// Per-epoch acceptance thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkThresholds {
    /// Base threshold for all epoch 0/1 operations.
    pub epoch_1: u64,
    /// Threshold for sends, changes and epoch upgrades from epoch 2 on.
    pub epoch_2: u64,
    /// Reduced threshold for receives from epoch 2 on.
    pub epoch_2_receive: u64,
}

impl WorkThresholds {
    /// Production thresholds.
    pub const fn live() -> Self {
        Self {
            epoch_1: 0xffff_ffc0_0000_0000,
            epoch_2: 0xffff_fff8_0000_0000,
            epoch_2_receive: 0xffff_fe00_0000_0000,
        }
    }

    /// Cheap thresholds so tests can brute-force nonces quickly.
    pub const fn dev() -> Self {
        Self {
            epoch_1: 0xfe00_0000_0000_0000,
            epoch_2: 0xffc0_0000_0000_0000,
            epoch_2_receive: 0xf000_0000_0000_0000,
        }
    }

    /// The threshold a block must meet given its epoch and whether it is a
    /// receive-side operation.
    pub fn threshold(&self, epoch: Epoch, is_receive: bool) -> u64 {
        match epoch {
            Epoch::Unspecified | Epoch::Epoch0 | Epoch::Epoch1 => self.epoch_1,
            Epoch::Epoch2 => {
                if is_receive {
                    self.epoch_2_receive
                } else {
                    self.epoch_2
                }
            }
        }
    }

    /// The hardest threshold any operation of `epoch` can require. Used when
    /// a block's precise details are not yet derived.
    pub fn threshold_base(&self, epoch: Epoch) -> u64 {
        self.threshold(epoch, false)
    }

    /// Entry filter threshold: the weakest threshold the block could need,
    /// pending full validation.
    pub fn threshold_entry(&self, is_state: bool) -> u64 {
        if is_state {
            self.epoch_2_receive.min(self.epoch_1)
        } else {
            self.epoch_1
        }
    }

    pub fn validate(&self, epoch: Epoch, is_receive: bool, root: &Root, work: WorkNonce) -> bool {
        work_value(root, work) >= self.threshold(epoch, is_receive)
    }
}

/// Brute-force nonce search. Only suitable for dev thresholds; production
/// work generation lives in the external work pool.
pub fn generate(root: &Root, threshold: u64) -> WorkNonce {
    let mut nonce = 0u64;
    loop {
        let work = WorkNonce(nonce);
        if work_value(root, work) >= threshold {
            return work;
        }
        nonce = nonce.wrapping_add(1);
    }
}
