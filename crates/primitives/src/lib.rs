//! Fundamental identifier, key, and proof-of-work types shared across the
//! ledger crates.

mod buffers;
mod epoch;
mod hashing;
mod keys;
mod macros;
mod time;
pub mod work;

pub use buffers::{Account, Amount, BlockHash, Link, QualifiedRoot, Root, Signature, WorkNonce};
pub use epoch::{Epoch, EpochInfo, Epochs};
pub use hashing::BlockHasher;
pub use keys::{
    sign_message, validate_message, validate_message_batch, Keypair, PrivateKey, SignatureError,
};
pub use time::seconds_since_epoch;
pub use work::{work_value, WorkThresholds};

/// The account that burns funds sent to it. All-zero key, no known secret.
pub const BURN_ACCOUNT: Account = Account::zero();
