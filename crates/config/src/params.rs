//! Network-wide ledger constants: genesis, epochs, work thresholds.

use ferrite_ledger_types::{Block, OpenBlock};
use ferrite_primitives::{
    work, Account, Amount, BlockHash, Epoch, Epochs, Keypair, Link, WorkThresholds, BURN_ACCOUNT,
};

/// Seed of the development network's genesis keypair. Dev only; funds on
/// this network are worthless by construction.
pub const DEV_GENESIS_SEED: [u8; 32] = [
    0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a,
    0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19,
    0x1a, 0x1b,
];

fn epoch_link(message: &[u8]) -> Link {
    let mut bytes = [0u8; 32];
    bytes[..message.len()].copy_from_slice(message);
    Link::from_bytes(bytes)
}

/// Immutable per-network ledger parameters, constructed once at startup and
/// passed explicitly to every component that needs them.
#[derive(Debug, Clone)]
pub struct LedgerConstants {
    pub genesis_account: Account,
    pub genesis_block: Block,
    pub genesis_amount: Amount,
    pub burn_account: Account,
    pub epochs: Epochs,
    pub work: WorkThresholds,
}

impl LedgerConstants {
    /// Development network: embedded genesis key, cheap work.
    pub fn dev() -> Self {
        let thresholds = WorkThresholds::dev();
        let genesis_key = Keypair::from_seed(DEV_GENESIS_SEED);
        let genesis_account = genesis_key.account();
        let genesis_work = work::generate(&genesis_account.into(), thresholds.epoch_1);
        let genesis_block = Block::Open(OpenBlock::new(
            BlockHash::from_bytes(*genesis_account.as_bytes()),
            genesis_account,
            &genesis_key,
            genesis_work,
        ));

        let mut epochs = Epochs::new();
        epochs.add(Epoch::Epoch1, genesis_account, epoch_link(b"epoch v1 block"));
        epochs.add(Epoch::Epoch2, genesis_account, epoch_link(b"epoch v2 block"));

        Self {
            genesis_account,
            genesis_block,
            genesis_amount: Amount::MAX,
            burn_account: BURN_ACCOUNT,
            epochs,
            work: thresholds,
        }
    }

    /// The development genesis keypair, for tests and the dev wallet.
    pub fn dev_genesis_key() -> Keypair {
        Keypair::from_seed(DEV_GENESIS_SEED)
    }
}
