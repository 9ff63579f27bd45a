//! Record types persisted in the store tables.

use std::sync::Arc;

use ferrite_primitives::{sign_message, validate_message, Account, Amount, BlockHash, BlockHasher,
    Epoch, Keypair, Signature};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    block::Block,
    ser::{Reader, WireError},
};

fn read_epoch(reader: &mut Reader<'_>) -> Result<Epoch, WireError> {
    let byte = reader.read_u8()?;
    Epoch::try_from(byte).map_err(|_| WireError::InvalidTag {
        field: "epoch",
        value: byte,
    })
}

/// Per-account head record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub representative: Account,
    pub open_block: BlockHash,
    pub balance: Amount,
    /// Seconds since the Unix epoch of the last modification.
    pub modified: u64,
    pub block_count: u64,
    pub epoch: Epoch,
}

impl AccountInfo {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(129);
        out.extend_from_slice(self.head.as_bytes());
        out.extend_from_slice(self.representative.as_bytes());
        out.extend_from_slice(self.open_block.as_bytes());
        out.extend_from_slice(&self.balance.to_be_bytes());
        out.extend_from_slice(&self.modified.to_be_bytes());
        out.extend_from_slice(&self.block_count.to_be_bytes());
        out.push(self.epoch.into());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let info = Self {
            head: BlockHash::from_bytes(reader.read_array()?),
            representative: Account::from_bytes(reader.read_array()?),
            open_block: BlockHash::from_bytes(reader.read_array()?),
            balance: Amount::from_be_bytes(reader.read_array()?),
            modified: reader.read_u64_be()?,
            block_count: reader.read_u64_be()?,
            epoch: read_epoch(&mut reader)?,
        };
        reader.finish()?;
        Ok(info)
    }
}

/// Key of an unclaimed transfer: destination account then source hash, so a
/// prefix scan by account yields that account's pending entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingKey {
    pub account: Account,
    pub hash: BlockHash,
}

impl PendingKey {
    pub fn new(account: Account, hash: BlockHash) -> Self {
        Self { account, hash }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.account.as_bytes());
        out[32..].copy_from_slice(self.hash.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let key = Self {
            account: Account::from_bytes(reader.read_array()?),
            hash: BlockHash::from_bytes(reader.read_array()?),
        };
        reader.finish()?;
        Ok(key)
    }
}

/// Value of an unclaimed transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
    pub epoch: Epoch,
}

impl PendingInfo {
    pub fn new(source: Account, amount: Amount, epoch: Epoch) -> Self {
        Self {
            source,
            amount,
            epoch,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(49);
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(&self.amount.to_be_bytes());
        out.push(self.epoch.into());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let info = Self {
            source: Account::from_bytes(reader.read_array()?),
            amount: Amount::from_be_bytes(reader.read_array()?),
            epoch: read_epoch(&mut reader)?,
        };
        reader.finish()?;
        Ok(info)
    }
}

/// Length and frontier of the irreversible prefix of an account chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier: BlockHash,
}

impl ConfirmationHeightInfo {
    pub fn new(height: u64, frontier: BlockHash) -> Self {
        Self { height, frontier }
    }

    pub fn to_bytes(&self) -> [u8; 40] {
        let mut out = [0u8; 40];
        out[..8].copy_from_slice(&self.height.to_be_bytes());
        out[8..].copy_from_slice(self.frontier.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let info = Self {
            height: reader.read_u64_be()?,
            frontier: BlockHash::from_bytes(reader.read_array()?),
        };
        reader.finish()?;
        Ok(info)
    }
}

/// Multi-map key for orphan blocks: the missing dependency first, so all
/// dependents of one hash share a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UncheckedKey {
    pub dependency: BlockHash,
    pub hash: BlockHash,
}

impl UncheckedKey {
    pub fn new(dependency: BlockHash, hash: BlockHash) -> Self {
        Self { dependency, hash }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.dependency.as_bytes());
        out[32..].copy_from_slice(self.hash.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let key = Self {
            dependency: BlockHash::from_bytes(reader.read_array()?),
            hash: BlockHash::from_bytes(reader.read_array()?),
        };
        reader.finish()?;
        Ok(key)
    }
}

/// Outcome of signature checking carried with a queued block so it is not
/// re-verified on every pass.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum SignatureVerification {
    #[default]
    Unknown = 0,
    Invalid = 1,
    Valid = 2,
    /// Valid under the epoch signer rather than the account.
    ValidEpoch = 3,
}

/// A block waiting for a missing dependency, plus arrival bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncheckedInfo {
    pub block: Arc<Block>,
    /// Hint of the chain owner when known at enqueue time; zero otherwise.
    pub account: Account,
    /// Seconds since the Unix epoch of arrival.
    pub modified: u64,
    pub verified: SignatureVerification,
}

impl UncheckedInfo {
    pub fn new(block: Arc<Block>, account: Account, modified: u64) -> Self {
        Self {
            block,
            account,
            modified,
            verified: SignatureVerification::Unknown,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.block.serialize_with_type(&mut out);
        out.extend_from_slice(self.account.as_bytes());
        out.extend_from_slice(&self.modified.to_be_bytes());
        out.push(self.verified.into());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let block = Block::deserialize_with_type(&mut reader)?;
        let account = Account::from_bytes(reader.read_array()?);
        let modified = reader.read_u64_be()?;
        let verified_byte = reader.read_u8()?;
        let verified =
            SignatureVerification::try_from(verified_byte).map_err(|_| WireError::InvalidTag {
                field: "signature verification",
                value: verified_byte,
            })?;
        reader.finish()?;
        Ok(Self {
            block: Arc::new(block),
            account,
            modified,
            verified,
        })
    }
}

/// Peer table key: ipv6 bytes in network order, port in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointKey {
    address: [u8; 16],
    port: u16,
}

impl EndpointKey {
    pub fn new(address: [u8; 16], port: u16) -> Self {
        Self { address, port }
    }

    pub fn address_bytes(&self) -> &[u8; 16] {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn to_bytes(&self) -> [u8; 18] {
        let mut out = [0u8; 18];
        out[..16].copy_from_slice(&self.address);
        out[16..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let address = reader.read_array()?;
        let port = reader.read_u16_be()?;
        reader.finish()?;
        Ok(Self { address, port })
    }
}

/// Most hashes a single vote may carry.
pub const VOTE_MAX_HASHES: usize = 12;

/// A locally issued vote by one representative over up to
/// [`VOTE_MAX_HASHES`] block hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub account: Account,
    /// Monotone per-representative issue counter.
    pub sequence: u64,
    pub hashes: Vec<BlockHash>,
    pub signature: Signature,
}

impl Vote {
    pub fn new(key: &Keypair, sequence: u64, hashes: Vec<BlockHash>) -> Self {
        debug_assert!(hashes.len() <= VOTE_MAX_HASHES);
        let mut vote = Self {
            account: key.account(),
            sequence,
            hashes,
            signature: Signature::zero(),
        };
        vote.signature = sign_message(key.private_key(), vote.digest().as_bytes());
        vote
    }

    /// The signed digest: domain prefix, voted hashes, then the sequence.
    pub fn digest(&self) -> BlockHash {
        let mut hasher = BlockHasher::new();
        hasher.update(b"vote ");
        for hash in &self.hashes {
            hasher.update(hash.as_bytes());
        }
        hasher.update(&self.sequence.to_be_bytes());
        hasher.finish()
    }

    pub fn validate(&self) -> bool {
        validate_message(&self.account, self.digest().as_bytes(), &self.signature).is_ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 8 + 64 + 1 + 32 * self.hashes.len());
        out.extend_from_slice(self.account.as_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(self.signature.as_bytes());
        out.push(self.hashes.len() as u8);
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let account = Account::from_bytes(reader.read_array()?);
        let sequence = reader.read_u64_be()?;
        let signature = Signature::from_bytes(reader.read_array()?);
        let count = reader.read_u8()?;
        if count as usize > VOTE_MAX_HASHES {
            return Err(WireError::InvalidTag {
                field: "vote hash count",
                value: count,
            });
        }
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            hashes.push(BlockHash::from_bytes(reader.read_array()?));
        }
        reader.finish()?;
        Ok(Self {
            account,
            sequence,
            hashes,
            signature,
        })
    }
}
