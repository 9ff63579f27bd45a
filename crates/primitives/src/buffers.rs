//! Identifier and quantity newtypes.

use crate::impl_buf32_wrapper;

/// A 256-bit account public key.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Account(pub(crate) [u8; 32]);

impl_buf32_wrapper!(Account);

/// A 256-bit block digest.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BlockHash(pub(crate) [u8; 32]);

impl_buf32_wrapper!(BlockHash);

/// The value a block occupies for fork detection: `previous` for non-open
/// blocks, the account for blocks that begin a chain.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Root(pub(crate) [u8; 32]);

impl_buf32_wrapper!(Root);

impl From<Account> for Root {
    fn from(account: Account) -> Self {
        Root(account.0)
    }
}

impl From<BlockHash> for Root {
    fn from(hash: BlockHash) -> Self {
        Root(hash.0)
    }
}

/// The polymorphic `link` field of a state block: zero, a destination
/// account, a pending source hash, or an epoch marker.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Link(pub(crate) [u8; 32]);

impl_buf32_wrapper!(Link);

impl Link {
    pub fn as_account(&self) -> Account {
        Account(self.0)
    }

    pub fn as_block_hash(&self) -> BlockHash {
        BlockHash(self.0)
    }
}

impl From<Account> for Link {
    fn from(account: Account) -> Self {
        Link(account.0)
    }
}

impl From<BlockHash> for Link {
    fn from(hash: BlockHash) -> Self {
        Link(hash.0)
    }
}

/// `(root, previous)` pair identifying a chain position across all block
/// variants.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedRoot {
    pub root: Root,
    pub previous: BlockHash,
}

impl QualifiedRoot {
    pub fn new(root: Root, previous: BlockHash) -> Self {
        Self { root, previous }
    }
}

/// A 128-bit balance or voting weight.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const MAX: Amount = Amount(u128::MAX);

    pub const fn zero() -> Self {
        Amount(0)
    }

    pub const fn raw(value: u128) -> Self {
        Amount(value)
    }

    pub fn number(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn to_be_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Amount(u128::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 512-bit Ed25519 signature over a block hash.
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct Signature(pub(crate) [u8; 64]);

impl Signature {
    pub const fn zero() -> Self {
        Signature([0u8; 64])
    }

    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::zero()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self)
    }
}

/// A 64-bit proof-of-work nonce.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct WorkNonce(pub u64);

impl WorkNonce {
    pub fn number(&self) -> u64 {
        self.0
    }
}

impl From<u64> for WorkNonce {
    fn from(value: u64) -> Self {
        WorkNonce(value)
    }
}
