//! The five block variants and their uniform operations.

use ferrite_primitives::{
    sign_message, work_value, Account, Amount, BlockHash, BlockHasher, Keypair, Link,
    QualifiedRoot, Root, Signature, WorkNonce,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ser::{Reader, WireError};

/// On-wire and on-disk block type tag.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum BlockType {
    Send = 2,
    Receive = 3,
    Open = 4,
    Change = 5,
    State = 6,
}

impl BlockType {
    pub fn from_tag(value: u8) -> Result<Self, WireError> {
        BlockType::try_from(value).map_err(|_| WireError::InvalidTag {
            field: "block type",
            value,
        })
    }
}

/// Starts an account chain by receiving a pending send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBlock {
    pub account: Account,
    pub representative: Account,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Debits the sender and creates a pending entry for the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Consumes a pending entry on an existing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Rebinds the account's representative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Universal block: the balance delta and link field encode whether it
/// sends, receives, changes the representative, or upgrades the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Link,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Hash-domain preamble distinguishing state blocks from legacy layouts.
const STATE_HASH_PREAMBLE: [u8; 32] = {
    let mut preamble = [0u8; 32];
    preamble[31] = BlockType::State as u8;
    preamble
};

impl OpenBlock {
    pub fn new(source: BlockHash, representative: Account, key: &Keypair, work: WorkNonce) -> Self {
        let mut block = Self {
            account: key.account(),
            representative,
            source,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(key.private_key(), block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        let mut hasher = BlockHasher::new();
        hasher
            .update(self.account.as_bytes())
            .update(self.representative.as_bytes())
            .update(self.source.as_bytes());
        hasher.finish()
    }
}

impl SendBlock {
    pub fn new(
        previous: BlockHash,
        destination: Account,
        balance: Amount,
        key: &Keypair,
        work: WorkNonce,
    ) -> Self {
        let mut block = Self {
            previous,
            destination,
            balance,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(key.private_key(), block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        let mut hasher = BlockHasher::new();
        hasher
            .update(self.previous.as_bytes())
            .update(self.destination.as_bytes())
            .update(&self.balance.to_be_bytes());
        hasher.finish()
    }
}

impl ReceiveBlock {
    pub fn new(previous: BlockHash, source: BlockHash, key: &Keypair, work: WorkNonce) -> Self {
        let mut block = Self {
            previous,
            source,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(key.private_key(), block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        let mut hasher = BlockHasher::new();
        hasher
            .update(self.previous.as_bytes())
            .update(self.source.as_bytes());
        hasher.finish()
    }
}

impl ChangeBlock {
    pub fn new(
        previous: BlockHash,
        representative: Account,
        key: &Keypair,
        work: WorkNonce,
    ) -> Self {
        let mut block = Self {
            previous,
            representative,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(key.private_key(), block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        let mut hasher = BlockHasher::new();
        hasher
            .update(self.previous.as_bytes())
            .update(self.representative.as_bytes());
        hasher.finish()
    }
}

impl StateBlock {
    /// Builds and signs a state block. Epoch upgrades pass the epoch
    /// signer's keypair and the upgraded account separately.
    #[allow(clippy::too_many_arguments, reason = "mirrors the block hashables")]
    pub fn new(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
        signer: &Keypair,
        work: WorkNonce,
    ) -> Self {
        let mut block = Self {
            account,
            previous,
            representative,
            balance,
            link,
            signature: Signature::zero(),
            work,
        };
        block.signature = sign_message(signer.private_key(), block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        let mut hasher = BlockHasher::new();
        hasher
            .update(&STATE_HASH_PREAMBLE)
            .update(self.account.as_bytes())
            .update(self.previous.as_bytes())
            .update(self.representative.as_bytes())
            .update(&self.balance.to_be_bytes())
            .update(self.link.as_bytes());
        hasher.finish()
    }
}

/// A block of any variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Send(_) => BlockType::Send,
            Block::Receive(_) => BlockType::Receive,
            Block::Open(_) => BlockType::Open,
            Block::Change(_) => BlockType::Change,
            Block::State(_) => BlockType::State,
        }
    }

    pub fn hash(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.hash(),
            Block::Receive(b) => b.hash(),
            Block::Open(b) => b.hash(),
            Block::Change(b) => b.hash(),
            Block::State(b) => b.hash(),
        }
    }

    /// Zero for blocks that begin a chain.
    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Open(_) => BlockHash::zero(),
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
        }
    }

    /// The fork-detection root: `previous`, or the account for blocks that
    /// begin a chain.
    pub fn root(&self) -> Root {
        match self {
            Block::Open(b) => b.account.into(),
            Block::State(b) if b.previous.is_zero() => b.account.into(),
            _ => self.previous().into(),
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    /// The receive source for legacy variants. State-block sources are
    /// resolved by the ledger from the link and balance delta.
    pub fn source(&self) -> Option<BlockHash> {
        match self {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            _ => None,
        }
    }

    pub fn destination(&self) -> Option<Account> {
        match self {
            Block::Send(b) => Some(b.destination),
            _ => None,
        }
    }

    pub fn link(&self) -> Link {
        match self {
            Block::State(b) => b.link,
            _ => Link::zero(),
        }
    }

    pub fn representative(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.representative),
            Block::Change(b) => Some(b.representative),
            Block::State(b) => Some(b.representative),
            _ => None,
        }
    }

    /// The account field, where the variant carries one.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.account),
            Block::State(b) => Some(b.account),
            _ => None,
        }
    }

    /// The balance field, where the variant carries one.
    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Block::Send(b) => Some(b.balance),
            Block::State(b) => Some(b.balance),
            _ => None,
        }
    }

    pub fn work(&self) -> WorkNonce {
        match self {
            Block::Send(b) => b.work,
            Block::Receive(b) => b.work,
            Block::Open(b) => b.work,
            Block::Change(b) => b.work,
            Block::State(b) => b.work,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Block::Send(b) => &b.signature,
            Block::Receive(b) => &b.signature,
            Block::Open(b) => &b.signature,
            Block::Change(b) => &b.signature,
            Block::State(b) => &b.signature,
        }
    }

    pub fn difficulty(&self) -> u64 {
        work_value(&self.root(), self.work())
    }

    /// Whether a block of this variant may follow one of type `previous`.
    /// Legacy variants may not extend a state-block head.
    pub fn valid_predecessor(&self, previous: BlockType) -> bool {
        match self.block_type() {
            BlockType::Open => false,
            BlockType::State => true,
            _ => previous != BlockType::State,
        }
    }

    /// Serializes the hashables, signature and work, without the type tag.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Block::Send(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.destination.as_bytes());
                out.extend_from_slice(&b.balance.to_be_bytes());
            }
            Block::Receive(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.source.as_bytes());
            }
            Block::Open(b) => {
                out.extend_from_slice(b.account.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(b.source.as_bytes());
            }
            Block::Change(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
            }
            Block::State(b) => {
                out.extend_from_slice(b.account.as_bytes());
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(&b.balance.to_be_bytes());
                out.extend_from_slice(b.link.as_bytes());
            }
        }
        out.extend_from_slice(self.signature().as_bytes());
        out.extend_from_slice(&self.work().number().to_be_bytes());
    }

    /// Serializes with a leading type tag.
    pub fn serialize_with_type(&self, out: &mut Vec<u8>) {
        out.push(self.block_type() as u8);
        self.serialize(out);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_with_type(&mut out);
        out
    }

    pub fn deserialize(reader: &mut Reader<'_>, block_type: BlockType) -> Result<Self, WireError> {
        let block = match block_type {
            BlockType::Send => {
                let previous = BlockHash::from_bytes(reader.read_array()?);
                let destination = Account::from_bytes(reader.read_array()?);
                let balance = Amount::from_be_bytes(reader.read_array()?);
                let (signature, work) = read_suffix(reader)?;
                Block::Send(SendBlock {
                    previous,
                    destination,
                    balance,
                    signature,
                    work,
                })
            }
            BlockType::Receive => {
                let previous = BlockHash::from_bytes(reader.read_array()?);
                let source = BlockHash::from_bytes(reader.read_array()?);
                let (signature, work) = read_suffix(reader)?;
                Block::Receive(ReceiveBlock {
                    previous,
                    source,
                    signature,
                    work,
                })
            }
            BlockType::Open => {
                let account = Account::from_bytes(reader.read_array()?);
                let representative = Account::from_bytes(reader.read_array()?);
                let source = BlockHash::from_bytes(reader.read_array()?);
                let (signature, work) = read_suffix(reader)?;
                Block::Open(OpenBlock {
                    account,
                    representative,
                    source,
                    signature,
                    work,
                })
            }
            BlockType::Change => {
                let previous = BlockHash::from_bytes(reader.read_array()?);
                let representative = Account::from_bytes(reader.read_array()?);
                let (signature, work) = read_suffix(reader)?;
                Block::Change(ChangeBlock {
                    previous,
                    representative,
                    signature,
                    work,
                })
            }
            BlockType::State => {
                let account = Account::from_bytes(reader.read_array()?);
                let previous = BlockHash::from_bytes(reader.read_array()?);
                let representative = Account::from_bytes(reader.read_array()?);
                let balance = Amount::from_be_bytes(reader.read_array()?);
                let link = Link::from_bytes(reader.read_array()?);
                let (signature, work) = read_suffix(reader)?;
                Block::State(StateBlock {
                    account,
                    previous,
                    representative,
                    balance,
                    link,
                    signature,
                    work,
                })
            }
        };
        Ok(block)
    }

    /// Reads a type tag followed by the block body.
    pub fn deserialize_with_type(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let block_type = BlockType::from_tag(reader.read_u8()?)?;
        Self::deserialize(reader, block_type)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let block = Self::deserialize_with_type(&mut reader)?;
        reader.finish()?;
        Ok(block)
    }
}

fn read_suffix(reader: &mut Reader<'_>) -> Result<(Signature, WorkNonce), WireError> {
    let signature = Signature::from_bytes(reader.read_array()?);
    let work = WorkNonce(reader.read_u64_be()?);
    Ok((signature, work))
}

#[cfg(test)]
mod tests {
    use ferrite_primitives::validate_message;

    use super::*;

    fn key() -> Keypair {
        Keypair::from_seed([3u8; 32])
    }

    #[test]
    fn constructors_sign_the_hash() {
        let send = SendBlock::new(
            BlockHash::from_bytes([1u8; 32]),
            Account::from_bytes([2u8; 32]),
            Amount::raw(50),
            &key(),
            WorkNonce(7),
        );
        assert!(validate_message(&key().account(), send.hash().as_bytes(), &send.signature).is_ok());
    }

    #[test]
    fn wire_round_trip_all_variants() {
        let k = key();
        let blocks = vec![
            Block::Send(SendBlock::new(
                BlockHash::from_bytes([1u8; 32]),
                Account::from_bytes([2u8; 32]),
                Amount::raw(10),
                &k,
                WorkNonce(1),
            )),
            Block::Receive(ReceiveBlock::new(
                BlockHash::from_bytes([3u8; 32]),
                BlockHash::from_bytes([4u8; 32]),
                &k,
                WorkNonce(2),
            )),
            Block::Open(OpenBlock::new(
                BlockHash::from_bytes([5u8; 32]),
                Account::from_bytes([6u8; 32]),
                &k,
                WorkNonce(3),
            )),
            Block::Change(ChangeBlock::new(
                BlockHash::from_bytes([7u8; 32]),
                Account::from_bytes([8u8; 32]),
                &k,
                WorkNonce(4),
            )),
            Block::State(StateBlock::new(
                k.account(),
                BlockHash::from_bytes([9u8; 32]),
                Account::from_bytes([10u8; 32]),
                Amount::raw(11),
                Link::from_bytes([12u8; 32]),
                &k,
                WorkNonce(5),
            )),
        ];
        for block in blocks {
            let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
            assert_eq!(decoded, block);
            assert_eq!(decoded.hash(), block.hash());
        }
    }

    #[test]
    fn root_selection() {
        let k = key();
        let open = Block::Open(OpenBlock::new(
            BlockHash::from_bytes([5u8; 32]),
            k.account(),
            &k,
            WorkNonce(0),
        ));
        assert_eq!(open.root(), k.account().into());

        let state_open = Block::State(StateBlock::new(
            k.account(),
            BlockHash::zero(),
            k.account(),
            Amount::raw(1),
            Link::from_bytes([1u8; 32]),
            &k,
            WorkNonce(0),
        ));
        assert_eq!(state_open.root(), k.account().into());

        let send = Block::Send(SendBlock::new(
            BlockHash::from_bytes([1u8; 32]),
            k.account(),
            Amount::zero(),
            &k,
            WorkNonce(0),
        ));
        assert_eq!(send.root(), BlockHash::from_bytes([1u8; 32]).into());
    }

    #[test]
    fn legacy_cannot_follow_state() {
        let k = key();
        let send = Block::Send(SendBlock::new(
            BlockHash::from_bytes([1u8; 32]),
            k.account(),
            Amount::zero(),
            &k,
            WorkNonce(0),
        ));
        assert!(send.valid_predecessor(BlockType::Send));
        assert!(send.valid_predecessor(BlockType::Open));
        assert!(!send.valid_predecessor(BlockType::State));
        let state = Block::State(StateBlock::new(
            k.account(),
            BlockHash::from_bytes([1u8; 32]),
            k.account(),
            Amount::zero(),
            Link::zero(),
            &k,
            WorkNonce(0),
        ));
        assert!(state.valid_predecessor(BlockType::State));
        assert!(state.valid_predecessor(BlockType::Send));
    }

    #[test]
    fn hashes_are_variant_distinct() {
        let k = key();
        // A change block and a zero-link state block share no hash even when
        // their overlapping fields coincide.
        let change = Block::Change(ChangeBlock::new(
            BlockHash::from_bytes([1u8; 32]),
            k.account(),
            &k,
            WorkNonce(0),
        ));
        let state = Block::State(StateBlock::new(
            k.account(),
            BlockHash::from_bytes([1u8; 32]),
            k.account(),
            Amount::zero(),
            Link::zero(),
            &k,
            WorkNonce(0),
        ));
        assert_ne!(change.hash(), state.hash());
    }
}
