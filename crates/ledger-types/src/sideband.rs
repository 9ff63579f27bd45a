//! Derived per-block metadata stored alongside block bytes.

use ferrite_primitives::{Account, Amount, BlockHash, Epoch};

use crate::{
    block::{Block, BlockType},
    ser::{Reader, WireError},
};

/// Classification of an applied block, packed into one byte on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockDetails {
    pub epoch: Epoch,
    pub is_send: bool,
    pub is_receive: bool,
    pub is_epoch: bool,
}

const DETAILS_SEND_FLAG: u8 = 1 << 5;
const DETAILS_RECEIVE_FLAG: u8 = 1 << 6;
const DETAILS_EPOCH_FLAG: u8 = 1 << 7;

impl BlockDetails {
    pub fn new(epoch: Epoch, is_send: bool, is_receive: bool, is_epoch: bool) -> Self {
        debug_assert!(
            u8::from(is_send) + u8::from(is_receive) + u8::from(is_epoch) <= 1,
            "at most one operation flag may be set"
        );
        Self {
            epoch,
            is_send,
            is_receive,
            is_epoch,
        }
    }

    pub fn packed(&self) -> u8 {
        let mut byte = u8::from(self.epoch);
        if self.is_send {
            byte |= DETAILS_SEND_FLAG;
        }
        if self.is_receive {
            byte |= DETAILS_RECEIVE_FLAG;
        }
        if self.is_epoch {
            byte |= DETAILS_EPOCH_FLAG;
        }
        byte
    }

    pub fn unpack(byte: u8) -> Result<Self, WireError> {
        let epoch_bits = byte & 0x1f;
        let epoch = Epoch::try_from(epoch_bits).map_err(|_| WireError::InvalidTag {
            field: "epoch",
            value: epoch_bits,
        })?;
        Ok(Self {
            epoch,
            is_send: byte & DETAILS_SEND_FLAG != 0,
            is_receive: byte & DETAILS_RECEIVE_FLAG != 0,
            is_epoch: byte & DETAILS_EPOCH_FLAG != 0,
        })
    }
}

/// Metadata recomputed on application and persisted next to the block.
///
/// Fields a block variant carries itself are elided from the stored layout
/// and restored from the block on load; see [`BlockSideband::serialize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSideband {
    /// Resolved signer of the chain (epoch blocks excepted).
    pub account: Account,
    /// Next block on the same chain, or zero at the frontier.
    pub successor: BlockHash,
    /// Balance after applying the block.
    pub balance: Amount,
    /// 1-based chain position.
    pub height: u64,
    /// Seconds since the Unix epoch at application time.
    pub timestamp: u64,
    pub details: BlockDetails,
}

impl BlockSideband {
    pub fn new(
        account: Account,
        successor: BlockHash,
        balance: Amount,
        height: u64,
        timestamp: u64,
        details: BlockDetails,
    ) -> Self {
        Self {
            account,
            successor,
            balance,
            height,
            timestamp,
            details,
        }
    }

    fn stores_account(block_type: BlockType) -> bool {
        // Open and state blocks carry the account themselves.
        !matches!(block_type, BlockType::Open | BlockType::State)
    }

    fn stores_height(block_type: BlockType) -> bool {
        // Open blocks are always at height one.
        block_type != BlockType::Open
    }

    fn stores_balance(block_type: BlockType) -> bool {
        // Send and state blocks carry the post-balance themselves.
        !matches!(block_type, BlockType::Send | BlockType::State)
    }

    pub fn serialized_size(block_type: BlockType) -> usize {
        let mut size = 32 + 8; // successor + timestamp
        if Self::stores_account(block_type) {
            size += 32;
        }
        if Self::stores_height(block_type) {
            size += 8;
        }
        if Self::stores_balance(block_type) {
            size += 16;
        }
        if block_type == BlockType::State {
            size += 1; // details
        }
        size
    }

    pub fn serialize(&self, out: &mut Vec<u8>, block_type: BlockType) {
        out.extend_from_slice(self.successor.as_bytes());
        if Self::stores_account(block_type) {
            out.extend_from_slice(self.account.as_bytes());
        }
        if Self::stores_height(block_type) {
            out.extend_from_slice(&self.height.to_be_bytes());
        }
        if Self::stores_balance(block_type) {
            out.extend_from_slice(&self.balance.to_be_bytes());
        }
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        if block_type == BlockType::State {
            out.push(self.details.packed());
        }
    }

    /// Decodes the stored layout. Elided fields come back zeroed; use
    /// [`BlockSideband::restore`] to repopulate them from the block.
    pub fn deserialize(reader: &mut Reader<'_>, block_type: BlockType) -> Result<Self, WireError> {
        let successor = BlockHash::from_bytes(reader.read_array()?);
        let account = if Self::stores_account(block_type) {
            Account::from_bytes(reader.read_array()?)
        } else {
            Account::zero()
        };
        let height = if Self::stores_height(block_type) {
            reader.read_u64_be()?
        } else {
            1
        };
        let balance = if Self::stores_balance(block_type) {
            Amount::from_be_bytes(reader.read_array()?)
        } else {
            Amount::zero()
        };
        let timestamp = reader.read_u64_be()?;
        let details = if block_type == BlockType::State {
            BlockDetails::unpack(reader.read_u8()?)?
        } else {
            // Legacy chains live entirely in the first epoch; the operation
            // flags follow from the block type.
            BlockDetails::new(
                Epoch::Epoch0,
                block_type == BlockType::Send,
                matches!(block_type, BlockType::Receive | BlockType::Open),
                false,
            )
        };
        Ok(Self {
            account,
            successor,
            balance,
            height,
            timestamp,
            details,
        })
    }

    /// Fills fields elided from the stored layout back in from the block.
    pub fn restore(&mut self, block: &Block) {
        if let Some(account) = block.account_field() {
            self.account = account;
        }
        if let Some(balance) = block.balance_field() {
            self.balance = balance;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn details_pack_round_trip() {
        let cases = [
            BlockDetails::new(Epoch::Epoch0, true, false, false),
            BlockDetails::new(Epoch::Epoch1, false, true, false),
            BlockDetails::new(Epoch::Epoch2, false, false, true),
            BlockDetails::new(Epoch::Unspecified, false, false, false),
        ];
        for details in cases {
            assert_eq!(BlockDetails::unpack(details.packed()).unwrap(), details);
        }
    }

    #[test]
    fn receive_layout_keeps_every_field() {
        let sideband = BlockSideband::new(
            Account::from_bytes([1u8; 32]),
            BlockHash::from_bytes([4u8; 32]),
            Amount::raw(2),
            3,
            5,
            BlockDetails::new(Epoch::Epoch0, false, true, false),
        );
        let mut bytes = Vec::new();
        sideband.serialize(&mut bytes, BlockType::Receive);
        assert_eq!(bytes.len(), BlockSideband::serialized_size(BlockType::Receive));
        let decoded =
            BlockSideband::deserialize(&mut Reader::new(&bytes), BlockType::Receive).unwrap();
        assert_eq!(decoded, sideband);
    }

    #[test]
    fn open_layout_implies_height_one() {
        let sideband = BlockSideband::new(
            Account::zero(),
            BlockHash::zero(),
            Amount::raw(9),
            1,
            7,
            BlockDetails::new(Epoch::Epoch0, false, true, false),
        );
        let mut bytes = Vec::new();
        sideband.serialize(&mut bytes, BlockType::Open);
        let decoded = BlockSideband::deserialize(&mut Reader::new(&bytes), BlockType::Open).unwrap();
        assert_eq!(decoded.height, 1);
        assert_eq!(decoded.balance, sideband.balance);
    }

    proptest! {
        #[test]
        fn sideband_round_trips_per_type(
            account in any::<[u8; 32]>(),
            successor in any::<[u8; 32]>(),
            balance in any::<u128>(),
            height in 1u64..u64::MAX,
            timestamp in any::<u64>(),
            epoch_byte in 1u8..=3,
            flag in 0usize..4,
            type_byte in 2u8..=6,
        ) {
            let block_type = BlockType::from_tag(type_byte).unwrap();
            let epoch = Epoch::try_from(epoch_byte).unwrap();
            let details = BlockDetails::new(epoch, flag == 1, flag == 2, flag == 3);
            let sideband = BlockSideband::new(
                Account::from_bytes(account),
                BlockHash::from_bytes(successor),
                Amount::raw(balance),
                height,
                timestamp,
                details,
            );
            let mut bytes = Vec::new();
            sideband.serialize(&mut bytes, block_type);
            prop_assert_eq!(bytes.len(), BlockSideband::serialized_size(block_type));
            let decoded = BlockSideband::deserialize(&mut Reader::new(&bytes), block_type).unwrap();
            // Elided fields are derivable; the stored ones must survive.
            prop_assert_eq!(decoded.successor, sideband.successor);
            prop_assert_eq!(decoded.timestamp, sideband.timestamp);
            if block_type != BlockType::Open {
                prop_assert_eq!(decoded.height, sideband.height);
            }
            if block_type == BlockType::State {
                prop_assert_eq!(decoded.details, sideband.details);
            }
        }
    }
}
