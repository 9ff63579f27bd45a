//! Block variants, sidebands, and store record types with their byte-exact
//! codecs.

mod block;
mod records;
mod sideband;
pub mod ser;

pub use block::{Block, BlockType, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock, StateBlock};
pub use records::{
    AccountInfo, ConfirmationHeightInfo, EndpointKey, PendingInfo, PendingKey,
    SignatureVerification, UncheckedInfo, UncheckedKey, Vote, VOTE_MAX_HASHES,
};
pub use sideband::{BlockDetails, BlockSideband};
