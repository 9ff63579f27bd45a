//! The confirmation pipeline: write scheduling, batched signature
//! verification, single-writer block processing, cementing, and local
//! votes.

mod block_processor;
mod cleanup;
mod conf_height;
mod filters;
mod frontier_scan;
mod observers;
mod signature_checker;
mod state_block_signature_verification;
mod vote_generator;
mod write_queue;

pub use block_processor::BlockProcessor;
pub use cleanup::UncheckedCleanup;
pub use conf_height::{
    ConfirmationHeightProcessor, DEFAULT_BATCH_WRITE_SIZE, UNBOUNDED_CUTOFF,
};
pub use filters::{BlockArrival, GapCache};
pub use frontier_scan::{FrontierScan, PrioritizedFrontier};
pub use observers::{BlockPostEvents, CallbackList};
pub use signature_checker::{SignatureCheckSet, SignatureChecker};
pub use state_block_signature_verification::StateBlockSignatureVerification;
pub use vote_generator::{VoteGenerator, VotesCache};
pub use write_queue::{WriteGuard, WriteQueue, Writer};
