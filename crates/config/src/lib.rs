//! Node configuration and network constants.

mod config;
mod params;

pub use config::{ConfirmationHeightMode, FrontiersConfirmationMode, NodeConfig, NodeFlags};
pub use params::{LedgerConstants, DEV_GENESIS_SEED};
