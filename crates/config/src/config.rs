//! Node configuration surface.
//!
//! Only options that change core behavior live here; transport, RPC and
//! wallet settings belong to their own components.

use std::time::Duration;

use ferrite_primitives::Amount;
use serde::{Deserialize, Serialize};

/// Whether the background frontier scanner drives confirmations for
/// uncemented accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontiersConfirmationMode {
    Always,
    Automatic,
    Disabled,
}

/// Selects the cementing walk implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationHeightMode {
    /// Pick per target by pending chain length.
    Automatic,
    Unbounded,
    Bounded,
}

/// Core node options with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub frontiers_confirmation: FrontiersConfirmationMode,
    /// Upper time bound of one block-processor batch, in milliseconds.
    pub block_processor_batch_max_time_ms: u64,
    /// Minimum interval between cementing batch writes, in milliseconds.
    pub conf_height_processor_batch_min_time_ms: u64,
    /// Age in seconds past which unchecked entries are purged.
    pub unchecked_cutoff_time_s: u64,
    /// Cap on accepted work as a multiple of the base difficulty.
    pub max_work_generate_multiplier: f64,
    /// Batching window for the vote generator, in milliseconds.
    pub vote_generator_delay_ms: u64,
    /// Minimum hashes before the delay window is extended.
    pub vote_generator_threshold: usize,
    /// Raw amount below which online weight samples are ignored.
    pub online_weight_minimum: String,
    /// Percent of online weight required for quorum (consumed externally).
    pub online_weight_quorum: u8,
    /// Raw amount below which wallets ignore receives (consumed externally).
    pub receive_minimum: String,
    /// Snapshot the database file before running schema upgrades.
    pub backup_before_upgrade: bool,
    /// Reuse small allocations inside the processors.
    pub use_memory_pools: bool,
    pub active_elections_size: usize,
    pub confirmation_history_size: usize,
    /// Cap on the wallet-priority frontier collection.
    pub max_priority_cementable_frontiers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            frontiers_confirmation: FrontiersConfirmationMode::Automatic,
            block_processor_batch_max_time_ms: 500,
            conf_height_processor_batch_min_time_ms: 50,
            unchecked_cutoff_time_s: 4 * 60 * 60,
            max_work_generate_multiplier: 64.0,
            vote_generator_delay_ms: 100,
            vote_generator_threshold: 3,
            online_weight_minimum: "60000000000000000000000000000000000".to_string(),
            online_weight_quorum: 50,
            receive_minimum: "1000000000000000000000000".to_string(),
            backup_before_upgrade: false,
            use_memory_pools: true,
            active_elections_size: 10_000,
            confirmation_history_size: 2_048,
            max_priority_cementable_frontiers: 100_000,
        }
    }
}

impl NodeConfig {
    pub fn block_processor_batch_max_time(&self) -> Duration {
        Duration::from_millis(self.block_processor_batch_max_time_ms)
    }

    pub fn conf_height_processor_batch_min_time(&self) -> Duration {
        Duration::from_millis(self.conf_height_processor_batch_min_time_ms)
    }

    pub fn unchecked_cutoff_time(&self) -> Duration {
        Duration::from_secs(self.unchecked_cutoff_time_s)
    }

    pub fn vote_generator_delay(&self) -> Duration {
        Duration::from_millis(self.vote_generator_delay_ms)
    }

    pub fn online_weight_minimum(&self) -> Amount {
        parse_amount(&self.online_weight_minimum)
    }

    pub fn receive_minimum(&self) -> Amount {
        parse_amount(&self.receive_minimum)
    }
}

fn parse_amount(raw: &str) -> Amount {
    raw.parse::<u128>().map(Amount::raw).unwrap_or_default()
}

/// Launch flags that tune queue sizes and optional behavior. Unlike
/// [`NodeConfig`] these are not persisted.
#[derive(Debug, Clone)]
pub struct NodeFlags {
    /// Minimum blocks applied per batch even past the time bound. Zero
    /// leaves the batch purely time-bound.
    pub block_processor_batch_size: usize,
    /// Queue depth at which the processor reports saturation.
    pub block_processor_full_size: usize,
    /// Signature batch size handed to each verification worker.
    pub block_processor_verification_size: usize,
    pub confirmation_height_processor_mode: ConfirmationHeightMode,
    /// Retain unchecked entries when their dependency arrives.
    pub disable_unchecked_deletion: bool,
    /// Skip the periodic unchecked age purge.
    pub disable_unchecked_cleanup: bool,
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self {
            block_processor_batch_size: 0,
            block_processor_full_size: 65_536,
            block_processor_verification_size: 0,
            confirmation_height_processor_mode: ConfirmationHeightMode::Automatic,
            disable_unchecked_deletion: false,
            disable_unchecked_cleanup: false,
        }
    }
}
