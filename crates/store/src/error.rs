//! Store failure domain.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database cannot be created or opened at the given path.
    #[error("store initialization failed: {0}")]
    Init(String),

    /// The on-disk schema is newer than this build supports.
    #[error("database version {version} is newer than the supported maximum {max}")]
    IncompatibleVersion { version: u64, max: u64 },

    /// A stored value failed to decode.
    #[error("corrupt {context} record: {source}")]
    Corruption {
        context: &'static str,
        source: ferrite_ledger_types::ser::WireError,
    },

    /// Backend failure surfaced by sled.
    #[error("database backend: {0}")]
    Backend(#[from] sled::Error),

    /// Filesystem failure outside the backend, e.g. during backup.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn corruption(
        context: &'static str,
    ) -> impl FnOnce(ferrite_ledger_types::ser::WireError) -> StoreError {
        move |source| StoreError::Corruption { context, source }
    }
}
