//! Transactional key/value storage for the ledger: typed tables, a
//! single-writer transaction model, and forward schema migration.

mod error;
mod iterator;
mod migrations;
mod schema;
mod store;
mod tables;
mod transaction;

pub use error::{StoreError, StoreResult};
pub use schema::Table;
pub use store::{Store, StoreOptions, VERSION_MAX, VERSION_MINIMUM};
pub use tables::CacheCount;
pub use transaction::{ReadTransaction, Savepoint, Txn, WriteTransaction};
