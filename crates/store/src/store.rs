//! The transactional block store.

use std::path::{Path, PathBuf};

use ferrite_primitives::Epochs;
use parking_lot::Mutex;
use sled::transaction::TransactionError;
use sled::Transactional;
use tracing::info;

use crate::{
    error::{StoreError, StoreResult},
    iterator::RawIter,
    migrations,
    schema::Table,
    transaction::{OverlayLookup, ReadTransaction, Txn, WriteTransaction},
};

/// Newest schema this build reads and writes.
pub const VERSION_MAX: u64 = 18;
/// Oldest schema the upgrade chain can start from.
pub const VERSION_MINIMUM: u64 = 2;

const VERSION_KEY: &[u8] = b"version";

/// Options affecting store opening.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Snapshot the database directory before running schema upgrades.
    pub backup_before_upgrade: bool,
    /// Epoch registry, needed to rebuild block details during upgrade.
    pub epochs: Epochs,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            backup_before_upgrade: false,
            epochs: Epochs::new(),
        }
    }
}

/// Ordered key/value tables with single-writer transactions.
pub struct Store {
    pub(crate) db: sled::Db,
    pub(crate) trees: Vec<sled::Tree>,
    write_lock: Mutex<()>,
    path: PathBuf,
}

impl Store {
    /// Opens or creates the store under `path` and brings the schema up to
    /// [`VERSION_MAX`].
    pub fn open(path: &Path, options: &StoreOptions) -> StoreResult<Self> {
        let db_path = path.join("data.ferrite");
        let db = sled::Config::new()
            .path(&db_path)
            .open()
            .map_err(|e| StoreError::Init(format!("{}: {e}", db_path.display())))?;
        let mut trees = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            trees.push(db.open_tree(table.tree_name())?);
        }
        let store = Self {
            db,
            trees,
            write_lock: Mutex::new(()),
            path: path.to_path_buf(),
        };

        match store.version_get(&store.tx_begin_read()) {
            None => {
                // Fresh database; stamp the current schema.
                let mut txn = store.tx_begin_write(vec![Table::Meta]);
                store.version_put(&mut txn, VERSION_MAX);
                store.commit(txn)?;
            }
            Some(version) if version > VERSION_MAX => {
                return Err(StoreError::IncompatibleVersion {
                    version,
                    max: VERSION_MAX,
                });
            }
            Some(version) if version < VERSION_MAX => {
                if options.backup_before_upgrade {
                    store.backup()?;
                }
                info!(from = version, to = VERSION_MAX, "upgrading database schema");
                migrations::run(&store, options)?;
            }
            Some(_) => {}
        }
        Ok(store)
    }

    /// Copies the database directory to a timestamped sibling.
    fn backup(&self) -> StoreResult<()> {
        self.db.flush()?;
        let stamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let target = self.path.join(format!("data_backup_{stamp}.ferrite"));
        copy_dir(&self.path.join("data.ferrite"), &target)?;
        info!(target = %target.display(), "database backed up before upgrade");
        Ok(())
    }

    pub fn tx_begin_read(&self) -> ReadTransaction {
        ReadTransaction::new()
    }

    /// Begins the store's single write transaction, declaring the tables it
    /// may modify. Blocks while another writer is active.
    pub fn tx_begin_write(&self, tables: Vec<Table>) -> WriteTransaction<'_> {
        WriteTransaction::new(self.write_lock.lock(), tables)
    }

    /// Applies every buffered operation atomically and flushes the backend.
    pub fn commit(&self, txn: WriteTransaction<'_>) -> StoreResult<()> {
        let touched: Vec<Table> = Table::ALL
            .iter()
            .copied()
            .filter(|table| txn.touches(*table))
            .collect();
        if touched.is_empty() {
            return Ok(());
        }

        // Keys of cleared tables must be enumerated up front; the backend
        // transaction only supports point operations.
        let mut clear_keys: Vec<Vec<Vec<u8>>> = Vec::with_capacity(touched.len());
        for table in &touched {
            if txn.cleared[table.index()] {
                let keys = self.trees[table.index()]
                    .iter()
                    .keys()
                    .collect::<sled::Result<Vec<_>>>()?
                    .into_iter()
                    .map(|k| k.to_vec())
                    .collect();
                clear_keys.push(keys);
            } else {
                clear_keys.push(Vec::new());
            }
        }

        let trees: Vec<&sled::Tree> = touched.iter().map(|t| &self.trees[t.index()]).collect();
        trees
            .transaction(|txn_trees| {
                for (i, table) in touched.iter().enumerate() {
                    let tree = &txn_trees[i];
                    for key in &clear_keys[i] {
                        tree.remove(key.as_slice())?;
                    }
                    for (key, op) in &txn.overlay[table.index()] {
                        match op {
                            Some(value) => {
                                tree.insert(key.as_slice(), value.as_slice())?;
                            }
                            None => {
                                tree.remove(key.as_slice())?;
                            }
                        }
                    }
                }
                Ok(())
            })
            .map_err(|error: TransactionError<()>| match error {
                TransactionError::Abort(()) => unreachable!("commit closure never aborts"),
                TransactionError::Storage(e) => StoreError::Backend(e),
            })?;
        self.db.flush()?;
        Ok(())
    }

    // Raw byte-level operations. Backend failures here mean the database is
    // unusable; per the error policy they are fatal rather than propagated
    // into every ledger call site.

    pub(crate) fn raw_get(&self, txn: &dyn Txn, table: Table, key: &[u8]) -> Option<Vec<u8>> {
        match txn.overlay_lookup(table, key) {
            OverlayLookup::Put(value) => Some(value),
            OverlayLookup::Deleted => None,
            OverlayLookup::Miss => self.trees[table.index()]
                .get(key)
                .unwrap_or_else(|e| panic!("database read failed: {e}"))
                .map(|v| v.to_vec()),
        }
    }

    pub(crate) fn raw_exists(&self, txn: &dyn Txn, table: Table, key: &[u8]) -> bool {
        self.raw_get(txn, table, key).is_some()
    }

    pub(crate) fn raw_put(
        &self,
        txn: &mut WriteTransaction<'_>,
        table: Table,
        key: &[u8],
        value: Vec<u8>,
    ) {
        txn.buffer_put(table, key.to_vec(), value);
    }

    pub(crate) fn raw_del(&self, txn: &mut WriteTransaction<'_>, table: Table, key: &[u8]) {
        txn.buffer_delete(table, key.to_vec());
    }

    pub(crate) fn raw_clear(&self, txn: &mut WriteTransaction<'_>, table: Table) {
        txn.buffer_clear(table);
    }

    /// Forward iteration from the first key `>= start`.
    pub(crate) fn raw_iter_from(&self, txn: &dyn Txn, table: Table, start: &[u8]) -> RawIter {
        let (overlay, cleared) = match txn.overlay_state(table) {
            Some((map, cleared)) => {
                let entries = map
                    .range::<[u8], _>((
                        std::ops::Bound::Included(start),
                        std::ops::Bound::Unbounded,
                    ))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (entries, cleared)
            }
            None => (Vec::new(), false),
        };
        let backing: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> = if cleared
        {
            Box::new(std::iter::empty())
        } else {
            Box::new(self.trees[table.index()].range(start.to_vec()..))
        };
        RawIter::new(overlay, backing, false)
    }

    /// Reverse iteration from the last key.
    pub(crate) fn raw_iter_rev(&self, txn: &dyn Txn, table: Table) -> RawIter {
        let (mut overlay, cleared) = match txn.overlay_state(table) {
            Some((map, cleared)) => (
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>(),
                cleared,
            ),
            None => (Vec::new(), false),
        };
        overlay.reverse();
        let backing: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> = if cleared
        {
            Box::new(std::iter::empty())
        } else {
            Box::new(self.trees[table.index()].iter().rev())
        };
        RawIter::new(overlay, backing, true)
    }

    pub(crate) fn raw_count(&self, txn: &dyn Txn, table: Table) -> u64 {
        self.raw_iter_from(txn, table, &[]).count() as u64
    }

    // Schema version.

    pub fn version_get(&self, txn: &dyn Txn) -> Option<u64> {
        self.raw_get(txn, Table::Meta, VERSION_KEY)
            .map(|bytes| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                u64::from_be_bytes(buf)
            })
    }

    pub fn version_put(&self, txn: &mut WriteTransaction<'_>, version: u64) {
        self.raw_put(txn, Table::Meta, VERSION_KEY, version.to_be_bytes().to_vec());
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
