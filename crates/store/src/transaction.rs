//! Read and write transactions.
//!
//! Reads are served straight from the backing trees; sled's copy-on-write
//! pages give point-in-time reads without blocking the writer. A write
//! transaction buffers every mutation in an ordered per-table overlay and
//! applies the whole batch through one multi-tree backend transaction at
//! commit, so concurrent readers either see all of a committed batch or
//! none of it. The store-wide writer mutex enforces the single-writer rule.

use std::collections::BTreeMap;

use parking_lot::MutexGuard;

use crate::schema::Table;

/// Result of consulting a transaction's overlay for one key.
pub(crate) enum OverlayLookup {
    /// A buffered put.
    Put(Vec<u8>),
    /// A buffered delete, or the table was cleared in this transaction.
    Deleted,
    /// No buffered operation; fall through to the backing tree.
    Miss,
}

/// Common read surface of both transaction kinds.
pub trait Txn {
    #[doc(hidden)]
    fn overlay_lookup(&self, table: Table, key: &[u8]) -> OverlayLookup;

    #[doc(hidden)]
    fn overlay_state(&self, table: Table) -> Option<(&BTreeMap<Vec<u8>, Option<Vec<u8>>>, bool)>;
}

/// Concurrent snapshot-style read access.
///
/// The backend serves lock-free point-in-time reads, so the handle carries
/// no resources; `refresh` exists so long scans can signal a safe point to
/// re-acquire them under backends that need it.
#[derive(Debug, Default)]
pub struct ReadTransaction {
    _private: (),
}

impl ReadTransaction {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Releases and re-acquires the read snapshot.
    pub fn refresh(&mut self) {}
}

impl Txn for ReadTransaction {
    fn overlay_lookup(&self, _table: Table, _key: &[u8]) -> OverlayLookup {
        OverlayLookup::Miss
    }

    fn overlay_state(&self, _table: Table) -> Option<(&BTreeMap<Vec<u8>, Option<Vec<u8>>>, bool)> {
        None
    }
}

/// Exclusive buffered write access. Dropping without [`commit`] discards
/// every buffered operation.
///
/// [`commit`]: crate::Store::commit
pub struct WriteTransaction<'a> {
    pub(crate) _guard: MutexGuard<'a, ()>,
    pub(crate) tables: Vec<Table>,
    pub(crate) overlay: Vec<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    pub(crate) cleared: Vec<bool>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, ()>, tables: Vec<Table>) -> Self {
        Self {
            _guard: guard,
            tables,
            overlay: (0..Table::ALL.len()).map(|_| BTreeMap::new()).collect(),
            cleared: vec![false; Table::ALL.len()],
        }
    }

    fn assert_declared(&self, table: Table) {
        debug_assert!(
            self.tables.contains(&table),
            "table {table:?} was not declared by this write transaction"
        );
    }

    pub(crate) fn buffer_put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        self.assert_declared(table);
        self.overlay[table.index()].insert(key, Some(value));
    }

    pub(crate) fn buffer_delete(&mut self, table: Table, key: Vec<u8>) {
        self.assert_declared(table);
        self.overlay[table.index()].insert(key, None);
    }

    pub(crate) fn buffer_clear(&mut self, table: Table) {
        self.assert_declared(table);
        self.overlay[table.index()].clear();
        self.cleared[table.index()] = true;
    }

    /// Whether any operation is buffered against `table`.
    pub(crate) fn touches(&self, table: Table) -> bool {
        self.cleared[table.index()] || !self.overlay[table.index()].is_empty()
    }

    /// Captures the buffered state so a failed multi-step mutation can be
    /// undone without discarding the whole transaction.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            overlay: self.overlay.clone(),
            cleared: self.cleared.clone(),
        }
    }

    /// Rewinds the buffered state to `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.overlay = savepoint.overlay;
        self.cleared = savepoint.cleared;
    }
}

/// Buffered-state snapshot taken with [`WriteTransaction::savepoint`].
#[derive(Debug, Clone)]
pub struct Savepoint {
    overlay: Vec<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    cleared: Vec<bool>,
}

impl Txn for WriteTransaction<'_> {
    fn overlay_lookup(&self, table: Table, key: &[u8]) -> OverlayLookup {
        match self.overlay[table.index()].get(key) {
            Some(Some(value)) => OverlayLookup::Put(value.clone()),
            Some(None) => OverlayLookup::Deleted,
            None if self.cleared[table.index()] => OverlayLookup::Deleted,
            None => OverlayLookup::Miss,
        }
    }

    fn overlay_state(&self, table: Table) -> Option<(&BTreeMap<Vec<u8>, Option<Vec<u8>>>, bool)> {
        Some((&self.overlay[table.index()], self.cleared[table.index()]))
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}
