//! TinyDB: embedded single-file relational storage core.
//!
//! A single-file database engine providing:
//! - slotted 4 KiB pages behind a write-through LRU pager
//! - a redo-only write-ahead log with crash recovery
//! - per-table B-trees keyed by the primary key, with range scans
//! - a persistent catalog (tables, columns, indexes, autoincrement)
//! - single-writer transactions, implicit or explicit
//!
//! SQL parsing, query execution and presentation are external layers; they
//! drive this crate through the typed [`Database`] API.

pub mod btree;
pub mod catalog;
pub mod error;
pub mod lock;
pub mod record;
pub mod storage;
pub mod tx;
pub mod types;
pub mod wal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::btree::cursor::RangeCursor;
use crate::btree::key_encoding::encode_key;
use crate::btree::ops::BTree;
use crate::catalog::{Catalog, IndexDef, TableDef};
use crate::lock::LockFile;
use crate::record::{decode_row, encode_row};
use crate::storage::page::PageNo;
use crate::storage::page_store::PageStore;
use crate::storage::pager::Pager;
use crate::tx::page_store::TxPageStore;
use crate::tx::transaction::{PendingCheck, Transaction, TxState};
use crate::wal::record::{Lsn, TxId};
use crate::wal::writer::WalWriter;

pub use crate::catalog::{ColumnDef, ForeignKey};
pub use crate::error::{Result, TinyError};
pub use crate::types::{DataType, Value};

/// Table description handed to [`Database::create_table`]. An empty
/// `primary_key` list derives the key from the columns flagged as such.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        TableSchema {
            name: name.to_string(),
            columns,
            primary_key: Vec::new(),
        }
    }

    /// Declare a composite primary key at table level.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Index description handed to [`Database::create_index`].
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSchema {
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        IndexSchema {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Schema-change operations for [`Database::alter_table`].
#[derive(Debug, Clone)]
pub enum AlterTableOp {
    Rename { table: String, new_name: String },
    AddColumn { table: String, column: ColumnDef },
    DropColumn { table: String, column: String },
}

fn wal_path(db_path: &Path) -> PathBuf {
    db_path.with_extension("wal")
}

/// Main database handle. Owns the file, WAL, catalog and lock; all state
/// lives here, never in process-wide caches.
pub struct Database {
    pager: Pager,
    catalog: Catalog,
    wal: WalWriter,
    _lock: LockFile,
    db_path: PathBuf,
    active_tx: Option<Transaction>,
    next_txid: TxId,
    last_commit_lsn: Option<Lsn>,
    commits_since_checkpoint: u32,
    checkpoint_every: u32,
    poisoned: Option<String>,
}

impl Database {
    /// Create a new database at `path`. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        let lock = LockFile::acquire(path)?;
        let pager = Pager::create(path)?;
        let wal = WalWriter::create(&wal_path(path), pager.checkpoint_lsn())?;
        let next_txid = pager.next_txid();

        Ok(Database {
            pager,
            catalog: Catalog::new(),
            wal,
            _lock: lock,
            db_path: path.to_path_buf(),
            active_tx: None,
            next_txid,
            last_commit_lsn: None,
            commits_since_checkpoint: 0,
            checkpoint_every: 1,
            poisoned: None,
        })
    }

    /// Open an existing database, running WAL recovery first.
    pub fn open(path: &Path) -> Result<Self> {
        let lock = LockFile::acquire(path)?;
        let wp = wal_path(path);

        wal::recovery::recover(path, &wp)?;

        let mut pager = Pager::open(path)?;
        let catalog_root = pager.catalog_root();
        let catalog = Catalog::load(&mut pager, catalog_root)?;
        // Recovery replayed everything durable; start a fresh log.
        let mut wal = WalWriter::create(&wp, pager.checkpoint_lsn())?;
        wal.sync()?;
        let next_txid = pager.next_txid();

        Ok(Database {
            pager,
            catalog,
            wal,
            _lock: lock,
            db_path: path.to_path_buf(),
            active_tx: None,
            next_txid,
            last_commit_lsn: None,
            commits_since_checkpoint: 0,
            checkpoint_every: 1,
            poisoned: None,
        })
    }

    /// Close the handle: roll back any open transaction, checkpoint, and
    /// release the lock.
    pub fn close(mut self) -> Result<()> {
        if self.active_tx.is_some() {
            self.rollback()?;
        }
        if self.poisoned.is_none() {
            self.checkpoint()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Commits between automatic checkpoints (default 1: checkpoint after
    /// every commit).
    pub fn set_checkpoint_every(&mut self, commits: u32) {
        self.checkpoint_every = commits.max(1);
    }

    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(msg) => Err(TinyError::Transaction(format!(
                "handle disabled by earlier failure: {}",
                msg
            ))),
            None => Ok(()),
        }
    }

    fn poison_if_fatal(&mut self, error: &TinyError) {
        if matches!(error, TinyError::Io(_) | TinyError::Corruption(_)) {
            self.poisoned = Some(error.to_string());
        }
    }

    /// An explicit transaction that hit a statement error accepts only
    /// ROLLBACK.
    fn check_tx_failed(&self) -> Result<()> {
        if let Some(tx) = &self.active_tx {
            if tx.state() == TxState::Failed {
                return Err(TinyError::Transaction(
                    "transaction aborted by an earlier error; rollback required".into(),
                ));
            }
        }
        Ok(())
    }

    // --- Transactions ---

    /// Start an explicit transaction. A second `begin` is refused.
    pub fn begin(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if self.active_tx.is_some() {
            return Err(TinyError::Busy("transaction already active".into()));
        }
        let txid = self.next_txid;
        self.next_txid += 1;
        self.active_tx = Some(Transaction::begin(txid, &self.pager));
        Ok(())
    }

    /// Commit the active transaction: verify deferred constraints, persist
    /// the catalog, write the WAL, apply.
    pub fn commit(&mut self) -> Result<()> {
        self.check_poisoned()?;
        self.check_tx_failed()?;
        let mut tx = self
            .active_tx
            .take()
            .ok_or_else(|| TinyError::Transaction("no active transaction".into()))?;

        let checks = tx.take_checks();
        if let Err(e) = run_pending_checks(&mut tx, &mut self.pager, &self.catalog, &checks) {
            self.abort_tx(tx)?;
            return Err(e);
        }

        let old_root = self.pager.catalog_root();
        let save_result = {
            let mut store = TxPageStore::new(&mut tx, &mut self.pager);
            self.catalog.save(&mut store, old_root)
        };
        let new_root = match save_result {
            Ok(root) => root,
            Err(e) => {
                self.poison_if_fatal(&e);
                self.abort_tx(tx)?;
                return Err(e);
            }
        };

        self.pager.set_next_txid(self.next_txid);
        match tx.commit(&mut self.pager, &mut self.wal, new_root) {
            Ok(lsn) => {
                self.last_commit_lsn = Some(lsn);
                self.commits_since_checkpoint += 1;
                if self.commits_since_checkpoint >= self.checkpoint_every {
                    // Best-effort: a failed checkpoint only delays WAL reuse.
                    if let Err(e) = self.checkpoint() {
                        warn!("post-commit checkpoint failed: {}", e);
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.poison_if_fatal(&e);
                Err(e)
            }
        }
    }

    /// Discard the active transaction.
    pub fn rollback(&mut self) -> Result<()> {
        let tx = self
            .active_tx
            .take()
            .ok_or_else(|| TinyError::Transaction("no active transaction".into()))?;
        self.abort_tx(tx)
    }

    fn abort_tx(&mut self, mut tx: Transaction) -> Result<()> {
        tx.rollback(&mut self.pager, &mut self.wal)?;
        // The in-memory catalog may hold uncommitted changes; reload the
        // committed one.
        let catalog_root = self.pager.catalog_root();
        self.catalog = Catalog::load(&mut self.pager, catalog_root)?;
        Ok(())
    }

    /// Apply committed WAL content to the main file, advance the header
    /// watermark and truncate the log.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if self.active_tx.is_some() {
            return Err(TinyError::Busy(
                "cannot checkpoint during a transaction".into(),
            ));
        }
        // Commits already applied their pages; make them durable, then move
        // the watermark past them before dropping the log.
        if let Some(lsn) = self.last_commit_lsn {
            if lsn > self.pager.checkpoint_lsn() {
                self.pager.sync()?;
                self.pager.set_checkpoint_lsn(lsn);
                self.pager.flush_header()?;
            }
        }
        self.wal.truncate()?;
        self.commits_since_checkpoint = 0;
        Ok(())
    }

    /// Run one mutating statement, wrapping it in an implicit transaction
    /// when none is active. Statement errors restore the catalog; in
    /// implicit mode they roll the whole transaction back.
    fn execute_mutation<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction, &mut Pager, &mut Catalog) -> Result<T>,
    ) -> Result<T> {
        self.check_poisoned()?;
        self.check_tx_failed()?;
        let implicit = self.active_tx.is_none();
        if implicit {
            self.begin()?;
        }

        let catalog_backup = self.catalog.clone();
        let mut tx = self.active_tx.take().expect("transaction just ensured");
        let result = f(&mut tx, &mut self.pager, &mut self.catalog);
        self.active_tx = Some(tx);

        match result {
            Ok(value) => {
                if implicit {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(e) => {
                self.catalog = catalog_backup;
                if implicit {
                    if let Err(abort_err) = self.rollback() {
                        self.poison_if_fatal(&abort_err);
                    }
                } else if let Some(tx) = &mut self.active_tx {
                    tx.mark_failed();
                }
                self.poison_if_fatal(&e);
                Err(e)
            }
        }
    }

    // --- DDL ---

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        self.execute_mutation(|tx, pager, catalog| {
            // Validate and register first so a rejected schema allocates
            // nothing.
            catalog.create_table(TableDef {
                name: schema.name.clone(),
                columns: schema.columns,
                primary_key: schema.primary_key,
                root_page: 0,
                autoincrement: 0,
                row_slots: 0,
            })?;
            let tree = {
                let mut store = TxPageStore::new(tx, pager);
                BTree::create(&mut store)?
            };
            catalog.get_table_mut(&schema.name)?.root_page = tree.root_page();
            Ok(())
        })
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.execute_mutation(|tx, pager, catalog| {
            let referents: Vec<(String, String)> = catalog
                .referencing_columns(name)
                .into_iter()
                .filter(|(t, _)| t != name)
                .collect();
            if let Some((t, c)) = referents.first() {
                return Err(TinyError::Schema(format!(
                    "table '{}' is referenced by '{}.{}'",
                    name, t, c
                )));
            }

            let (def, indexes) = catalog.drop_table(name)?;
            let mut store = TxPageStore::new(tx, pager);
            free_tree(&mut store, def.root_page)?;
            for index in indexes {
                free_tree(&mut store, index.root_page)?;
            }
            Ok(())
        })
    }

    pub fn alter_table(&mut self, op: AlterTableOp) -> Result<()> {
        self.execute_mutation(|_tx, _pager, catalog| match op {
            AlterTableOp::Rename { table, new_name } => catalog.rename_table(&table, &new_name),
            AlterTableOp::AddColumn { table, column } => catalog.add_column(&table, column),
            AlterTableOp::DropColumn { table, column } => catalog.drop_column(&table, &column),
        })
    }

    pub fn create_index(&mut self, schema: IndexSchema) -> Result<()> {
        self.execute_mutation(|tx, pager, catalog| {
            catalog.create_index(IndexDef {
                name: schema.name.clone(),
                table: schema.table.clone(),
                columns: schema.columns,
                unique: schema.unique,
                root_page: 0,
            })?;

            let table = catalog.get_table(&schema.table)?.clone();
            let index = catalog.get_index(&schema.name)?.clone();

            let mut itree = {
                let mut store = TxPageStore::new(tx, pager);
                BTree::create(&mut store)?
            };

            // Backfill from existing rows.
            let table_tree = BTree::open(table.root_page);
            let mut cursor = RangeCursor::new(&table_tree, None, None, true);
            {
                let mut store = TxPageStore::new(tx, pager);
                while let Some((pk_key, row_bytes)) = cursor.next(&mut store)? {
                    let row = decode_row(&row_bytes, &table)?;
                    let pk_values = pk_values(&table, &row);
                    if let Some(ikey) = index_entry_key(&index, &table, &row, &pk_values)? {
                        itree.insert(&mut store, &ikey, &pk_key).map_err(|e| {
                            map_duplicate(e, || {
                                format!("unique index '{}' over existing rows", schema.name)
                            })
                        })?;
                    }
                }
            }

            catalog.set_index_root(&schema.name, itree.root_page())?;
            Ok(())
        })
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.execute_mutation(|tx, pager, catalog| {
            let def = catalog.drop_index(name)?;
            let mut store = TxPageStore::new(tx, pager);
            free_tree(&mut store, def.root_page)
        })
    }

    // --- DML ---

    /// Insert one row. Autoincrement fills a NULL integer primary key.
    pub fn insert(&mut self, table: &str, row: Vec<Value>) -> Result<usize> {
        let table = table.to_string();
        self.execute_mutation(move |tx, pager, catalog| {
            stmt_insert(tx, pager, catalog, &table, row)
        })
    }

    /// Replace the row with the given primary key.
    pub fn update(&mut self, table: &str, key: &[Value], row: Vec<Value>) -> Result<usize> {
        let table = table.to_string();
        let key = key.to_vec();
        self.execute_mutation(move |tx, pager, catalog| {
            stmt_update(tx, pager, catalog, &table, &key, row)
        })
    }

    /// Delete the row with the given primary key.
    pub fn delete(&mut self, table: &str, key: &[Value]) -> Result<usize> {
        let table = table.to_string();
        let key = key.to_vec();
        self.execute_mutation(move |tx, pager, catalog| {
            stmt_delete(tx, pager, catalog, &table, &key)
        })
    }

    /// Primary-key point lookup: the fast path for `pk = constant`.
    /// Sees the active transaction's uncommitted writes.
    pub fn get(&mut self, table: &str, key: &[Value]) -> Result<Option<Vec<Value>>> {
        let def = self.catalog.get_table(table)?.clone();
        check_key_arity(&def, key)?;
        let ekey = encode_key(key)?;

        let tree = BTree::open(def.root_page);
        let bytes = match &mut self.active_tx {
            Some(tx) => {
                let mut store = TxPageStore::new(tx, &mut self.pager);
                tree.get(&mut store, &ekey)?
            }
            None => tree.get(&mut self.pager, &ekey)?,
        };
        bytes.map(|b| decode_row(&b, &def)).transpose()
    }

    /// Range scan over the primary key, lazy in both directions. Bounds
    /// are inclusive; either may be None. Dropping the iterator cancels
    /// the scan.
    pub fn scan(
        &mut self,
        table: &str,
        lo: Option<&[Value]>,
        hi: Option<&[Value]>,
        ascending: bool,
    ) -> Result<Scan<'_>> {
        let def = self.catalog.get_table(table)?.clone();
        let lo = lo.map(encode_key).transpose()?;
        let hi = hi.map(encode_key).transpose()?;
        let cursor = RangeCursor::new(&BTree::open(def.root_page), lo, hi, ascending);
        Ok(Scan {
            db: self,
            cursor,
            table: def,
        })
    }

    // --- Introspection for the executor ---

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    pub fn table_schema(&self, name: &str) -> Result<TableDef> {
        self.catalog.get_table(name).cloned()
    }

    pub fn schema_version(&self) -> u32 {
        self.catalog.schema_version()
    }

    /// Wrap the handle for use from parallel runtimes: a mutex serializes
    /// writers, as required by the single-writer contract.
    pub fn into_shared(self) -> SharedDatabase {
        SharedDatabase {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

/// Cloneable, mutex-guarded handle. Exactly one caller progresses at a
/// time; everything else serializes behind the lock.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn with<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

/// Lazy row iterator returned by [`Database::scan`].
pub struct Scan<'db> {
    db: &'db mut Database,
    cursor: RangeCursor,
    table: TableDef,
}

impl Iterator for Scan<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match &mut self.db.active_tx {
            Some(tx) => {
                let mut store = TxPageStore::new(tx, &mut self.db.pager);
                self.cursor.next(&mut store)
            }
            None => self.cursor.next(&mut self.db.pager),
        };
        match step {
            Ok(Some((_key, bytes))) => Some(decode_row(&bytes, &self.table)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// --- Statement implementations ---

fn check_key_arity(def: &TableDef, key: &[Value]) -> Result<()> {
    if key.len() != def.primary_key.len() {
        return Err(TinyError::Constraint(format!(
            "table '{}' has a {}-column primary key, got {} value(s)",
            def.name,
            def.primary_key.len(),
            key.len()
        )));
    }
    Ok(())
}

fn check_row_arity(def: &TableDef, row: &[Value]) -> Result<()> {
    if row.len() != def.columns.len() {
        return Err(TinyError::Constraint(format!(
            "table '{}' has {} columns, got {} value(s)",
            def.name,
            def.columns.len(),
            row.len()
        )));
    }
    Ok(())
}

/// NOT NULL and type conformance, checked at statement boundary.
fn check_row(def: &TableDef, row: &[Value]) -> Result<()> {
    check_row_arity(def, row)?;
    for (col, value) in def.columns.iter().zip(row) {
        if value.is_null() {
            if !col.nullable {
                return Err(TinyError::Constraint(format!(
                    "NOT NULL column '{}' in table '{}'",
                    col.name, def.name
                )));
            }
            continue;
        }
        if !value.conforms_to(col.data_type) {
            return Err(TinyError::Constraint(format!(
                "column '{}' expects {}, got {}",
                col.name, col.data_type, value
            )));
        }
    }
    Ok(())
}

fn pk_values(def: &TableDef, row: &[Value]) -> Vec<Value> {
    def.pk_indices().iter().map(|&i| row[i].clone()).collect()
}

fn map_duplicate(e: TinyError, context: impl FnOnce() -> String) -> TinyError {
    match e {
        TinyError::DuplicateKey(_) => TinyError::DuplicateKey(context()),
        other => other,
    }
}

fn queue_fk_checks(tx: &mut Transaction, def: &TableDef, row: &[Value]) {
    for (col, value) in def.columns.iter().zip(row) {
        if let Some(fk) = &col.references {
            if !value.is_null() {
                tx.queue_check(PendingCheck::ForeignKeyExists {
                    from_table: def.name.clone(),
                    column: col.name.clone(),
                    to_table: fk.table.clone(),
                    value: value.clone(),
                });
            }
        }
    }
}

/// Bump the autoincrement counter, assigning a value when the key column
/// came in as NULL. The counter never decreases.
fn apply_autoincrement(
    catalog: &mut Catalog,
    table: &str,
    def: &TableDef,
    row: &mut [Value],
) -> Result<()> {
    let Some(ai) = def.autoincrement_column() else {
        return Ok(());
    };
    if row[ai].is_null() {
        let next = def.autoincrement.checked_add(1).ok_or_else(|| {
            TinyError::Constraint(format!("autoincrement counter of '{}' is exhausted", table))
        })?;
        row[ai] = Value::Integer(next);
        catalog.get_table_mut(table)?.autoincrement = next;
    } else if let Value::Integer(n) = row[ai] {
        let stored = catalog.get_table_mut(table)?;
        if n > stored.autoincrement {
            stored.autoincrement = n;
        }
    }
    Ok(())
}

/// Index key for one row: indexed column values, with the PK appended for
/// non-unique indexes so equal values stay distinct. Rows with NULL in an
/// indexed column are not indexed.
fn index_entry_key(
    index: &IndexDef,
    def: &TableDef,
    row: &[Value],
    pk: &[Value],
) -> Result<Option<Vec<u8>>> {
    let mut values = Vec::with_capacity(index.columns.len() + pk.len());
    for col in &index.columns {
        let i = def.column_index(col).ok_or_else(|| {
            TinyError::Corruption(format!(
                "index '{}' references missing column '{}'",
                index.name, col
            ))
        })?;
        if row[i].is_null() {
            return Ok(None);
        }
        values.push(row[i].clone());
    }
    if !index.unique {
        values.extend_from_slice(pk);
    }
    encode_key(&values).map(Some)
}

/// Check unique indexes before mutating anything, so a violation cannot
/// leave a half-applied statement inside an explicit transaction. An entry
/// produced by `replacing` (the row being updated) does not count as a
/// conflict: it is removed before the new entry goes in.
fn precheck_unique_indexes(
    tx: &mut Transaction,
    pager: &mut Pager,
    catalog: &Catalog,
    def: &TableDef,
    row: &[Value],
    pk: &[Value],
    replacing: Option<(&[Value], &[Value])>,
) -> Result<()> {
    for index in catalog.indexes_for_table(&def.name) {
        if !index.unique {
            continue;
        }
        let Some(ikey) = index_entry_key(index, def, row, pk)? else {
            continue;
        };
        if let Some((old_row, old_pk)) = replacing {
            if index_entry_key(index, def, old_row, old_pk)? == Some(ikey.clone()) {
                continue;
            }
        }
        let exists = {
            let mut store = TxPageStore::new(tx, pager);
            BTree::open(index.root_page).contains(&mut store, &ikey)?
        };
        if exists {
            return Err(TinyError::DuplicateKey(format!(
                "unique index '{}'",
                index.name
            )));
        }
    }
    Ok(())
}

fn update_index_entries(
    tx: &mut Transaction,
    pager: &mut Pager,
    catalog: &mut Catalog,
    def: &TableDef,
    removed: Option<(&[Value], &[Value])>,
    added: Option<(&[Value], &[u8], &[Value])>,
) -> Result<()> {
    let indexes: Vec<IndexDef> = catalog
        .indexes_for_table(&def.name)
        .into_iter()
        .cloned()
        .collect();

    for index in indexes {
        let mut tree = BTree::open(index.root_page);
        {
            let mut store = TxPageStore::new(tx, pager);
            if let Some((row, pk)) = removed {
                if let Some(ikey) = index_entry_key(&index, def, row, pk)? {
                    tree.delete(&mut store, &ikey)?;
                }
            }
            if let Some((row, pk_key, pk)) = added {
                if let Some(ikey) = index_entry_key(&index, def, row, pk)? {
                    tree.insert(&mut store, &ikey, pk_key).map_err(|e| {
                        map_duplicate(e, || format!("unique index '{}'", index.name))
                    })?;
                }
            }
        }
        if tree.root_page() != index.root_page {
            catalog.set_index_root(&index.name, tree.root_page())?;
        }
    }
    Ok(())
}

fn stmt_insert(
    tx: &mut Transaction,
    pager: &mut Pager,
    catalog: &mut Catalog,
    table: &str,
    mut row: Vec<Value>,
) -> Result<usize> {
    let def = catalog.get_table(table)?.clone();
    check_row_arity(&def, &row)?;
    apply_autoincrement(catalog, table, &def, &mut row)?;
    check_row(&def, &row)?;

    let pk = pk_values(&def, &row);
    let key = encode_key(&pk)?;
    let row_bytes = encode_row(&row, &def);
    precheck_unique_indexes(tx, pager, catalog, &def, &row, &pk, None)?;

    let mut tree = BTree::open(def.root_page);
    {
        let mut store = TxPageStore::new(tx, pager);
        tree.insert(&mut store, &key, &row_bytes)
            .map_err(|e| map_duplicate(e, || format!("primary key in table '{}'", table)))?;
    }
    if tree.root_page() != def.root_page {
        catalog.get_table_mut(table)?.root_page = tree.root_page();
    }

    update_index_entries(tx, pager, catalog, &def, None, Some((row.as_slice(), &key, &pk)))?;
    queue_fk_checks(tx, &def, &row);
    Ok(1)
}

fn stmt_update(
    tx: &mut Transaction,
    pager: &mut Pager,
    catalog: &mut Catalog,
    table: &str,
    key: &[Value],
    mut row: Vec<Value>,
) -> Result<usize> {
    let def = catalog.get_table(table)?.clone();
    check_key_arity(&def, key)?;
    let old_key = encode_key(key)?;

    let old_bytes = {
        let mut store = TxPageStore::new(tx, pager);
        BTree::open(def.root_page).get(&mut store, &old_key)?
    };
    let Some(old_bytes) = old_bytes else {
        return Err(TinyError::NotFound(format!("key in table '{}'", table)));
    };
    let old_row = decode_row(&old_bytes, &def)?;

    check_row_arity(&def, &row)?;
    apply_autoincrement(catalog, table, &def, &mut row)?;
    check_row(&def, &row)?;

    let new_pk = pk_values(&def, &row);
    let new_key = encode_key(&new_pk)?;
    let row_bytes = encode_row(&row, &def);
    precheck_unique_indexes(tx, pager, catalog, &def, &row, &new_pk, Some((old_row.as_slice(), key)))?;

    let mut tree = BTree::open(def.root_page);
    {
        let mut store = TxPageStore::new(tx, pager);
        if new_key == old_key {
            tree.update(&mut store, &old_key, &row_bytes)?;
        } else {
            tree.insert(&mut store, &new_key, &row_bytes)
                .map_err(|e| map_duplicate(e, || format!("primary key in table '{}'", table)))?;
            tree.delete(&mut store, &old_key)?;
        }
    }
    if tree.root_page() != def.root_page {
        catalog.get_table_mut(table)?.root_page = tree.root_page();
    }

    update_index_entries(
        tx,
        pager,
        catalog,
        &def,
        Some((old_row.as_slice(), key)),
        Some((row.as_slice(), &new_key, &new_pk)),
    )?;

    if new_key != old_key {
        tx.queue_check(PendingCheck::NoReferents {
            table: table.to_string(),
            key: key.to_vec(),
        });
    }
    queue_fk_checks(tx, &def, &row);
    Ok(1)
}

fn stmt_delete(
    tx: &mut Transaction,
    pager: &mut Pager,
    catalog: &mut Catalog,
    table: &str,
    key: &[Value],
) -> Result<usize> {
    let def = catalog.get_table(table)?.clone();
    check_key_arity(&def, key)?;
    let ekey = encode_key(key)?;

    let old_bytes = {
        let mut store = TxPageStore::new(tx, pager);
        BTree::open(def.root_page).get(&mut store, &ekey)?
    };
    let Some(old_bytes) = old_bytes else {
        return Err(TinyError::NotFound(format!("key in table '{}'", table)));
    };
    let old_row = decode_row(&old_bytes, &def)?;

    update_index_entries(tx, pager, catalog, &def, Some((old_row.as_slice(), key)), None)?;

    let mut tree = BTree::open(def.root_page);
    {
        let mut store = TxPageStore::new(tx, pager);
        tree.delete(&mut store, &ekey)?;
    }
    if tree.root_page() != def.root_page {
        catalog.get_table_mut(table)?.root_page = tree.root_page();
    }

    tx.queue_check(PendingCheck::NoReferents {
        table: table.to_string(),
        key: key.to_vec(),
    });
    Ok(1)
}

/// Verify deferred constraint checks against the transaction's own view of
/// the data, immediately before the commit record.
fn run_pending_checks(
    tx: &mut Transaction,
    pager: &mut Pager,
    catalog: &Catalog,
    checks: &[PendingCheck],
) -> Result<()> {
    for check in checks {
        match check {
            PendingCheck::ForeignKeyExists {
                from_table,
                column,
                to_table,
                value,
            } => {
                let target = catalog.get_table(to_table)?;
                let key = encode_key(std::slice::from_ref(value))?;
                let exists = {
                    let mut store = TxPageStore::new(tx, pager);
                    BTree::open(target.root_page).contains(&mut store, &key)?
                };
                if !exists {
                    return Err(TinyError::Constraint(format!(
                        "foreign key '{}.{}' = {} has no match in '{}'",
                        from_table, column, value, to_table
                    )));
                }
            }
            PendingCheck::NoReferents { table, key } => {
                // The key may have been re-inserted later in the transaction.
                let target = catalog.get_table(table)?;
                let ekey = encode_key(key)?;
                let still_present = {
                    let mut store = TxPageStore::new(tx, pager);
                    BTree::open(target.root_page).contains(&mut store, &ekey)?
                };
                if still_present {
                    continue;
                }

                for (ref_table, ref_column) in catalog.referencing_columns(table) {
                    let rdef = catalog.get_table(&ref_table)?;
                    let col_idx = rdef.column_index(&ref_column).ok_or_else(|| {
                        TinyError::Corruption(format!(
                            "foreign key on missing column '{}.{}'",
                            ref_table, ref_column
                        ))
                    })?;
                    let rtree = BTree::open(rdef.root_page);
                    let mut cursor = RangeCursor::new(&rtree, None, None, true);
                    let mut store = TxPageStore::new(tx, pager);
                    while let Some((_, bytes)) = cursor.next(&mut store)? {
                        let row = decode_row(&bytes, rdef)?;
                        if row[col_idx] == key[0] {
                            return Err(TinyError::Constraint(format!(
                                "'{}.{}' still references deleted key {} in '{}'",
                                ref_table, ref_column, key[0], table
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Free every page of a B-tree, overflow chains included.
fn free_tree(store: &mut impl PageStore, root: PageNo) -> Result<()> {
    let pages = BTree::open(root).collect_pages(store)?;
    for page_no in pages {
        store.free_page(page_no)?;
    }
    Ok(())
}
