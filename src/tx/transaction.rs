use std::collections::HashMap;

use crate::error::{Result, TinyError};
use crate::storage::page::{Page, PageKind, PageNo};
use crate::storage::page_store::PageStore;
use crate::storage::pager::Pager;
use crate::types::Value;
use crate::wal::record::{Lsn, TxId, WalRecord};
use crate::wal::writer::WalWriter;

/// Transaction states. `Failed` is an explicit transaction after a
/// statement error: it only accepts ROLLBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Failed,
    Committed,
    Aborted,
}

/// Constraint checks deferred to commit. Queued while statements run,
/// verified against the transaction's own view before the WAL commit
/// record is written.
#[derive(Debug, Clone)]
pub enum PendingCheck {
    /// An inserted or updated foreign-key value must exist in the
    /// referenced table.
    ForeignKeyExists {
        from_table: String,
        column: String,
        to_table: String,
        value: Value,
    },
    /// A deleted primary key must have no remaining referents.
    NoReferents { table: String, key: Vec<Value> },
}

/// A write transaction: buffers dirty pages and frees, queues deferred
/// constraint checks, and writes everything to the WAL on commit. The main
/// file is untouched until the commit record is fsynced.
pub struct Transaction {
    txid: TxId,
    state: TxState,
    dirty_pages: HashMap<PageNo, Page>,
    freed_pages: Vec<PageNo>,
    alloc_snapshot: (u32, PageNo),
    pending_checks: Vec<PendingCheck>,
}

impl Transaction {
    /// Begin a transaction, snapshotting the pager's allocation state so
    /// rollback can undo in-memory allocations.
    pub fn begin(txid: TxId, pager: &Pager) -> Self {
        Transaction {
            txid,
            state: TxState::Active,
            dirty_pages: HashMap::new(),
            freed_pages: Vec::new(),
            alloc_snapshot: pager.alloc_state(),
            pending_checks: Vec::new(),
        }
    }

    pub fn txid(&self) -> TxId {
        self.txid
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn dirty_page_count(&self) -> usize {
        self.dirty_pages.len()
    }

    /// Read a page: dirty buffer first, then the pager (read-your-writes).
    pub fn read_page(&self, pager: &mut Pager, page_no: PageNo) -> Result<Page> {
        if let Some(page) = self.dirty_pages.get(&page_no) {
            return Ok(page.clone());
        }
        pager.read_page(page_no)
    }

    /// Stage a page write in the dirty buffer.
    pub fn write_page(&mut self, page: Page) {
        self.dirty_pages.insert(page.page_no, page);
    }

    /// Record a page freed by this transaction. It joins the on-disk free
    /// list at commit, or is forgotten on rollback.
    pub fn free_page(&mut self, page_no: PageNo) {
        self.dirty_pages.remove(&page_no);
        self.freed_pages.push(page_no);
    }

    /// Mark an explicit transaction failed after a statement error. Only
    /// rollback is accepted from here.
    pub fn mark_failed(&mut self) {
        if self.state == TxState::Active {
            self.state = TxState::Failed;
        }
    }

    pub fn queue_check(&mut self, check: PendingCheck) {
        self.pending_checks.push(check);
    }

    pub fn take_checks(&mut self) -> Vec<PendingCheck> {
        std::mem::take(&mut self.pending_checks)
    }

    /// Commit: stage freed pages as FREE images, append everything to the
    /// WAL, fsync, and only then apply to the main file and header.
    ///
    /// `catalog_root` is carried in the MetaUpdate record so recovery
    /// restores it atomically with the pages.
    pub fn commit(
        &mut self,
        pager: &mut Pager,
        wal: &mut WalWriter,
        catalog_root: PageNo,
    ) -> Result<Lsn> {
        if self.state != TxState::Active {
            return Err(TinyError::Transaction(
                "cannot commit a non-active transaction".into(),
            ));
        }

        // Thread freed pages onto the free-list chain as page images.
        let mut first_free = pager.first_free_page();
        for &page_no in &self.freed_pages {
            let mut page = Page::new(page_no, PageKind::Free);
            page.data[1..5].copy_from_slice(&first_free.to_le_bytes());
            self.dirty_pages.insert(page_no, page);
            first_free = page_no;
        }

        let mut page_count = pager.page_count();
        for &page_no in self.dirty_pages.keys() {
            if page_no + 1 > page_count {
                page_count = page_no + 1;
            }
        }

        wal.append(&WalRecord::Begin { txid: self.txid })?;
        let mut page_nos: Vec<PageNo> = self.dirty_pages.keys().copied().collect();
        page_nos.sort_unstable();
        for page_no in &page_nos {
            let page = &self.dirty_pages[page_no];
            wal.append(&WalRecord::PageImage {
                txid: self.txid,
                page_no: *page_no,
                data: page.data.to_vec(),
            })?;
        }
        wal.append(&WalRecord::MetaUpdate {
            txid: self.txid,
            page_count,
            first_free_page: first_free,
            catalog_root,
            next_txid: pager.next_txid(),
        })?;
        let commit_lsn = wal.append(&WalRecord::Commit { txid: self.txid })?;

        // The commit point: once this fsync returns, recovery will replay.
        wal.sync()?;

        for page_no in &page_nos {
            pager.write_page(&self.dirty_pages[page_no])?;
        }
        pager.set_page_count(page_count);
        pager.set_first_free_page(first_free);
        pager.set_catalog_root(catalog_root);
        pager.flush_header()?;

        self.state = TxState::Committed;
        self.dirty_pages.clear();
        self.freed_pages.clear();
        self.pending_checks.clear();
        Ok(commit_lsn)
    }

    /// Rollback: append an Abort record, discard buffered state, and
    /// restore the pager's allocation counters.
    pub fn rollback(&mut self, pager: &mut Pager, wal: &mut WalWriter) -> Result<()> {
        if !matches!(self.state, TxState::Active | TxState::Failed) {
            return Err(TinyError::Transaction(
                "cannot rollback a non-active transaction".into(),
            ));
        }

        // Page images only reach the WAL at commit, so the abort carries
        // its own Begin to keep the record lifecycle well-formed.
        wal.append(&WalRecord::Begin { txid: self.txid })?;
        wal.append(&WalRecord::Abort { txid: self.txid })?;
        pager.restore_alloc_state(self.alloc_snapshot);
        self.dirty_pages.clear();
        self.freed_pages.clear();
        self.pending_checks.clear();
        self.state = TxState::Aborted;
        Ok(())
    }
}
