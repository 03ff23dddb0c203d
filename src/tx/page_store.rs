use crate::error::Result;
use crate::storage::page::{Page, PageKind, PageNo};
use crate::storage::page_store::PageStore;
use crate::storage::pager::Pager;
use crate::tx::transaction::Transaction;

/// A `PageStore` layering a transaction's dirty-page buffer over the pager.
///
/// Reads check the buffer first, writes go to the buffer, allocations go
/// through the pager (undone on rollback via the allocation snapshot) and
/// frees are recorded on the transaction for commit time.
pub struct TxPageStore<'a> {
    tx: &'a mut Transaction,
    pager: &'a mut Pager,
}

impl<'a> TxPageStore<'a> {
    pub fn new(tx: &'a mut Transaction, pager: &'a mut Pager) -> Self {
        TxPageStore { tx, pager }
    }
}

impl PageStore for TxPageStore<'_> {
    fn read_page(&mut self, page_no: PageNo) -> Result<Page> {
        self.tx.read_page(self.pager, page_no)
    }

    fn write_page(&mut self, page: &Page) -> Result<()> {
        self.tx.write_page(page.clone());
        Ok(())
    }

    fn allocate_page(&mut self, kind: PageKind) -> Result<Page> {
        self.pager.allocate_page(kind)
    }

    fn free_page(&mut self, page_no: PageNo) -> Result<()> {
        self.tx.free_page(page_no);
        Ok(())
    }
}
