use crate::error::Result;
use crate::storage::page::{Page, PageKind, PageNo};

/// Abstraction over page I/O.
///
/// Implemented by `Pager` (direct disk I/O) and `TxPageStore` (transaction
/// dirty-buffer view). Everything above the pager (the B-tree, the catalog
/// chain, overflow chains) goes through this trait so that mutations made
/// inside a transaction are staged in its buffer instead of hitting the
/// file.
pub trait PageStore {
    fn read_page(&mut self, page_no: PageNo) -> Result<Page>;
    fn write_page(&mut self, page: &Page) -> Result<()>;
    fn allocate_page(&mut self, kind: PageKind) -> Result<Page>;
    fn free_page(&mut self, page_no: PageNo) -> Result<()>;
}
