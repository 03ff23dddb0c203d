/// Slotted page implementation (4096 bytes).
///
/// Every page starts with a 1-byte type tag. Slotted pages (the B-tree
/// kinds) continue with:
///
///   [tag: u8] [slot_count: u16] [free_end: u16] [slot directory ...]
///
/// The slot directory grows down from the header, one 4-byte entry per
/// cell: [offset: u16][len: u16]. Cell bytes grow up from the end of the
/// page; `free_end` is the offset where cell data begins.
///
/// Overflow, catalog, free and header pages interpret the body after the
/// tag themselves (see `Pager`).
use crate::error::{Result, TinyError};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 5;
pub const SLOT_ENTRY_SIZE: usize = 4;

pub type PageNo = u32;

/// On-disk page type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Header,
    Catalog,
    BtreeInternal,
    BtreeLeaf,
    Overflow,
    Free,
}

impl PageKind {
    pub fn tag(self) -> u8 {
        match self {
            PageKind::Header => 1,
            PageKind::Catalog => 2,
            PageKind::BtreeInternal => 3,
            PageKind::BtreeLeaf => 4,
            PageKind::Overflow => 5,
            PageKind::Free => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PageKind::Header),
            2 => Some(PageKind::Catalog),
            3 => Some(PageKind::BtreeInternal),
            4 => Some(PageKind::BtreeLeaf),
            5 => Some(PageKind::Overflow),
            6 => Some(PageKind::Free),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Page {
    pub page_no: PageNo,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a zeroed page of the given kind. Slotted kinds get an empty
    /// slot directory.
    pub fn new(page_no: PageNo, kind: PageKind) -> Self {
        let mut page = Page {
            page_no,
            data: [0u8; PAGE_SIZE],
        };
        page.data[0] = kind.tag();
        if matches!(kind, PageKind::BtreeLeaf | PageKind::BtreeInternal) {
            page.set_slot_count(0);
            page.set_free_end(PAGE_SIZE as u16);
        }
        page
    }

    pub fn from_bytes(page_no: PageNo, data: [u8; PAGE_SIZE]) -> Self {
        Page { page_no, data }
    }

    pub fn kind(&self) -> Option<PageKind> {
        PageKind::from_tag(self.data[0])
    }

    /// Kind check used by structural reads.
    pub fn expect_kind(&self, expected: PageKind) -> Result<()> {
        match self.kind() {
            Some(k) if k == expected => Ok(()),
            other => Err(TinyError::Corruption(format!(
                "page {} has kind {:?}, expected {:?}",
                self.page_no, other, expected
            ))),
        }
    }

    // --- Slotted header accessors ---

    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes(self.data[1..3].try_into().unwrap())
    }

    fn set_slot_count(&mut self, count: u16) {
        self.data[1..3].copy_from_slice(&count.to_le_bytes());
    }

    pub fn free_end(&self) -> u16 {
        u16::from_le_bytes(self.data[3..5].try_into().unwrap())
    }

    fn set_free_end(&mut self, offset: u16) {
        self.data[3..5].copy_from_slice(&offset.to_le_bytes());
    }

    fn dir_end(&self) -> usize {
        PAGE_HEADER_SIZE + self.slot_count() as usize * SLOT_ENTRY_SIZE
    }

    /// Bytes available for one more cell (its slot entry included).
    pub fn free_space(&self) -> usize {
        (self.free_end() as usize).saturating_sub(self.dir_end() + SLOT_ENTRY_SIZE)
    }

    /// Whether a cell of `len` bytes (plus its slot entry) fits.
    pub fn fits(&self, len: usize) -> bool {
        self.free_end() as usize >= self.dir_end() + SLOT_ENTRY_SIZE + len
    }

    /// Total cell payload bytes currently stored. Used by the B-tree fill
    /// policy.
    pub fn used_cell_bytes(&self) -> usize {
        let mut total = 0;
        for i in 0..self.slot_count() {
            if let Some((_, len)) = self.slot_offset_and_len(i) {
                total += len;
            }
        }
        total
    }

    /// Append a cell. Returns the slot index.
    pub fn insert_cell(&mut self, payload: &[u8]) -> Result<u16> {
        if !self.fits(payload.len()) {
            return Err(TinyError::Corruption(format!(
                "cell of {} bytes does not fit in page {}",
                payload.len(),
                self.page_no
            )));
        }

        let cell_offset = self.free_end() as usize - payload.len();
        self.data[cell_offset..cell_offset + payload.len()].copy_from_slice(payload);

        let idx = self.slot_count();
        let entry_offset = self.dir_end();
        self.data[entry_offset..entry_offset + 2]
            .copy_from_slice(&(cell_offset as u16).to_le_bytes());
        self.data[entry_offset + 2..entry_offset + 4]
            .copy_from_slice(&(payload.len() as u16).to_le_bytes());

        self.set_slot_count(idx + 1);
        self.set_free_end(cell_offset as u16);
        Ok(idx)
    }

    /// Cell payload by slot index.
    pub fn cell(&self, index: u16) -> Option<&[u8]> {
        let (offset, len) = self.slot_offset_and_len(index)?;
        Some(&self.data[offset..offset + len])
    }

    pub fn slot_offset_and_len(&self, index: u16) -> Option<(usize, usize)> {
        if index >= self.slot_count() {
            return None;
        }
        let entry = PAGE_HEADER_SIZE + index as usize * SLOT_ENTRY_SIZE;
        let offset = u16::from_le_bytes(self.data[entry..entry + 2].try_into().unwrap()) as usize;
        let len = u16::from_le_bytes(self.data[entry + 2..entry + 4].try_into().unwrap()) as usize;
        if offset + len > PAGE_SIZE {
            return None;
        }
        Some((offset, len))
    }

    /// Overwrite a cell in place. Only legal when the new payload has the
    /// same length as the old one; structural rewrites rebuild the page.
    pub fn overwrite_cell(&mut self, index: u16, payload: &[u8]) -> Result<()> {
        let (offset, len) = self.slot_offset_and_len(index).ok_or_else(|| {
            TinyError::Corruption(format!(
                "slot {} out of range on page {}",
                index, self.page_no
            ))
        })?;
        if len != payload.len() {
            return Err(TinyError::Corruption(
                "in-place overwrite with different length".into(),
            ));
        }
        self.data[offset..offset + len].copy_from_slice(payload);
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_no", &self.page_no)
            .field("kind", &self.kind())
            .field("slot_count", &self.slot_count())
            .field("free_end", &self.free_end())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page() {
        let page = Page::new(42, PageKind::BtreeLeaf);
        assert_eq!(page.page_no, 42);
        assert_eq!(page.kind(), Some(PageKind::BtreeLeaf));
        assert_eq!(page.slot_count(), 0);
        assert_eq!(page.free_end(), PAGE_SIZE as u16);
    }

    #[test]
    fn test_insert_and_read_cells() {
        let mut page = Page::new(1, PageKind::BtreeLeaf);
        let data1 = b"hello world";
        let data2 = b"foo bar baz";

        let idx0 = page.insert_cell(data1).unwrap();
        let idx1 = page.insert_cell(data2).unwrap();

        assert_eq!(idx0, 0);
        assert_eq!(idx1, 1);
        assert_eq!(page.slot_count(), 2);
        assert_eq!(page.cell(0), Some(data1.as_slice()));
        assert_eq!(page.cell(1), Some(data2.as_slice()));
    }

    #[test]
    fn test_page_overflow() {
        let mut page = Page::new(1, PageKind::BtreeLeaf);
        let big = vec![0xFFu8; PAGE_SIZE];
        assert!(page.insert_cell(&big).is_err());
    }

    #[test]
    fn test_fill_page() {
        let mut page = Page::new(1, PageKind::BtreeLeaf);
        let cell = vec![0u8; 32];
        let mut count = 0u16;
        while page.insert_cell(&cell).is_ok() {
            count += 1;
        }
        assert!(count > 50);
        assert_eq!(page.slot_count(), count);
        assert!(!page.fits(32));
    }

    #[test]
    fn test_overwrite_cell_same_len() {
        let mut page = Page::new(1, PageKind::BtreeLeaf);
        page.insert_cell(b"aaaa").unwrap();
        page.overwrite_cell(0, b"bbbb").unwrap();
        assert_eq!(page.cell(0), Some(b"bbbb".as_slice()));
        assert!(page.overwrite_cell(0, b"ccc").is_err());
    }

    #[test]
    fn test_kind_tags_roundtrip() {
        for kind in [
            PageKind::Header,
            PageKind::Catalog,
            PageKind::BtreeInternal,
            PageKind::BtreeLeaf,
            PageKind::Overflow,
            PageKind::Free,
        ] {
            assert_eq!(PageKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(PageKind::from_tag(0), None);
        assert_eq!(PageKind::from_tag(99), None);
    }
}
