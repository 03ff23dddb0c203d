/// Page chains: linked lists of pages holding one oversized payload.
///
/// Chain page body layout:
///
///   [tag: u8] [next_page: u32] [used_len: u16] [payload ...]
///
/// `next_page = 0` terminates the chain. Both OVERFLOW chains (large row
/// payloads) and the CATALOG chain use this layout; the tag tells them
/// apart so structural reads can verify what they are walking.
use std::collections::HashSet;

use crate::error::{Result, TinyError};
use crate::storage::page::{Page, PageKind, PageNo, PAGE_SIZE};
use crate::storage::page_store::PageStore;

pub const CHAIN_HEADER_SIZE: usize = 7;
pub const CHAIN_CAPACITY: usize = PAGE_SIZE - CHAIN_HEADER_SIZE;

fn chain_next(page: &Page) -> PageNo {
    u32::from_le_bytes(page.data[1..5].try_into().unwrap())
}

fn chain_used(page: &Page) -> usize {
    u16::from_le_bytes(page.data[5..7].try_into().unwrap()) as usize
}

fn fill_chain_page(page: &mut Page, next: PageNo, payload: &[u8]) {
    page.data[1..5].copy_from_slice(&next.to_le_bytes());
    page.data[5..7].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    page.data[CHAIN_HEADER_SIZE..CHAIN_HEADER_SIZE + payload.len()].copy_from_slice(payload);
}

/// Write `bytes` into a fresh chain of pages of the given kind. Returns the
/// first page number. An empty payload still produces a one-page chain.
pub fn write_chain(store: &mut impl PageStore, kind: PageKind, bytes: &[u8]) -> Result<PageNo> {
    debug_assert!(matches!(kind, PageKind::Overflow | PageKind::Catalog));

    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[]]
    } else {
        bytes.chunks(CHAIN_CAPACITY).collect()
    };

    let mut pages: Vec<Page> = Vec::with_capacity(chunks.len());
    for _ in 0..chunks.len() {
        pages.push(store.allocate_page(kind)?);
    }

    for i in (0..chunks.len()).rev() {
        let next = if i + 1 < pages.len() {
            pages[i + 1].page_no
        } else {
            0
        };
        fill_chain_page(&mut pages[i], next, chunks[i]);
    }

    let first = pages[0].page_no;
    for page in &pages {
        store.write_page(page)?;
    }
    Ok(first)
}

/// Reconstruct the byte string held by the chain starting at `first`.
pub fn read_chain(store: &mut impl PageStore, first: PageNo, kind: PageKind) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut visited = HashSet::new();
    let mut page_no = first;

    while page_no != 0 {
        if !visited.insert(page_no) {
            return Err(TinyError::Corruption(format!(
                "page chain cycle at page {}",
                page_no
            )));
        }
        let page = store.read_page(page_no)?;
        page.expect_kind(kind)?;
        let used = chain_used(&page);
        if used > CHAIN_CAPACITY {
            return Err(TinyError::Corruption(format!(
                "chain page {} claims {} payload bytes",
                page_no, used
            )));
        }
        bytes.extend_from_slice(&page.data[CHAIN_HEADER_SIZE..CHAIN_HEADER_SIZE + used]);
        page_no = chain_next(&page);
    }

    Ok(bytes)
}

/// Return every page of a chain to the free list.
pub fn free_chain(store: &mut impl PageStore, first: PageNo, kind: PageKind) -> Result<()> {
    let mut visited = HashSet::new();
    let mut page_no = first;

    // Collect first so a cycle is detected before anything is freed.
    let mut to_free = Vec::new();
    while page_no != 0 {
        if !visited.insert(page_no) {
            return Err(TinyError::Corruption(format!(
                "page chain cycle at page {}",
                page_no
            )));
        }
        let page = store.read_page(page_no)?;
        page.expect_kind(kind)?;
        to_free.push(page_no);
        page_no = chain_next(&page);
    }

    for page_no in to_free {
        store.free_page(page_no)?;
    }
    Ok(())
}

/// Page numbers occupied by a chain, in order.
pub fn chain_pages(store: &mut impl PageStore, first: PageNo, kind: PageKind) -> Result<Vec<PageNo>> {
    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut page_no = first;

    while page_no != 0 {
        if !visited.insert(page_no) {
            return Err(TinyError::Corruption(format!(
                "page chain cycle at page {}",
                page_no
            )));
        }
        let page = store.read_page(page_no)?;
        page.expect_kind(kind)?;
        pages.push(page_no);
        page_no = chain_next(&page);
    }

    Ok(pages)
}
