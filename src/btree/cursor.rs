/// Lazy range cursor over a B-tree.
///
/// Descends once to the first qualifying leaf, then walks sibling links,
/// buffering one parsed leaf at a time. Both bounds are inclusive and
/// optional; `ascending = false` walks the prev-pointers instead. Dropping
/// the cursor between yields cancels the scan.
use crate::btree::node::{InternalNode, LeafNode};
use crate::btree::ops::{resolve_payload, BTree};
use crate::error::{Result, TinyError};
use crate::storage::page::{PageKind, PageNo};
use crate::storage::page_store::PageStore;

const MAX_DESCENT: usize = 64;

enum CursorState {
    Unpositioned,
    /// `idx` is the next entry to yield ascending, or one past it
    /// descending.
    At {
        leaf: LeafNode,
        idx: usize,
    },
    Done,
}

pub struct RangeCursor {
    root: PageNo,
    lo: Option<Vec<u8>>,
    hi: Option<Vec<u8>>,
    ascending: bool,
    state: CursorState,
}

impl RangeCursor {
    pub fn new(
        tree: &BTree,
        lo: Option<Vec<u8>>,
        hi: Option<Vec<u8>>,
        ascending: bool,
    ) -> Self {
        RangeCursor {
            root: tree.root_page(),
            lo,
            hi,
            ascending,
            state: CursorState::Unpositioned,
        }
    }

    /// Next (key, row payload) in range, or None when exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, store: &mut impl PageStore) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            // Errors leave the cursor Done, so a caller that keeps pulling
            // terminates.
            match std::mem::replace(&mut self.state, CursorState::Done) {
                CursorState::Done => return Ok(None),
                CursorState::Unpositioned => {
                    self.state = self.position(store)?;
                }
                CursorState::At { mut leaf, mut idx } => {
                    if self.ascending {
                        if idx >= leaf.entries.len() {
                            if leaf.next == 0 {
                                return Ok(None);
                            }
                            let page = store.read_page(leaf.next)?;
                            leaf = LeafNode::read(&page)?;
                            idx = 0;
                            self.state = CursorState::At { leaf, idx };
                            continue;
                        }
                        let entry = &leaf.entries[idx];
                        if let Some(hi) = &self.hi {
                            if entry.key.as_slice() > hi.as_slice() {
                                return Ok(None);
                            }
                        }
                        let key = entry.key.clone();
                        let payload = entry.payload.clone();
                        self.state = CursorState::At { leaf, idx: idx + 1 };
                        let value = resolve_payload(store, &payload)?;
                        return Ok(Some((key, value)));
                    } else {
                        if idx == 0 {
                            if leaf.prev == 0 {
                                return Ok(None);
                            }
                            let page = store.read_page(leaf.prev)?;
                            leaf = LeafNode::read(&page)?;
                            idx = leaf.entries.len();
                            self.state = CursorState::At { leaf, idx };
                            continue;
                        }
                        let entry = &leaf.entries[idx - 1];
                        if let Some(lo) = &self.lo {
                            if entry.key.as_slice() < lo.as_slice() {
                                return Ok(None);
                            }
                        }
                        let key = entry.key.clone();
                        let payload = entry.payload.clone();
                        self.state = CursorState::At { leaf, idx: idx - 1 };
                        let value = resolve_payload(store, &payload)?;
                        return Ok(Some((key, value)));
                    }
                }
            }
        }
    }

    /// Descend to the starting leaf: the one containing the lower bound
    /// (ascending) or the upper bound (descending), or the extreme leaf
    /// when the bound is absent.
    fn position(&self, store: &mut impl PageStore) -> Result<CursorState> {
        let bound = if self.ascending { &self.lo } else { &self.hi };
        let mut page_no = self.root;

        for _ in 0..MAX_DESCENT {
            let page = store.read_page(page_no)?;
            match page.kind() {
                Some(PageKind::BtreeInternal) => {
                    let node = InternalNode::read(&page)?;
                    page_no = match bound {
                        Some(key) => node.child_at(node.child_position(key)),
                        None if self.ascending => node.child_at(0),
                        None => node.rightmost,
                    };
                }
                Some(PageKind::BtreeLeaf) => {
                    let leaf = LeafNode::read(&page)?;
                    let idx = if self.ascending {
                        match bound {
                            // First entry >= lo.
                            Some(lo) => leaf
                                .entries
                                .partition_point(|e| e.key.as_slice() < lo.as_slice()),
                            None => 0,
                        }
                    } else {
                        match bound {
                            // One past the last entry <= hi.
                            Some(hi) => leaf
                                .entries
                                .partition_point(|e| e.key.as_slice() <= hi.as_slice()),
                            None => leaf.entries.len(),
                        }
                    };
                    return Ok(CursorState::At { leaf, idx });
                }
                _ => {
                    return Err(TinyError::Corruption(format!(
                        "page {} is not a B-tree node",
                        page_no
                    )))
                }
            }
        }
        Err(TinyError::Corruption(
            "B-tree depth exceeds maximum (possible cycle)".into(),
        ))
    }
}
