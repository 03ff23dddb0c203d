/// B-tree operations: search, insert (with split), delete (with
/// borrow/merge rebalancing), all against a `PageStore` so the transaction
/// layer captures every touched page.
///
/// Mutations parse the affected page into an in-memory node, edit it, and
/// rebuild the page image. Separator keys equal the lowest key of the
/// subtree to their right; leaf sibling links are maintained across splits
/// and merges so range scans can walk them.
use crate::btree::node::{
    leaf_links, set_leaf_links, InternalEntry, InternalNode, LeafEntry, LeafNode, LeafPayload,
    NODE_CAPACITY,
};
use crate::error::{Result, TinyError};
use crate::storage::chain;
use crate::storage::page::{PageKind, PageNo};
use crate::storage::page_store::PageStore;

/// Payload bytes above this spill to an overflow chain.
pub const MAX_INLINE_PAYLOAD: usize = 1024;

/// Encoded primary keys are bounded so that a splitting node can always be
/// partitioned into two fitting halves.
pub const MAX_KEY_LEN: usize = 512;

/// Maximum depth, guarding traversal against corrupted trees with cycles.
const MAX_BTREE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    Unique,
    Overwrite,
}

struct SplitResult {
    sep_key: Vec<u8>,
    right: PageNo,
}

/// B-tree handle. Tracks the root page; callers persist root changes.
pub struct BTree {
    root: PageNo,
}

impl BTree {
    /// Create a new B-tree with a fresh empty leaf as root.
    pub fn create(store: &mut impl PageStore) -> Result<Self> {
        let page = store.allocate_page(PageKind::BtreeLeaf)?;
        let root = page.page_no;
        store.write_page(&LeafNode::default().build(root)?)?;
        Ok(BTree { root })
    }

    /// Open an existing B-tree given its root page.
    pub fn open(root: PageNo) -> Self {
        BTree { root }
    }

    pub fn root_page(&self) -> PageNo {
        self.root
    }

    /// Look up a key. Returns the row payload, overflow chains resolved.
    pub fn get(&self, store: &mut impl PageStore, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.find_entry(store, key)? {
            Some(payload) => Ok(Some(resolve_payload(store, &payload)?)),
            None => Ok(None),
        }
    }

    /// Whether a key exists, without reading its payload chain.
    pub fn contains(&self, store: &mut impl PageStore, key: &[u8]) -> Result<bool> {
        Ok(self.find_entry(store, key)?.is_some())
    }

    fn find_entry(&self, store: &mut impl PageStore, key: &[u8]) -> Result<Option<LeafPayload>> {
        let mut page_no = self.root;
        for _ in 0..MAX_BTREE_DEPTH {
            let page = store.read_page(page_no)?;
            match page.kind() {
                Some(PageKind::BtreeLeaf) => {
                    let node = LeafNode::read(&page)?;
                    return Ok(match node.search(key) {
                        Ok(i) => Some(node.entries[i].payload.clone()),
                        Err(_) => None,
                    });
                }
                Some(PageKind::BtreeInternal) => {
                    let node = InternalNode::read(&page)?;
                    page_no = node.child_at(node.child_position(key));
                }
                _ => {
                    return Err(TinyError::Corruption(format!(
                        "page {} is not a B-tree node",
                        page_no
                    )))
                }
            }
        }
        Err(depth_exceeded())
    }

    /// Insert a new key. Fails with `DuplicateKey` when the key exists.
    pub fn insert(&mut self, store: &mut impl PageStore, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(store, key, value, InsertMode::Unique)
    }

    /// Insert or overwrite. An existing entry's overflow chain is freed.
    pub fn update(&mut self, store: &mut impl PageStore, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(store, key, value, InsertMode::Overwrite)
    }

    fn put(
        &mut self,
        store: &mut impl PageStore,
        key: &[u8],
        value: &[u8],
        mode: InsertMode,
    ) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(TinyError::Constraint(format!(
                "encoded primary key is {} bytes (max {})",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        let payload = stage_payload(store, value)?;

        if let Some(split) = self.insert_into(store, self.root, key, payload, mode, 0)? {
            // Root split: the tree grows one level.
            let page = store.allocate_page(PageKind::BtreeInternal)?;
            let new_root = InternalNode {
                rightmost: split.right,
                entries: vec![InternalEntry {
                    child: self.root,
                    key: split.sep_key,
                }],
            };
            store.write_page(&new_root.build(page.page_no)?)?;
            self.root = page.page_no;
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        store: &mut impl PageStore,
        page_no: PageNo,
        key: &[u8],
        payload: LeafPayload,
        mode: InsertMode,
        depth: usize,
    ) -> Result<Option<SplitResult>> {
        if depth > MAX_BTREE_DEPTH {
            return Err(depth_exceeded());
        }
        let page = store.read_page(page_no)?;

        match page.kind() {
            Some(PageKind::BtreeLeaf) => {
                let mut node = LeafNode::read(&page)?;
                match node.search(key) {
                    Ok(i) => {
                        if mode == InsertMode::Unique {
                            return Err(TinyError::DuplicateKey("primary key exists".into()));
                        }
                        free_payload(store, &node.entries[i].payload)?;
                        node.entries[i].payload = payload;
                    }
                    Err(i) => node.entries.insert(
                        i,
                        LeafEntry {
                            key: key.to_vec(),
                            payload,
                        },
                    ),
                }

                if node.fits() {
                    store.write_page(&node.build(page_no)?)?;
                    return Ok(None);
                }
                self.split_leaf(store, page_no, node)
            }
            Some(PageKind::BtreeInternal) => {
                let mut node = InternalNode::read(&page)?;
                let pos = node.child_position(key);
                let child = node.child_at(pos);

                let Some(split) = self.insert_into(store, child, key, payload, mode, depth + 1)?
                else {
                    return Ok(None);
                };

                // The child kept its low half; hook the new right sibling in
                // after the pushed-up separator.
                node.entries.insert(
                    pos,
                    InternalEntry {
                        child,
                        key: split.sep_key,
                    },
                );
                if pos + 1 < node.entries.len() {
                    node.entries[pos + 1].child = split.right;
                } else {
                    node.rightmost = split.right;
                }

                if node.fits() {
                    store.write_page(&node.build(page_no)?)?;
                    return Ok(None);
                }
                self.split_internal(store, page_no, node)
            }
            _ => Err(TinyError::Corruption(format!(
                "page {} is not a B-tree node",
                page_no
            ))),
        }
    }

    fn split_leaf(
        &mut self,
        store: &mut impl PageStore,
        page_no: PageNo,
        mut node: LeafNode,
    ) -> Result<Option<SplitResult>> {
        let mid = leaf_split_point(&node.entries);
        let right_entries = node.entries.split_off(mid);
        let sep_key = right_entries[0].key.clone();

        let right_no = store.allocate_page(PageKind::BtreeLeaf)?.page_no;
        let old_next = node.next;
        let right = LeafNode {
            prev: page_no,
            next: old_next,
            entries: right_entries,
        };
        node.next = right_no;

        store.write_page(&node.build(page_no)?)?;
        store.write_page(&right.build(right_no)?)?;

        if old_next != 0 {
            let mut next_page = store.read_page(old_next)?;
            let (_, next_next) = leaf_links(&next_page)?;
            set_leaf_links(&mut next_page, right_no, next_next)?;
            store.write_page(&next_page)?;
        }

        Ok(Some(SplitResult {
            sep_key,
            right: right_no,
        }))
    }

    fn split_internal(
        &mut self,
        store: &mut impl PageStore,
        page_no: PageNo,
        mut node: InternalNode,
    ) -> Result<Option<SplitResult>> {
        if node.entries.len() < 3 {
            return Err(TinyError::Corruption(format!(
                "internal page {} overflows with {} entries",
                page_no,
                node.entries.len()
            )));
        }
        let mid = internal_split_point(&node.entries);

        let mut right_entries = node.entries.split_off(mid);
        let sep = right_entries.remove(0);

        let right_no = store.allocate_page(PageKind::BtreeInternal)?.page_no;
        let right = InternalNode {
            rightmost: node.rightmost,
            entries: right_entries,
        };
        node.rightmost = sep.child;

        store.write_page(&node.build(page_no)?)?;
        store.write_page(&right.build(right_no)?)?;

        Ok(Some(SplitResult {
            sep_key: sep.key,
            right: right_no,
        }))
    }

    /// Delete a key. Returns true if it was present. Underfull nodes are
    /// rebalanced against a sibling; a root left with a single child
    /// collapses, shrinking the tree.
    pub fn delete(&mut self, store: &mut impl PageStore, key: &[u8]) -> Result<bool> {
        let (deleted, _) = self.delete_from(store, self.root, key, 0)?;

        if deleted {
            let root_page = store.read_page(self.root)?;
            if root_page.kind() == Some(PageKind::BtreeInternal) {
                let node = InternalNode::read(&root_page)?;
                if node.entries.is_empty() {
                    let old_root = self.root;
                    self.root = node.rightmost;
                    store.free_page(old_root)?;
                }
            }
        }
        Ok(deleted)
    }

    /// Returns (was_deleted, node_is_underfull).
    fn delete_from(
        &mut self,
        store: &mut impl PageStore,
        page_no: PageNo,
        key: &[u8],
        depth: usize,
    ) -> Result<(bool, bool)> {
        if depth > MAX_BTREE_DEPTH {
            return Err(depth_exceeded());
        }
        let page = store.read_page(page_no)?;

        match page.kind() {
            Some(PageKind::BtreeLeaf) => {
                let mut node = LeafNode::read(&page)?;
                let Ok(i) = node.search(key) else {
                    return Ok((false, false));
                };
                let removed = node.entries.remove(i);
                free_payload(store, &removed.payload)?;
                store.write_page(&node.build(page_no)?)?;
                Ok((true, node.is_underfull()))
            }
            Some(PageKind::BtreeInternal) => {
                let node = InternalNode::read(&page)?;
                let pos = node.child_position(key);
                let child = node.child_at(pos);

                let (deleted, child_underfull) =
                    self.delete_from(store, child, key, depth + 1)?;
                if deleted && child_underfull {
                    self.rebalance(store, page_no, pos)?;
                }

                let node = InternalNode::read(&store.read_page(page_no)?)?;
                Ok((deleted, node.is_underfull()))
            }
            _ => Err(TinyError::Corruption(format!(
                "page {} is not a B-tree node",
                page_no
            ))),
        }
    }

    /// Rebalance the underfull child at `pos` against an adjacent sibling:
    /// merge when both fit one page, otherwise redistribute entries evenly
    /// and refresh the parent separator.
    fn rebalance(
        &mut self,
        store: &mut impl PageStore,
        parent_no: PageNo,
        pos: usize,
    ) -> Result<()> {
        let parent = InternalNode::read(&store.read_page(parent_no)?)?;
        if parent.entries.is_empty() {
            return Ok(()); // single child, nothing to pair it with
        }

        let sep_idx = if pos == 0 { 0 } else { pos - 1 };
        let left_no = parent.child_at(sep_idx);
        let right_no = parent.child_at(sep_idx + 1);

        let left_page = store.read_page(left_no)?;
        match left_page.kind() {
            Some(PageKind::BtreeLeaf) => {
                self.rebalance_leaves(store, parent_no, parent, sep_idx, left_no, right_no)
            }
            Some(PageKind::BtreeInternal) => {
                self.rebalance_internals(store, parent_no, parent, sep_idx, left_no, right_no)
            }
            _ => Err(TinyError::Corruption(format!(
                "page {} is not a B-tree node",
                left_no
            ))),
        }
    }

    fn rebalance_leaves(
        &mut self,
        store: &mut impl PageStore,
        parent_no: PageNo,
        mut parent: InternalNode,
        sep_idx: usize,
        left_no: PageNo,
        right_no: PageNo,
    ) -> Result<()> {
        let left = LeafNode::read(&store.read_page(left_no)?)?;
        let right = LeafNode::read(&store.read_page(right_no)?)?;

        let (left_prev, right_next) = (left.prev, right.next);
        let mut combined = left.entries;
        combined.extend(right.entries);

        let merged = LeafNode {
            prev: left_prev,
            next: right_next,
            entries: combined,
        };

        if merged.fits() {
            remove_separator(&mut parent, sep_idx, left_no);
            store.write_page(&merged.build(left_no)?)?;
            store.write_page(&parent.build(parent_no)?)?;
            if right_next != 0 {
                let mut after = store.read_page(right_next)?;
                let (_, after_next) = leaf_links(&after)?;
                set_leaf_links(&mut after, left_no, after_next)?;
                store.write_page(&after)?;
            }
            store.free_page(right_no)?;
            return Ok(());
        }

        // Too big for one page: redistribute so both halves are comfortable.
        let mut entries = merged.entries;
        let mid = leaf_split_point(&entries);
        let right_entries = entries.split_off(mid);
        let new_sep = right_entries[0].key.clone();

        parent.entries[sep_idx].key = new_sep;
        if !parent.fits() {
            // A longer separator key no longer fits the parent; leave the
            // child underfull rather than cascade an overflow here.
            return Ok(());
        }

        let new_left = LeafNode {
            prev: left_prev,
            next: right_no,
            entries,
        };
        let new_right = LeafNode {
            prev: left_no,
            next: right_next,
            entries: right_entries,
        };
        store.write_page(&new_left.build(left_no)?)?;
        store.write_page(&new_right.build(right_no)?)?;
        store.write_page(&parent.build(parent_no)?)?;
        Ok(())
    }

    fn rebalance_internals(
        &mut self,
        store: &mut impl PageStore,
        parent_no: PageNo,
        mut parent: InternalNode,
        sep_idx: usize,
        left_no: PageNo,
        right_no: PageNo,
    ) -> Result<()> {
        let left = InternalNode::read(&store.read_page(left_no)?)?;
        let right = InternalNode::read(&store.read_page(right_no)?)?;

        // Pull the separator down between the two entry lists.
        let mut combined = left.entries;
        combined.push(InternalEntry {
            child: left.rightmost,
            key: parent.entries[sep_idx].key.clone(),
        });
        combined.extend(right.entries);

        let merged = InternalNode {
            rightmost: right.rightmost,
            entries: combined,
        };

        if merged.fits() {
            remove_separator(&mut parent, sep_idx, left_no);
            store.write_page(&merged.build(left_no)?)?;
            store.write_page(&parent.build(parent_no)?)?;
            store.free_page(right_no)?;
            return Ok(());
        }

        let mut entries = merged.entries;
        let mid = internal_split_point(&entries);
        let mut right_entries = entries.split_off(mid);
        let sep = right_entries.remove(0);

        parent.entries[sep_idx].key = sep.key;
        if !parent.fits() {
            return Ok(());
        }

        let new_left = InternalNode {
            rightmost: sep.child,
            entries,
        };
        let new_right = InternalNode {
            rightmost: right.rightmost,
            entries: right_entries,
        };
        store.write_page(&new_left.build(left_no)?)?;
        store.write_page(&new_right.build(right_no)?)?;
        store.write_page(&parent.build(parent_no)?)?;
        Ok(())
    }

    /// Every page reachable from this tree: nodes plus overflow chains.
    /// Used when a table or index is dropped.
    pub fn collect_pages(&self, store: &mut impl PageStore) -> Result<Vec<PageNo>> {
        let mut pages = Vec::new();
        let mut visited = std::collections::HashSet::new();
        self.collect_from(store, self.root, &mut pages, &mut visited, 0)?;
        Ok(pages)
    }

    fn collect_from(
        &self,
        store: &mut impl PageStore,
        page_no: PageNo,
        pages: &mut Vec<PageNo>,
        visited: &mut std::collections::HashSet<PageNo>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_BTREE_DEPTH {
            return Err(depth_exceeded());
        }
        if !visited.insert(page_no) {
            return Err(TinyError::Corruption(format!(
                "B-tree cycle: page {} reached twice",
                page_no
            )));
        }
        pages.push(page_no);

        let page = store.read_page(page_no)?;
        match page.kind() {
            Some(PageKind::BtreeLeaf) => {
                let node = LeafNode::read(&page)?;
                for entry in &node.entries {
                    if let LeafPayload::Overflow { first, .. } = entry.payload {
                        pages.extend(chain::chain_pages(store, first, PageKind::Overflow)?);
                    }
                }
                Ok(())
            }
            Some(PageKind::BtreeInternal) => {
                let node = InternalNode::read(&page)?;
                for entry in &node.entries {
                    self.collect_from(store, entry.child, pages, visited, depth + 1)?;
                }
                self.collect_from(store, node.rightmost, pages, visited, depth + 1)
            }
            _ => Err(TinyError::Corruption(format!(
                "page {} is not a B-tree node",
                page_no
            ))),
        }
    }
}

fn depth_exceeded() -> TinyError {
    TinyError::Corruption("B-tree depth exceeds maximum (possible cycle)".into())
}

/// Stage a row payload: inline when small, spilled to an overflow chain
/// otherwise.
fn stage_payload(store: &mut impl PageStore, value: &[u8]) -> Result<LeafPayload> {
    if value.len() <= MAX_INLINE_PAYLOAD {
        return Ok(LeafPayload::Inline(value.to_vec()));
    }
    let first = chain::write_chain(store, PageKind::Overflow, value)?;
    Ok(LeafPayload::Overflow {
        first,
        total_len: value.len() as u32,
    })
}

/// Read a payload back, following the overflow chain when present.
pub(crate) fn resolve_payload(
    store: &mut impl PageStore,
    payload: &LeafPayload,
) -> Result<Vec<u8>> {
    match payload {
        LeafPayload::Inline(bytes) => Ok(bytes.clone()),
        LeafPayload::Overflow { first, total_len } => {
            let bytes = chain::read_chain(store, *first, PageKind::Overflow)?;
            if bytes.len() != *total_len as usize {
                return Err(TinyError::Corruption(format!(
                    "overflow chain at page {} holds {} bytes, expected {}",
                    first,
                    bytes.len(),
                    total_len
                )));
            }
            Ok(bytes)
        }
    }
}

fn free_payload(store: &mut impl PageStore, payload: &LeafPayload) -> Result<()> {
    if let LeafPayload::Overflow { first, .. } = payload {
        chain::free_chain(store, *first, PageKind::Overflow)?;
    }
    Ok(())
}

/// Drop the separator at `sep_idx` after its two children merged into
/// `merged_no`.
fn remove_separator(parent: &mut InternalNode, sep_idx: usize, merged_no: PageNo) {
    parent.entries.remove(sep_idx);
    if sep_idx < parent.entries.len() {
        parent.entries[sep_idx].child = merged_no;
    } else {
        parent.rightmost = merged_no;
    }
}

/// Byte-balanced split point over per-entry sizes, adjusted so both halves
/// fit a node. The key and inline-payload bounds keep the largest cell
/// small enough that such a point always exists.
fn balanced_split_point(sizes: &[usize], lo: usize, hi: usize) -> usize {
    let total: usize = sizes.iter().sum();
    let mut prefix = Vec::with_capacity(sizes.len() + 1);
    let mut acc = 0;
    prefix.push(0);
    for &s in sizes {
        acc += s;
        prefix.push(acc);
    }

    let mut mid = lo;
    for m in lo..=hi {
        mid = m;
        if prefix[m] * 2 >= total {
            break;
        }
    }
    while mid > lo && prefix[mid] > NODE_CAPACITY {
        mid -= 1;
    }
    while mid < hi && total - prefix[mid] > NODE_CAPACITY {
        mid += 1;
    }
    mid
}

/// Split point for leaf entries: both halves non-empty and fitting.
fn leaf_split_point(entries: &[LeafEntry]) -> usize {
    let sizes: Vec<usize> = entries
        .iter()
        .map(|e| e.cell_len() + crate::storage::page::SLOT_ENTRY_SIZE)
        .collect();
    balanced_split_point(&sizes, 1, entries.len() - 1)
}

/// Split point for internal entries; the entry at the returned index is
/// pushed up, so both remaining halves must be non-empty.
fn internal_split_point(entries: &[InternalEntry]) -> usize {
    let sizes: Vec<usize> = entries
        .iter()
        .map(|e| e.cell_len() + crate::storage::page::SLOT_ENTRY_SIZE)
        .collect();
    balanced_split_point(&sizes, 1, entries.len() - 2)
}
