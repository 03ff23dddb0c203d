use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};

use crate::error::{Result, TinyError};
use crate::storage::page::{Page, PageNo, PAGE_SIZE};
use crate::storage::page_store::PageStore;
use crate::storage::pager::Pager;
use crate::wal::reader::WalReader;
use crate::wal::record::{Lsn, TxId, WalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxTerminal {
    Committed(Lsn),
    Aborted,
}

#[derive(Debug, Clone, Copy)]
struct TxScanState {
    seen_begin: bool,
    seen_meta_update: bool,
    terminal: Option<TxTerminal>,
}

impl TxScanState {
    fn new() -> Self {
        Self {
            seen_begin: false,
            seen_meta_update: false,
            terminal: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub committed_txids: Vec<TxId>,
    pub discarded_txids: Vec<TxId>,
    pub pages_replayed: usize,
}

/// Recover the database from its WAL.
///
/// Replays after-images of transactions whose Commit record is intact and
/// newer than the header's checkpoint watermark; transactions without a
/// Commit are discarded. Restores header metadata from the committed
/// MetaUpdate records and advances the watermark, making a second run over
/// the same log a no-op. The caller truncates the WAL afterwards.
pub fn recover(db_path: &Path, wal_path: &Path) -> Result<RecoveryReport> {
    if !wal_path.exists() {
        return Ok(RecoveryReport::default());
    }

    let mut reader = WalReader::open(wal_path)?;
    let records = reader.read_all()?;
    if records.is_empty() {
        return Ok(RecoveryReport::default());
    }

    // Phase 1: validate each transaction's record lifecycle.
    // Allowed: Begin -> (PageImage | MetaUpdate)* -> MetaUpdate -> Commit,
    // or Begin -> ...* -> Abort. Nothing after a terminal record.
    let mut states: HashMap<TxId, TxScanState> = HashMap::new();
    for (lsn, record) in &records {
        let txid = record.txid();
        let state = states.entry(txid).or_insert_with(TxScanState::new);

        if state.terminal.is_some() {
            return Err(TinyError::Corruption(format!(
                "WAL record after terminal record for txid {} at LSN {}",
                txid, lsn
            )));
        }

        match record {
            WalRecord::Begin { .. } => {
                if state.seen_begin {
                    return Err(TinyError::Corruption(format!(
                        "duplicate WAL Begin for txid {} at LSN {}",
                        txid, lsn
                    )));
                }
                state.seen_begin = true;
            }
            WalRecord::PageImage { page_no, data, .. } => {
                if !state.seen_begin {
                    return Err(TinyError::Corruption(format!(
                        "WAL PageImage before Begin for txid {} at LSN {}",
                        txid, lsn
                    )));
                }
                if *page_no == 0 {
                    return Err(TinyError::Corruption(
                        "WAL PageImage targets the header page".into(),
                    ));
                }
                if data.len() != PAGE_SIZE {
                    return Err(TinyError::Corruption(format!(
                        "WAL PageImage for page {} has {} bytes, expected {}",
                        page_no,
                        data.len(),
                        PAGE_SIZE
                    )));
                }
            }
            WalRecord::MetaUpdate { .. } => {
                if !state.seen_begin {
                    return Err(TinyError::Corruption(format!(
                        "WAL MetaUpdate before Begin for txid {} at LSN {}",
                        txid, lsn
                    )));
                }
                state.seen_meta_update = true;
            }
            WalRecord::Commit { .. } => {
                if !state.seen_begin {
                    return Err(TinyError::Corruption(format!(
                        "WAL Commit before Begin for txid {} at LSN {}",
                        txid, lsn
                    )));
                }
                if !state.seen_meta_update {
                    return Err(TinyError::Corruption(format!(
                        "WAL Commit without MetaUpdate for txid {} at LSN {}",
                        txid, lsn
                    )));
                }
                state.terminal = Some(TxTerminal::Committed(*lsn));
            }
            WalRecord::Abort { .. } => {
                if !state.seen_begin {
                    return Err(TinyError::Corruption(format!(
                        "WAL Abort before Begin for txid {} at LSN {}",
                        txid, lsn
                    )));
                }
                state.terminal = Some(TxTerminal::Aborted);
            }
        }
    }

    let mut pager = Pager::open(db_path)?;
    let watermark = pager.checkpoint_lsn();

    // Transactions to replay: committed past the watermark. Earlier commits
    // were already checkpointed into the main file.
    let replay: HashMap<TxId, Lsn> = states
        .iter()
        .filter_map(|(txid, state)| match state.terminal {
            Some(TxTerminal::Committed(lsn)) if lsn > watermark => Some((*txid, lsn)),
            _ => None,
        })
        .collect();

    // Phase 2: latest after-image per page and latest metadata, in LSN order,
    // from replayable transactions only.
    let mut page_images: HashMap<PageNo, &Vec<u8>> = HashMap::new();
    let mut latest_meta: Option<&WalRecord> = None;
    for (_, record) in &records {
        match record {
            WalRecord::PageImage {
                txid,
                page_no,
                data,
            } if replay.contains_key(txid) => {
                page_images.insert(*page_no, data);
            }
            WalRecord::MetaUpdate { txid, .. } if replay.contains_key(txid) => {
                latest_meta = Some(record);
            }
            _ => {}
        }
    }

    // Phase 3: apply after-images, then metadata, then advance the watermark.
    let mut pages_replayed = 0;
    for (&page_no, data) in &page_images {
        let mut bytes = [0u8; PAGE_SIZE];
        bytes.copy_from_slice(data);
        pager.write_page(&Page::from_bytes(page_no, bytes))?;
        pages_replayed += 1;
        debug!("recovery replayed page {}", page_no);
    }

    if let Some(WalRecord::MetaUpdate {
        page_count,
        first_free_page,
        catalog_root,
        next_txid,
        ..
    }) = latest_meta
    {
        // page_count only grows: a stale image must not shrink the file map.
        if *page_count > pager.page_count() {
            pager.set_page_count(*page_count);
        }
        pager.set_first_free_page(*first_free_page);
        pager.set_catalog_root(*catalog_root);
        if *next_txid > pager.next_txid() {
            pager.set_next_txid(*next_txid);
        }
    }

    // Make sure every replayed page falls inside the page map.
    for &page_no in page_images.keys() {
        if page_no + 1 > pager.page_count() {
            pager.set_page_count(page_no + 1);
        }
    }

    let max_commit_lsn = replay.values().copied().max();
    if let Some(lsn) = max_commit_lsn {
        pager.set_checkpoint_lsn(lsn);
    }
    pager.flush_header()?;

    let mut committed_txids: Vec<TxId> = replay.keys().copied().collect();
    committed_txids.sort_unstable();
    let mut discarded_txids: Vec<TxId> = states
        .iter()
        .filter(|(_, state)| !matches!(state.terminal, Some(TxTerminal::Committed(_))))
        .map(|(txid, _)| *txid)
        .collect();
    discarded_txids.sort_unstable();

    if !committed_txids.is_empty() || !discarded_txids.is_empty() {
        info!(
            "WAL recovery: {} transaction(s) replayed, {} discarded, {} page(s) written",
            committed_txids.len(),
            discarded_txids.len(),
            pages_replayed
        );
    }

    Ok(RecoveryReport {
        committed_txids,
        discarded_txids,
        pages_replayed,
    })
}
