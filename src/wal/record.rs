/// WAL record types.
///
/// Frame format on disk:
///
///   [frame_len: u32] [body] [crc32c: u32]
///
/// where `frame_len` is the body length and the checksum covers the body.
/// The body is `[lsn: u64][record]`; records serialize as a tag byte plus
/// fields:
///
///   Begin(txid)
///   PageImage(txid, page_no, page bytes)        full after-image
///   MetaUpdate(txid, page_count, first_free_page, catalog_root, next_txid)
///   Commit(txid)
///   Abort(txid)
use crate::storage::page::PageNo;

pub type TxId = u64;
pub type Lsn = u64;

#[derive(Debug, Clone)]
pub enum WalRecord {
    Begin {
        txid: TxId,
    },
    PageImage {
        txid: TxId,
        page_no: PageNo,
        data: Vec<u8>,
    },
    MetaUpdate {
        txid: TxId,
        page_count: u32,
        first_free_page: PageNo,
        catalog_root: PageNo,
        next_txid: u64,
    },
    Commit {
        txid: TxId,
    },
    Abort {
        txid: TxId,
    },
}

const TAG_BEGIN: u8 = 1;
const TAG_PAGE_IMAGE: u8 = 2;
const TAG_META_UPDATE: u8 = 3;
const TAG_COMMIT: u8 = 4;
const TAG_ABORT: u8 = 5;

impl WalRecord {
    pub fn txid(&self) -> TxId {
        match self {
            WalRecord::Begin { txid } => *txid,
            WalRecord::PageImage { txid, .. } => *txid,
            WalRecord::MetaUpdate { txid, .. } => *txid,
            WalRecord::Commit { txid } => *txid,
            WalRecord::Abort { txid } => *txid,
        }
    }

    /// Serialize to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            WalRecord::Begin { txid } => {
                let mut buf = Vec::with_capacity(1 + 8);
                buf.push(TAG_BEGIN);
                buf.extend_from_slice(&txid.to_le_bytes());
                buf
            }
            WalRecord::PageImage {
                txid,
                page_no,
                data,
            } => {
                let mut buf = Vec::with_capacity(1 + 8 + 4 + 4 + data.len());
                buf.push(TAG_PAGE_IMAGE);
                buf.extend_from_slice(&txid.to_le_bytes());
                buf.extend_from_slice(&page_no.to_le_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
                buf
            }
            WalRecord::MetaUpdate {
                txid,
                page_count,
                first_free_page,
                catalog_root,
                next_txid,
            } => {
                let mut buf = Vec::with_capacity(1 + 8 + 4 + 4 + 4 + 8);
                buf.push(TAG_META_UPDATE);
                buf.extend_from_slice(&txid.to_le_bytes());
                buf.extend_from_slice(&page_count.to_le_bytes());
                buf.extend_from_slice(&first_free_page.to_le_bytes());
                buf.extend_from_slice(&catalog_root.to_le_bytes());
                buf.extend_from_slice(&next_txid.to_le_bytes());
                buf
            }
            WalRecord::Commit { txid } => {
                let mut buf = Vec::with_capacity(1 + 8);
                buf.push(TAG_COMMIT);
                buf.extend_from_slice(&txid.to_le_bytes());
                buf
            }
            WalRecord::Abort { txid } => {
                let mut buf = Vec::with_capacity(1 + 8);
                buf.push(TAG_ABORT);
                buf.extend_from_slice(&txid.to_le_bytes());
                buf
            }
        }
    }

    /// Deserialize from bytes. Returns None on any framing violation.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        match data[0] {
            TAG_BEGIN => {
                if data.len() != 9 {
                    return None;
                }
                let txid = u64::from_le_bytes(data[1..9].try_into().unwrap());
                Some(WalRecord::Begin { txid })
            }
            TAG_PAGE_IMAGE => {
                if data.len() < 17 {
                    return None;
                }
                let txid = u64::from_le_bytes(data[1..9].try_into().unwrap());
                let page_no = u32::from_le_bytes(data[9..13].try_into().unwrap());
                let data_len = u32::from_le_bytes(data[13..17].try_into().unwrap()) as usize;
                if data.len() != 17 + data_len {
                    return None;
                }
                Some(WalRecord::PageImage {
                    txid,
                    page_no,
                    data: data[17..].to_vec(),
                })
            }
            TAG_META_UPDATE => {
                if data.len() != 29 {
                    return None;
                }
                let txid = u64::from_le_bytes(data[1..9].try_into().unwrap());
                let page_count = u32::from_le_bytes(data[9..13].try_into().unwrap());
                let first_free_page = u32::from_le_bytes(data[13..17].try_into().unwrap());
                let catalog_root = u32::from_le_bytes(data[17..21].try_into().unwrap());
                let next_txid = u64::from_le_bytes(data[21..29].try_into().unwrap());
                Some(WalRecord::MetaUpdate {
                    txid,
                    page_count,
                    first_free_page,
                    catalog_root,
                    next_txid,
                })
            }
            TAG_COMMIT => {
                if data.len() != 9 {
                    return None;
                }
                let txid = u64::from_le_bytes(data[1..9].try_into().unwrap());
                Some(WalRecord::Commit { txid })
            }
            TAG_ABORT => {
                if data.len() != 9 {
                    return None;
                }
                let txid = u64::from_le_bytes(data[1..9].try_into().unwrap());
                Some(WalRecord::Abort { txid })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let records = vec![
            WalRecord::Begin { txid: 1 },
            WalRecord::PageImage {
                txid: 1,
                page_no: 42,
                data: vec![0xAB; 100],
            },
            WalRecord::MetaUpdate {
                txid: 1,
                page_count: 9,
                first_free_page: 3,
                catalog_root: 5,
                next_txid: 2,
            },
            WalRecord::Commit { txid: 1 },
            WalRecord::Abort { txid: 2 },
        ];

        for record in &records {
            let bytes = record.serialize();
            let decoded = WalRecord::deserialize(&bytes).unwrap();
            assert_eq!(record.txid(), decoded.txid());
            assert_eq!(bytes, decoded.serialize());
        }
    }

    #[test]
    fn test_deserialize_rejects_truncation() {
        let bytes = WalRecord::PageImage {
            txid: 1,
            page_no: 7,
            data: vec![1, 2, 3, 4],
        }
        .serialize();
        assert!(WalRecord::deserialize(&bytes[..bytes.len() - 1]).is_none());
        assert!(WalRecord::deserialize(&[]).is_none());
        assert!(WalRecord::deserialize(&[0xEE]).is_none());
    }
}
