use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::warn;

use crate::error::Result;
use crate::wal::record::{Lsn, WalRecord};
use crate::wal::MAX_WAL_FRAME_LEN;

/// WAL reader: iterate frames for recovery.
///
/// A frame that cannot be validated (zero or oversized length, payload
/// running past end-of-file, checksum mismatch, unparseable record, or a
/// non-consecutive LSN) terminates the scan. Everything before it remains
/// valid: a crash mid-append leaves exactly such a torn tail, and the
/// records past it were never acknowledged.
pub struct WalReader {
    file: File,
    file_len: u64,
    expected_lsn: Option<Lsn>,
}

impl WalReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(WalReader {
            file,
            file_len,
            expected_lsn: None,
        })
    }

    /// Read the next WAL record. Returns None at end-of-log (including a
    /// torn tail).
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<(Lsn, WalRecord)>> {
        let mut len_buf = [0u8; 4];
        match self.file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let frame_len = u32::from_le_bytes(len_buf) as usize;
        let pos = self.file.stream_position()?;
        let remaining = self.file_len.saturating_sub(pos);

        if frame_len == 0 || frame_len > MAX_WAL_FRAME_LEN {
            self.warn_torn_tail(pos - 4, "implausible frame length");
            return Ok(None);
        }
        // Body + trailing checksum must both be on disk.
        if (frame_len + 4) as u64 > remaining {
            self.warn_torn_tail(pos - 4, "frame runs past end of file");
            return Ok(None);
        }

        let mut body = vec![0u8; frame_len];
        self.file.read_exact(&mut body)?;
        let mut crc_buf = [0u8; 4];
        self.file.read_exact(&mut crc_buf)?;

        if crc32c::crc32c(&body) != u32::from_le_bytes(crc_buf) {
            self.warn_torn_tail(pos - 4, "checksum mismatch");
            return Ok(None);
        }

        if body.len() < 8 {
            self.warn_torn_tail(pos - 4, "frame body too short");
            return Ok(None);
        }
        let lsn = u64::from_le_bytes(body[0..8].try_into().unwrap());
        if let Some(expected) = self.expected_lsn {
            if lsn != expected {
                self.warn_torn_tail(pos - 4, "non-consecutive LSN");
                return Ok(None);
            }
        }

        let record = match WalRecord::deserialize(&body[8..]) {
            Some(r) => r,
            None => {
                self.warn_torn_tail(pos - 4, "unparseable record");
                return Ok(None);
            }
        };

        self.expected_lsn = Some(lsn + 1);
        Ok(Some((lsn, record)))
    }

    /// Read all valid records into a vector.
    pub fn read_all(&mut self) -> Result<Vec<(Lsn, WalRecord)>> {
        self.file.seek(SeekFrom::Start(0))?;
        self.expected_lsn = None;

        let mut records = Vec::new();
        while let Some(record) = self.next()? {
            records.push(record);
        }
        Ok(records)
    }

    fn warn_torn_tail(&self, offset: u64, reason: &str) {
        warn!(
            "WAL scan stops at byte {} of {}: {}",
            offset, self.file_len, reason
        );
    }
}
