use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::wal::record::{Lsn, WalRecord};

/// WAL writer: append-only redo log.
///
/// Each appended record becomes one frame:
///
///   [frame_len: u32] [body = lsn(8) + record] [crc32c: u32 over body]
///
/// LSNs are globally monotonic: after a checkpoint truncates the file the
/// writer keeps counting, so the header watermark stays comparable across
/// truncations.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    next_lsn: Lsn,
}

impl WalWriter {
    /// Create (truncate) the WAL file, numbering records from `start_lsn`.
    pub fn create(path: &Path, start_lsn: Lsn) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(WalWriter {
            file,
            path: path.to_path_buf(),
            next_lsn: start_lsn,
        })
    }

    /// Append a WAL record. Returns the LSN assigned.
    pub fn append(&mut self, record: &WalRecord) -> Result<Lsn> {
        let lsn = self.next_lsn;

        let mut body = Vec::with_capacity(8 + 64);
        body.extend_from_slice(&lsn.to_le_bytes());
        body.extend_from_slice(&record.serialize());
        let crc = crc32c::crc32c(&body);

        self.file.write_all(&(body.len() as u32).to_le_bytes())?;
        self.file.write_all(&body)?;
        self.file.write_all(&crc.to_le_bytes())?;

        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Fsync the WAL file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncate the log after a checkpoint. LSN numbering continues.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    /// LSN the next Commit record would get; used for the watermark.
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.next_lsn.checked_sub(1)
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
