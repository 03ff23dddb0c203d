/// Cross-process exclusion: an advisory lock on a `<path>.lock` sentinel,
/// held for the lifetime of the database handle. The engine is strictly
/// single-writer, so a second open of the same path (from another process
/// or the same one) is refused with `Busy` rather than queued. The lock
/// lives on its own sentinel file so the main file can be copied while a
/// reader holds it open.
use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::fs_std::FileExt;

use crate::error::{Result, TinyError};

pub struct LockFile {
    file: File,
}

impl LockFile {
    /// Acquire the exclusive lock for `db_path`, or fail with `Busy`.
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let lock_path = db_path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        if let Err(e) = file.try_lock_exclusive() {
            return Err(if e.kind() == std::io::ErrorKind::WouldBlock {
                TinyError::Busy(format!(
                    "database {} is locked by another handle",
                    db_path.display()
                ))
            } else {
                e.into()
            });
        }

        Ok(LockFile { file })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
