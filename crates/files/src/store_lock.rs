//! Process-exclusive ownership of a storage root.
//!
//! The per-digest critical sections that keep a blob alive while a record is being written
//! only exist inside one process. A second process working on the same root (for example a
//! maintenance command run next to the server) would not see them, so every [`BlobStore`]
//! holds an advisory `flock` on `<root>/filehub.lock` for as long as it is open.
//!
//! [`BlobStore`]: crate::BlobStore

use crate::constants::LOCK_FILE_NAME;
use crate::{FilesError, FilesResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive lock on a storage root, released on drop.
#[derive(Debug)]
pub(crate) struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Takes the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::StoreLocked`] if another open store (in this or another process)
    /// already holds it.
    pub(crate) fn acquire(root: &Path) -> FilesResult<Self> {
        let path = root.join(LOCK_FILE_NAME);

        // Not truncated before locking: the current holder's pid must survive a failed attempt.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(FilesError::StoreLocked {
                pid: read_pid(&path),
                path: path.display().to_string(),
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "acquired store lock");
        Ok(Self { file, path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_records_pid() {
        let temp = TempDir::new().unwrap();

        let lock = StoreLock::acquire(temp.path()).unwrap();

        let content = std::fs::read_to_string(temp.path().join(LOCK_FILE_NAME)).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn test_second_acquire_fails_and_keeps_holder_pid() {
        let temp = TempDir::new().unwrap();
        let _held = StoreLock::acquire(temp.path()).unwrap();

        let second = StoreLock::acquire(temp.path());

        match second {
            Err(FilesError::StoreLocked { pid, .. }) => {
                assert_eq!(pid, Some(std::process::id()));
            }
            other => panic!("expected StoreLocked, got {:?}", other),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp = TempDir::new().unwrap();

        {
            let _lock = StoreLock::acquire(temp.path()).unwrap();
        }

        assert!(StoreLock::acquire(temp.path()).is_ok());
    }
}
