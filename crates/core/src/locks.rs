//! Per-digest critical sections.
//!
//! Upload (put + insert), delete (delete + count + reclaim) and reconciliation all touch the
//! blob for one digest. Running each of those sequences under the digest's lock means a
//! reference count taken inside the section stays true until the section ends, so a blob is
//! never reclaimed while a record for its digest is being inserted.

use dashmap::DashMap;
use filehub_files::Sha256Hash;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct DigestLocks {
    locks: DashMap<Sha256Hash, Arc<Mutex<()>>>,
}

impl DigestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `digest`.
    ///
    /// Different digests never contend. The map entry is dropped once no caller holds or
    /// awaits it.
    pub fn with_lock<T>(&self, digest: &Sha256Hash, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(digest.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            // The guarded value is `()`, so a panic in another holder leaves nothing to repair.
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        drop(lock);
        self.locks
            .remove_if(digest, |_, entry| Arc::strong_count(entry) == 1);

        result
    }

    /// Number of digests with a live lock entry.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}
