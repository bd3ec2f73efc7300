use super::{FileFilter, FileRecord, MetadataError, MetadataResult, MetadataStore};
use filehub_files::Sha256Hash;
use filehub_uuid::UuidService;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-local metadata store, kept in insertion order.
///
/// Substitutable for [`super::SqliteMetadataStore`] in tests and for throwaway instances.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<Vec<FileRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> MetadataResult<RwLockReadGuard<'_, Vec<FileRecord>>> {
        self.records.read().map_err(|_| MetadataError::LockPoisoned)
    }

    fn write(&self) -> MetadataResult<RwLockWriteGuard<'_, Vec<FileRecord>>> {
        self.records.write().map_err(|_| MetadataError::LockPoisoned)
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn insert(&self, record: &FileRecord) -> MetadataResult<()> {
        let mut records = self.write()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(MetadataError::DuplicateId(record.id.to_string()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn delete_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>> {
        let mut records = self.write()?;
        Ok(records
            .iter()
            .position(|r| &r.id == id)
            .map(|index| records.remove(index)))
    }

    fn find_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>> {
        Ok(self.read()?.iter().find(|r| &r.id == id).cloned())
    }

    fn count_by_digest(&self, digest: &Sha256Hash) -> MetadataResult<u64> {
        Ok(self.read()?.iter().filter(|r| &r.hash == digest).count() as u64)
    }

    fn query(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRecord>> {
        // Reverse first so that, after the stable sort, equal timestamps list newest insert first.
        let mut matched: Vec<FileRecord> = self
            .read()?
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::test_support::exercise_store;

    #[test]
    fn test_in_memory_store_contract() {
        exercise_store(&InMemoryMetadataStore::new());
    }
}
