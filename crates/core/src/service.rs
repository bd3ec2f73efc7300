//! Upload, listing, deletion and reconciliation of logical files.
//!
//! [`FileService`] is the only component that decides when a blob may be reclaimed. The rule
//! it enforces is that no blob is physically removed while any record references its digest:
//!
//! - upload runs `put` then `insert` under the digest lock
//! - delete runs `delete_by_id`, `count_by_digest` and, iff the count is zero, `reclaim` under
//!   the same lock
//! - a failed count never reclaims; leaked bytes are preferred over lost bytes
//!
//! Partial failures (an insert failing after a fresh blob write, a reclaim failing after the
//! record is gone) leave orphaned bytes which [`FileService::reconcile`] removes later.

use crate::constants::MAX_FILENAME_CHARS;
use crate::identity::Identity;
use crate::locks::DigestLocks;
use crate::metadata::{FileFilter, FileRecord, MetadataStore};
use crate::{CoreConfig, FileServiceError, FileServiceResult};
use chrono::{SubsecRound, Utc};
use filehub_files::{
    digest_and_rewind, extension_of, BlobLocation, BlobStore, ReclaimOutcome, Sha256Hash,
};
use filehub_types::NonEmptyText;
use filehub_uuid::UuidService;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What a reconciliation pass found and fixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Committed blobs with no referencing record, now reclaimed
    pub orphans_reclaimed: usize,
    /// Unindexed data files and abandoned temp files removed
    pub stray_files_removed: usize,
    /// Records whose bytes are missing; reported only, never deleted
    pub dangling_records: usize,
}

pub struct FileService {
    blobs: Arc<BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    config: CoreConfig,
    locks: DigestLocks,
}

impl FileService {
    pub fn new(blobs: Arc<BlobStore>, metadata: Arc<dyn MetadataStore>, config: CoreConfig) -> Self {
        Self {
            blobs,
            metadata,
            config,
            locks: DigestLocks::new(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    /// Stores an uploaded file and records it.
    ///
    /// `source` must be seekable: it is measured, hashed, rewound and then copied into the
    /// blob store. `declared_size` is checked against the configured maximum before anything
    /// is read, and against the measured size afterwards.
    ///
    /// # Errors
    ///
    /// - [`FileServiceError::Unauthenticated`] when `identity` is `None`; nothing is read
    /// - [`FileServiceError::PayloadTooLarge`] when the declared or measured size exceeds the maximum
    /// - [`FileServiceError::InvalidInput`] for a blank or overlong filename, or a size mismatch
    /// - I/O class errors from hashing, the blob store or the metadata store
    pub fn upload<R: Read + Seek + ?Sized>(
        &self,
        source: &mut R,
        filename: &str,
        content_type: &str,
        declared_size: u64,
        identity: Option<&Identity>,
    ) -> FileServiceResult<FileRecord> {
        let identity = identity.ok_or(FileServiceError::Unauthenticated)?;

        let max = self.config.max_upload_size();
        if declared_size > max {
            return Err(FileServiceError::PayloadTooLarge {
                size: declared_size,
                max,
            });
        }

        let original_filename = NonEmptyText::bounded(filename, MAX_FILENAME_CHARS)
            .map_err(|e| FileServiceError::InvalidInput(format!("filename: {}", e)))?;

        let size = source.seek(SeekFrom::End(0))?;
        if size > max {
            return Err(FileServiceError::PayloadTooLarge { size, max });
        }
        if size != declared_size {
            return Err(FileServiceError::InvalidInput(format!(
                "declared size {} does not match payload size {}",
                declared_size, size
            )));
        }

        let digest = digest_and_rewind(source)?;
        let extension = extension_of(original_filename.as_str());
        let file_type = match content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE.to_string(),
            declared => declared.to_string(),
        };

        let record = self.locks.with_lock(&digest, || -> FileServiceResult<FileRecord> {
            let outcome = self
                .blobs
                .put(&digest, source, size, extension.as_deref())?;
            let created = outcome.is_created();

            let record = FileRecord {
                id: UuidService::new(),
                location: outcome.into_location(),
                original_filename,
                file_type,
                size,
                hash: digest.clone(),
                uploaded_at: Utc::now().trunc_subsecs(6),
            };

            if let Err(e) = self.metadata.insert(&record) {
                if created {
                    tracing::error!(
                        %digest,
                        location = %record.location,
                        error = %e,
                        "record insert failed after blob commit; blob left for reconciliation"
                    );
                }
                return Err(e.into());
            }

            Ok(record)
        })?;

        tracing::info!(
            id = %record.id,
            %digest,
            size,
            user = %identity.username,
            "file uploaded"
        );
        Ok(record)
    }

    /// Records matching `filter`, newest first. Never fails on an empty result.
    pub fn list(
        &self,
        filter: &FileFilter,
        identity: Option<&Identity>,
    ) -> FileServiceResult<Vec<FileRecord>> {
        identity.ok_or(FileServiceError::Unauthenticated)?;
        Ok(self.metadata.query(filter)?)
    }

    /// Deletes a record and reclaims its blob if it was the last reference.
    ///
    /// Once the record is removed the call succeeds: a failing reference count or reclaim is
    /// logged and leaves the blob for [`FileService::reconcile`].
    ///
    /// # Errors
    ///
    /// - [`FileServiceError::Unauthenticated`] when `identity` is `None`; nothing is touched
    /// - [`FileServiceError::NotFound`] when no record has this id
    /// - I/O class errors if the record could not be looked up or removed
    pub fn delete(
        &self,
        id: &UuidService,
        identity: Option<&Identity>,
    ) -> FileServiceResult<FileRecord> {
        let identity = identity.ok_or(FileServiceError::Unauthenticated)?;

        let digest = self
            .metadata
            .find_by_id(id)?
            .map(|record| record.hash)
            .ok_or_else(|| FileServiceError::NotFound(id.to_string()))?;

        let deleted = self.locks.with_lock(&digest, || -> FileServiceResult<FileRecord> {
            let deleted = self
                .metadata
                .delete_by_id(id)?
                .ok_or_else(|| FileServiceError::NotFound(id.to_string()))?;
            self.reclaim_if_unreferenced(&digest);
            Ok(deleted)
        })?;

        tracing::info!(%id, %digest, user = %identity.username, "file deleted");
        Ok(deleted)
    }

    /// Must be called with the digest lock held. Returns true if the blob was reclaimed.
    fn reclaim_if_unreferenced(&self, digest: &Sha256Hash) -> bool {
        match self.metadata.count_by_digest(digest) {
            Ok(0) => match self.blobs.reclaim(digest) {
                Ok(ReclaimOutcome::Reclaimed) => true,
                Ok(ReclaimOutcome::NotFound) => {
                    tracing::warn!(%digest, "no blob to reclaim for unreferenced digest");
                    false
                }
                Err(e) => {
                    tracing::error!(%digest, error = %e, "blob reclaim failed; left for reconciliation");
                    false
                }
            },
            Ok(remaining) => {
                tracing::debug!(%digest, remaining, "blob still referenced");
                false
            }
            Err(e) => {
                tracing::warn!(%digest, error = %e, "reference count failed; blob kept");
                false
            }
        }
    }

    /// Removes storage no record depends on and reports records whose bytes are missing.
    ///
    /// Every committed digest is re-counted under its lock, so a concurrent upload is never
    /// undercut. Unindexed files are only swept once older than `grace`.
    pub fn reconcile(&self, grace: Duration) -> FileServiceResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for digest in self.blobs.digests()? {
            if self
                .locks
                .with_lock(&digest, || self.reclaim_if_unreferenced(&digest))
            {
                tracing::info!(%digest, "reclaimed orphaned blob");
                report.orphans_reclaimed += 1;
            }
        }

        let sweep = self.blobs.sweep_unindexed(grace)?;
        report.stray_files_removed = sweep.stray_blobs + sweep.stale_temp_files;

        for record in self.metadata.query(&FileFilter::default())? {
            if !self.blobs.blob_path(&record.location).is_file() {
                tracing::warn!(
                    id = %record.id,
                    digest = %record.hash,
                    location = %record.location,
                    "record references missing blob"
                );
                report.dangling_records += 1;
            }
        }

        tracing::info!(
            orphans_reclaimed = report.orphans_reclaimed,
            stray_files_removed = report.stray_files_removed,
            dangling_records = report.dangling_records,
            "reconciliation finished"
        );
        Ok(report)
    }

    pub fn read_blob(&self, location: &BlobLocation) -> FileServiceResult<Vec<u8>> {
        Ok(self.blobs.read(location)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{InMemoryMetadataStore, MetadataError, MetadataResult};
    use crate::ErrorKind;
    use filehub_files::digest_bytes;
    use std::collections::HashSet;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    const MAX: u64 = 1024;

    /// Metadata store whose insert and count can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryMetadataStore,
        fail_insert: AtomicBool,
        fail_count: AtomicBool,
    }

    impl MetadataStore for FlakyStore {
        fn insert(&self, record: &FileRecord) -> MetadataResult<()> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(MetadataError::LockPoisoned);
            }
            self.inner.insert(record)
        }

        fn delete_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>> {
            self.inner.delete_by_id(id)
        }

        fn find_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>> {
            self.inner.find_by_id(id)
        }

        fn count_by_digest(&self, digest: &Sha256Hash) -> MetadataResult<u64> {
            if self.fail_count.load(Ordering::SeqCst) {
                return Err(MetadataError::LockPoisoned);
            }
            self.inner.count_by_digest(digest)
        }

        fn query(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRecord>> {
            self.inner.query(filter)
        }
    }

    struct Fixture {
        _temp: TempDir,
        store: Arc<FlakyStore>,
        service: Arc<FileService>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let upload_dir = temp.path().join("uploads");
        let blobs = Arc::new(BlobStore::open(&upload_dir).unwrap());
        let store = Arc::new(FlakyStore::default());
        let config = CoreConfig::new(
            upload_dir,
            PathBuf::from(":memory:"),
            MAX,
            Duration::from_secs(10),
            Duration::from_secs(3600),
        )
        .unwrap();
        let service = Arc::new(FileService::new(blobs, store.clone(), config));
        Fixture {
            _temp: temp,
            store,
            service,
        }
    }

    fn alice() -> Identity {
        Identity::new(UuidService::new(), NonEmptyText::new("alice").unwrap())
    }

    fn upload(service: &FileService, name: &str, bytes: &[u8]) -> FileServiceResult<FileRecord> {
        service.upload(
            &mut Cursor::new(bytes.to_vec()),
            name,
            "text/plain",
            bytes.len() as u64,
            Some(&alice()),
        )
    }

    /// Committed blob digests equal the digests referenced by records.
    fn assert_reference_integrity(f: &Fixture) {
        let blobs: HashSet<_> = f.service.blob_store().digests().unwrap().into_iter().collect();
        let records: HashSet<_> = f
            .store
            .query(&FileFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.hash)
            .collect();
        assert_eq!(blobs, records);
    }

    fn blob_file_count(f: &Fixture) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            std::fs::read_dir(dir)
                .unwrap()
                .flatten()
                .map(|e| {
                    let path = e.path();
                    if path.is_dir() {
                        walk(&path)
                    } else {
                        1
                    }
                })
                .sum()
        }
        walk(&f.service.blob_store().blobs_directory())
    }

    #[test]
    fn test_upload_round_trip_boundary_sizes() {
        let f = fixture();

        for len in [0usize, 1, MAX as usize] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let record = upload(&f.service, "payload.bin", &payload).unwrap();

            assert_eq!(record.size, len as u64);
            assert_eq!(record.hash, digest_bytes(&payload));
            assert_eq!(f.service.read_blob(&record.location).unwrap(), payload);
        }
        assert_reference_integrity(&f);
    }

    #[test]
    fn test_upload_over_maximum_is_rejected_before_writing() {
        let f = fixture();
        let payload = vec![7u8; MAX as usize + 1];

        let err = upload(&f.service, "big.bin", &payload).unwrap_err();

        assert!(matches!(
            err,
            FileServiceError::PayloadTooLarge { size, max } if size == MAX + 1 && max == MAX
        ));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(blob_file_count(&f), 0);
        assert!(f.store.query(&FileFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_understated_declared_size_is_caught() {
        let f = fixture();
        let payload = vec![1u8; MAX as usize + 10];

        let err = f
            .service
            .upload(&mut Cursor::new(payload), "lie.bin", "", 10, Some(&alice()))
            .unwrap_err();

        assert!(matches!(err, FileServiceError::PayloadTooLarge { .. }));
        assert_eq!(blob_file_count(&f), 0);
    }

    #[test]
    fn test_declared_size_mismatch_is_invalid_input() {
        let f = fixture();

        let err = f
            .service
            .upload(&mut Cursor::new(b"abc".to_vec()), "a.txt", "", 4, Some(&alice()))
            .unwrap_err();

        assert!(matches!(err, FileServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_blank_filename_is_invalid_input() {
        let f = fixture();

        let err = upload(&f.service, "   ", b"abc").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_blank_content_type_defaults_to_octet_stream() {
        let f = fixture();

        let record = f
            .service
            .upload(&mut Cursor::new(b"abc".to_vec()), "a", " ", 3, Some(&alice()))
            .unwrap();

        assert_eq!(record.file_type, "application/octet-stream");
    }

    #[test]
    fn test_operations_without_identity_have_no_side_effects() {
        let f = fixture();
        let existing = upload(&f.service, "keep.txt", b"keep").unwrap();

        let up = f
            .service
            .upload(&mut Cursor::new(b"new".to_vec()), "new.txt", "text/plain", 3, None)
            .unwrap_err();
        let list = f.service.list(&FileFilter::default(), None).unwrap_err();
        let del = f.service.delete(&existing.id, None).unwrap_err();

        for err in [up, list, del] {
            assert_eq!(err.kind(), ErrorKind::Auth);
        }
        assert_eq!(blob_file_count(&f), 1);
        assert_eq!(f.store.query(&FileFilter::default()).unwrap(), vec![existing]);
    }

    #[test]
    fn test_identical_content_is_stored_once() {
        let f = fixture();

        let first = upload(&f.service, "a.txt", b"same bytes").unwrap();
        let second = upload(&f.service, "b.txt", b"same bytes").unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.location, second.location);
        assert_eq!(blob_file_count(&f), 1);
        assert_eq!(f.store.count_by_digest(&first.hash).unwrap(), 2);
    }

    #[test]
    fn test_concurrent_identical_uploads_share_one_blob() {
        let f = fixture();
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let service = Arc::clone(&f.service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    upload(&service, &format!("copy-{}.txt", i), b"concurrent").unwrap()
                })
            })
            .collect();
        let records: Vec<FileRecord> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), threads);
        assert!(records.iter().all(|r| r.location == records[0].location));
        assert_eq!(blob_file_count(&f), 1);
        assert_reference_integrity(&f);
    }

    #[test]
    fn test_blob_survives_until_last_reference_is_deleted() {
        let f = fixture();
        let records: Vec<_> = (0..3)
            .map(|i| upload(&f.service, &format!("{}.txt", i), b"shared").unwrap())
            .collect();
        let path = f.service.blob_store().blob_path(&records[0].location);

        f.service.delete(&records[0].id, Some(&alice())).unwrap();
        f.service.delete(&records[1].id, Some(&alice())).unwrap();
        assert!(path.is_file());
        assert_reference_integrity(&f);

        f.service.delete(&records[2].id, Some(&alice())).unwrap();
        assert!(!path.exists());
        assert!(!f.service.blob_store().exists(&records[2].hash).unwrap());
        assert_reference_integrity(&f);
    }

    #[test]
    fn test_delete_unknown_id_is_not_found() {
        let f = fixture();

        let err = f.service.delete(&UuidService::new(), Some(&alice())).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let f = fixture();
        let record = upload(&f.service, "once.txt", b"once").unwrap();

        assert_eq!(f.service.delete(&record.id, Some(&alice())).unwrap(), record);
        let err = f.service.delete(&record.id, Some(&alice())).unwrap_err();

        assert!(matches!(err, FileServiceError::NotFound(_)));
    }

    #[test]
    fn test_count_failure_keeps_blob_and_still_deletes_record() {
        let f = fixture();
        let record = upload(&f.service, "only.txt", b"only copy").unwrap();
        let path = f.service.blob_store().blob_path(&record.location);

        f.store.fail_count.store(true, Ordering::SeqCst);
        f.service.delete(&record.id, Some(&alice())).unwrap();

        assert!(f.store.find_by_id(&record.id).unwrap().is_none());
        assert!(path.is_file());

        f.store.fail_count.store(false, Ordering::SeqCst);
        let report = f.service.reconcile(Duration::from_secs(3600)).unwrap();

        assert_eq!(report.orphans_reclaimed, 1);
        assert!(!path.exists());
        assert_reference_integrity(&f);
    }

    #[test]
    fn test_insert_failure_leaves_orphan_for_reconciliation() {
        let f = fixture();

        f.store.fail_insert.store(true, Ordering::SeqCst);
        let err = upload(&f.service, "lost.txt", b"orphan bytes").unwrap_err();
        f.store.fail_insert.store(false, Ordering::SeqCst);

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(f.service.blob_store().exists(&digest_bytes(b"orphan bytes")).unwrap());

        let report = f.service.reconcile(Duration::from_secs(3600)).unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                orphans_reclaimed: 1,
                stray_files_removed: 0,
                dangling_records: 0
            }
        );
        assert_reference_integrity(&f);
    }

    #[test]
    fn test_reconcile_keeps_referenced_blobs_and_reports_dangling_records() {
        let f = fixture();
        let kept = upload(&f.service, "kept.txt", b"kept").unwrap();
        let broken = upload(&f.service, "broken.txt", b"broken").unwrap();
        std::fs::remove_file(f.service.blob_store().blob_path(&broken.location)).unwrap();

        let report = f.service.reconcile(Duration::from_secs(3600)).unwrap();

        assert_eq!(report.orphans_reclaimed, 0);
        assert_eq!(report.dangling_records, 1);
        assert_eq!(f.service.read_blob(&kept.location).unwrap(), b"kept");
        assert!(f.store.find_by_id(&broken.id).unwrap().is_some());
    }

    #[test]
    fn test_delete_racing_upload_never_strands_a_record() {
        let f = fixture();

        for round in 0..25 {
            let content = format!("contended-{}", round).into_bytes();
            let original = upload(&f.service, "first.txt", &content).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let deleter = {
                let service = Arc::clone(&f.service);
                let barrier = Arc::clone(&barrier);
                let id = original.id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    service.delete(&id, Some(&alice())).unwrap();
                })
            };
            let uploader = {
                let service = Arc::clone(&f.service);
                let barrier = Arc::clone(&barrier);
                let content = content.clone();
                thread::spawn(move || {
                    barrier.wait();
                    upload(&service, "second.txt", &content).unwrap()
                })
            };
            deleter.join().unwrap();
            let survivor = uploader.join().unwrap();

            assert_eq!(f.service.read_blob(&survivor.location).unwrap(), content);
            assert_reference_integrity(&f);
        }
    }

    #[test]
    fn test_list_returns_newest_first_and_filters() {
        let f = fixture();
        let a = upload(&f.service, "alpha.txt", &[1u8; 100]).unwrap();
        thread::sleep(Duration::from_millis(2));
        let b = upload(&f.service, "beta.txt", &[2u8; 500]).unwrap();

        let all = f.service.list(&FileFilter::default(), Some(&alice())).unwrap();
        assert_eq!(all, vec![b.clone(), a]);

        let filtered = f
            .service
            .list(
                &FileFilter::from_query_pairs([("size_min", "200"), ("search", "BETA")]),
                Some(&alice()),
            )
            .unwrap();
        assert_eq!(filtered, vec![b]);

        let none = f
            .service
            .list(
                &FileFilter::from_query_pairs([("search", "gamma")]),
                Some(&alice()),
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_second_service_cannot_share_a_store_in_use() {
        let Fixture {
            _temp,
            store,
            service,
        } = fixture();
        let config = service.config().clone();

        // Leave a committed blob with no record, then let a second upload reuse it.
        store.fail_insert.store(true, Ordering::SeqCst);
        upload(&service, "first.txt", b"shared bytes").unwrap_err();
        store.fail_insert.store(false, Ordering::SeqCst);

        assert!(matches!(
            BlobStore::open(config.upload_dir()),
            Err(filehub_files::FilesError::StoreLocked { .. })
        ));

        let record = upload(&service, "second.txt", b"shared bytes").unwrap();
        drop(service);

        let blobs = Arc::new(BlobStore::open(config.upload_dir()).unwrap());
        let maintenance = FileService::new(blobs, store.clone(), config);
        let report = maintenance.reconcile(Duration::from_secs(3600)).unwrap();

        assert_eq!(report.orphans_reclaimed, 0);
        assert_eq!(report.dangling_records, 0);
        assert_eq!(maintenance.read_blob(&record.location).unwrap(), b"shared bytes");
    }
}
