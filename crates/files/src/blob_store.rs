//! Digest-keyed physical blob storage
//!
//! [`BlobStore`] maps a content digest to exactly one physical file. It offers
//! create-if-absent writes and unconditional reclaim; deciding *when* a reclaim is safe is
//! the caller's job, because only the caller knows how many logical records reference a digest.
//!
//! # Commit protocol
//!
//! A `put` proceeds in three steps:
//!
//! 1. stream the source into a fresh file under `tmp/`, hashing and counting as it goes,
//!    then fsync it
//! 2. rename it (no-clobber) to a fresh random locator under `blobs/`
//! 3. create the digest pointer under `index/` with an atomic no-clobber link
//!
//! Step 3 is the commit point. Until it succeeds, [`BlobStore::exists`] reports false and no
//! locator has been handed out. When two writers race on one digest, exactly one link wins;
//! the loser deletes its own data file and returns the winner's locator.
//!
//! A crash between steps 2 and 3 leaves an unreferenced data file behind. Such files, and
//! abandoned temp files, are removed by [`BlobStore::sweep_unindexed`] once older than a grace
//! period.
//!
//! # Reclaim
//!
//! The pointer is removed first, then the data file. If the data file cannot be removed the
//! blob is already invisible and the stray file is left for the sweep.

use crate::constants::{
    BLOBS_FOLDER_NAME, COPY_BUFFER_SIZE, HASH_ALGORITHM, INDEX_FOLDER_NAME, MAX_EXTENSION_LEN,
    TMP_FOLDER_NAME,
};
use crate::store_lock::StoreLock;
use crate::{FilesError, FilesResult, Sha256Hash};
use filehub_uuid::UuidService;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Relative locator of a committed blob, e.g. `55/0e/550e8400e29b41d4a716446655440000.pdf`.
///
/// Locators are always generated from a fresh random UUID plus the sanitised original
/// extension, never from a filename or a digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobLocation(String);

impl BlobLocation {
    /// Validates a locator read back from storage or a request.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidLocation`] unless the input has the exact shape
    /// `<s1>/<s2>/<uuid>[.<ext>]` with shards matching the UUID prefix. This rules out
    /// absolute paths and `..` components.
    pub fn parse(input: &str) -> FilesResult<Self> {
        let invalid = || FilesError::InvalidLocation(input.to_owned());

        let mut parts = input.split('/');
        let (Some(s1), Some(s2), Some(leaf), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let (stem, extension) = match leaf.split_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (leaf, None),
        };

        if !UuidService::is_canonical(stem) || s1 != &stem[0..2] || s2 != &stem[2..4] {
            return Err(invalid());
        }
        if let Some(ext) = extension {
            if sanitize_extension(ext).as_deref() != Some(ext) {
                return Err(invalid());
            }
        }

        Ok(Self(input.to_owned()))
    }

    fn generate(extension: Option<&str>) -> Self {
        let extension = extension.and_then(sanitize_extension);
        Self(UuidService::new().sharded_name(extension.as_deref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of [`BlobStore::put`].
///
/// Both variants carry the authoritative locator for the digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// This call wrote and committed the blob.
    Created(BlobLocation),
    /// A blob with this digest was already committed; nothing was written.
    AlreadyExists(BlobLocation),
}

impl PutOutcome {
    pub fn location(&self) -> &BlobLocation {
        match self {
            PutOutcome::Created(location) | PutOutcome::AlreadyExists(location) => location,
        }
    }

    pub fn into_location(self) -> BlobLocation {
        match self {
            PutOutcome::Created(location) | PutOutcome::AlreadyExists(location) => location,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, PutOutcome::Created(_))
    }
}

/// Result of [`BlobStore::reclaim`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Reclaimed,
    NotFound,
}

/// Counts of files removed by [`BlobStore::sweep_unindexed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Data files under `blobs/` that no digest pointer referenced
    pub stray_blobs: usize,
    /// Abandoned files under `tmp/`
    pub stale_temp_files: usize,
}

/// Filesystem-backed blob store rooted at the upload directory.
///
/// The store is cheap to share behind an `Arc`; it holds no in-memory state besides its root
/// and the root's lock, so every answer reflects what is on disk. At most one `BlobStore` per
/// root is open at a time, across processes.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    _lock: StoreLock,
}

impl BlobStore {
    /// Opens (creating if needed) a blob store under `root`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - `root` exists but is not a directory
    /// - the `blobs/`, `index/` or `tmp/` directories cannot be created
    /// - path canonicalisation fails
    /// - another open store holds the root ([`FilesError::StoreLocked`])
    pub fn open(root: &Path) -> FilesResult<Self> {
        if root.exists() && !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        for folder in [BLOBS_FOLDER_NAME, INDEX_FOLDER_NAME, TMP_FOLDER_NAME] {
            let dir = root.join(folder);
            fs::create_dir_all(&dir).map_err(|e| {
                FilesError::InvalidRootDirectory(format!(
                    "Cannot create {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let root = root.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        let lock = StoreLock::acquire(&root)?;

        tracing::info!(path = %root.display(), "opened blob store");

        Ok(Self { root, _lock: lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding committed blob bytes; this is what gets served under `/uploads/`.
    pub fn blobs_directory(&self) -> PathBuf {
        self.root.join(BLOBS_FOLDER_NAME)
    }

    fn index_directory(&self) -> PathBuf {
        self.root.join(INDEX_FOLDER_NAME).join(HASH_ALGORITHM)
    }

    fn tmp_directory(&self) -> PathBuf {
        self.root.join(TMP_FOLDER_NAME)
    }

    fn index_path(&self, digest: &Sha256Hash) -> PathBuf {
        let (h1, h2) = digest.shards();
        self.index_directory().join(h1).join(h2).join(digest.as_str())
    }

    /// Absolute path of the data file for `location`.
    pub fn blob_path(&self, location: &BlobLocation) -> PathBuf {
        self.blobs_directory().join(location.as_str())
    }

    /// True iff a blob with this digest is currently committed.
    pub fn exists(&self, digest: &Sha256Hash) -> FilesResult<bool> {
        Ok(self.locate(digest)?.is_some())
    }

    /// Locator of the committed blob for `digest`, if any.
    pub fn locate(&self, digest: &Sha256Hash) -> FilesResult<Option<BlobLocation>> {
        let pointer = self.index_path(digest);
        match fs::read_to_string(&pointer) {
            Ok(contents) => BlobLocation::parse(contents.trim()).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_context(e, "read digest pointer", &pointer)),
        }
    }

    /// Materialises a blob for `digest` unless one is already committed.
    ///
    /// `source` must yield exactly `size` bytes hashing to `digest`. The caller is expected to
    /// have computed `digest` from the same source (see [`crate::digest_and_rewind`]); the
    /// bytes are re-hashed while being written so a source that changed underneath is rejected
    /// instead of being stored under the wrong address.
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - the source yields a different number of bytes (`SizeMismatch`)
    /// - the bytes do not hash to `digest` (`DigestMismatch`)
    /// - any write, fsync, rename or link fails (`Io`)
    ///
    /// On error nothing new is visible through [`BlobStore::exists`].
    pub fn put<R: Read + ?Sized>(
        &self,
        digest: &Sha256Hash,
        source: &mut R,
        size: u64,
        extension: Option<&str>,
    ) -> FilesResult<PutOutcome> {
        if let Some(existing) = self.locate(digest)? {
            tracing::debug!(%digest, location = %existing, "blob already committed");
            return Ok(PutOutcome::AlreadyExists(existing));
        }

        let staged = self.stage(digest, source, size)?;

        let location = BlobLocation::generate(extension);
        let blob_path = self.blob_path(&location);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_context(e, "create blob directory", parent))?;
        }
        staged
            .persist_noclobber(&blob_path)
            .map_err(|e| io_context(e.error, "move staged blob into place", &blob_path))?;

        match self.commit_pointer(digest, &location) {
            Ok(true) => {
                tracing::info!(%digest, %location, size, "committed new blob");
                Ok(PutOutcome::Created(location))
            }
            Ok(false) => {
                discard(&blob_path);
                let winner = self.locate(digest)?.ok_or_else(|| {
                    FilesError::Io(io::Error::new(
                        ErrorKind::Other,
                        format!("digest pointer for {} vanished after commit race", digest),
                    ))
                })?;
                tracing::debug!(%digest, location = %winner, "lost commit race, reusing blob");
                Ok(PutOutcome::AlreadyExists(winner))
            }
            Err(e) => {
                discard(&blob_path);
                Err(e)
            }
        }
    }

    /// Streams `source` into a temp file, checking byte count and digest.
    fn stage<R: Read + ?Sized>(
        &self,
        digest: &Sha256Hash,
        source: &mut R,
        size: u64,
    ) -> FilesResult<NamedTempFile> {
        let tmp_dir = self.tmp_directory();
        let mut staged = tempfile::Builder::new()
            .prefix(".put-")
            .tempfile_in(&tmp_dir)
            .map_err(|e| io_context(e, "create staging file", &tmp_dir))?;

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FilesError::Io(e)),
            };
            hasher.update(&buffer[..n]);
            staged
                .write_all(&buffer[..n])
                .map_err(|e| io_context(e, "write staging file", staged.path()))?;
            written += n as u64;
        }

        if written != size {
            return Err(FilesError::SizeMismatch {
                expected: size,
                actual: written,
            });
        }

        let actual: [u8; 32] = hasher.finalize().into();
        let actual = Sha256Hash::from_bytes(&actual);
        if &actual != digest {
            return Err(FilesError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        staged
            .as_file()
            .sync_all()
            .map_err(|e| io_context(e, "sync staging file", staged.path()))?;

        Ok(staged)
    }

    /// Creates the digest pointer if absent. Returns `false` when another writer got there first.
    fn commit_pointer(&self, digest: &Sha256Hash, location: &BlobLocation) -> FilesResult<bool> {
        let pointer = self.index_path(digest);
        if let Some(parent) = pointer.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_context(e, "create index directory", parent))?;
        }

        let tmp_dir = self.tmp_directory();
        let mut staged = tempfile::Builder::new()
            .prefix(".ptr-")
            .tempfile_in(&tmp_dir)
            .map_err(|e| io_context(e, "create pointer staging file", &tmp_dir))?;
        staged
            .write_all(location.as_str().as_bytes())
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| io_context(e, "write pointer staging file", staged.path()))?;

        match staged.persist_noclobber(&pointer) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_context(e.error, "commit digest pointer", &pointer)),
        }
    }

    /// Deletes the blob for `digest`.
    ///
    /// The caller must already have established that nothing references `digest`; this method
    /// does no reference counting of its own.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the pointer or the data file cannot be removed. If only the
    /// data file fails, the blob is already invisible and the file is left for
    /// [`BlobStore::sweep_unindexed`].
    pub fn reclaim(&self, digest: &Sha256Hash) -> FilesResult<ReclaimOutcome> {
        let Some(location) = self.locate(digest)? else {
            return Ok(ReclaimOutcome::NotFound);
        };

        let pointer = self.index_path(digest);
        match fs::remove_file(&pointer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReclaimOutcome::NotFound),
            Err(e) => return Err(io_context(e, "remove digest pointer", &pointer)),
        }

        let blob_path = self.blob_path(&location);
        match fs::remove_file(&blob_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(%digest, %location, "blob data already missing at reclaim");
            }
            Err(e) => return Err(io_context(e, "remove blob data", &blob_path)),
        }

        tracing::info!(%digest, %location, "reclaimed blob");
        Ok(ReclaimOutcome::Reclaimed)
    }

    /// Opens the data file at `location` for reading.
    pub fn open_blob(&self, location: &BlobLocation) -> FilesResult<File> {
        let path = self.blob_path(location);
        File::open(&path).map_err(|e| io_context(e, "open blob", &path))
    }

    /// Reads the full contents of the blob at `location`.
    pub fn read(&self, location: &BlobLocation) -> FilesResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open_blob(location)?
            .read_to_end(&mut bytes)
            .map_err(|e| io_context(e, "read blob", &self.blob_path(location)))?;
        Ok(bytes)
    }

    /// Every digest with a committed pointer.
    pub fn digests(&self) -> FilesResult<Vec<Sha256Hash>> {
        let mut digests = Vec::new();
        for path in files_two_levels_down(&self.index_directory())? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match Sha256Hash::parse(name) {
                Ok(digest) => digests.push(digest),
                Err(_) => tracing::warn!(path = %path.display(), "ignoring foreign file in index"),
            }
        }
        digests.sort();
        Ok(digests)
    }

    /// Removes data files no pointer references, and abandoned temp files, older than `grace`.
    ///
    /// `grace` must comfortably exceed the longest possible `put`, otherwise a write that has
    /// renamed its data but not yet committed its pointer could be swept.
    pub fn sweep_unindexed(&self, grace: Duration) -> FilesResult<SweepReport> {
        let mut referenced = HashSet::new();
        for digest in self.digests()? {
            if let Some(location) = self.locate(&digest)? {
                referenced.insert(location.0);
            }
        }

        let mut report = SweepReport::default();
        let blobs_dir = self.blobs_directory();
        for path in files_two_levels_down(&blobs_dir)? {
            let relative = path
                .strip_prefix(&blobs_dir)
                .ok()
                .and_then(|p| p.to_str())
                .map(|p| p.replace(std::path::MAIN_SEPARATOR, "/"));
            let Some(relative) = relative else {
                continue;
            };
            if referenced.contains(&relative) || !older_than(&path, grace) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(location = %relative, "removed unreferenced blob data");
                    report.stray_blobs += 1;
                }
                Err(e) => tracing::warn!(location = %relative, error = %e, "failed to remove stray blob"),
            }
        }

        let tmp_dir = self.tmp_directory();
        let entries = fs::read_dir(&tmp_dir).map_err(|e| io_context(e, "list temp files", &tmp_dir))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !older_than(&path, grace) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => report.stale_temp_files += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file"),
            }
        }

        Ok(report)
    }
}

/// Extension of `filename` as it would be kept on a blob locator, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(sanitize_extension)
}

fn sanitize_extension(ext: &str) -> Option<String> {
    let acceptable = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.bytes().all(|b| b.is_ascii_alphanumeric());
    acceptable.then(|| ext.to_ascii_lowercase())
}

fn older_than(path: &Path, grace: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= grace)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to discard uncommitted blob");
    }
}

/// Regular files at `<dir>/<a>/<b>/<file>`.
fn files_two_levels_down(dir: &Path) -> FilesResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let level1 = match fs::read_dir(dir) {
        Ok(it) => it,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(io_context(e, "list directory", dir)),
    };
    for s1 in level1.flatten() {
        let s1_path = s1.path();
        if !s1_path.is_dir() {
            continue;
        }
        let level2 = fs::read_dir(&s1_path).map_err(|e| io_context(e, "list directory", &s1_path))?;
        for s2 in level2.flatten() {
            let s2_path = s2.path();
            if !s2_path.is_dir() {
                continue;
            }
            let leaves =
                fs::read_dir(&s2_path).map_err(|e| io_context(e, "list directory", &s2_path))?;
            for leaf in leaves.flatten() {
                let leaf_path = leaf.path();
                if leaf_path.is_file() {
                    files.push(leaf_path);
                }
            }
        }
    }
    Ok(files)
}

fn io_context(e: io::Error, action: &str, path: &Path) -> FilesError {
    FilesError::Io(io::Error::new(
        e.kind(),
        format!("Failed to {} {}: {}", action, path.display(), e),
    ))
}
