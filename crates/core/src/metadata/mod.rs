//! Logical upload records.
//!
//! One [`FileRecord`] exists per upload, and several records may share a digest. The
//! [`MetadataStore`] trait is the whole contract the file service relies on; the reference
//! count used to decide a reclaim comes from [`MetadataStore::count_by_digest`], never from
//! the blob store.

mod memory;
mod sqlite;

pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

use crate::constants::UPLOADS_URL_PREFIX;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use filehub_files::{BlobLocation, Sha256Hash};
use filehub_types::NonEmptyText;
use filehub_uuid::UuidService;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("record already exists: {0}")]
    DuplicateId(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("metadata store lock poisoned")]
    LockPoisoned,
}

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// A single logical upload.
///
/// `location` is the durable link to the bytes; `hash` is kept for reference counting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: UuidService,
    pub location: BlobLocation,
    pub original_filename: NonEmptyText,
    pub file_type: String,
    pub size: u64,
    pub hash: Sha256Hash,
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    /// Public URL path of the stored bytes, e.g. `/uploads/55/0e/550e….pdf`.
    pub fn public_path(&self) -> String {
        format!("{}/{}", UPLOADS_URL_PREFIX, self.location)
    }
}

/// Listing criteria. A `None` field places no constraint on that attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileFilter {
    /// Case-insensitive substring of the original filename
    pub search: Option<String>,
    /// Case-insensitive substring of the declared content type
    pub file_type: Option<String>,
    /// Inclusive lower size bound, in bytes
    pub size_min: Option<u64>,
    /// Inclusive upper size bound, in bytes
    pub size_max: Option<u64>,
    /// Uploaded on or after the start of this day (UTC)
    pub uploaded_after: Option<NaiveDate>,
    /// Uploaded on or before the end of this day (UTC)
    pub uploaded_before: Option<NaiveDate>,
}

impl FileFilter {
    /// Builds a filter from raw query-string pairs.
    ///
    /// Unknown keys, blank values and values that fail to parse are ignored, leaving that
    /// attribute unconstrained. Dates use `YYYY-MM-DD`.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "search" => filter.search = Some(value.to_string()),
                "file_type" => filter.file_type = Some(value.to_string()),
                "size_min" => filter.size_min = value.parse().ok(),
                "size_max" => filter.size_max = value.parse().ok(),
                "uploaded_after" => filter.uploaded_after = parse_day(value),
                "uploaded_before" => filter.uploaded_before = parse_day(value),
                _ => {}
            }
        }
        filter
    }

    /// Earliest admissible `uploaded_at`, inclusive.
    pub fn uploaded_from(&self) -> Option<DateTime<Utc>> {
        self.uploaded_after.map(start_of_day)
    }

    /// First instant past the admissible range, exclusive. `None` when unbounded.
    pub fn uploaded_until(&self) -> Option<DateTime<Utc>> {
        self.uploaded_before
            .and_then(|day| day.succ_opt())
            .map(start_of_day)
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        self.matches_text(record)
            && self.size_min.map_or(true, |min| record.size >= min)
            && self.size_max.map_or(true, |max| record.size <= max)
            && self
                .uploaded_from()
                .map_or(true, |from| record.uploaded_at >= from)
            && self
                .uploaded_until()
                .map_or(true, |until| record.uploaded_at < until)
    }

    /// Only the two substring criteria.
    pub(crate) fn matches_text(&self, record: &FileRecord) -> bool {
        contains_ignore_case(record.original_filename.as_str(), self.search.as_deref())
            && contains_ignore_case(&record.file_type, self.file_type.as_deref())
    }
}

fn contains_ignore_case(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
        None => true,
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Storage for [`FileRecord`]s.
///
/// Implementations block on I/O; async callers run them on a blocking pool.
pub trait MetadataStore: Send + Sync {
    fn insert(&self, record: &FileRecord) -> MetadataResult<()>;

    /// Removes and returns the record, or `None` if no record has this id.
    fn delete_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>>;

    fn find_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>>;

    /// Number of records currently referencing `digest`.
    fn count_by_digest(&self, digest: &Sha256Hash) -> MetadataResult<u64>;

    /// Records matching `filter`, newest upload first.
    fn query(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRecord>>;
}


#[cfg(test)]
mod tests {
    use super::test_support::{at, record};
    use super::*;

    #[test]
    fn test_from_query_pairs_parses_known_keys() {
        let filter = FileFilter::from_query_pairs([
            ("search", "report"),
            ("file_type", "pdf"),
            ("size_min", "200"),
            ("size_max", "1000"),
            ("uploaded_after", "2024-03-01"),
            ("uploaded_before", "2024-03-31"),
            ("page", "2"),
        ]);

        assert_eq!(filter.search.as_deref(), Some("report"));
        assert_eq!(filter.file_type.as_deref(), Some("pdf"));
        assert_eq!(filter.size_min, Some(200));
        assert_eq!(filter.size_max, Some(1000));
        assert_eq!(filter.uploaded_after, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(filter.uploaded_before, NaiveDate::from_ymd_opt(2024, 3, 31));
    }

    #[test]
    fn test_from_query_pairs_ignores_unparsable_values() {
        let filter = FileFilter::from_query_pairs([
            ("size_min", "lots"),
            ("size_max", "-5"),
            ("uploaded_after", "yesterday"),
            ("uploaded_before", "2024-13-40"),
            ("search", "   "),
        ]);

        assert_eq!(filter, FileFilter::default());
    }

    #[test]
    fn test_uploaded_before_includes_whole_named_day() {
        let filter = FileFilter {
            uploaded_before: NaiveDate::from_ymd_opt(2024, 3, 2),
            ..FileFilter::default()
        };

        assert!(filter.matches(&record("a", b"a", 1, at(2024, 3, 2, 23, 59))));
        assert!(!filter.matches(&record("b", b"b", 1, at(2024, 3, 3, 0, 0))));
    }

    #[test]
    fn test_uploaded_after_starts_at_midnight() {
        let filter = FileFilter {
            uploaded_after: NaiveDate::from_ymd_opt(2024, 3, 2),
            ..FileFilter::default()
        };

        assert!(filter.matches(&record("a", b"a", 1, at(2024, 3, 2, 0, 0))));
        assert!(!filter.matches(&record("b", b"b", 1, at(2024, 3, 1, 23, 59))));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let filter = FileFilter {
            search: Some("ÉTÉ".into()),
            ..FileFilter::default()
        };

        assert!(filter.matches(&record("photos-été.jpg", b"x", 1, at(2024, 1, 1, 0, 0))));
    }

    #[test]
    fn test_public_path() {
        let r = record("a.bin", b"a", 1, at(2024, 1, 1, 0, 0));

        assert_eq!(r.public_path(), format!("/uploads/{}", r.location));
    }
}
