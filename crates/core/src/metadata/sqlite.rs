use super::{FileFilter, FileRecord, MetadataError, MetadataResult, MetadataStore};
use chrono::{DateTime, Utc};
use filehub_files::{BlobLocation, Sha256Hash};
use filehub_types::NonEmptyText;
use filehub_uuid::UuidService;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    location TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    file_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    hash TEXT NOT NULL,
    uploaded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);
CREATE INDEX IF NOT EXISTS idx_files_uploaded_at ON files(uploaded_at);
"#;

const COLUMNS: &str = "id, location, original_filename, file_type, size, hash, uploaded_at";

/// SQLite-backed metadata store.
///
/// `uploaded_at` is stored as microseconds since the Unix epoch. Size and date criteria are
/// evaluated in SQL; the substring criteria are applied afterwards with Unicode-aware case
/// folding, which SQLite's `lower()` does not provide.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> MetadataResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        tracing::info!(path = %path.display(), "opened metadata database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> MetadataResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> MetadataResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MetadataResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MetadataError::LockPoisoned)
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn insert(&self, record: &FileRecord) -> MetadataResult<()> {
        let size = i64::try_from(record.size).map_err(|_| MetadataError::Corrupt {
            id: record.id.to_string(),
            reason: format!("size {} does not fit the database column", record.size),
        })?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO files (id, location, original_filename, file_type, size, hash, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.location.as_str(),
                record.original_filename.as_str(),
                record.file_type,
                size,
                record.hash.as_str(),
                record.uploaded_at.timestamp_micros(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                MetadataError::DuplicateId(record.id.to_string())
            }
            other => MetadataError::Database(other),
        })?;
        Ok(())
    }

    fn delete_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let raw = tx
            .query_row(
                &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
                params![id.to_string()],
                RawRecord::from_row,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        tx.execute("DELETE FROM files WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        raw.into_record().map(Some)
    }

    fn find_by_id(&self, id: &UuidService) -> MetadataResult<Option<FileRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
            params![id.to_string()],
            RawRecord::from_row,
        )
        .optional()?
        .map(RawRecord::into_record)
        .transpose()
    }

    fn count_by_digest(&self, digest: &Sha256Hash) -> MetadataResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE hash = ?1",
            params![digest.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn query(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<i64> = Vec::new();

        if let Some(min) = filter.size_min {
            clauses.push("size >= ?");
            args.push(clamp_to_i64(min));
        }
        if let Some(max) = filter.size_max {
            clauses.push("size <= ?");
            args.push(clamp_to_i64(max));
        }
        if let Some(from) = filter.uploaded_from() {
            clauses.push("uploaded_at >= ?");
            args.push(from.timestamp_micros());
        }
        if let Some(until) = filter.uploaded_until() {
            clauses.push("uploaded_at < ?");
            args.push(until.timestamp_micros());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM files {where_clause} ORDER BY uploaded_at DESC, rowid DESC"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params_from_iter(args.iter()), RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            let record = raw.into_record()?;
            if filter.matches_text(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Column values as stored, before validation.
struct RawRecord {
    id: String,
    location: String,
    original_filename: String,
    file_type: String,
    size: i64,
    hash: String,
    uploaded_at: i64,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            location: row.get(1)?,
            original_filename: row.get(2)?,
            file_type: row.get(3)?,
            size: row.get(4)?,
            hash: row.get(5)?,
            uploaded_at: row.get(6)?,
        })
    }

    fn into_record(self) -> MetadataResult<FileRecord> {
        let corrupt = |reason: String| MetadataError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let id = UuidService::parse(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let location = BlobLocation::parse(&self.location).map_err(|e| corrupt(e.to_string()))?;
        let original_filename =
            NonEmptyText::new(&self.original_filename).map_err(|e| corrupt(e.to_string()))?;
        let size = u64::try_from(self.size).map_err(|e| corrupt(e.to_string()))?;
        let hash = Sha256Hash::parse(&self.hash).map_err(|e| corrupt(e.to_string()))?;
        let uploaded_at = DateTime::<Utc>::from_timestamp_micros(self.uploaded_at)
            .ok_or_else(|| corrupt(format!("timestamp {} out of range", self.uploaded_at)))?;

        Ok(FileRecord {
            id,
            location,
            original_filename,
            file_type: self.file_type,
            size,
            hash,
            uploaded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::test_support::{at, exercise_store, record};
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_store_contract() {
        exercise_store(&SqliteMetadataStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("filehub.db");
        let r = record("persisted.txt", b"persisted", 9, at(2024, 5, 6, 7, 8));

        {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store.insert(&r).unwrap();
        }

        let reopened = SqliteMetadataStore::open(&path).unwrap();
        assert_eq!(reopened.find_by_id(&r.id).unwrap(), Some(r));
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let r = record("ok.txt", b"ok", 2, at(2024, 1, 1, 0, 0));
        store.insert(&r).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE files SET location = '../../etc/passwd'", [])
            .unwrap();

        let result = store.find_by_id(&r.id);

        assert!(matches!(result, Err(MetadataError::Corrupt { .. })));
    }
}
