//! Durable sample store.
//!
//! Samples are appended to a `SQLite` database and read back per subject in
//! timestamp order. Rows are never updated; appending a `(subject,
//! timestamp)` pair that already exists is a no-op, so retried writes are
//! safe.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sample::{PositionSample, SubjectId};

/// Append-only storage of position samples.
pub trait SampleStore: Send + Sync {
    /// Append a sample. Returns `false` if it was already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&self, subject: &SubjectId, sample: &PositionSample) -> Result<bool>;

    /// All samples of a subject, ascending by timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn load(&self, subject: &SubjectId) -> Result<Vec<PositionSample>>;
}

/// `SQLite`-backed [`SampleStore`].
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of samples stored for `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_for(&self, subject: &SubjectId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM samples WHERE subject_id = ?1",
            [subject.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every subject with at least one sample, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn subjects(&self) -> Result<Vec<SubjectId>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT subject_id FROM samples ORDER BY subject_id")?;
        let subjects = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(SubjectId::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    /// Database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (total_samples, subject_count, oldest, newest) = self.conn().query_row(
            r"
            SELECT COUNT(*), COUNT(DISTINCT subject_id), MIN(timestamp_ms), MAX(timestamp_ms)
            FROM samples
            ",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_samples,
            subject_count,
            oldest_sample: oldest.and_then(DateTime::from_timestamp_millis),
            newest_sample: newest.and_then(DateTime::from_timestamp_millis),
            db_size_bytes,
        })
    }

    fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<PositionSample> {
        Ok(PositionSample {
            latitude: row.get(0)?,
            longitude: row.get(1)?,
            timestamp_millis: row.get(2)?,
            speed_mps: row.get(3)?,
            heading_deg: row.get(4)?,
            accuracy_meters: row.get(5)?,
        })
    }
}

impl SampleStore for Storage {
    fn append(&self, subject: &SubjectId, sample: &PositionSample) -> Result<bool> {
        let affected = self.conn().execute(
            r"
            INSERT OR IGNORE INTO samples
                (subject_id, timestamp_ms, latitude, longitude, speed_mps, heading_deg, accuracy_m)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                subject.as_str(),
                sample.timestamp_millis,
                sample.latitude,
                sample.longitude,
                sample.speed_mps,
                sample.heading_deg,
                sample.accuracy_meters,
            ],
        )?;

        if affected == 0 {
            debug!(subject = %subject, timestamp = sample.timestamp_millis, "Sample already stored");
        }
        Ok(affected > 0)
    }

    fn load(&self, subject: &SubjectId) -> Result<Vec<PositionSample>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r"
            SELECT latitude, longitude, timestamp_ms, speed_mps, heading_deg, accuracy_m
            FROM samples WHERE subject_id = ?1
            ORDER BY timestamp_ms ASC
            ",
        )?;

        let samples = stmt
            .query_map([subject.as_str()], Self::row_to_sample)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of samples.
    pub total_samples: i64,
    /// Number of distinct subjects.
    pub subject_count: i64,
    /// Timestamp of the oldest sample.
    pub oldest_sample: Option<DateTime<Utc>>,
    /// Timestamp of the newest sample.
    pub newest_sample: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
