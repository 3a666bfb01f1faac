//! `SQLite` schema for the sample store.

/// Position samples, one row per `(subject, timestamp)`.
pub const CREATE_SAMPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    speed_mps REAL,
    heading_deg REAL,
    accuracy_m REAL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (subject_id, timestamp_ms)
)
";

/// Index backing ordered per-subject reads.
pub const CREATE_SUBJECT_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_samples_subject_time ON samples(subject_id, timestamp_ms)
";

/// Key-value metadata (schema version).
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SAMPLES_TABLE,
    CREATE_SUBJECT_TIME_INDEX,
    CREATE_METADATA_TABLE,
];
