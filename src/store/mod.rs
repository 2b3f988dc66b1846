//! SQLite-backed entry store.
//!
//! One `entries` table, created on open if absent. The lifecycle is
//! create-only and list-only: entries are never updated or deleted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from the entry store, split so callers can react to validation
/// failures differently from storage faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry content must not be empty")]
    EmptyContent,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid timestamp in database: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// A single persisted journal entry.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    /// Surrogate key assigned by SQLite.
    pub id: i64,

    /// Entry body, always non-empty.
    pub content: String,

    /// Optional free-form tag string, filtered by substring containment.
    pub tags: Option<String>,

    /// Creation time, assigned at insert. Sole sort key for listing.
    pub created_at: DateTime<Utc>,
}

/// Handle to the entries database.
///
/// rusqlite connections are not `Sync`, so the connection lives behind a
/// mutex; every query is short enough that contention is a non-issue here.
pub struct EntryStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl EntryStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                tags TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Path of the backing database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a new entry and return it as persisted.
    ///
    /// Rejects empty or whitespace-only content. The form layer checks this
    /// too, but the store is the last line of defense for the non-empty
    /// content invariant.
    pub async fn create(&self, content: &str, tags: Option<&str>) -> Result<Entry, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let created_at = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO entries (content, tags, created_at) VALUES (?1, ?2, ?3)",
            params![content, tags, created_at.to_rfc3339()],
        )?;

        Ok(Entry {
            id: conn.last_insert_rowid(),
            content: content.to_string(),
            tags: tags.map(str::to_string),
            created_at,
        })
    }

    /// List entries newest-first, optionally keeping only those whose tags
    /// contain `tag_filter` as a substring.
    ///
    /// Containment is case-sensitive, which is why this uses `instr` rather
    /// than `LIKE` (SQLite's `LIKE` folds ASCII case).
    pub async fn list(&self, tag_filter: Option<&str>) -> Result<Vec<Entry>, StoreError> {
        let conn = self.conn.lock().await;

        let mut query = String::from("SELECT id, content, tags, created_at FROM entries");
        if tag_filter.is_some() {
            query.push_str(" WHERE tags IS NOT NULL AND instr(tags, ?1) > 0");
        }
        query.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = conn.prepare(&query)?;

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        };

        let rows: Vec<(i64, String, Option<String>, String)> = match tag_filter {
            Some(tag) => stmt
                .query_map([tag], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (id, content, tags, created_at) in rows {
            entries.push(Entry {
                id,
                content,
                tags,
                created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
            });
        }

        Ok(entries)
    }
}
