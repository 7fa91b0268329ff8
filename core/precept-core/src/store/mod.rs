//! SQLite persistence for precept.
//!
//! One long-lived connection per [`Db`] handle, guarded by a mutex. Each
//! logical operation holds the lock for its own duration and writes inside an
//! explicit transaction, so an artifact row and its audit row land together.

mod migrations;
mod queries;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use crate::error::{PreceptError, Result};

pub use migrations::{Migration, MIGRATIONS};
pub use queries::{EventRow, ProjectStats, SearchHit, SearchSource, TaskRow, VisitRow};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Formats a timestamp the way every table stores it: RFC 3339 UTC with fixed
/// microsecond precision, so text order equals time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| PreceptError::CorruptRow {
            field: field.to_string(),
            details: format!("{value:?}: {err}"),
        })
}

#[derive(Clone)]
pub struct Db {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("path", &self.path).finish()
    }
}

impl Db {
    /// Opens (creating if needed) the database at `path` and brings its schema
    /// up to date.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| PreceptError::io("create database directory", err))?;
        }

        let mut conn =
            Connection::open(&path).map_err(|err| PreceptError::storage("open database", err))?;
        configure(&conn)?;
        let applied = migrations::run_migrations(&mut conn, &format_timestamp(Utc::now()))?;
        if !applied.is_empty() {
            tracing::info!(path = %path.display(), ?applied, "Database migrated");
        }

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_versions(&self) -> Result<Vec<u32>> {
        self.with_connection(|conn| {
            migrations::applied_versions(conn).map(|set| set.into_iter().collect())
        })
    }

    /// Re-runs the migration runner against the open connection.
    pub fn migrate(&self) -> Result<Vec<u32>> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        migrations::run_migrations(&mut guard, &format_timestamp(Utc::now()))
    }

    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Runs `f` inside an IMMEDIATE transaction, committing only if it
    /// returns `Ok`.
    pub(crate) fn with_transaction<T>(
        &self,
        context: &str,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| PreceptError::storage(format!("begin {context}"), err))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|err| PreceptError::storage(format!("commit {context}"), err))?;
        Ok(value)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Artifact logging (typed row + audit row, one transaction)
    // ─────────────────────────────────────────────────────────────────────

    pub fn log_photo(
        &self,
        project: &str,
        filepath: &str,
        caption: Option<&str>,
        coordinates: Option<(f64, f64)>,
        visit_id: Option<i64>,
    ) -> Result<i64> {
        let now = format_timestamp(Utc::now());
        let (latitude, longitude) = coordinates.unzip();
        self.with_transaction("log photo", |tx| {
            tx.execute(
                "INSERT INTO photos (project, filepath, caption, latitude, longitude, visit_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![project, filepath, caption, latitude, longitude, visit_id, now],
            )
            .map_err(|err| PreceptError::storage("insert photo", err))?;
            let id = tx.last_insert_rowid();
            insert_event(tx, "photo_saved", Some(filepath), Some(project), &now)?;
            Ok(id)
        })
    }

    pub fn log_voice(
        &self,
        project: &str,
        filepath: &str,
        transcript: Option<&str>,
        visit_id: Option<i64>,
    ) -> Result<i64> {
        let now = format_timestamp(Utc::now());
        self.with_transaction("log voice note", |tx| {
            tx.execute(
                "INSERT INTO voice_notes (project, filepath, transcript, visit_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![project, filepath, transcript, visit_id, now],
            )
            .map_err(|err| PreceptError::storage("insert voice note", err))?;
            let id = tx.last_insert_rowid();
            insert_event(tx, "voice_saved", Some(filepath), Some(project), &now)?;
            Ok(id)
        })
    }

    pub fn log_quick_note(
        &self,
        project: &str,
        filepath: &str,
        body: &str,
        visit_id: Option<i64>,
    ) -> Result<i64> {
        let now = format_timestamp(Utc::now());
        self.with_transaction("log quick note", |tx| {
            tx.execute(
                "INSERT INTO quick_notes (project, filepath, body, visit_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![project, filepath, body, visit_id, now],
            )
            .map_err(|err| PreceptError::storage("insert quick note", err))?;
            let id = tx.last_insert_rowid();
            insert_event(tx, "note_saved", Some(filepath), Some(project), &now)?;
            Ok(id)
        })
    }

    pub fn log_scan(
        &self,
        project: &str,
        scan_type: &str,
        filepath: Option<&str>,
        raw_output: Option<&str>,
        visit_id: Option<i64>,
    ) -> Result<i64> {
        let now = format_timestamp(Utc::now());
        let detail = format!("{}: {}", scan_type, filepath.unwrap_or("inline"));
        self.with_transaction("log scan", |tx| {
            tx.execute(
                "INSERT INTO network_scans (project, scan_type, filepath, raw_output, visit_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![project, scan_type, filepath, raw_output, visit_id, now],
            )
            .map_err(|err| PreceptError::storage("insert scan", err))?;
            let id = tx.last_insert_rowid();
            insert_event(tx, "scan_logged", Some(&detail), Some(project), &now)?;
            Ok(id)
        })
    }

    pub fn log_event(
        &self,
        event_type: &str,
        detail: Option<&str>,
        project: Option<&str>,
    ) -> Result<i64> {
        let now = format_timestamp(Utc::now());
        self.with_connection(|conn| insert_event(conn, event_type, detail, project, &now))
    }
}

pub(crate) fn insert_event(
    conn: &Connection,
    event_type: &str,
    detail: Option<&str>,
    project: Option<&str>,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO bot_events (event_type, detail, project, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![event_type, detail, project, created_at],
    )
    .map_err(|err| PreceptError::storage(format!("insert event {event_type}"), err))?;
    Ok(conn.last_insert_rowid())
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|err| PreceptError::storage("set busy timeout", err))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|err| PreceptError::storage("enable WAL", err))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|err| PreceptError::storage("set synchronous", err))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|err| PreceptError::storage("enable foreign keys", err))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::open(dir.path().join("precept.db")).expect("db init");
    (dir, db)
}
