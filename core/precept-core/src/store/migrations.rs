//! Append-only schema migrations.
//!
//! Entries are never edited or reordered once released; new schema changes
//! are added at the end with the next version number.

use std::collections::BTreeSet;

use rusqlite::{params, Connection};

use crate::error::{PreceptError, Result};

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial schema",
        sql: include_str!("schemas/v1_initial.sql"),
    },
    Migration {
        version: 2,
        name: "quick notes",
        sql: include_str!("schemas/v2_quick_notes.sql"),
    },
    Migration {
        version: 3,
        name: "lookup indexes",
        sql: include_str!("schemas/v3_indexes.sql"),
    },
];

/// Applies every migration not yet recorded in `schema_version`, in ascending
/// order, each in its own transaction with its version row. Returns the
/// versions applied by this call.
pub fn run_migrations(conn: &mut Connection, applied_at: &str) -> Result<Vec<u32>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|err| PreceptError::storage("create schema_version", err))?;

    let applied = applied_versions(conn)?;
    if let Some(newest) = applied.iter().next_back() {
        let known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
        if *newest > known {
            return Err(PreceptError::CorruptRow {
                field: "schema_version".to_string(),
                details: format!("database version {newest} is newer than supported {known}"),
            });
        }
    }

    let mut newly_applied = Vec::new();
    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        let context = format!("migration {}", migration.version);
        let tx = conn
            .transaction()
            .map_err(|err| PreceptError::storage(context.clone(), err))?;
        tx.execute_batch(migration.sql)
            .map_err(|err| PreceptError::storage(context.clone(), err))?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, applied_at],
        )
        .map_err(|err| PreceptError::storage(context.clone(), err))?;
        tx.commit()
            .map_err(|err| PreceptError::storage(context, err))?;
        newly_applied.push(migration.version);
    }

    Ok(newly_applied)
}

pub fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    let mut stmt = conn
        .prepare("SELECT version FROM schema_version")
        .map_err(|err| PreceptError::storage("read schema_version", err))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, u32>(0))
        .map_err(|err| PreceptError::storage("read schema_version", err))?;
    rows.collect::<std::result::Result<BTreeSet<_>, _>>()
        .map_err(|err| PreceptError::storage("decode schema_version", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        Connection::open_in_memory().expect("open in-memory db")
    }

    #[test]
    fn versions_are_contiguous_from_one() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, index + 1, "{}", migration.name);
        }
    }

    #[test]
    fn second_run_applies_nothing() {
        let mut conn = memory_conn();
        let first = run_migrations(&mut conn, "2026-01-30T12:00:00.000000Z").expect("first run");
        assert_eq!(first, vec![1, 2, 3]);

        let before = applied_versions(&conn).expect("versions");
        let second = run_migrations(&mut conn, "2026-01-31T12:00:00.000000Z").expect("second run");
        assert!(second.is_empty());
        assert_eq!(applied_versions(&conn).expect("versions"), before);

        let stamp: String = conn
            .query_row(
                "SELECT applied_at FROM schema_version WHERE version = 1",
                [],
                |row| row.get(0),
            )
            .expect("applied_at");
        assert_eq!(stamp, "2026-01-30T12:00:00.000000Z");
    }

    #[test]
    fn applies_only_missing_versions() {
        let mut conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);",
        )
        .expect("create version table");
        conn.execute_batch(MIGRATIONS[0].sql).expect("v1");
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (1, 'earlier')",
            [],
        )
        .expect("record v1");

        let applied = run_migrations(&mut conn, "now").expect("run");
        assert_eq!(applied, vec![2, 3]);
    }

    #[test]
    fn failed_migration_leaves_no_version_row() {
        let mut conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);
             CREATE TABLE photos (bogus TEXT);",
        )
        .expect("seed");
        conn.execute_batch(MIGRATIONS[0].sql).expect("v1 tolerates existing tables");
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (1, 'earlier'), (2, 'earlier')",
            [],
        )
        .expect("record");
        conn.execute_batch("CREATE TABLE quick_notes (bogus TEXT);")
            .expect("shadow quick_notes");

        let err = run_migrations(&mut conn, "now").unwrap_err();
        assert!(matches!(err, PreceptError::Storage { .. }));
        assert!(!applied_versions(&conn).expect("versions").contains(&3));
    }

    #[test]
    fn rejects_database_from_newer_build() {
        let mut conn = memory_conn();
        run_migrations(&mut conn, "now").expect("run");
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (99, 'future')",
            [],
        )
        .expect("future version");

        assert!(run_migrations(&mut conn, "now").is_err());
    }
}
