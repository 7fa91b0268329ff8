use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{format_timestamp, Db};
use crate::error::{PreceptError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub detail: Option<String>,
    pub project: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitRow {
    pub id: i64,
    pub project: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub notes: Option<String>,
    pub summary: Option<String>,
}

impl VisitRow {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub(crate) const COLUMNS: &'static str =
        "id, project, location, latitude, longitude, started_at, ended_at, notes, summary";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project: row.get(1)?,
            location: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            started_at: row.get(5)?,
            ended_at: row.get(6)?,
            notes: row.get(7)?,
            summary: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRow {
    pub id: i64,
    pub project: String,
    pub description: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_minutes: Option<f64>,
    pub visit_id: Option<i64>,
}

impl TaskRow {
    pub(crate) const COLUMNS: &'static str =
        "id, project, description, started_at, ended_at, duration_minutes, visit_id";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project: row.get(1)?,
            description: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            duration_minutes: row.get(5)?,
            visit_id: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Voice,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub source: SearchSource,
    pub id: i64,
    pub project: String,
    pub filepath: String,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectStats {
    pub photos: i64,
    pub voice_notes: i64,
    pub notes: i64,
    pub visits: i64,
    pub scans: i64,
    /// Finished task time, in hours rounded to one decimal.
    pub total_task_hours: f64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_type: row.get(1)?,
            detail: row.get(2)?,
            project: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl Db {
    /// Case-insensitive substring search over voice transcripts and quick note
    /// bodies, newest first. Matching folds Unicode case in Rust; SQLite's
    /// `LIKE` and `lower()` only fold ASCII.
    pub fn search_transcripts(&self, keyword: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let needle = keyword.trim().to_lowercase();
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT 'voice', id, project, filepath, transcript, created_at FROM voice_notes \
                        WHERE transcript IS NOT NULL \
                     UNION ALL \
                     SELECT 'note', id, project, filepath, body, created_at FROM quick_notes \
                        WHERE body IS NOT NULL \
                     ORDER BY 6 DESC",
                )
                .map_err(|err| PreceptError::storage("prepare transcript search", err))?;
            let rows = stmt
                .query_map([], |row| {
                    let source: String = row.get(0)?;
                    Ok(SearchHit {
                        source: if source == "voice" {
                            SearchSource::Voice
                        } else {
                            SearchSource::Note
                        },
                        id: row.get(1)?,
                        project: row.get(2)?,
                        filepath: row.get(3)?,
                        text: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .map_err(|err| PreceptError::storage("search transcripts", err))?;

            let mut hits = Vec::new();
            for row in rows {
                let hit = row.map_err(|err| PreceptError::storage("decode search hit", err))?;
                if hit.text.to_lowercase().contains(&needle) {
                    hits.push(hit);
                    if hits.len() >= limit {
                        break;
                    }
                }
            }
            Ok(hits)
        })
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<EventRow>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, event_type, detail, project, created_at FROM bot_events \
                     ORDER BY created_at DESC, id DESC LIMIT ?1",
                )
                .map_err(|err| PreceptError::storage("prepare recent activity", err))?;
            let rows = stmt
                .query_map(params![limit as i64], EventRow::from_row)
                .map_err(|err| PreceptError::storage("read recent activity", err))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|err| PreceptError::storage("decode event row", err))
        })
    }

    /// Events recorded at or after `cutoff`, oldest first.
    pub fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<EventRow>> {
        let cutoff = format_timestamp(cutoff);
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, event_type, detail, project, created_at FROM bot_events \
                     WHERE created_at >= ?1 ORDER BY created_at ASC, id ASC",
                )
                .map_err(|err| PreceptError::storage("prepare events since", err))?;
            let rows = stmt
                .query_map(params![cutoff], EventRow::from_row)
                .map_err(|err| PreceptError::storage("read events since", err))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|err| PreceptError::storage("decode event row", err))
        })
    }

    pub fn visit_history(&self, project: Option<&str>, limit: usize) -> Result<Vec<VisitRow>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM site_visits WHERE (?1 IS NULL OR project = ?1) \
                 ORDER BY started_at DESC, id DESC LIMIT ?2",
                VisitRow::COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| PreceptError::storage("prepare visit history", err))?;
            let rows = stmt
                .query_map(params![project, limit as i64], VisitRow::from_row)
                .map_err(|err| PreceptError::storage("read visit history", err))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|err| PreceptError::storage("decode visit row", err))
        })
    }

    pub fn project_stats(&self, project: &str) -> Result<ProjectStats> {
        self.with_connection(|conn| {
            let count = |table: &str| -> Result<i64> {
                conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE project = ?1"),
                    params![project],
                    |row| row.get(0),
                )
                .map_err(|err| PreceptError::storage(format!("count {table}"), err))
            };

            let total_minutes: f64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(duration_minutes), 0.0) FROM tasks \
                     WHERE project = ?1 AND ended_at IS NOT NULL",
                    params![project],
                    |row| row.get(0),
                )
                .map_err(|err| PreceptError::storage("sum task minutes", err))?;

            Ok(ProjectStats {
                photos: count("photos")?,
                voice_notes: count("voice_notes")?,
                notes: count("quick_notes")?,
                visits: count("site_visits")?,
                scans: count("network_scans")?,
                total_task_hours: round_one_decimal(total_minutes / 60.0),
            })
        })
    }

    pub fn latest_event(&self) -> Result<Option<EventRow>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, event_type, detail, project, created_at FROM bot_events \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                EventRow::from_row,
            )
            .optional()
            .map_err(|err| PreceptError::storage("read latest event", err))
        })
    }
}
