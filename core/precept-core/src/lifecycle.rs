//! Site visit and task lifecycles.
//!
//! Both follow the same shape: a row is inserted open (`ended_at` NULL) and
//! closed exactly once. Closing is a conditional update, so a second end is
//! reported as [`EndVisit::AlreadyEnded`] and never rewrites the row.
//!
//! Nothing here stops two open visits (or tasks) for the same project. The
//! session's active ids are the only guard.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{PreceptError, Result};
use crate::store::{format_timestamp, insert_event, parse_timestamp, Db, TaskRow, VisitRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisitDuration {
    pub hours: i64,
    pub minutes: i64,
}

impl VisitDuration {
    /// Whole minutes between the two instants; negative spans clamp to zero.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let seconds = (end - start).num_seconds().max(0);
        Self {
            hours: seconds / 3600,
            minutes: (seconds % 3600) / 60,
        }
    }
}

impl std::fmt::Display for VisitDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

/// Artifacts linked to a visit by `visit_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisitCounts {
    pub photos: i64,
    pub voice_notes: i64,
    pub notes: i64,
    pub tasks: i64,
    pub scans: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitSummary {
    pub visit_id: i64,
    pub project: String,
    pub location: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration: VisitDuration,
    pub counts: VisitCounts,
    pub notes: Option<String>,
    /// Human-readable text stored on the visit row.
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndVisit {
    Ended(VisitSummary),
    NotFound,
    AlreadyEnded(VisitRow),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: i64,
    pub project: String,
    pub description: String,
    pub started_at: String,
    pub ended_at: String,
    /// Unrounded: elapsed seconds / 60.
    pub duration_minutes: f64,
    pub visit_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndTask {
    Ended(TaskResult),
    NotFound,
    AlreadyEnded(TaskRow),
}

pub fn render_visit_summary(
    project: &str,
    location: Option<&str>,
    duration: VisitDuration,
    counts: &VisitCounts,
    notes: Option<&str>,
) -> String {
    let place = match location {
        Some(location) => format!(" at {location}"),
        None => " (no location)".to_string(),
    };
    let mut summary = format!(
        "Visit to {project}{place}\n\
         Duration: {duration}\n\
         Photos: {}, Voice notes: {}, Tasks: {}, Scans: {}, Quick notes: {}",
        counts.photos, counts.voice_notes, counts.tasks, counts.scans, counts.notes
    );
    if let Some(notes) = notes {
        summary.push_str("\nNotes: ");
        summary.push_str(notes);
    }
    summary
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    db: Db,
}

impl Lifecycle {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // ─────────────────────────────────────────────────────────────────────
    // Visits
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_visit(
        &self,
        project: &str,
        location: Option<&str>,
        coordinates: Option<(f64, f64)>,
    ) -> Result<i64> {
        self.start_visit_at(project, location, coordinates, Utc::now())
    }

    pub fn start_visit_at(
        &self,
        project: &str,
        location: Option<&str>,
        coordinates: Option<(f64, f64)>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let now = format_timestamp(now);
        let (latitude, longitude) = coordinates.unzip();
        let visit_id = self.db.with_transaction("start visit", |tx| {
            tx.execute(
                "INSERT INTO site_visits (project, location, latitude, longitude, started_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![project, location, latitude, longitude, now],
            )
            .map_err(|err| PreceptError::storage("insert visit", err))?;
            let id = tx.last_insert_rowid();
            insert_event(
                tx,
                "visit_started",
                Some(location.unwrap_or("no location")),
                Some(project),
                &now,
            )?;
            Ok(id)
        })?;
        tracing::info!(project, visit_id, "Visit started");
        Ok(visit_id)
    }

    pub fn end_visit(&self, visit_id: i64, notes: Option<&str>) -> Result<EndVisit> {
        self.end_visit_at(visit_id, notes, Utc::now())
    }

    pub fn end_visit_at(
        &self,
        visit_id: i64,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EndVisit> {
        let ended_at = format_timestamp(now);
        let outcome = self.db.with_transaction("end visit", |tx| {
            let Some(visit) = select_visit(tx, visit_id)? else {
                return Ok(EndVisit::NotFound);
            };
            if !visit.is_active() {
                return Ok(EndVisit::AlreadyEnded(visit));
            }

            let started = parse_timestamp("site_visits.started_at", &visit.started_at)?;
            let duration = VisitDuration::between(started, now);
            let counts = count_visit_artifacts(tx, visit_id)?;
            let summary = render_visit_summary(
                &visit.project,
                visit.location.as_deref(),
                duration,
                &counts,
                notes,
            );

            let updated = tx
                .execute(
                    "UPDATE site_visits SET ended_at = ?1, notes = ?2, summary = ?3 \
                     WHERE id = ?4 AND ended_at IS NULL",
                    params![ended_at, notes, summary, visit_id],
                )
                .map_err(|err| PreceptError::storage("close visit", err))?;
            if updated != 1 {
                return Ok(EndVisit::AlreadyEnded(visit));
            }
            insert_event(tx, "visit_ended", Some(&summary), Some(&visit.project), &ended_at)?;

            Ok(EndVisit::Ended(VisitSummary {
                visit_id,
                project: visit.project,
                location: visit.location,
                started_at: visit.started_at,
                ended_at: ended_at.clone(),
                duration,
                counts,
                notes: notes.map(str::to_string),
                summary,
            }))
        })?;

        match &outcome {
            EndVisit::Ended(summary) => {
                tracing::info!(project = %summary.project, visit_id, duration = %summary.duration, "Visit ended")
            }
            EndVisit::NotFound => tracing::warn!(visit_id, "End requested for unknown visit"),
            EndVisit::AlreadyEnded(_) => tracing::warn!(visit_id, "Visit already ended"),
        }
        Ok(outcome)
    }

    pub fn visit(&self, visit_id: i64) -> Result<Option<VisitRow>> {
        self.db.with_connection(|conn| select_visit(conn, visit_id))
    }

    /// Most recently started open visit for `project`.
    pub fn active_visit(&self, project: &str) -> Result<Option<VisitRow>> {
        self.db.with_connection(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM site_visits WHERE project = ?1 AND ended_at IS NULL \
                     ORDER BY started_at DESC, id DESC LIMIT 1",
                    VisitRow::COLUMNS
                ),
                params![project],
                VisitRow::from_row,
            )
            .optional()
            .map_err(|err| PreceptError::storage("read active visit", err))
        })
    }

    pub fn visit_counts(&self, visit_id: i64) -> Result<VisitCounts> {
        self.db
            .with_connection(|conn| count_visit_artifacts(conn, visit_id))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_task(
        &self,
        project: &str,
        description: &str,
        visit_id: Option<i64>,
    ) -> Result<i64> {
        self.start_task_at(project, description, visit_id, Utc::now())
    }

    pub fn start_task_at(
        &self,
        project: &str,
        description: &str,
        visit_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let now = format_timestamp(now);
        let task_id = self.db.with_transaction("start task", |tx| {
            tx.execute(
                "INSERT INTO tasks (project, description, started_at, visit_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![project, description, now, visit_id],
            )
            .map_err(|err| PreceptError::storage("insert task", err))?;
            let id = tx.last_insert_rowid();
            insert_event(tx, "task_started", Some(description), Some(project), &now)?;
            Ok(id)
        })?;
        tracing::info!(project, task_id, "Task started");
        Ok(task_id)
    }

    pub fn end_task(&self, task_id: i64) -> Result<EndTask> {
        self.end_task_at(task_id, Utc::now())
    }

    pub fn end_task_at(&self, task_id: i64, now: DateTime<Utc>) -> Result<EndTask> {
        let ended_at = format_timestamp(now);
        let outcome = self.db.with_transaction("end task", |tx| {
            let Some(task) = select_task(tx, task_id)? else {
                return Ok(EndTask::NotFound);
            };
            if task.ended_at.is_some() {
                return Ok(EndTask::AlreadyEnded(task));
            }

            let started = parse_timestamp("tasks.started_at", &task.started_at)?;
            let elapsed_ms = (now - started).num_milliseconds().max(0);
            let duration_minutes = elapsed_ms as f64 / 1000.0 / 60.0;

            let updated = tx
                .execute(
                    "UPDATE tasks SET ended_at = ?1, duration_minutes = ?2 \
                     WHERE id = ?3 AND ended_at IS NULL",
                    params![ended_at, duration_minutes, task_id],
                )
                .map_err(|err| PreceptError::storage("close task", err))?;
            if updated != 1 {
                return Ok(EndTask::AlreadyEnded(task));
            }
            let detail = format!("{} ({:.0}m)", task.description, duration_minutes);
            insert_event(tx, "task_ended", Some(&detail), Some(&task.project), &ended_at)?;

            Ok(EndTask::Ended(TaskResult {
                task_id,
                project: task.project,
                description: task.description,
                started_at: task.started_at,
                ended_at: ended_at.clone(),
                duration_minutes,
                visit_id: task.visit_id,
            }))
        })?;

        if let EndTask::Ended(result) = &outcome {
            tracing::info!(project = %result.project, task_id, minutes = result.duration_minutes, "Task ended");
        }
        Ok(outcome)
    }

    pub fn task(&self, task_id: i64) -> Result<Option<TaskRow>> {
        self.db.with_connection(|conn| select_task(conn, task_id))
    }

    pub fn active_task(&self, project: &str) -> Result<Option<TaskRow>> {
        self.db.with_connection(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM tasks WHERE project = ?1 AND ended_at IS NULL \
                     ORDER BY started_at DESC, id DESC LIMIT 1",
                    TaskRow::COLUMNS
                ),
                params![project],
                TaskRow::from_row,
            )
            .optional()
            .map_err(|err| PreceptError::storage("read active task", err))
        })
    }
}

fn select_visit(conn: &Connection, visit_id: i64) -> Result<Option<VisitRow>> {
    conn.query_row(
        &format!("SELECT {} FROM site_visits WHERE id = ?1", VisitRow::COLUMNS),
        params![visit_id],
        VisitRow::from_row,
    )
    .optional()
    .map_err(|err| PreceptError::storage("read visit", err))
}

fn select_task(conn: &Connection, task_id: i64) -> Result<Option<TaskRow>> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?1", TaskRow::COLUMNS),
        params![task_id],
        TaskRow::from_row,
    )
    .optional()
    .map_err(|err| PreceptError::storage("read task", err))
}

fn count_visit_artifacts(conn: &Connection, visit_id: i64) -> Result<VisitCounts> {
    let count = |table: &str| -> Result<i64> {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE visit_id = ?1"),
            params![visit_id],
            |row| row.get(0),
        )
        .map_err(|err| PreceptError::storage(format!("count {table} for visit"), err))
    };
    Ok(VisitCounts {
        photos: count("photos")?,
        voice_notes: count("voice_notes")?,
        notes: count("quick_notes")?,
        tasks: count("tasks")?,
        scans: count("network_scans")?,
    })
}
