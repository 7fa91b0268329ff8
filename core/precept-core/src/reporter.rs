//! Time-triggered digests: a morning briefing and an afternoon wrap-up.
//!
//! The reporter never touches session state. It shares only the reminder
//! switch (written by the dialogue, read here as one snapshot) and the store.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::clock::{display_local, local_date, start_of_local_day};
use crate::config::{parse_clock, ReporterConfig};
use crate::error::{PreceptError, Result};
use crate::lifecycle::Lifecycle;
use crate::store::Db;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub project: Option<String>,
}

/// Single-writer, snapshot-reader holder for the reminder flags.
#[derive(Debug)]
pub struct ReminderSwitch {
    current: ArcSwap<ReminderSettings>,
}

impl ReminderSwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            current: ArcSwap::from_pointee(ReminderSettings {
                enabled,
                project: None,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<ReminderSettings> {
        self.current.load_full()
    }

    /// Flips reminders on or off. Turning them on with a project makes that
    /// project the digest subject.
    pub fn toggle(&self, active_project: Option<&str>) -> Arc<ReminderSettings> {
        let current = self.snapshot();
        let enabled = !current.enabled;
        let project = match (enabled, active_project) {
            (true, Some(project)) => Some(project.to_string()),
            _ => current.project.clone(),
        };
        let next = Arc::new(ReminderSettings { enabled, project });
        self.current.store(next.clone());
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Morning,
    Afternoon,
}

impl DigestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestKind::Morning => "morning_briefing",
            DigestKind::Afternoon => "afternoon_wrapup",
        }
    }
}

pub const MAX_FIRE_LATENESS_SECS: i64 = 300;

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    offset: FixedOffset,
    morning: NaiveTime,
    afternoon: NaiveTime,
}

impl Schedule {
    pub fn new(offset: FixedOffset, morning: NaiveTime, afternoon: NaiveTime) -> Self {
        Self {
            offset,
            morning,
            afternoon,
        }
    }

    pub fn from_config(config: &ReporterConfig, offset: FixedOffset) -> Result<Self> {
        let time = |field: &str, value: &str| -> Result<NaiveTime> {
            parse_clock(value)
                .and_then(|(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0))
                .ok_or_else(|| {
                    PreceptError::ConfigInvalid(vec![format!("{field} must be HH:MM")])
                })
        };
        Ok(Self::new(
            offset,
            time("reporter.morning_at", &config.morning_at)?,
            time("reporter.afternoon_at", &config.afternoon_at)?,
        ))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The first firing strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> (DateTime<Utc>, DigestKind) {
        let today = after.with_timezone(&self.offset).date_naive();
        let mut best: Option<(DateTime<Utc>, DigestKind)> = None;
        for day_offset in 0..=1 {
            let day = today + Duration::days(day_offset);
            for (time, kind) in [
                (self.morning, DigestKind::Morning),
                (self.afternoon, DigestKind::Afternoon),
            ] {
                let Some(at) = self
                    .offset
                    .from_local_datetime(&day.and_time(time))
                    .single()
                    .map(|at| at.with_timezone(&Utc))
                else {
                    continue;
                };
                if at > after && best.map_or(true, |(current, _)| at < current) {
                    best = Some((at, kind));
                }
            }
        }
        // Both slots exist every day, so tomorrow always supplies one.
        best.unwrap_or((after + Duration::days(1), DigestKind::Morning))
    }

    /// A slot noticed more than `MAX_FIRE_LATENESS_SECS` after it was due
    /// (suspend, clock jump) is skipped rather than delivered late.
    pub fn is_stale(due: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - due > Duration::seconds(MAX_FIRE_LATENESS_SECS)
    }

    /// Where to look for the next slot once `fired` has been handled at `now`.
    pub fn resume_after(fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        fired.max(now)
    }
}

pub struct Reporter {
    db: Db,
    lifecycle: Lifecycle,
    switch: Arc<ReminderSwitch>,
    offset: FixedOffset,
}

impl Reporter {
    pub fn new(db: Db, switch: Arc<ReminderSwitch>, offset: FixedOffset) -> Self {
        Self {
            lifecycle: Lifecycle::new(db.clone()),
            db,
            switch,
            offset,
        }
    }

    /// Text for the digest, or `None` when reminders are off or no project
    /// has been chosen for them.
    pub fn digest(&self, kind: DigestKind, now: DateTime<Utc>) -> Result<Option<String>> {
        let settings = self.switch.snapshot();
        if !settings.enabled {
            return Ok(None);
        }
        let Some(project) = settings.project.as_deref() else {
            tracing::debug!(kind = kind.as_str(), "No reminder project; skipping digest");
            return Ok(None);
        };
        let text = match kind {
            DigestKind::Morning => self.morning_briefing(project, now)?,
            DigestKind::Afternoon => self.afternoon_wrapup(project, now)?,
        };
        Ok(Some(text))
    }

    pub fn morning_briefing(&self, project: &str, now: DateTime<Utc>) -> Result<String> {
        let stats = self.db.project_stats(project)?;
        let mut lines = vec![format!("Good morning. Daily briefing for {project}:\n")];
        lines.push(format!(
            "Photos: {}, Voice notes: {}, Notes: {}, Visits: {}, Scans: {}, Time tracked: {}h",
            stats.photos,
            stats.voice_notes,
            stats.notes,
            stats.visits,
            stats.scans,
            stats.total_task_hours
        ));

        if let Some(task) = self.lifecycle.active_task(project)? {
            lines.push(format!(
                "\nActive task: {} (started {})",
                task.description,
                display_local(&task.started_at, self.offset)
            ));
        }
        if let Some(visit) = self.lifecycle.active_visit(project)? {
            lines.push(format!(
                "\nVisit in progress: {} (started {})",
                visit.location.as_deref().unwrap_or("no location"),
                display_local(&visit.started_at, self.offset)
            ));
        }

        let recent = self.db.events_since(now - Duration::hours(24))?;
        if recent.is_empty() {
            lines.push("\nNo activity in the last 24 hours.".to_string());
        } else {
            lines.push(format!("\nLast 24h: {} events", recent.len()));
        }
        Ok(lines.join("\n"))
    }

    pub fn afternoon_wrapup(&self, project: &str, now: DateTime<Utc>) -> Result<String> {
        let mut lines = vec![format!("Afternoon wrap-up for {project}:\n")];

        let todays = self.db.events_since(start_of_local_day(now, self.offset))?;
        if todays.is_empty() {
            lines.push("No activity today.".to_string());
        } else {
            lines.push(format!("Today: {} events", todays.len()));
            for event in todays.iter().take(10) {
                let tag = match event.project.as_deref() {
                    Some(other) if other != project => format!(" [{other}]"),
                    _ => String::new(),
                };
                let time = display_local(&event.created_at, self.offset);
                let clock = time.get(11..).unwrap_or(&time);
                lines.push(format!("  {clock} {}{tag}", event.event_type));
            }
        }

        if let Some(task) = self.lifecycle.active_task(project)? {
            lines.push(format!(
                "\nReminder: task still running -- {}",
                task.description
            ));
        }

        let today = now.with_timezone(&self.offset).date_naive();
        let visits: Vec<_> = self
            .db
            .visit_history(Some(project), 5)?
            .into_iter()
            .filter(|visit| local_date(&visit.started_at, self.offset) == Some(today))
            .collect();
        if !visits.is_empty() {
            lines.push(format!("\nVisits today: {}", visits.len()));
            for visit in &visits {
                let status = if visit.is_active() { "active" } else { "completed" };
                lines.push(format!(
                    "  {} -- {status}",
                    visit.location.as_deref().unwrap_or("no location")
                ));
            }
        }

        Ok(lines.join("\n"))
    }
}
