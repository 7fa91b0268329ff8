//! State shared between connection threads and the reporter thread.
//!
//! Inbound events are applied one at a time under the engine lock. Scheduled
//! digests are queued in the outbox until the transport drains them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use precept_core::{Db, DigestKind, Engine, ReminderSwitch};
use precept_protocol::{InboundEvent, OutboundMessage};
use serde::Serialize;

/// Oldest messages are dropped first once the outbox is full.
const OUTBOX_CAPACITY: usize = 256;

pub struct SharedState {
    db: Db,
    engine: Mutex<Engine>,
    outbox: Mutex<VecDeque<OutboundMessage>>,
    counters: Mutex<Counters>,
    reminders: Arc<ReminderSwitch>,
    next_digest: Mutex<Option<(DateTime<Utc>, DigestKind)>>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct Counters {
    events_handled: u64,
    events_dropped: u64,
    messages_sent: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub started_at: String,
    pub sessions: usize,
    pub outbox_len: usize,
    pub events_handled: u64,
    pub events_dropped: u64,
    pub messages_sent: u64,
    pub schema_versions: Vec<u32>,
    pub reminders_enabled: bool,
    pub reminder_project: Option<String>,
    pub next_digest_at: Option<String>,
    pub next_digest_kind: Option<String>,
}

impl SharedState {
    pub fn new(db: Db, engine: Engine) -> Self {
        let reminders = engine.reminders();
        Self {
            db,
            engine: Mutex::new(engine),
            outbox: Mutex::new(VecDeque::new()),
            counters: Mutex::new(Counters::default()),
            reminders,
            next_digest: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn reminders(&self) -> Arc<ReminderSwitch> {
        self.reminders.clone()
    }

    pub fn set_next_digest(&self, at: DateTime<Utc>, kind: DigestKind) {
        *self.next_digest.lock().unwrap_or_else(PoisonError::into_inner) = Some((at, kind));
    }

    pub fn handle_event(&self, event: &InboundEvent) -> Vec<OutboundMessage> {
        let messages = {
            let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
            engine.handle(event)
        };

        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if messages.is_empty() {
            counters.events_dropped += 1;
        } else {
            counters.events_handled += 1;
            counters.messages_sent += messages.len() as u64;
        }
        messages
    }

    pub fn push_outbox(&self, message: OutboundMessage) {
        let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        if outbox.len() >= OUTBOX_CAPACITY {
            outbox.pop_front();
            tracing::warn!(capacity = OUTBOX_CAPACITY, "Outbox full; dropped oldest message");
        }
        outbox.push_back(message);
    }

    pub fn drain_outbox(&self) -> Vec<OutboundMessage> {
        let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        outbox.drain(..).collect()
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let sessions = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session_count();
        let outbox_len = self
            .outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let schema_versions = self.db.schema_versions().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to read schema versions");
            Vec::new()
        });
        let reminders = self.reminders.snapshot();
        let next_digest = *self
            .next_digest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        HealthSnapshot {
            started_at: self.started_at.to_rfc3339(),
            sessions,
            outbox_len,
            events_handled: counters.events_handled,
            events_dropped: counters.events_dropped,
            messages_sent: counters.messages_sent,
            schema_versions,
            reminders_enabled: reminders.enabled,
            reminder_project: reminders.project.clone(),
            next_digest_at: next_digest.map(|(at, _)| at.to_rfc3339()),
            next_digest_kind: next_digest.map(|(_, kind)| kind.as_str().to_string()),
        }
    }
}
