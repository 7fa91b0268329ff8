//! Inbound event pipeline: access gate, session lookup, dialogue dispatch, and
//! outbound message assembly.

use std::sync::Arc;
use std::time::Instant;

use precept_protocol::{InboundEvent, OutboundMessage, MAX_MESSAGE_CHARS};

use crate::access::{AccessGate, Admission, RateLimiter};
use crate::clock::fixed_offset;
use crate::config::PreceptConfig;
use crate::error::Result;
use crate::reporter::ReminderSwitch;
use crate::session::{ConversationState, Dialogue, Reply, SessionKey, SessionTable};
use crate::store::Db;
use crate::transcribe::{Transcriber, WhisperHttpTranscriber};
use crate::vcs::{CommitSink, DisabledCommitSink, GitCliCommitSink};

const APOLOGY: &str = "Something went wrong. Back to the main menu.";

pub struct Engine {
    gate: AccessGate,
    sessions: SessionTable,
    dialogue: Dialogue,
    reminders: Arc<ReminderSwitch>,
}

impl Engine {
    pub fn new(gate: AccessGate, dialogue: Dialogue, reminders: Arc<ReminderSwitch>) -> Self {
        Self {
            gate,
            sessions: SessionTable::new(),
            dialogue,
            reminders,
        }
    }

    /// Wires the collaborators named in `config` around an open store.
    pub fn from_config(config: &PreceptConfig, db: Db) -> Result<Self> {
        let vcs: Arc<dyn CommitSink> = if config.git.enabled {
            Arc::new(GitCliCommitSink::new(config.git.program.clone()))
        } else {
            Arc::new(DisabledCommitSink)
        };
        let transcriber = WhisperHttpTranscriber::from_config(&config.transcription)?
            .map(|client| Arc::new(client) as Arc<dyn Transcriber>);
        if transcriber.is_none() {
            tracing::warn!("No transcription API key configured; voice notes will be refused");
        }

        let reminders = Arc::new(ReminderSwitch::new(config.reporter.enabled));
        let dialogue = Dialogue::new(
            db,
            config.projects_dir.clone(),
            vcs,
            transcriber,
            reminders.clone(),
            fixed_offset(config.reporter.utc_offset_minutes),
        );
        let gate = AccessGate::new(
            config.allowed_user_id,
            RateLimiter::from_config(&config.rate_limit),
        );
        Ok(Self::new(gate, dialogue, reminders))
    }

    pub fn reminders(&self) -> Arc<ReminderSwitch> {
        self.reminders.clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn handle(&mut self, event: &InboundEvent) -> Vec<OutboundMessage> {
        self.handle_at(event, Instant::now())
    }

    /// Dropped events (unauthorized or over the rate limit) produce no
    /// messages at all.
    pub fn handle_at(&mut self, event: &InboundEvent, now: Instant) -> Vec<OutboundMessage> {
        match self.gate.admit_at(event.sender_id, now) {
            Admission::Admitted => {}
            Admission::Unauthorized | Admission::RateLimited => return Vec::new(),
        }

        let key = SessionKey {
            user_id: event.sender_id,
            chat_id: event.chat_id,
        };
        let session = self.sessions.get_or_create(key);
        let replies = match self.dialogue.dispatch(session, &event.payload) {
            Ok(transition) => transition.replies,
            Err(err) => {
                tracing::error!(
                    event_id = %event.event_id,
                    shape = event.payload.shape(),
                    state = session.state.as_str(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Event handling failed"
                );
                session.state = ConversationState::MainMenu;
                session.pending_note = None;
                vec![Reply {
                    text: APOLOGY.to_string(),
                    keyboard: None,
                }]
            }
        };

        replies
            .into_iter()
            .flat_map(|reply| address(event.chat_id, reply))
            .collect()
    }
}

/// Splits a reply into transport-sized messages; the keyboard rides on the
/// last one.
fn address(chat_id: i64, reply: Reply) -> Vec<OutboundMessage> {
    let mut chunks = chunk_text(&reply.text, MAX_MESSAGE_CHARS);
    let last = chunks.pop().unwrap_or_default();
    chunks
        .into_iter()
        .map(|text| OutboundMessage {
            chat_id,
            text,
            keyboard: None,
        })
        .chain(std::iter::once(OutboundMessage {
            chat_id,
            text: last,
            keyboard: reply.keyboard,
        }))
        .collect()
}

/// Cuts `text` into pieces of at most `max` characters, breaking after the
/// last newline in a piece when there is one.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();
    while rest.len() > max {
        let cut = rest[..max]
            .iter()
            .rposition(|c| *c == '\n')
            .filter(|pos| *pos > 0)
            .map_or(max, |pos| pos + 1);
        let tail = rest.split_off(cut);
        chunks.push(rest.into_iter().collect());
        rest = tail;
    }
    chunks.push(rest.into_iter().collect());
    chunks
}
