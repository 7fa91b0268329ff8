//! Per-(user, chat) dialogue state and the state machine that drives it.
//!
//! Sessions live only in memory. A restart drops every session back to a fresh
//! [`ConversationState::MainMenu`] with no active project; visits and tasks
//! that were open stay open in the store and can be found again through
//! `active_visit`/`active_task` once a project is reselected.

pub mod keyboards;
mod machine;

use std::collections::HashMap;

use serde::Serialize;

pub use machine::{Dialogue, Reply, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    MainMenu,
    SelectProject,
    VisitLocation,
    VisitActive,
    TaskDescription,
    SearchQuery,
    QuickNote,
    NewProject,
}

impl ConversationState {
    pub const ALL: [ConversationState; 8] = [
        ConversationState::MainMenu,
        ConversationState::SelectProject,
        ConversationState::VisitLocation,
        ConversationState::VisitActive,
        ConversationState::TaskDescription,
        ConversationState::SearchQuery,
        ConversationState::QuickNote,
        ConversationState::NewProject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::MainMenu => "main_menu",
            ConversationState::SelectProject => "select_project",
            ConversationState::VisitLocation => "visit_location",
            ConversationState::VisitActive => "visit_active",
            ConversationState::TaskDescription => "task_description",
            ConversationState::SearchQuery => "search_query",
            ConversationState::QuickNote => "quick_note",
            ConversationState::NewProject => "new_project",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: i64,
    pub chat_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub state: ConversationState,
    pub active_project: Option<String>,
    pub active_visit_id: Option<i64>,
    pub active_task_id: Option<i64>,
    pub pending_note: Option<String>,
    /// Current page of the project list.
    pub page: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: ConversationState::MainMenu,
            active_project: None,
            active_visit_id: None,
            active_task_id: None,
            pending_note: None,
            page: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionKey, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, key: SessionKey) -> &mut Session {
        self.sessions.entry(key).or_insert_with(|| {
            tracing::debug!(user_id = key.user_id, chat_id = key.chat_id, "Session created");
            Session::default()
        })
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
