use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::FixedOffset;
use precept_protocol::{EventPayload, Keyboard};

use super::keyboards::{self, parse_callback, Callback};
use super::{ConversationState, Session};
use crate::clock::{display_local, local_now};
use crate::error::{PreceptError, Result};
use crate::filing::{ArtifactFiler, DocumentOutcome};
use crate::lifecycle::{EndTask, EndVisit, Lifecycle};
use crate::projects::{validate_project_name, EnsureOutcome, ProjectMatch, ProjectResolver};
use crate::reporter::ReminderSwitch;
use crate::store::{Db, SearchSource};
use crate::transcribe::{transcribe_to_completion, Transcriber};
use crate::vcs::CommitSink;

const STATUS_MAX_CHARS: usize = 2000;
const RECENT_LIMIT: usize = 15;
const VISIT_HISTORY_LIMIT: usize = 10;
const SEARCH_LIMIT: usize = 10;
const SNIPPET_RADIUS: usize = 40;

/// One outbound message, before it is addressed to a chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: ConversationState,
    pub replies: Vec<Reply>,
}

impl Transition {
    fn to(next: ConversationState, reply: Reply) -> Self {
        Self {
            next,
            replies: vec![reply],
        }
    }

    fn main_menu(reply: Reply) -> Self {
        Self::to(ConversationState::MainMenu, reply)
    }
}

/// The dialogue coordinator. Holds no per-user state; everything mutable
/// lives in the [`Session`] passed to [`Dialogue::dispatch`].
pub struct Dialogue {
    db: Db,
    lifecycle: Lifecycle,
    resolver: ProjectResolver,
    filer: ArtifactFiler,
    transcriber: Option<Arc<dyn Transcriber>>,
    reminders: Arc<ReminderSwitch>,
    offset: FixedOffset,
}

impl Dialogue {
    pub fn new(
        db: Db,
        projects_root: PathBuf,
        vcs: Arc<dyn CommitSink>,
        transcriber: Option<Arc<dyn Transcriber>>,
        reminders: Arc<ReminderSwitch>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(db.clone()),
            resolver: ProjectResolver::new(projects_root.clone()),
            filer: ArtifactFiler::new(projects_root, db.clone(), vcs),
            db,
            transcriber,
            reminders,
            offset,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Applies one event to the session and returns the replies. The session's
    /// state is set to the returned `next` state.
    pub fn dispatch(&self, session: &mut Session, payload: &EventPayload) -> Result<Transition> {
        let transition = self.route(session, payload)?;
        if transition.next != session.state {
            tracing::debug!(
                from = session.state.as_str(),
                to = transition.next.as_str(),
                shape = payload.shape(),
                "Session transition"
            );
        }
        session.state = transition.next;
        Ok(transition)
    }

    fn route(&self, session: &mut Session, payload: &EventPayload) -> Result<Transition> {
        // Accepted in every state.
        match payload {
            EventPayload::Command { name, .. } => match name.as_str() {
                "start" | "help" => {
                    session.pending_note = None;
                    return Ok(Transition {
                        next: ConversationState::MainMenu,
                        replies: vec![
                            Reply::with_keyboard(
                                help_text(),
                                keyboards::reply_keyboard(session.active_visit_id.is_some()),
                            ),
                            self.main_menu_reply(session),
                        ],
                    });
                }
                "menu" => {
                    session.pending_note = None;
                    return Ok(Transition::main_menu(self.main_menu_reply(session)));
                }
                "cancel" => {
                    session.pending_note = None;
                    return Ok(Transition::main_menu(Reply::with_keyboard(
                        "Cancelled.",
                        keyboards::reply_keyboard(session.active_visit_id.is_some()),
                    )));
                }
                _ => {}
            },
            EventPayload::Photo { file_path, caption } => {
                return self.handle_photo(session, Path::new(file_path), caption.as_deref());
            }
            EventPayload::Voice { file_path } => {
                return self.handle_voice(session, Path::new(file_path));
            }
            EventPayload::Document {
                file_path,
                file_name,
                file_size,
            } => {
                return self.handle_document(
                    session,
                    Path::new(file_path),
                    file_name.as_deref(),
                    *file_size,
                );
            }
            _ => {}
        }

        match session.state {
            ConversationState::MainMenu => self.on_main_menu(session, payload),
            ConversationState::SelectProject => self.on_select_project(session, payload),
            ConversationState::VisitLocation => self.on_visit_location(session, payload),
            ConversationState::VisitActive => self.on_visit_active(session, payload),
            ConversationState::TaskDescription => match payload {
                EventPayload::Text { text } => self.start_task(session, text.trim()),
                _ => self.prompt(session),
            },
            ConversationState::SearchQuery => match payload {
                EventPayload::Text { text } => self.search(text.trim()),
                _ => self.prompt(session),
            },
            ConversationState::QuickNote => match payload {
                EventPayload::Text { text } => self.save_note(session, text.trim()),
                _ => self.prompt(session),
            },
            ConversationState::NewProject => match payload {
                EventPayload::Text { text } => self.create_project(session, text.trim()),
                EventPayload::Button { data } if data.as_str() == "menu:main" => {
                    Ok(Transition::main_menu(self.main_menu_reply(session)))
                }
                _ => self.prompt(session),
            },
        }
    }

    /// Re-renders the current state's prompt. Never mutates the session.
    fn prompt(&self, session: &Session) -> Result<Transition> {
        let reply = match session.state {
            ConversationState::MainMenu => self.main_menu_reply(session),
            ConversationState::SelectProject => Reply::with_keyboard(
                "Select a project:",
                self.project_keyboard(session, session.page)?,
            ),
            ConversationState::VisitLocation => Reply::with_keyboard(
                "Send your location, type an address, or skip:",
                keyboards::location_prompt(),
            ),
            ConversationState::VisitActive => Reply::with_keyboard(
                "End the active visit?",
                keyboards::end_visit_confirm(),
            ),
            ConversationState::TaskDescription => Reply::text("Describe the task:"),
            ConversationState::SearchQuery => Reply::text("Enter search term:"),
            ConversationState::QuickNote => Reply::text("Type your quick note:"),
            ConversationState::NewProject => Reply::text(
                "Enter a name for the new project (letters, digits, '.', '_' or '-'):",
            ),
        };
        Ok(Transition::to(session.state, reply))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Per-state handlers
    // ─────────────────────────────────────────────────────────────────────

    fn on_main_menu(&self, session: &mut Session, payload: &EventPayload) -> Result<Transition> {
        match payload {
            EventPayload::Command { name, args } => self.on_command(session, name, args),
            EventPayload::Button { data } => match parse_callback(data) {
                Callback::Menu(action) => self.on_menu(session, action),
                Callback::Visit("end") => self.confirm_end_visit(session),
                Callback::Task("finish") => self.finish_task(session),
                Callback::Note("save") => match session.pending_note.take() {
                    Some(note) => self.save_note(session, &note),
                    None => Ok(Transition::main_menu(Reply::text("Nothing to save."))),
                },
                Callback::Note("discard") => {
                    session.pending_note = None;
                    Ok(Transition::main_menu(Reply::text("Discarded.")))
                }
                Callback::Noop => Ok(self.stay(session)),
                _ => self.prompt(session),
            },
            EventPayload::Text { text } => self.on_main_text(session, text.trim()),
            _ => self.prompt(session),
        }
    }

    fn on_command(&self, session: &mut Session, name: &str, args: &[String]) -> Result<Transition> {
        let rest = args.join(" ");
        let rest = rest.trim();
        match name {
            "project" if !rest.is_empty() => self.select_by_query(session, rest),
            "project" | "projects" => self.show_projects(session, "Select a project:"),
            "status" => self.status(session),
            "visit" => self.begin_visit(session),
            "endvisit" => self.confirm_end_visit(session),
            "task" => self.begin_task(session),
            "endtask" => self.finish_task(session),
            "search" if !rest.is_empty() => self.search(rest),
            "search" => Ok(Transition::to(
                ConversationState::SearchQuery,
                Reply::text("Enter search term:"),
            )),
            "recent" => self.recent(),
            "visits" => self.visits(session),
            "reminders" => Ok(self.toggle_reminders(session)),
            _ => self.prompt(session),
        }
    }

    fn on_menu(&self, session: &mut Session, action: &str) -> Result<Transition> {
        match action {
            "switch_project" => self.show_projects(session, "Select a project:"),
            "status" => self.status(session),
            "start_visit" => self.begin_visit(session),
            "quick_note" => self.begin_quick_note(session),
            "start_task" => self.begin_task(session),
            "search" => Ok(Transition::to(
                ConversationState::SearchQuery,
                Reply::text("Enter search term:"),
            )),
            "recent" => self.recent(),
            "main" => Ok(Transition::main_menu(self.main_menu_reply(session))),
            "new_project" => Ok(Transition::to(
                ConversationState::NewProject,
                Reply::text("Enter a name for the new project:"),
            )),
            _ => self.prompt(session),
        }
    }

    fn on_main_text(&self, session: &mut Session, text: &str) -> Result<Transition> {
        match text {
            keyboards::LABEL_MENU => {
                return Ok(Transition::main_menu(self.main_menu_reply(session)))
            }
            keyboards::LABEL_STATUS => return self.status(session),
            keyboards::LABEL_PROJECTS => {
                return self.show_projects(session, "Select a project:")
            }
            keyboards::LABEL_QUICK_NOTE => return self.begin_quick_note(session),
            keyboards::LABEL_END_VISIT => return self.confirm_end_visit(session),
            keyboards::LABEL_START_TASK => return self.begin_task(session),
            _ => {}
        }

        let Some(project) = session.active_project.clone() else {
            return Ok(Transition::main_menu(Reply::text(
                "Set a project first to save notes.",
            )));
        };
        if session.active_visit_id.is_some() {
            return self.save_note(session, text);
        }
        session.pending_note = Some(text.to_string());
        Ok(Transition::main_menu(Reply::with_keyboard(
            format!("Save as quick note to {project}?"),
            keyboards::pending_note(),
        )))
    }

    fn on_select_project(
        &self,
        session: &mut Session,
        payload: &EventPayload,
    ) -> Result<Transition> {
        match payload {
            EventPayload::Button { data } => match parse_callback(data) {
                Callback::Project(name) => {
                    if self.resolver.list_projects()?.iter().any(|p| p == name) {
                        self.select_project(session, name)
                    } else {
                        self.show_projects(session, &format!("Project '{name}' not found."))
                    }
                }
                Callback::Page(page) => {
                    session.page = page;
                    Ok(Transition::to(
                        ConversationState::SelectProject,
                        Reply::with_keyboard(
                            "Select a project:",
                            self.project_keyboard(session, page)?,
                        ),
                    ))
                }
                Callback::Noop => Ok(self.stay(session)),
                Callback::Menu("new_project") => Ok(Transition::to(
                    ConversationState::NewProject,
                    Reply::text("Enter a name for the new project:"),
                )),
                Callback::Menu("main") => Ok(Transition::main_menu(self.main_menu_reply(session))),
                _ => self.prompt(session),
            },
            EventPayload::Text { text } => self.select_by_query(session, text.trim()),
            _ => self.prompt(session),
        }
    }

    fn on_visit_location(
        &self,
        session: &mut Session,
        payload: &EventPayload,
    ) -> Result<Transition> {
        match payload {
            EventPayload::Button { data } => match parse_callback(data) {
                Callback::Visit("confirm") => Ok(Transition::to(
                    ConversationState::VisitLocation,
                    Reply::with_keyboard(
                        "Send your location, type an address, or skip:",
                        keyboards::location_prompt(),
                    ),
                )),
                Callback::Visit("switch_first") => {
                    self.show_projects(session, "Select a project for the site visit:")
                }
                Callback::Visit("skip_location") => self.create_visit(session, None, None),
                Callback::Menu("main") => Ok(Transition::main_menu(self.main_menu_reply(session))),
                _ => self.prompt(session),
            },
            EventPayload::Text { text } => {
                let location = text.trim();
                self.create_visit(session, Some(location.to_string()), None)
            }
            EventPayload::Location {
                latitude,
                longitude,
            } => self.create_visit(
                session,
                Some(format!("{latitude:.6}, {longitude:.6}")),
                Some((*latitude, *longitude)),
            ),
            _ => self.prompt(session),
        }
    }

    fn on_visit_active(&self, session: &mut Session, payload: &EventPayload) -> Result<Transition> {
        match payload {
            EventPayload::Button { data } => match parse_callback(data) {
                Callback::Visit("end_confirm") => self.end_visit(session),
                Callback::Menu(action) => self.on_menu(session, action),
                _ => self.prompt(session),
            },
            // Notes and reply-keyboard labels still work at the confirmation.
            EventPayload::Text { text } => self.on_main_text(session, text.trim()),
            _ => self.prompt(session),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────

    fn project_keyboard(&self, session: &Session, page: usize) -> Result<Keyboard> {
        let projects = self.resolver.list_projects()?;
        Ok(keyboards::project_list(
            &projects,
            session.active_project.as_deref(),
            page,
        ))
    }

    fn show_projects(&self, session: &mut Session, heading: &str) -> Result<Transition> {
        session.page = 0;
        Ok(Transition::to(
            ConversationState::SelectProject,
            Reply::with_keyboard(heading, self.project_keyboard(session, 0)?),
        ))
    }

    fn select_by_query(&self, session: &mut Session, query: &str) -> Result<Transition> {
        match self.resolver.resolve(query)? {
            ProjectMatch::Unique(name) => self.select_project(session, &name),
            ProjectMatch::Ambiguous(_) | ProjectMatch::NotFound => {
                let heading = format!("No unique match for '{query}'. Tap a button or try again.");
                Ok(Transition::to(
                    ConversationState::SelectProject,
                    Reply::with_keyboard(heading, self.project_keyboard(session, session.page)?),
                ))
            }
        }
    }

    fn select_project(&self, session: &mut Session, name: &str) -> Result<Transition> {
        self.db.log_event("project_switched", Some(name), Some(name))?;
        session.active_project = Some(name.to_string());
        session.pending_note = None;
        session.page = 0;
        tracing::info!(project = name, "Project selected");
        Ok(Transition::main_menu(Reply::with_keyboard(
            format!("Active project: {name}"),
            keyboards::main_menu(),
        )))
    }

    fn create_project(&self, session: &mut Session, name: &str) -> Result<Transition> {
        if let Err(err) = validate_project_name(name) {
            tracing::debug!(error = %err, "Rejected project name");
            return Ok(Transition::to(
                ConversationState::NewProject,
                Reply::text(
                    "Invalid project name. Use letters, digits, '.', '_' or '-' (max 64), \
                     starting with a letter or digit.",
                ),
            ));
        }
        let outcome = self
            .resolver
            .ensure_project_exists(name, &self.db, self.filer.vcs())?;
        let mut transition = self.select_project(session, name)?;
        let heading = match outcome {
            EnsureOutcome::Created => format!("Created project {name}."),
            EnsureOutcome::Existing => format!("Project {name} already exists."),
        };
        if let Some(reply) = transition.replies.first_mut() {
            reply.text = format!("{heading}\n{}", reply.text);
        }
        Ok(transition)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Visits
    // ─────────────────────────────────────────────────────────────────────

    fn begin_visit(&self, session: &mut Session) -> Result<Transition> {
        if let Some(visit_id) = session.active_visit_id {
            return Ok(Transition::main_menu(Reply::text(format!(
                "Visit already active (#{visit_id}). End it first."
            ))));
        }
        match session.active_project.clone() {
            Some(project) => Ok(Transition::to(
                ConversationState::VisitLocation,
                Reply::with_keyboard(
                    format!("Start site visit for {project}?"),
                    keyboards::visit_confirm(&project),
                ),
            )),
            None => self.show_projects(session, "Select a project for the site visit:"),
        }
    }

    fn create_visit(
        &self,
        session: &mut Session,
        location: Option<String>,
        coordinates: Option<(f64, f64)>,
    ) -> Result<Transition> {
        let Some(project) = session.active_project.clone() else {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        };
        let location = location.filter(|loc| !loc.is_empty());

        self.resolver
            .ensure_project_exists(&project, &self.db, self.filer.vcs())?;
        let visit_id = self
            .lifecycle
            .start_visit(&project, location.as_deref(), coordinates)?;
        session.active_visit_id = Some(visit_id);

        let place = location
            .as_deref()
            .map(|loc| format!(" at {loc}"))
            .unwrap_or_default();
        Ok(Transition::main_menu(Reply::with_keyboard(
            format!(
                "Site visit started for {project}{place}\nVisit ID: {visit_id}\n\n\
                 Send photos, voice notes, or text. Tap End visit when done."
            ),
            keyboards::reply_keyboard(true),
        )))
    }

    fn confirm_end_visit(&self, session: &mut Session) -> Result<Transition> {
        match session.active_visit_id {
            Some(visit_id) => Ok(Transition::to(
                ConversationState::VisitActive,
                Reply::with_keyboard(
                    format!("End visit #{visit_id}?"),
                    keyboards::end_visit_confirm(),
                ),
            )),
            None => Ok(Transition::main_menu(Reply::text("No active visit."))),
        }
    }

    fn end_visit(&self, session: &mut Session) -> Result<Transition> {
        let Some(visit_id) = session.active_visit_id else {
            return Ok(Transition::main_menu(Reply::text("No active visit.")));
        };

        let text = match self.lifecycle.end_visit(visit_id, None)? {
            EndVisit::Ended(summary) => {
                session.active_visit_id = None;
                let mut text = format!("Visit ended.\n\n{}", summary.summary);
                match self.filer.write_visit_report(&summary, local_now(self.offset)) {
                    Ok(report) if report.committed => {
                        text.push_str(&format!("\n\nReport saved + committed: {}", report.relative));
                    }
                    Ok(report) => {
                        text.push_str(&format!(
                            "\n\nReport saved (git commit failed): {}",
                            report.relative
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(visit_id, error = %err, "Visit report not written");
                    }
                }
                text
            }
            EndVisit::NotFound => {
                session.active_visit_id = None;
                tracing::warn!(visit_id, "Stale visit reference cleared");
                format!("Visit #{visit_id} no longer exists. Cleared it from this chat.")
            }
            EndVisit::AlreadyEnded(_) => {
                session.active_visit_id = None;
                format!("Visit #{visit_id} was already ended.")
            }
        };
        Ok(Transition::main_menu(Reply::with_keyboard(
            text,
            keyboards::reply_keyboard(false),
        )))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────────────

    fn begin_task(&self, session: &mut Session) -> Result<Transition> {
        if session.active_project.is_none() {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        }
        if let Some(task_id) = session.active_task_id {
            match self.lifecycle.task(task_id)? {
                Some(task) if task.ended_at.is_none() => {
                    return Ok(Transition::main_menu(Reply::with_keyboard(
                        format!(
                            "Task already running: {}\nStarted: {}",
                            task.description,
                            display_local(&task.started_at, self.offset)
                        ),
                        keyboards::finish_task(),
                    )));
                }
                _ => session.active_task_id = None,
            }
        }
        Ok(Transition::to(
            ConversationState::TaskDescription,
            Reply::text("Describe the task:"),
        ))
    }

    fn start_task(&self, session: &mut Session, description: &str) -> Result<Transition> {
        let Some(project) = session.active_project.clone() else {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        };
        let task_id = self
            .lifecycle
            .start_task(&project, description, session.active_visit_id)?;
        session.active_task_id = Some(task_id);
        Ok(Transition::main_menu(Reply::with_keyboard(
            format!("Task started: {description}\nTask ID: {task_id}"),
            keyboards::finish_task(),
        )))
    }

    fn finish_task(&self, session: &mut Session) -> Result<Transition> {
        let Some(task_id) = session.active_task_id else {
            return Ok(Transition::main_menu(Reply::text("No active task.")));
        };
        let outcome = self.lifecycle.end_task(task_id)?;
        session.active_task_id = None;
        let text = match outcome {
            EndTask::Ended(result) => format!(
                "Task finished: {}\nDuration: {:.0} minutes",
                result.description, result.duration_minutes
            ),
            EndTask::NotFound => {
                tracing::warn!(task_id, "Stale task reference cleared");
                format!("Task #{task_id} no longer exists. Cleared it from this chat.")
            }
            EndTask::AlreadyEnded(task) => {
                format!("Task #{task_id} was already finished: {}", task.description)
            }
        };
        Ok(Transition::main_menu(Reply::text(text)))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Notes, search, reports
    // ─────────────────────────────────────────────────────────────────────

    fn begin_quick_note(&self, session: &Session) -> Result<Transition> {
        if session.active_project.is_none() {
            return Ok(Transition::main_menu(Reply::text(
                "Set a project first to save notes.",
            )));
        }
        Ok(Transition::to(
            ConversationState::QuickNote,
            Reply::text("Type your quick note:"),
        ))
    }

    fn save_note(&self, session: &mut Session, note: &str) -> Result<Transition> {
        let Some(project) = session.active_project.clone() else {
            return Ok(Transition::main_menu(Reply::text(
                "Set a project first to save notes.",
            )));
        };
        let filed = self.filer.append_quick_note(
            &project,
            note,
            session.active_visit_id,
            local_now(self.offset),
        )?;
        let mut text = format!("Note saved to {project}/{}", filed.relative);
        if !filed.committed {
            text.push_str(" (git commit failed)");
        }
        Ok(Transition::main_menu(Reply::text(text)))
    }

    fn search(&self, keyword: &str) -> Result<Transition> {
        let hits = self.db.search_transcripts(keyword, SEARCH_LIMIT)?;
        if hits.is_empty() {
            return Ok(Transition::main_menu(Reply::text(format!(
                "No results for '{keyword}'."
            ))));
        }
        let mut text = format!("Results for '{keyword}':\n");
        for hit in &hits {
            let source = match hit.source {
                SearchSource::Voice => "voice",
                SearchSource::Note => "note",
            };
            text.push_str(&format!(
                "\n[{}] {} ({source})\n{}\n",
                hit.project,
                display_local(&hit.created_at, self.offset),
                snippet(&hit.text, keyword, SNIPPET_RADIUS)
            ));
        }
        Ok(Transition::main_menu(Reply::text(text)))
    }

    fn status(&self, session: &Session) -> Result<Transition> {
        let Some(project) = session.active_project.as_deref() else {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        };

        let status_path = self.resolver.project_dir(project).join("STATUS.md");
        let status = if status_path.is_file() {
            let bytes = fs_err::read(&status_path)
                .map_err(|err| PreceptError::io("read STATUS.md", err))?;
            truncate_chars(&String::from_utf8_lossy(&bytes), STATUS_MAX_CHARS)
        } else {
            "No STATUS.md found.".to_string()
        };

        let stats = self.db.project_stats(project)?;
        let mut text = format!(
            "{project}\n\n{status}\n\nDB: {} photos, {} voice notes, {} notes, {} visits, {} scans, {}h tracked",
            stats.photos,
            stats.voice_notes,
            stats.notes,
            stats.visits,
            stats.scans,
            stats.total_task_hours
        );
        if let Some(visit_id) = session.active_visit_id {
            text.push_str(&format!("\nActive visit: #{visit_id}"));
        }
        if let Some(task_id) = session.active_task_id {
            if let Some(task) = self.lifecycle.task(task_id)?.filter(|t| t.ended_at.is_none()) {
                text.push_str(&format!("\nActive task: {}", task.description));
            }
        }
        Ok(Transition::main_menu(Reply::text(text)))
    }

    fn recent(&self) -> Result<Transition> {
        let events = self.db.recent_activity(RECENT_LIMIT)?;
        if events.is_empty() {
            return Ok(Transition::main_menu(Reply::text("No activity yet.")));
        }
        let mut text = String::from("Recent activity:\n");
        for event in &events {
            let project = event
                .project
                .as_deref()
                .map(|p| format!(" [{p}]"))
                .unwrap_or_default();
            let detail = event
                .detail
                .as_deref()
                .map(|d| format!(": {}", truncate_chars(d, 60)))
                .unwrap_or_default();
            text.push_str(&format!(
                "\n{} {}{project}{detail}",
                display_local(&event.created_at, self.offset),
                event.event_type
            ));
        }
        Ok(Transition::main_menu(Reply::text(text)))
    }

    fn visits(&self, session: &Session) -> Result<Transition> {
        let visits = self
            .db
            .visit_history(session.active_project.as_deref(), VISIT_HISTORY_LIMIT)?;
        if visits.is_empty() {
            return Ok(Transition::main_menu(Reply::text("No visits recorded.")));
        }
        let mut text = String::from("Visit history:\n");
        for visit in &visits {
            let status = if visit.is_active() { "active" } else { "completed" };
            text.push_str(&format!(
                "\n#{} [{}] {} ({}) -- {status}",
                visit.id,
                visit.project,
                display_local(&visit.started_at, self.offset),
                visit.location.as_deref().unwrap_or("no location")
            ));
        }
        Ok(Transition::main_menu(Reply::text(text)))
    }

    fn toggle_reminders(&self, session: &Session) -> Transition {
        let settings = self.reminders.toggle(session.active_project.as_deref());
        let text = match (settings.enabled, settings.project.as_deref()) {
            (true, Some(project)) => format!("Daily reminders: on (project: {project})"),
            (true, None) => "Daily reminders: on (no project set)".to_string(),
            (false, _) => "Daily reminders: off".to_string(),
        };
        tracing::info!(enabled = settings.enabled, "Reminders toggled");
        Transition::main_menu(Reply::text(text))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Media
    // ─────────────────────────────────────────────────────────────────────

    fn handle_photo(
        &self,
        session: &Session,
        source: &Path,
        caption: Option<&str>,
    ) -> Result<Transition> {
        let Some(project) = session.active_project.as_deref() else {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        };
        let filed = self.filer.file_photo(
            project,
            source,
            caption,
            session.active_visit_id,
            local_now(self.offset),
        )?;
        let text = if filed.committed {
            format!("Photo saved + committed: {}", filed.relative)
        } else {
            format!("Photo saved (git commit failed): {}", filed.relative)
        };
        Ok(Transition::main_menu(Reply::text(text)))
    }

    fn handle_voice(&self, session: &Session, audio: &Path) -> Result<Transition> {
        let Some(project) = session.active_project.as_deref() else {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        };
        let Some(transcriber) = self.transcriber.as_deref() else {
            return Ok(Transition::main_menu(Reply::text(
                "Transcription is not configured.",
            )));
        };

        let transcript = match transcribe_to_completion(transcriber, audio) {
            Ok(text) => text,
            Err(PreceptError::Transcription(reason)) => {
                return Ok(Transition::main_menu(Reply::text(format!(
                    "Transcription failed: {reason}"
                ))));
            }
            Err(err) => {
                return Ok(Transition::main_menu(Reply::text(format!(
                    "Transcription failed: {err}"
                ))));
            }
        };
        if transcript.is_empty() {
            return Ok(Transition::main_menu(Reply::text(
                "Transcription returned no text. Nothing saved.",
            )));
        }

        let filed = self.filer.file_voice_transcript(
            project,
            &transcript,
            session.active_visit_id,
            local_now(self.offset),
        )?;
        let status = if filed.committed {
            "transcribed + committed"
        } else {
            "transcribed (git commit failed)"
        };
        Ok(Transition::main_menu(Reply::text(format!(
            "Voice note {status}: {}\n\n{transcript}",
            filed.relative
        ))))
    }

    fn handle_document(
        &self,
        session: &Session,
        source: &Path,
        file_name: Option<&str>,
        file_size: Option<u64>,
    ) -> Result<Transition> {
        let Some(project) = session.active_project.as_deref() else {
            return Ok(Transition::main_menu(Reply::text("Set a project first.")));
        };
        let outcome = self.filer.file_document(
            project,
            source,
            file_name,
            file_size,
            session.active_visit_id,
            local_now(self.offset),
        )?;
        let text = match outcome {
            DocumentOutcome::Filed { artifact, network } => {
                let mut text = if artifact.committed {
                    format!("Document saved + committed: {}", artifact.relative)
                } else {
                    format!("Document saved (git commit failed): {}", artifact.relative)
                };
                if network {
                    text.push_str("\nLogged as network scan.");
                }
                text
            }
            DocumentOutcome::Rejected(reason) => reason,
        };
        Ok(Transition::main_menu(Reply::text(text)))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Rendering helpers
    // ─────────────────────────────────────────────────────────────────────

    fn stay(&self, session: &Session) -> Transition {
        Transition {
            next: session.state,
            replies: Vec::new(),
        }
    }

    fn main_menu_reply(&self, session: &Session) -> Reply {
        let mut text = match session.active_project.as_deref() {
            Some(project) => format!("Precept -- Active: {project}"),
            None => "Precept -- No project selected".to_string(),
        };
        if let Some(visit_id) = session.active_visit_id {
            text.push_str(&format!("\nVisit in progress: #{visit_id}"));
        }
        if let Some(task_id) = session.active_task_id {
            text.push_str(&format!("\nTask running: #{task_id}"));
        }
        Reply::with_keyboard(text, keyboards::main_menu())
    }
}

fn help_text() -> &'static str {
    "Precept field assistant\n\n\
     /project <name> - switch project\n\
     /projects - list projects\n\
     /status - project status\n\
     /visit - start a site visit\n\
     /endvisit - end the active visit\n\
     /task - start a task\n\
     /endtask - finish the active task\n\
     /search <keyword> - search transcripts and notes\n\
     /recent - recent activity\n\
     /visits - visit history\n\
     /reminders - toggle daily reminders\n\
     /cancel - abandon the current step\n\n\
     Send photos, voice notes, or documents to file them under the active project."
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{kept}\n... (truncated)")
}

/// Up to `radius` characters either side of the first case-insensitive match.
fn snippet(text: &str, keyword: &str, radius: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let lower = text.to_lowercase();
    let center = lower
        .find(&keyword.to_lowercase())
        .map(|byte| lower[..byte].chars().count())
        .unwrap_or(0)
        .min(chars.len());

    let start = center.saturating_sub(radius);
    let end = (center + keyword.chars().count() + radius).min(chars.len());
    let mut out: String = chars[start..end].iter().collect();
    if start > 0 {
        out.insert_str(0, "...");
    }
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fixed_offset;
    use crate::store::test_db;
    use crate::transcribe::fake::FixedTranscriber;
    use crate::vcs::fake::RecordingCommitSink;
    use tempfile::TempDir;

    struct Fixture {
        _db_dir: TempDir,
        root: TempDir,
        inbox: TempDir,
        db: Db,
        sink: Arc<RecordingCommitSink>,
        dialogue: Dialogue,
    }

    fn fixture_with(sink: RecordingCommitSink, transcript: Option<std::result::Result<&str, &str>>) -> Fixture {
        let (db_dir, db) = test_db();
        let root = tempfile::tempdir().expect("root");
        for name in ["acme", "acme-archive", "globex"] {
            fs_err::create_dir_all(root.path().join(name)).expect("project dir");
        }
        let sink = Arc::new(sink);
        let transcriber = transcript.map(|outcome| {
            Arc::new(FixedTranscriber(
                outcome.map(str::to_string).map_err(str::to_string),
            )) as Arc<dyn Transcriber>
        });
        let dialogue = Dialogue::new(
            db.clone(),
            root.path().to_path_buf(),
            sink.clone(),
            transcriber,
            Arc::new(ReminderSwitch::new(true)),
            fixed_offset(120),
        );
        Fixture {
            _db_dir: db_dir,
            root,
            inbox: tempfile::tempdir().expect("inbox"),
            db,
            sink,
            dialogue,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingCommitSink::default(), Some(Ok("check the UPS batteries")))
    }

    impl Fixture {
        fn send(&self, session: &mut Session, payload: EventPayload) -> Transition {
            self.dialogue.dispatch(session, &payload).expect("dispatch")
        }

        fn incoming(&self, name: &str) -> String {
            let path = self.inbox.path().join(name);
            fs_err::write(&path, b"bytes").expect("incoming file");
            path.to_string_lossy().to_string()
        }

        fn count(&self, table: &str) -> i64 {
            self.db
                .with_connection(|conn| {
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                        .map_err(|err| PreceptError::storage("count", err))
                })
                .expect("count")
        }
    }

    fn text(value: &str) -> EventPayload {
        EventPayload::Text {
            text: value.to_string(),
        }
    }

    fn button(data: &str) -> EventPayload {
        EventPayload::Button {
            data: data.to_string(),
        }
    }

    fn command(name: &str, args: &[&str]) -> EventPayload {
        EventPayload::Command {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn with_project(project: &str) -> Session {
        Session {
            active_project: Some(project.to_string()),
            ..Session::default()
        }
    }

    fn first_text(transition: &Transition) -> &str {
        transition
            .replies
            .first()
            .map(|reply| reply.text.as_str())
            .unwrap_or_default()
    }

    #[test]
    fn unhandled_shapes_rerender_without_mutation() {
        let fx = fixture();
        for state in ConversationState::ALL {
            let mut shapes = vec![button("bogus:x"), command("frobnicate", &[])];
            if state != ConversationState::VisitLocation {
                shapes.push(EventPayload::Location {
                    latitude: 1.0,
                    longitude: 2.0,
                });
            }
            for payload in shapes {
                let mut session = Session {
                    state,
                    active_project: Some("acme".to_string()),
                    active_visit_id: Some(7),
                    pending_note: Some("draft".to_string()),
                    page: 1,
                    ..Session::default()
                };
                let before = session.clone();
                let transition = fx.send(&mut session, payload.clone());
                assert_eq!(session, before, "{} + {}", state.as_str(), payload.shape());
                assert_eq!(transition.next, state);
                assert!(!transition.replies.is_empty());
            }
        }
    }

    #[test]
    fn exact_project_match_wins_over_substrings() {
        let fx = fixture();
        let mut session = Session::default();
        let shown = fx.send(&mut session, button("menu:switch_project"));
        assert_eq!(shown.next, ConversationState::SelectProject);

        let picked = fx.send(&mut session, text("ACME"));
        assert_eq!(picked.next, ConversationState::MainMenu);
        assert_eq!(session.active_project.as_deref(), Some("acme"));
        assert_eq!(first_text(&picked), "Active project: acme");
    }

    #[test]
    fn ambiguous_query_stays_in_selection() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::SelectProject,
            ..Session::default()
        };
        let transition = fx.send(&mut session, text("acm"));
        assert_eq!(transition.next, ConversationState::SelectProject);
        assert_eq!(session.active_project, None);
        assert!(first_text(&transition).contains("No unique match for 'acm'"));
    }

    #[test]
    fn project_button_selects_and_page_button_paginates() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::SelectProject,
            ..Session::default()
        };
        let paged = fx.send(&mut session, button("page:1"));
        assert_eq!(paged.next, ConversationState::SelectProject);
        assert_eq!(session.page, 1);

        fx.send(&mut session, button("proj:globex"));
        assert_eq!(session.state, ConversationState::MainMenu);
        assert_eq!(session.active_project.as_deref(), Some("globex"));
        assert_eq!(session.page, 0);
    }

    #[test]
    fn visit_scenario_counts_linked_artifacts() {
        let fx = fixture();
        let mut session = with_project("acme");

        let confirm = fx.send(&mut session, button("menu:start_visit"));
        assert_eq!(confirm.next, ConversationState::VisitLocation);
        fx.send(&mut session, button("visit:confirm"));
        let started = fx.send(&mut session, button("visit:skip_location"));
        assert_eq!(started.next, ConversationState::MainMenu);
        let visit_id = session.active_visit_id.expect("visit id");
        assert!(first_text(&started).starts_with("Site visit started for acme\nVisit ID:"));

        let photo = fx.incoming("rack.jpg");
        let saved = fx.send(
            &mut session,
            EventPayload::Photo {
                file_path: photo,
                caption: Some("rack".to_string()),
            },
        );
        assert!(first_text(&saved).starts_with("Photo saved + committed: pics/"));

        let voice = fx.incoming("clip.ogg");
        let transcribed = fx.send(&mut session, EventPayload::Voice { file_path: voice });
        assert!(first_text(&transcribed).contains("check the UPS batteries"));

        let ask = fx.send(&mut session, text("End visit"));
        assert_eq!(ask.next, ConversationState::VisitActive);
        let ended = fx.send(&mut session, button("visit:end_confirm"));
        assert_eq!(ended.next, ConversationState::MainMenu);
        assert_eq!(session.active_visit_id, None);

        let summary = first_text(&ended);
        assert!(summary.starts_with("Visit ended.\n\nVisit to acme (no location)\nDuration: "));
        assert!(summary.contains("Photos: 1, Voice notes: 1, Tasks: 0, Scans: 0"));

        let row = Lifecycle::new(fx.db.clone())
            .visit(visit_id)
            .expect("lookup")
            .expect("row");
        assert_eq!(row.location, None);
        assert!(row.summary.is_some());

        let reports = fx.root.path().join("acme/docs/site-visits");
        assert_eq!(fs_err::read_dir(reports).expect("reports").count(), 1);
    }

    #[test]
    fn shared_location_becomes_visit_location() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::VisitLocation,
            ..with_project("acme")
        };
        fx.send(
            &mut session,
            EventPayload::Location {
                latitude: -26.2041,
                longitude: 28.0473,
            },
        );
        let visit = Lifecycle::new(fx.db.clone())
            .visit(session.active_visit_id.expect("visit"))
            .expect("lookup")
            .expect("row");
        assert_eq!(visit.location.as_deref(), Some("-26.204100, 28.047300"));
        assert_eq!(visit.latitude, Some(-26.2041));
    }

    #[test]
    fn visit_creates_missing_project_on_demand() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::VisitLocation,
            ..with_project("harbor-site")
        };
        fx.send(&mut session, text("Pump house"));

        assert!(fx.root.path().join("harbor-site").is_dir());
        assert_eq!(fx.sink.inits.lock().expect("inits").len(), 1);
        let kinds: Vec<String> = fx
            .db
            .recent_activity(5)
            .expect("events")
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(kinds.contains(&"project_created".to_string()));
        assert!(kinds.contains(&"visit_started".to_string()));
    }

    #[test]
    fn second_task_surfaces_the_running_one() {
        let fx = fixture();
        let mut session = with_project("acme");

        let ask = fx.send(&mut session, button("menu:start_task"));
        assert_eq!(ask.next, ConversationState::TaskDescription);
        let started = fx.send(&mut session, text("inspect rack 3"));
        assert!(first_text(&started).starts_with("Task started: inspect rack 3\nTask ID: "));

        let again = fx.send(&mut session, button("menu:start_task"));
        assert_eq!(again.next, ConversationState::MainMenu);
        assert!(first_text(&again).starts_with("Task already running: inspect rack 3\nStarted: "));
        assert_eq!(fx.count("tasks"), 1);

        let finished = fx.send(&mut session, button("task:finish"));
        assert!(first_text(&finished).starts_with("Task finished: inspect rack 3\nDuration: "));
        assert_eq!(session.active_task_id, None);
    }

    #[test]
    fn failed_task_finish_keeps_the_running_task() {
        let fx = fixture();
        let mut session = with_project("acme");
        fx.send(&mut session, button("menu:start_task"));
        fx.send(&mut session, text("inspect rack 3"));
        let task_id = session.active_task_id.expect("task id");

        fx.db
            .with_connection(|conn| {
                conn.execute_batch("ALTER TABLE tasks RENAME TO tasks_moved")
                    .map_err(|err| PreceptError::storage("rename", err))
            })
            .expect("rename tasks");
        assert!(fx.dialogue.dispatch(&mut session, &button("task:finish")).is_err());
        assert_eq!(session.active_task_id, Some(task_id));

        fx.db
            .with_connection(|conn| {
                conn.execute_batch("ALTER TABLE tasks_moved RENAME TO tasks")
                    .map_err(|err| PreceptError::storage("rename", err))
            })
            .expect("restore tasks");
        let again = fx.send(&mut session, button("menu:start_task"));
        assert!(first_text(&again).starts_with("Task already running: inspect rack 3"));
        assert_eq!(fx.count("tasks"), 1);
    }

    #[test]
    fn failed_project_switch_keeps_the_previous_project() {
        let fx = fixture();
        let mut session = with_project("acme");
        fx.db
            .with_connection(|conn| {
                conn.execute_batch("ALTER TABLE bot_events RENAME TO bot_events_moved")
                    .map_err(|err| PreceptError::storage("rename", err))
            })
            .expect("rename events");

        assert!(fx
            .dialogue
            .dispatch(&mut session, &command("project", &["globex"]))
            .is_err());
        assert_eq!(session.active_project.as_deref(), Some("acme"));
    }

    #[test]
    fn end_visit_prompt_still_captures_notes_and_labels() {
        let fx = fixture();
        let visit_id = Lifecycle::new(fx.db.clone())
            .start_visit("acme", None, None)
            .expect("visit");
        let mut session = Session {
            active_visit_id: Some(visit_id),
            ..with_project("acme")
        };

        let confirm = fx.send(&mut session, text(keyboards::LABEL_END_VISIT));
        assert_eq!(confirm.next, ConversationState::VisitActive);

        let saved = fx.send(&mut session, text("breaker 4 tripped"));
        assert!(first_text(&saved).starts_with("Note saved to acme/correspondence/"));
        assert_eq!(saved.next, ConversationState::MainMenu);
        assert_eq!(fx.count("quick_notes"), 1);
        assert_eq!(session.active_visit_id, Some(visit_id));

        fx.send(&mut session, text(keyboards::LABEL_END_VISIT));
        let note = fx.send(&mut session, text(keyboards::LABEL_QUICK_NOTE));
        assert_eq!(note.next, ConversationState::QuickNote);

        fx.send(&mut session, command("cancel", &[]));
        fx.send(&mut session, text(keyboards::LABEL_END_VISIT));
        let status = fx.send(&mut session, button("menu:status"));
        assert_eq!(status.next, ConversationState::MainMenu);
        assert!(first_text(&status).contains(&format!("Active visit: #{visit_id}")));
    }

    #[test]
    fn project_button_prefers_exact_case() {
        let fx = fixture();
        fs_err::create_dir_all(fx.root.path().join("ACME")).expect("project dir");
        let mut session = Session {
            state: ConversationState::SelectProject,
            ..Session::default()
        };
        fx.send(&mut session, button("proj:acme"));
        assert_eq!(session.active_project.as_deref(), Some("acme"));

        session.state = ConversationState::SelectProject;
        fx.send(&mut session, button("proj:ACME"));
        assert_eq!(session.active_project.as_deref(), Some("ACME"));

        session.state = ConversationState::SelectProject;
        let missing = fx.send(&mut session, button("proj:nope"));
        assert_eq!(first_text(&missing), "Project 'nope' not found.");
        assert_eq!(session.active_project.as_deref(), Some("ACME"));
    }

    #[test]
    fn status_tolerates_non_utf8_file() {
        let fx = fixture();
        let mut session = with_project("acme");
        let mut bytes = b"Phase 3: ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b" cabling");
        fs_err::write(fx.root.path().join("acme/STATUS.md"), bytes).expect("status");

        let status = fx.send(&mut session, command("status", &[]));
        assert!(first_text(&status).contains("Phase 3: "));
        assert!(first_text(&status).contains(" cabling"));
    }

    #[test]
    fn free_text_during_visit_is_saved_immediately() {
        let fx = fixture();
        let mut session = Session {
            active_visit_id: Some(Lifecycle::new(fx.db.clone())
                .start_visit("acme", None, None)
                .expect("visit")),
            ..with_project("acme")
        };
        let saved = fx.send(&mut session, text("UPS alarm silenced"));
        assert!(first_text(&saved).starts_with("Note saved to acme/correspondence/"));
        assert_eq!(fx.count("quick_notes"), 1);
        assert_eq!(session.pending_note, None);
    }

    #[test]
    fn idle_free_text_needs_confirmation() {
        let fx = fixture();
        let mut session = with_project("acme");

        let asked = fx.send(&mut session, text("order new patch leads"));
        assert_eq!(first_text(&asked), "Save as quick note to acme?");
        assert_eq!(session.pending_note.as_deref(), Some("order new patch leads"));
        assert_eq!(fx.count("quick_notes"), 0);

        fx.send(&mut session, button("note:save"));
        assert_eq!(fx.count("quick_notes"), 1);
        assert_eq!(session.pending_note, None);

        fx.send(&mut session, text("scratch that"));
        let discarded = fx.send(&mut session, button("note:discard"));
        assert_eq!(first_text(&discarded), "Discarded.");
        assert_eq!(fx.count("quick_notes"), 1);
    }

    #[test]
    fn free_text_without_project_is_refused() {
        let fx = fixture();
        let mut session = Session::default();
        let refused = fx.send(&mut session, text("hello"));
        assert_eq!(first_text(&refused), "Set a project first to save notes.");
        assert_eq!(session, Session::default());
    }

    #[test]
    fn transcription_failure_writes_nothing() {
        let fx = fixture_with(RecordingCommitSink::default(), Some(Err("quota exceeded")));
        let mut session = Session {
            state: ConversationState::QuickNote,
            ..with_project("acme")
        };
        let voice = fx.incoming("clip.ogg");
        let failed = fx.send(&mut session, EventPayload::Voice { file_path: voice });
        assert_eq!(failed.next, ConversationState::MainMenu);
        assert_eq!(first_text(&failed), "Transcription failed: quota exceeded");
        assert_eq!(fx.count("voice_notes"), 0);
        assert!(!fx.root.path().join("acme/correspondence").exists());
    }

    #[test]
    fn missing_transcriber_is_reported() {
        let fx = fixture_with(RecordingCommitSink::default(), None);
        let mut session = with_project("acme");
        let voice = fx.incoming("clip.ogg");
        let reply = fx.send(&mut session, EventPayload::Voice { file_path: voice });
        assert_eq!(first_text(&reply), "Transcription is not configured.");
    }

    #[test]
    fn commit_failure_still_saves_and_logs() {
        let fx = fixture_with(RecordingCommitSink::failing(), None);
        let mut session = with_project("acme");
        let photo = fx.incoming("rack.jpg");
        let saved = fx.send(
            &mut session,
            EventPayload::Photo {
                file_path: photo,
                caption: None,
            },
        );
        assert!(first_text(&saved).starts_with("Photo saved (git commit failed): pics/"));
        assert_eq!(fx.count("photos"), 1);
        let latest = fx.db.latest_event().expect("event").expect("row");
        assert_eq!(latest.event_type, "photo_saved");
    }

    #[test]
    fn media_without_project_is_refused() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::SearchQuery,
            ..Session::default()
        };
        let photo = fx.incoming("rack.jpg");
        let reply = fx.send(
            &mut session,
            EventPayload::Photo {
                file_path: photo,
                caption: None,
            },
        );
        assert_eq!(reply.next, ConversationState::MainMenu);
        assert_eq!(first_text(&reply), "Set a project first.");
        assert_eq!(fx.count("photos"), 0);
    }

    #[test]
    fn blocked_document_is_rejected() {
        let fx = fixture();
        let mut session = with_project("acme");
        let script = fx.incoming("install.sh");
        let reply = fx.send(
            &mut session,
            EventPayload::Document {
                file_path: script,
                file_name: Some("install.sh".to_string()),
                file_size: Some(5),
            },
        );
        assert_eq!(first_text(&reply), "File type .sh not allowed.");
    }

    #[test]
    fn stale_visit_reference_is_cleared() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::VisitActive,
            active_visit_id: Some(999),
            ..with_project("acme")
        };
        let reply = fx.send(&mut session, button("visit:end_confirm"));
        assert_eq!(reply.next, ConversationState::MainMenu);
        assert_eq!(session.active_visit_id, None);
        assert!(first_text(&reply).contains("no longer exists"));
        assert_eq!(fx.db.latest_event().expect("event"), None);
    }

    #[test]
    fn cancel_returns_to_main_menu_from_any_state() {
        let fx = fixture();
        for state in ConversationState::ALL {
            let mut session = Session {
                state,
                ..with_project("acme")
            };
            let reply = fx.send(&mut session, command("cancel", &[]));
            assert_eq!(reply.next, ConversationState::MainMenu);
            assert_eq!(first_text(&reply), "Cancelled.");
            assert_eq!(session.active_project.as_deref(), Some("acme"));
        }
    }

    #[test]
    fn new_project_flow_validates_and_creates() {
        let fx = fixture();
        let mut session = Session {
            state: ConversationState::SelectProject,
            ..Session::default()
        };
        let ask = fx.send(&mut session, button("menu:new_project"));
        assert_eq!(ask.next, ConversationState::NewProject);

        let rejected = fx.send(&mut session, text("../etc"));
        assert_eq!(rejected.next, ConversationState::NewProject);
        assert!(first_text(&rejected).starts_with("Invalid project name."));

        let created = fx.send(&mut session, text("Harbor-Site"));
        assert_eq!(created.next, ConversationState::MainMenu);
        assert_eq!(
            first_text(&created),
            "Created project Harbor-Site.\nActive project: Harbor-Site"
        );
        assert!(fx.root.path().join("Harbor-Site").is_dir());
        assert_eq!(session.active_project.as_deref(), Some("Harbor-Site"));
    }

    #[test]
    fn search_and_status_report_from_store() {
        let fx = fixture();
        let mut session = with_project("acme");
        fs_err::write(fx.root.path().join("acme/STATUS.md"), "Phase 2: cabling").expect("status");
        fx.db
            .log_voice("acme", "correspondence/v.md", Some("Replace the UPS battery in rack 3"), None)
            .expect("voice");

        fx.send(&mut session, button("menu:search"));
        let results = fx.send(&mut session, text("ups"));
        assert!(first_text(&results).starts_with("Results for 'ups':\n"));
        assert!(first_text(&results).contains("Replace the UPS battery in rack 3"));

        let status = fx.send(&mut session, command("status", &[]));
        let status = first_text(&status);
        assert!(status.contains("Phase 2: cabling"));
        assert!(status.contains("DB: 0 photos, 1 voice notes, 0 notes, 0 visits, 0 scans, 0h tracked"));
    }

    #[test]
    fn reminders_command_toggles_switch() {
        let fx = fixture();
        let mut session = with_project("acme");
        let off = fx.send(&mut session, command("reminders", &[]));
        assert_eq!(first_text(&off), "Daily reminders: off");
        let on = fx.send(&mut session, command("reminders", &[]));
        assert_eq!(first_text(&on), "Daily reminders: on (project: acme)");
    }

    #[test]
    fn snippet_centers_on_match() {
        let text = format!("{}needle{}", "a".repeat(60), "b".repeat(60));
        let cut = snippet(&text, "NEEDLE", 5);
        assert_eq!(cut, "...aaaaaneedlebbbbb...");
        assert_eq!(snippet("short", "zzz", 40), "short");
    }

    #[test]
    fn status_text_is_truncated() {
        let long = "x".repeat(2100);
        let cut = truncate_chars(&long, STATUS_MAX_CHARS);
        assert!(cut.ends_with("\n... (truncated)"));
        assert_eq!(cut.chars().filter(|c| *c == 'x').count(), 2000);
    }
}
