//! # precept-core
//!
//! Core library for Precept, a single-operator field assistant reached through
//! a chat front-end. It files photos, voice memos, notes and documents into
//! per-project folders, tracks timed tasks, and records site visits.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The daemon serializes events through
//!   one [`Engine`]; the reporter thread only reads the store.
//! - **Sessions are process-local**: per-(user, chat) dialogue state lives in
//!   memory and is lost on restart. Visits and tasks live in SQLite.
//! - **Collaborators behind traits**: version control ([`CommitSink`]) and
//!   speech-to-text ([`Transcriber`]) can be swapped or faked.
//! - **Storage errors are classified**: [`PreceptError::Storage`] carries a
//!   [`StorageErrorKind`] so callers can tell lock contention from damage.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use precept_core::{load_config, Db, Engine};
//!
//! let config = load_config(None)?;
//! let db = Db::open(config.db_path.clone())?;
//! let mut engine = Engine::from_config(&config, db)?;
//! let messages = engine.handle(&event);
//! ```

pub mod access;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod filing;
pub mod lifecycle;
pub mod projects;
pub mod registration;
pub mod reporter;
pub mod session;
pub mod store;
pub mod transcribe;
pub mod vcs;

pub use access::{AccessGate, Admission, RateLimiter};
pub use config::*;
pub use engine::Engine;
pub use error::{PreceptError, Result, StorageErrorKind};
pub use filing::{ArtifactFiler, DocumentOutcome, FiledArtifact};
pub use lifecycle::{EndTask, EndVisit, Lifecycle, TaskResult, VisitCounts, VisitDuration, VisitSummary};
pub use projects::{EnsureOutcome, ProjectMatch, ProjectResolver};
pub use registration::{register_scan, RegisteredScan, ScanRequest};
pub use reporter::{DigestKind, ReminderSettings, ReminderSwitch, Reporter, Schedule};
pub use session::{ConversationState, Dialogue, Session, SessionKey, SessionTable};
pub use store::{Db, EventRow, ProjectStats, SearchHit, SearchSource, TaskRow, VisitRow};
pub use transcribe::{Transcriber, WhisperHttpTranscriber};
pub use vcs::{CommitSink, DisabledCommitSink, GitCliCommitSink};
