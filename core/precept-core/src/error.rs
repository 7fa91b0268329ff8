//! Error types for precept-core operations.
//!
//! Storage failures carry a [`StorageErrorKind`] so callers can tell transient
//! lock contention from conditions that will not clear on their own.

use std::fmt;
use std::path::PathBuf;

use rusqlite::ErrorCode;

/// Whether retrying a failed storage operation can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageErrorKind {
    /// Busy or locked database; the same operation may succeed shortly.
    Retryable,
    /// Disk full, corruption, unreadable file, schema mismatch, bad data.
    Fatal,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::Retryable => f.write_str("retryable"),
            StorageErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// All errors that can occur in precept-core operations.
#[derive(Debug, thiserror::Error)]
pub enum PreceptError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration invalid: {}", .0.join("; "))]
    ConfigInvalid(Vec<String>),

    // ─────────────────────────────────────────────────────────────────────
    // Project Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid project name: {0}")]
    InvalidProjectName(String),

    #[error("Path escapes project directory: {0}")]
    PathEscapesProject(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error ({kind}): {context}: {source}")]
    Storage {
        kind: StorageErrorKind,
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Stored value invalid: {field}: {details}")]
    CorruptRow { field: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O and Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("File rejected: {0}")]
    FileRejected(String),
}

/// Convenience type alias for Results using PreceptError.
pub type Result<T> = std::result::Result<T, PreceptError>;

impl PreceptError {
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        PreceptError::Storage {
            kind: classify_sqlite(&source),
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PreceptError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            PreceptError::Storage { kind, .. } => Some(*kind),
            PreceptError::CorruptRow { .. } => Some(StorageErrorKind::Fatal),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.storage_kind() == Some(StorageErrorKind::Retryable)
    }
}

fn classify_sqlite(err: &rusqlite::Error) -> StorageErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageErrorKind::Retryable,
            _ => StorageErrorKind::Fatal,
        },
        _ => StorageErrorKind::Fatal,
    }
}

// Conversion for string error compatibility at binary and protocol edges
impl From<PreceptError> for String {
    fn from(err: PreceptError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    #[test]
    fn busy_database_is_retryable() {
        let source = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None);
        let err = PreceptError::storage("insert photo", source);
        assert_eq!(err.storage_kind(), Some(StorageErrorKind::Retryable));
        assert!(err.is_retryable());
    }

    #[test]
    fn full_disk_is_fatal() {
        let source = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_FULL), None);
        let err = PreceptError::storage("insert photo", source);
        assert_eq!(err.storage_kind(), Some(StorageErrorKind::Fatal));
        assert!(err.to_string().contains("fatal"));
    }

    #[test]
    fn non_storage_errors_have_no_kind() {
        let err = PreceptError::Transcription("timeout".to_string());
        assert_eq!(err.storage_kind(), None);
        assert!(!err.is_retryable());
    }
}
