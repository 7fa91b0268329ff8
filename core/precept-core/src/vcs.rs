//! Version-control sink for filed artifacts.
//!
//! Commit failures never undo a save: callers treat an `Err` from
//! [`CommitSink::commit`] as "saved (git commit failed)".

use std::path::Path;
use std::process::Command;

use crate::error::{PreceptError, Result};

pub trait CommitSink: Send + Sync {
    /// Initializes a repository in `dir` if there is none.
    fn init(&self, dir: &Path) -> Result<()>;

    /// Stages `file` (relative to `dir` or absolute) and commits it.
    fn commit(&self, dir: &Path, file: &Path, message: &str) -> Result<()>;
}

/// Shells out to the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCliCommitSink {
    program: String,
}

impl GitCliCommitSink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<()> {
        let command = format!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .current_dir(dir)
            .args(args)
            .output()
            .map_err(|err| PreceptError::CommandFailed {
                command: command.clone(),
                details: err.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(PreceptError::CommandFailed {
            command,
            details: if stderr.is_empty() { stdout } else { stderr },
        })
    }
}

impl Default for GitCliCommitSink {
    fn default() -> Self {
        Self::new("git")
    }
}

impl CommitSink for GitCliCommitSink {
    fn init(&self, dir: &Path) -> Result<()> {
        if dir.join(".git").exists() {
            return Ok(());
        }
        self.run(dir, &["init", "--quiet"])
    }

    fn commit(&self, dir: &Path, file: &Path, message: &str) -> Result<()> {
        let file = file.to_string_lossy();
        self.run(dir, &["add", "--", &file])?;
        self.run(dir, &["commit", "--quiet", "-m", message, "--", &file])?;
        tracing::info!(dir = %dir.display(), message, "Committed artifact");
        Ok(())
    }
}

/// Sink used when version control is turned off in config.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCommitSink;

impl CommitSink for DisabledCommitSink {
    fn init(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _dir: &Path, _file: &Path, _message: &str) -> Result<()> {
        Ok(())
    }
}
