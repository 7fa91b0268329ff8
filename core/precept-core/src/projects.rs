//! Project directories: listing, fuzzy resolution, and on-demand creation.
//!
//! A project is a non-hidden directory directly under the projects root. It
//! has no database row; existence is whatever the filesystem says.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{PreceptError, Result};
use crate::store::Db;
use crate::vcs::CommitSink;

static PROJECT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("project name pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectMatch {
    Unique(String),
    /// Two or more names contain the query; none equals it.
    Ambiguous(Vec<String>),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Existing,
    Created,
}

pub fn is_valid_project_name(name: &str) -> bool {
    PROJECT_NAME.is_match(name)
}

pub fn validate_project_name(name: &str) -> Result<()> {
    if is_valid_project_name(name) {
        Ok(())
    } else {
        Err(PreceptError::InvalidProjectName(name.to_string()))
    }
}

/// Picks one name for `query` from `names`.
///
/// An exact case-insensitive match wins outright, even if the query is also a
/// substring of other names. Otherwise a single substring match wins.
pub fn resolve_among(names: &[String], query: &str) -> ProjectMatch {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return ProjectMatch::NotFound;
    }

    if let Some(exact) = names.iter().find(|name| name.to_lowercase() == query) {
        return ProjectMatch::Unique(exact.clone());
    }

    let mut matches: Vec<String> = names
        .iter()
        .filter(|name| name.to_lowercase().contains(&query))
        .cloned()
        .collect();

    match matches.len() {
        0 => ProjectMatch::NotFound,
        1 => ProjectMatch::Unique(matches.remove(0)),
        _ => ProjectMatch::Ambiguous(matches),
    }
}

#[derive(Debug, Clone)]
pub struct ProjectResolver {
    root: PathBuf,
}

impl ProjectResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Sorted names of non-hidden directories under the root. A missing root
    /// lists as empty.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                PreceptError::io(
                    "list projects",
                    err.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk error")),
                )
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn resolve(&self, query: &str) -> Result<ProjectMatch> {
        Ok(resolve_among(&self.list_projects()?, query))
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_project_name(name) && self.project_dir(name).is_dir()
    }

    /// Creates the project directory and its repository when missing, and
    /// records a `project_created` event. Existing projects are left alone.
    pub fn ensure_project_exists(
        &self,
        name: &str,
        db: &Db,
        vcs: &dyn CommitSink,
    ) -> Result<EnsureOutcome> {
        validate_project_name(name)?;
        let dir = self.project_dir(name);
        if dir.is_dir() {
            return Ok(EnsureOutcome::Existing);
        }

        fs_err::create_dir_all(&dir).map_err(|err| PreceptError::io("create project", err))?;
        if let Err(err) = vcs.init(&dir) {
            tracing::warn!(project = name, error = %err, "Repository init failed");
        }
        db.log_event("project_created", Some(name), Some(name))?;
        tracing::info!(project = name, dir = %dir.display(), "Project created");
        Ok(EnsureOutcome::Created)
    }
}
