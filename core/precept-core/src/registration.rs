//! Out-of-band scan registration, used by the `precept-register` CLI.
//!
//! The scan file must live inside the project directory. Relative paths are
//! taken relative to that directory; `..` components are resolved lexically
//! first, then symlinks are resolved when the file exists, and both results
//! must stay under the project.

use std::path::{Component, Path, PathBuf};

use crate::error::{PreceptError, Result};
use crate::projects::validate_project_name;
use crate::store::Db;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub project: String,
    pub scan_type: String,
    pub filepath: PathBuf,
    pub raw_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredScan {
    pub scan_id: i64,
    pub path: PathBuf,
    /// True when the raw output was read from the file rather than passed in.
    pub read_from_file: bool,
}

pub fn register_scan(db: &Db, projects_root: &Path, request: &ScanRequest) -> Result<RegisteredScan> {
    validate_project_name(&request.project)?;
    let scan_type = request.scan_type.trim();
    if scan_type.is_empty() {
        return Err(PreceptError::InvalidInput("scan type is required".to_string()));
    }

    let project_dir = projects_root.join(&request.project);
    if !project_dir.is_dir() {
        return Err(PreceptError::ProjectNotFound(request.project.clone()));
    }
    let path = contained_path(&project_dir, &request.filepath)?;

    let (raw_output, read_from_file) = match &request.raw_output {
        Some(raw) => (Some(raw.clone()), false),
        None if path.is_file() => {
            let bytes = fs_err::read(&path).map_err(|err| PreceptError::io("read scan file", err))?;
            (Some(String::from_utf8_lossy(&bytes).into_owned()), true)
        }
        None => (None, false),
    };

    let path_text = path.to_string_lossy();
    let scan_id = db.log_scan(
        &request.project,
        scan_type,
        Some(&path_text),
        raw_output.as_deref(),
        None,
    )?;
    tracing::info!(
        project = %request.project,
        scan_type,
        scan_id,
        path = %path.display(),
        "Scan registered"
    );
    Ok(RegisteredScan {
        scan_id,
        path,
        read_from_file,
    })
}

/// Resolves `candidate` against `project_dir` and rejects anything outside it.
pub fn contained_path(project_dir: &Path, candidate: &Path) -> Result<PathBuf> {
    let base = normalize(&absolute(project_dir)?);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };
    let resolved = normalize(&joined);
    if !resolved.starts_with(&base) || resolved == base {
        return Err(PreceptError::PathEscapesProject(candidate.to_path_buf()));
    }

    if resolved.exists() {
        let real_base = fs_err::canonicalize(&base)
            .map_err(|err| PreceptError::io("resolve project directory", err))?;
        let real = fs_err::canonicalize(&resolved)
            .map_err(|err| PreceptError::io("resolve scan path", err))?;
        if !real.starts_with(&real_base) {
            return Err(PreceptError::PathEscapesProject(candidate.to_path_buf()));
        }
    }
    Ok(resolved)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| PreceptError::io("read current directory", err))?;
    Ok(cwd.join(path))
}

/// Lexical `.`/`..` resolution; never touches the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
