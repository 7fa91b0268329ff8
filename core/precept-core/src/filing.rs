//! Writes artifacts into project folders, commits them, and logs them.
//!
//! Layout under each project directory:
//!
//! - `pics/` photos and image documents
//! - `correspondence/` voice transcripts and the daily quick-note file
//! - `docs/network/` network captures and exports (also logged as scans)
//! - `docs/` other documents
//! - `docs/site-visits/` visit reports

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::error::{PreceptError, Result};
use crate::lifecycle::VisitSummary;
use crate::store::Db;
use crate::vcs::CommitSink;

pub const MAX_DOCUMENT_BYTES: u64 = 100 * 1024 * 1024;
const BLOCKED_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "ps1", "sh"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "heic", "heif", "gif", "bmp"];
const NETWORK_EXTENSIONS: &[&str] = &["csv", "txt", "log", "json", "xml", "pcap"];

/// Lowercases, maps separators to `-`, and keeps only `[a-z0-9_-]`.
pub fn safe_filename(text: &str) -> String {
    let safe: String = text
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, ' ' | '/' | '\\') { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if safe.is_empty() {
        "untitled".to_string()
    } else {
        safe
    }
}

/// A file written under a project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiledArtifact {
    pub path: PathBuf,
    /// Path relative to the project directory, with `/` separators.
    pub relative: String,
    pub committed: bool,
}

impl FiledArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Filed {
        artifact: FiledArtifact,
        /// Logged as a scan of type `file`.
        network: bool,
    },
    Rejected(String),
}

pub struct ArtifactFiler {
    projects_root: PathBuf,
    db: Db,
    vcs: Arc<dyn CommitSink>,
}

impl ArtifactFiler {
    pub fn new(projects_root: PathBuf, db: Db, vcs: Arc<dyn CommitSink>) -> Self {
        Self {
            projects_root,
            db,
            vcs,
        }
    }

    pub fn vcs(&self) -> &dyn CommitSink {
        self.vcs.as_ref()
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf> {
        let dir = self.projects_root.join(project);
        if !dir.is_dir() {
            return Err(PreceptError::ProjectNotFound(project.to_string()));
        }
        Ok(dir)
    }

    fn commit(&self, project_dir: &Path, relative: &str, message: &str) -> bool {
        match self.vcs.commit(project_dir, Path::new(relative), message) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(dir = %project_dir.display(), error = %err, "Commit failed");
                false
            }
        }
    }

    pub fn file_photo(
        &self,
        project: &str,
        source: &Path,
        caption: Option<&str>,
        visit_id: Option<i64>,
        now: DateTime<FixedOffset>,
    ) -> Result<FiledArtifact> {
        let dir = self.project_dir(project)?;
        let caption = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("photo");
        let date = now.format("%Y-%m-%d");
        let dest = unique_path(&dir.join("pics"), &format!("{date}-{}", safe_filename(caption)), "jpg");
        copy_into(source, &dest)?;
        tracing::info!(project, dest = %dest.display(), "Photo saved");

        let relative = relative_to(&dir, &dest);
        let file_name = file_name_of(&dest);
        let committed = self.commit(&dir, &relative, &format!("Add photo: {file_name}"));
        self.db.log_photo(
            project,
            &dest.to_string_lossy(),
            Some(caption),
            None,
            visit_id,
        )?;
        Ok(FiledArtifact {
            path: dest,
            relative,
            committed,
        })
    }

    pub fn file_voice_transcript(
        &self,
        project: &str,
        transcript: &str,
        visit_id: Option<i64>,
        now: DateTime<FixedOffset>,
    ) -> Result<FiledArtifact> {
        let dir = self.project_dir(project)?;
        let date = now.format("%Y-%m-%d").to_string();
        let dest = unique_path(
            &dir.join("correspondence"),
            &format!("{date}_voice-note"),
            "md",
        );
        write_file(&dest, &format!("# Voice Note -- {date}\n\n{transcript}\n"))?;
        tracing::info!(project, dest = %dest.display(), "Voice transcript saved");

        let relative = relative_to(&dir, &dest);
        let committed = self.commit(
            &dir,
            &relative,
            &format!("Add voice transcript: {}", file_name_of(&dest)),
        );
        self.db
            .log_voice(project, &dest.to_string_lossy(), Some(transcript), visit_id)?;
        Ok(FiledArtifact {
            path: dest,
            relative,
            committed,
        })
    }

    /// Appends to the day's quick-note file, creating it with a heading.
    pub fn append_quick_note(
        &self,
        project: &str,
        note: &str,
        visit_id: Option<i64>,
        now: DateTime<FixedOffset>,
    ) -> Result<FiledArtifact> {
        let dir = self.project_dir(project)?;
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M");
        let dest = dir
            .join("correspondence")
            .join(format!("{date}_quick-note.md"));

        let content = if dest.exists() {
            let existing = fs_err::read_to_string(&dest)
                .map_err(|err| PreceptError::io("read quick note file", err))?;
            format!("{existing}\n**{time}:** {note}\n")
        } else {
            format!("# Quick Notes -- {date}\n\n**{time}:** {note}\n")
        };
        write_file(&dest, &content)?;

        let relative = relative_to(&dir, &dest);
        let committed = self.commit(&dir, &relative, &format!("Add quick note: {date}"));
        self.db
            .log_quick_note(project, &dest.to_string_lossy(), note, visit_id)?;
        Ok(FiledArtifact {
            path: dest,
            relative,
            committed,
        })
    }

    pub fn file_document(
        &self,
        project: &str,
        source: &Path,
        file_name: Option<&str>,
        file_size: Option<u64>,
        visit_id: Option<i64>,
        now: DateTime<FixedOffset>,
    ) -> Result<DocumentOutcome> {
        let dir = self.project_dir(project)?;

        let size = match file_size {
            Some(size) => size,
            None => fs_err::metadata(source)
                .map_err(|err| PreceptError::io("stat document", err))?
                .len(),
        };
        if size > MAX_DOCUMENT_BYTES {
            self.db.log_event(
                "file_rejected",
                Some(&format!("Too large: {size} bytes")),
                Some(project),
            )?;
            return Ok(DocumentOutcome::Rejected(format!(
                "File too large (max {}MB).",
                MAX_DOCUMENT_BYTES / (1024 * 1024)
            )));
        }

        let original = file_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("document");
        let original_path = Path::new(original);
        let extension = original_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if BLOCKED_EXTENSIONS.contains(&extension.as_str()) {
            self.db.log_event(
                "file_rejected",
                Some(&format!("Blocked extension: .{extension}")),
                Some(project),
            )?;
            return Ok(DocumentOutcome::Rejected(format!(
                "File type .{extension} not allowed."
            )));
        }

        let (subdir, network) = if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            ("pics", false)
        } else if NETWORK_EXTENSIONS.contains(&extension.as_str()) {
            ("docs/network", true)
        } else {
            ("docs", false)
        };

        let stem = original_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let date = now.format("%Y-%m-%d");
        let dest = unique_path(
            &dir.join(subdir),
            &format!("{date}-{}", safe_filename(&stem)),
            &extension,
        );
        copy_into(source, &dest)?;
        tracing::info!(project, dest = %dest.display(), "Document saved");

        let relative = relative_to(&dir, &dest);
        let committed = self.commit(
            &dir,
            &relative,
            &format!("Add document: {}", file_name_of(&dest)),
        );
        let dest_text = dest.to_string_lossy().to_string();
        if network {
            self.db
                .log_scan(project, "file", Some(&dest_text), None, visit_id)?;
        } else {
            self.db
                .log_event("document_saved", Some(&dest_text), Some(project))?;
        }

        Ok(DocumentOutcome::Filed {
            artifact: FiledArtifact {
                path: dest,
                relative,
                committed,
            },
            network,
        })
    }

    pub fn write_visit_report(
        &self,
        summary: &VisitSummary,
        now: DateTime<FixedOffset>,
    ) -> Result<FiledArtifact> {
        let dir = self.project_dir(&summary.project)?;
        let dest = dir.join("docs").join("site-visits").join(format!(
            "{}-visit-{}.md",
            now.format("%Y-%m-%d"),
            summary.visit_id
        ));
        write_file(&dest, &render_visit_report(summary))?;

        let relative = relative_to(&dir, &dest);
        let committed = self.commit(
            &dir,
            &relative,
            &format!("Add site visit summary: {}", file_name_of(&dest)),
        );
        Ok(FiledArtifact {
            path: dest,
            relative,
            committed,
        })
    }
}

pub fn render_visit_report(summary: &VisitSummary) -> String {
    let date: String = summary.started_at.chars().take(10).collect();
    let mut report = format!(
        "# Site Visit -- {}\n\n\
         **Date:** {date}\n\
         **Location:** {}\n\
         **Duration:** {}\n\n\
         ## Summary\n\n\
         - Photos: {}\n\
         - Voice notes: {}\n\
         - Quick notes: {}\n\
         - Tasks: {}\n\
         - Network scans: {}\n",
        summary.project,
        summary.location.as_deref().unwrap_or("Not set"),
        summary.duration,
        summary.counts.photos,
        summary.counts.voice_notes,
        summary.counts.notes,
        summary.counts.tasks,
        summary.counts.scans,
    );
    if let Some(notes) = &summary.notes {
        report.push_str(&format!("\n## Notes\n\n{notes}\n"));
    }
    report
}

/// `{dir}/{base}.{ext}`, or `{base}-2`, `{base}-3`, ... if taken.
fn unique_path(dir: &Path, base: &str, extension: &str) -> PathBuf {
    let with_ext = |name: String| {
        if extension.is_empty() {
            name
        } else {
            format!("{name}.{extension}")
        }
    };
    let mut candidate = dir.join(with_ext(base.to_string()));
    let mut counter = 2;
    while candidate.exists() {
        candidate = dir.join(with_ext(format!("{base}-{counter}")));
        counter += 1;
    }
    candidate
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| PreceptError::io("create artifact directory", err))?;
    }
    Ok(())
}

fn copy_into(source: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    fs_err::copy(source, dest).map_err(|err| PreceptError::io("copy artifact", err))?;
    Ok(())
}

fn write_file(dest: &Path, content: &str) -> Result<()> {
    ensure_parent(dest)?;
    fs_err::write(dest, content).map_err(|err| PreceptError::io("write artifact", err))
}

fn relative_to(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .components()
        .map(|part| part.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
