//! Runtime configuration for the daemon and the registration CLI.
//!
//! Settings come from a TOML file (`~/.config/precept/precept.toml` unless a
//! path is given), then environment variables override individual fields.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PreceptError, Result};

pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".config/precept/precept.toml";
pub const CONFIG_PATH_ENV: &str = "PRECEPT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreceptConfig {
    /// The one chat identity allowed to talk to the assistant. Zero means unset.
    pub allowed_user_id: i64,
    pub projects_dir: PathBuf,
    pub db_path: PathBuf,
    pub socket_path: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub transcription: TranscriptionConfig,
    pub reporter: ReporterConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub enabled: bool,
    /// Offset of the operator's wall clock from UTC.
    pub utc_offset_minutes: i32,
    pub morning_at: String,
    pub afternoon_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub enabled: bool,
    pub program: String,
}

fn home_path(relative: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(relative)
}

impl Default for PreceptConfig {
    fn default() -> Self {
        Self {
            allowed_user_id: 0,
            projects_dir: home_path("Projects"),
            db_path: home_path(".config/precept/precept.db"),
            socket_path: home_path(".config/precept/precept.sock"),
            rate_limit: RateLimitConfig::default(),
            transcription: TranscriptionConfig::default(),
            reporter: ReporterConfig::default(),
            git: GitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_events: 30,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            model: "whisper-1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_minutes: 120,
            morning_at: "07:30".to_string(),
            afternoon_at: "16:30".to_string(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "git".to_string(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Loads the config file (defaults if it does not exist) and applies
/// environment overrides from the current process.
pub fn load_config(path: Option<PathBuf>) -> Result<PreceptConfig> {
    let path = path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    let mut config = load_config_file(path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

pub fn load_config_file(path: Option<PathBuf>) -> Result<PreceptConfig> {
    let config_path = match path.or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(PreceptConfig::default()),
    };

    if !config_path.exists() {
        return Ok(PreceptConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| PreceptError::io("read config", err))?;
    toml::from_str::<PreceptConfig>(&content).map_err(|err| PreceptError::ConfigMalformed {
        path: config_path.clone(),
        details: err.to_string(),
    })
}

impl PreceptConfig {
    /// Applies overrides from `lookup`, which maps an environment variable
    /// name to its value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("PRECEPT_ALLOWED_USER_ID") {
            self.allowed_user_id = raw.trim().parse().map_err(|_| {
                PreceptError::ConfigInvalid(vec![format!(
                    "PRECEPT_ALLOWED_USER_ID is not an integer: {raw}"
                )])
            })?;
        }
        if let Some(dir) = lookup("PRECEPT_PROJECTS_DIR") {
            self.projects_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup("PRECEPT_DB_PATH") {
            self.db_path = PathBuf::from(db);
        }
        if let Some(socket) = lookup("PRECEPT_SOCKET_PATH") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()) {
            self.transcription.api_key = Some(key);
        }
        Ok(())
    }

    /// Checks every setting and reports all problems together.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.allowed_user_id == 0 {
            problems.push("allowed_user_id is required (PRECEPT_ALLOWED_USER_ID)".to_string());
        }
        if !self.projects_dir.is_dir() {
            problems.push(format!(
                "projects_dir not found: {}",
                self.projects_dir.display()
            ));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_events == 0 {
            problems.push("rate_limit window_secs and max_events must be positive".to_string());
        }
        for (name, value) in [
            ("reporter.morning_at", &self.reporter.morning_at),
            ("reporter.afternoon_at", &self.reporter.afternoon_at),
        ] {
            if parse_clock(value).is_none() {
                problems.push(format!("{name} must be HH:MM, got {value:?}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PreceptError::ConfigInvalid(problems))
        }
    }

    pub fn transcription_enabled(&self) -> bool {
        self.transcription.api_key.is_some()
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_dir.join(project)
    }

    /// Config rooted at a temp directory, for tests.
    pub fn with_root(root: &Path) -> Self {
        Self {
            allowed_user_id: 42,
            projects_dir: root.join("projects"),
            db_path: root.join("precept.db"),
            socket_path: root.join("precept.sock"),
            git: GitConfig {
                enabled: false,
                ..GitConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Parses `HH:MM` into (hour, minute).
pub fn parse_clock(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_config_file(Some(temp.path().join("absent.toml"))).expect("load");
        assert_eq!(config.rate_limit.max_events, 30);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.reporter.utc_offset_minutes, 120);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("precept.toml");
        fs_err::write(
            &path,
            "allowed_user_id = 7\n[rate_limit]\nmax_events = 5\n",
        )
        .expect("write");

        let config = load_config_file(Some(path)).expect("load");
        assert_eq!(config.allowed_user_id, 7);
        assert_eq!(config.rate_limit.max_events, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.reporter.morning_at, "07:30");
    }

    #[test]
    fn malformed_file_is_reported() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("precept.toml");
        fs_err::write(&path, "allowed_user_id = [").expect("write");

        let err = load_config_file(Some(path)).unwrap_err();
        assert!(matches!(err, PreceptError::ConfigMalformed { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PRECEPT_ALLOWED_USER_ID", "99"),
            ("PRECEPT_PROJECTS_DIR", "/srv/projects"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);
        let mut config = PreceptConfig::default();
        config
            .apply_env(|key| env.get(key).map(|value| value.to_string()))
            .expect("apply");

        assert_eq!(config.allowed_user_id, 99);
        assert_eq!(config.projects_dir, PathBuf::from("/srv/projects"));
        assert!(config.transcription_enabled());
    }

    #[test]
    fn validate_reports_every_problem() {
        let temp = tempdir().expect("tempdir");
        let mut config = PreceptConfig::with_root(temp.path());
        config.allowed_user_id = 0;
        config.reporter.morning_at = "7h30".to_string();

        let err = config.validate().unwrap_err();
        let PreceptError::ConfigInvalid(problems) = err else {
            panic!("expected ConfigInvalid");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn parses_clock_values() {
        assert_eq!(parse_clock("07:30"), Some((7, 30)));
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("noon"), None);
    }
}
