//! Process-wide configuration: device identity, sync mode, display
//! preferences and transient sync bookkeeping. Loaded once at startup and
//! rewritten atomically on every change.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entry::CustomColumn;
use crate::errors::{Error, Result};

/// A `{column_name, column_command}` pair configured by the user; the
/// capture pipeline runs `column_command` and records its trimmed stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CustomColumnDefinition {
    pub column_name: String,
    pub column_command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub user_secret: String,
    pub device_id: String,
    pub is_enabled: bool,
    pub is_offline: bool,
    pub have_missed_uploads: bool,
    pub missed_upload_timestamp: i64,
    pub have_completed_initial_import: bool,
    pub last_saved_history_line: String,
    #[serde(default)]
    pub custom_columns: Vec<CustomColumnDefinition>,
    #[serde(default)]
    pub displayed_columns: Vec<String>,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,

    #[serde(default)]
    pub control_r_enabled: bool,
    #[serde(default = "default_true")]
    pub filter_duplicates: bool,
    #[serde(default)]
    pub beta_mode: bool,
    #[serde(default)]
    pub ai_completion_enabled: bool,
    #[serde(default)]
    pub ai_completion_endpoint: String,
    #[serde(default = "default_true")]
    pub presaving_enabled: bool,
    #[serde(default = "default_true")]
    pub highlight_matches: bool,
    #[serde(default)]
    pub default_filter: String,
}

fn default_true() -> bool {
    true
}

fn default_timestamp_format() -> String {
    "2006-01-02 15:04:05 MST".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_secret: String::new(),
            device_id: String::new(),
            is_enabled: true,
            is_offline: false,
            have_missed_uploads: false,
            missed_upload_timestamp: 0,
            have_completed_initial_import: false,
            last_saved_history_line: String::new(),
            custom_columns: Vec::new(),
            displayed_columns: Vec::new(),
            timestamp_format: default_timestamp_format(),
            control_r_enabled: true,
            filter_duplicates: true,
            beta_mode: false,
            ai_completion_enabled: false,
            ai_completion_endpoint: String::new(),
            presaving_enabled: true,
            highlight_matches: true,
            default_filter: String::new(),
        }
    }
}

impl Config {
    /// Loads the config from `path`, or returns the default config if the
    /// file does not exist yet (the caller is expected to persist it after
    /// `init` populates the secret/device identity).
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| Error::config(format!("malformed config: {e}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Atomically persists the config: write to `<path>.tmp`, then rename
    /// over `path`. A crash mid-write never corrupts the live file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path_for(path);
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(".tmp");
    PathBuf::from(os_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.user_secret = "shh".into();
        config.device_id = "dev-1".into();
        config.save(&path).unwrap();

        assert!(!tmp_path_for(&path).exists());
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn save_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.save(&path).unwrap();
        config.have_missed_uploads = true;
        config.missed_upload_timestamp = 42;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.have_missed_uploads);
        assert_eq!(loaded.missed_upload_timestamp, 42);
    }
}
