//! On-disk configuration under ~/.config/gleaner/.
//!
//! The config file records where the database lives and who is logged
//! in. A missing file yields `Config::default()`; `login`/`register`
//! persist it with a write-temp-then-rename so the file is never left in
//! a partial state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE: &str = "config.json";
const DEFAULT_DB_FILE: &str = "gleaner.db";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME environment variable not set")]
    NoHome,

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database. Defaults to
    /// `~/.config/gleaner/gleaner.db` when unset.
    pub database_path: Option<PathBuf>,

    /// Name of the logged-in user. Null until `login` or `register`.
    pub current_user_name: Option<String>,
}

/// Resolve the config directory (`~/.config/gleaner/`).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config").join("gleaner"))
}

impl Config {
    /// Load configuration from `dir`. A missing file is not an error.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_str(&data)?)
    }

    /// Persist configuration into `dir`, creating it if needed.
    ///
    /// Writes to a temp file and renames over the target; rename on the
    /// same filesystem is atomic, so readers never observe a torn file.
    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(CONFIG_FILE);
        let tmp = dir.join(format!("{}.tmp.{}", CONFIG_FILE, std::process::id()));

        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })?;

        Ok(())
    }

    /// Record `name` as the logged-in user and persist.
    pub fn set_user(&mut self, name: &str, dir: &Path) -> Result<(), ConfigError> {
        self.current_user_name = Some(name.to_string());
        self.save(dir)
    }

    /// The database path, defaulting next to the config file.
    pub fn database_path(&self, dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| dir.join(DEFAULT_DB_FILE))
    }
}
