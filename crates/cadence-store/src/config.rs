//! On-disk configuration and data directory layout.
//!
//! ```text
//! ~/.cadence/            (or $CADENCE_DATA_DIR)
//! ├── config.toml
//! └── cadence.db
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const CONFIG_FILE: &str = "config.toml";
pub const DATABASE_FILE: &str = "cadence.db";
pub const DATA_DIR_ENV: &str = "CADENCE_DATA_DIR";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// User acted on when `--user` is not given.
    pub default_user: String,
    /// IANA zone used when a user has no stored timezone.
    pub timezone: String,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            default_user: "me".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl CadenceConfig {
    /// Read `config.toml` from `base`. A missing file yields the defaults.
    pub fn load(base: &Path) -> Result<Self> {
        let path = base.join(CONFIG_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| StoreError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(StoreError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save(&self, base: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))?;
        fs::write(base.join(CONFIG_FILE), content)
            .map_err(|e| StoreError::Config(format!("failed to write config: {e}")))
    }
}

pub fn default_base_dir() -> PathBuf {
    dirs_home().join(".cadence")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Explicit override, then `$CADENCE_DATA_DIR`, then `~/.cadence`.
pub fn resolve_base_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    env::var(DATA_DIR_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_base_dir)
}
