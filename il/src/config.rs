//! Configuration for idelink

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::CoordinatorOptions;
use crate::editor::{ExternalEditorId, LaunchVariant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Editor used when none is given on the command line
    #[serde(default = "default_external_editor")]
    pub external_editor: ExternalEditorId,

    /// How long to wait for an editor to connect, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Seconds a running editor may stay unconnected before it is relaunched
    #[serde(default = "default_launch_grace_secs")]
    pub launch_grace_secs: u64,

    /// Directory for the messaging socket and its metadata file
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    /// Executable overrides per editor variant
    #[serde(default)]
    pub executables: HashMap<LaunchVariant, PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_external_editor() -> ExternalEditorId {
    ExternalEditorId::MonoDevelop
}

fn default_connect_timeout_ms() -> u64 {
    crate::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_launch_grace_secs() -> u64 {
    crate::DEFAULT_LAUNCH_GRACE_SECS
}

fn default_metadata_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("idelink")
        .join("metadata")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            external_editor: default_external_editor(),
            connect_timeout_ms: default_connect_timeout_ms(),
            launch_grace_secs: default_launch_grace_secs(),
            metadata_dir: default_metadata_dir(),
            executables: HashMap::new(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            debug!(config_path = %config_path.display(), "Config::load: explicit path");
            return Self::load_from(config_path);
        }

        for path in Self::default_paths().iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Config::load: found config");
                return Self::load_from(path);
            }
        }

        debug!("Config::load: using defaults");
        Ok(Config::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(path: Option<&PathBuf>) -> Option<String> {
        Self::load(path).ok().and_then(|config| config.log_level)
    }

    fn default_paths() -> [Option<PathBuf>; 2] {
        [
            dirs::config_dir().map(|p| p.join("idelink").join("config.yml")),
            Some(PathBuf::from("idelink.yml")),
        ]
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content).context("Failed to parse config")?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_secs(self.launch_grace_secs)
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            connect_timeout: self.connect_timeout(),
            launch_grace: self.launch_grace(),
        }
    }
}
