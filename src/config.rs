use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const APP_DIR: &str = "signageflow";

/// Daemon configuration, read from `config.toml`.
///
/// Every key is optional; a missing file yields the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// JSON file holding groups, items and interval bookkeeping.
    pub state_file: PathBuf,
    /// Append-only play log. Defaults to `logs.txt` next to the state file.
    pub play_log: Option<PathBuf>,
    pub tick_interval_ms: u64,
    pub sweep_interval_secs: u64,
    pub image_duration_ms: u64,
    pub video_fallback_secs: u64,
    pub width: u32,
    pub height: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state_file: default_state_file(),
            play_log: None,
            tick_interval_ms: 1000,
            sweep_interval_secs: 60,
            image_duration_ms: 3000,
            video_fallback_secs: 30,
            width: 864,
            height: 432,
            log_level: "info".to_string(),
        }
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR).join("state.json"))
        .unwrap_or_else(|| PathBuf::from("signageflow_state.json"))
}

/// `~/.config/signageflow/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(p) => p,
            None => {
                warn!("No config directory available, using defaults");
                return Ok(Self::default());
            }
        };
        if !path.exists() {
            warn!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn play_log_path(&self) -> PathBuf {
        match &self.play_log {
            Some(p) => p.clone(),
            None => self
                .state_file
                .parent()
                .map(|d| d.join("logs.txt"))
                .unwrap_or_else(|| PathBuf::from("logs.txt")),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn image_duration(&self) -> Duration {
        Duration::from_millis(self.image_duration_ms)
    }

    pub fn video_fallback(&self) -> Duration {
        Duration::from_secs(self.video_fallback_secs)
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
