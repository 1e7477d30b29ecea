use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::playback::LoopPolicy;
use crate::worker::DelayFloor;

/// Persisted playback tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Authored delays below this are treated as unreliable.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: i64,
    /// Delay substituted for unreliable ones.
    #[serde(default = "default_default_delay_ms")]
    pub default_delay_ms: i64,
    #[serde(default)]
    pub loop_policy: LoopPolicy,
}

fn default_min_delay_ms() -> i64 {
    DelayFloor::default().min_delay_ms
}

fn default_default_delay_ms() -> i64 {
    DelayFloor::default().default_delay_ms
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            default_delay_ms: default_default_delay_ms(),
            loop_policy: LoopPolicy::default(),
        }
    }
}

impl PlaybackConfig {
    pub fn delay_floor(&self) -> DelayFloor {
        DelayFloor {
            min_delay_ms: self.min_delay_ms,
            default_delay_ms: self.default_delay_ms,
        }
    }

    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("flipbook").join("playback.json")
    }

    /// Load from the user config dir, falling back to defaults.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => {
                log::info!("Loaded playback config from {}", path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No playback config found, using defaults");
                Self::default()
            }
            Err(e) => {
                log::warn!("Failed to load playback config: {e}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self) {
        if let Err(e) = self.save_to(&Self::config_path()) {
            log::error!("Failed to write playback config: {e}");
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        log::info!("Saved playback config to {}", path.display());
        Ok(())
    }
}
