//! User settings
//!
//! Capture rate, fishing options and the timers the controllers run on.
//! Everything round-trips through JSON so the host can persist it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::vision::capture::DEFAULT_MAX_FPS;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write settings {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Unknown setting: {0}")]
    UnknownKey(String),
}

/// Main settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub fish: FishSettings,
    pub timings: TimingSettings,
}

impl Settings {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                log::info!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Screenshot pipe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Upper bound on screenshots per second
    pub max_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_fps: DEFAULT_MAX_FPS,
        }
    }
}

/// Fishing options, changeable while the fishing controller runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FishSettings {
    /// Repair gear on the repair timer
    pub need_repair: bool,
    /// Hand in collectables on the submit timer
    pub need_submit: bool,
    /// Prefer the mooch action over a fresh cast when offered
    pub small_to_big: bool,
}

impl FishSettings {
    pub const KEYS: [&'static str; 3] = ["need_repair", "need_submit", "small_to_big"];

    /// Settings for long collectable runs
    pub fn collectables_preset() -> Self {
        Self {
            need_repair: true,
            need_submit: true,
            small_to_big: false,
        }
    }

    /// Settings for mooching big fish
    pub fn mooch_preset() -> Self {
        Self {
            need_repair: true,
            need_submit: false,
            small_to_big: true,
        }
    }

    pub fn get(&self, key: &str) -> Result<bool, ConfigError> {
        match key {
            "need_repair" => Ok(self.need_repair),
            "need_submit" => Ok(self.need_submit),
            "small_to_big" => Ok(self.small_to_big),
            other => Err(ConfigError::UnknownKey(other.to_string())),
        }
    }

    /// Set one option by name
    pub fn update(&mut self, key: &str, value: bool) -> Result<(), ConfigError> {
        let slot = match key {
            "need_repair" => &mut self.need_repair,
            "need_submit" => &mut self.need_submit,
            "small_to_big" => &mut self.small_to_big,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        *slot = value;
        Ok(())
    }
}

/// Controller timers, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Gathering: repair every this often
    pub gather_repair_interval: u64,
    /// Gathering: no successful collect for this long means stuck
    pub stuck_timeout: u64,
    /// Fishing: repair every this often
    pub fish_repair_interval: u64,
    /// Fishing: hand in collectables every this often
    pub fish_submit_interval: u64,
}

impl TimingSettings {
    pub fn gather_repair_interval(&self) -> Duration {
        Duration::from_secs(self.gather_repair_interval)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout)
    }

    pub fn fish_repair_interval(&self) -> Duration {
        Duration::from_secs(self.fish_repair_interval)
    }

    pub fn fish_submit_interval(&self) -> Duration {
        Duration::from_secs(self.fish_submit_interval)
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            gather_repair_interval: 30 * 60,
            stuck_timeout: 240,
            fish_repair_interval: 37 * 60,
            fish_submit_interval: 15 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.capture.max_fps, 15);
        assert!(!settings.fish.need_repair);
        assert_eq!(settings.timings.stuck_timeout(), Duration::from_secs(240));
        assert_eq!(settings.timings.fish_submit_interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_fish_update() {
        let mut fish = FishSettings::default();
        fish.update("small_to_big", true).unwrap();
        assert!(fish.small_to_big);
        assert!(fish.get("small_to_big").unwrap());

        let err = fish.update("auto_bait", true).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(ref k) if k == "auto_bait"));
        assert_eq!(fish, FishSettings { small_to_big: true, ..Default::default() });
    }

    #[test]
    fn test_presets() {
        assert!(FishSettings::collectables_preset().need_submit);
        assert!(FishSettings::mooch_preset().small_to_big);
        for key in FishSettings::KEYS {
            assert!(FishSettings::default().get(key).is_ok());
        }
    }

    #[test]
    fn test_partial_json() {
        let settings: Settings =
            serde_json::from_str(r#"{"fish": {"need_submit": true}, "capture": {"max_fps": 30}}"#)
                .unwrap();
        assert!(settings.fish.need_submit);
        assert_eq!(settings.capture.max_fps, 30);
        assert_eq!(settings.timings, TimingSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.fish = FishSettings::collectables_preset();
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
        assert!(matches!(
            Settings::load(&dir.path().join("absent.json")),
            Err(ConfigError::Read { .. })
        ));
        assert_eq!(
            Settings::load_or_default(&dir.path().join("absent.json")).unwrap(),
            Settings::default()
        );
    }
}
