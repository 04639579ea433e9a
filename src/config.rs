// Settings management and persistence

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub target_sample_rate: u32, // Hz; decoded buffers are resampled to this
    pub end_epsilon_secs: f64,   // tolerance for end-of-playback detection
    pub progress_tick_ms: u64,   // interval of the progress projection
    pub min_rate: f64,
    pub max_rate: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            target_sample_rate: 24000,
            end_epsilon_secs: 0.1,
            progress_tick_ms: 16,
            min_rate: 0.25,
            max_rate: 4.0,
        }
    }
}

impl PlaybackSettings {
    /// Clamp a requested playback rate into the configured range.
    pub fn clamp_rate(&self, rate: f64) -> f64 {
        rate.clamp(self.min_rate, self.max_rate)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub version: i32, // Settings schema version for future migrations
    pub playback: PlaybackSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: 1,
            playback: PlaybackSettings::default(),
        }
    }
}

impl AppSettings {
    /// Get the settings file path
    pub fn settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from file
    pub fn load(app_dir: &Path) -> Result<Self, String> {
        let path = Self::settings_path(app_dir);

        if !path.exists() {
            log::info!("[Settings] No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        let settings: AppSettings = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse settings: {}", e))?;

        log::info!("[Settings] Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Load settings, falling back to defaults if the file is unreadable
    pub fn load_or_default(app_dir: &Path) -> Self {
        match Self::load(app_dir) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("[Settings] {}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to file
    pub fn save(&self, app_dir: &Path) -> Result<(), String> {
        // Ensure directory exists
        fs::create_dir_all(app_dir)
            .map_err(|e| format!("Failed to create settings directory: {}", e))?;

        let path = Self::settings_path(app_dir);
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&path, content)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        log::info!("[Settings] Saved settings to {:?}", path);
        Ok(())
    }
}
