//! Application configuration
//!
//! Loaded from a TOML file in the platform configuration directory. Every
//! field has a default so partial files are accepted.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dongle: DongleConfig,
    pub mixer: MixerConfig,
    pub capture: CaptureConfig,
}

/// Which side of the car the steering wheel is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandDrive {
    #[default]
    Lhd,
    Rhd,
}

impl HandDrive {
    pub fn wire_value(self) -> u32 {
        match self {
            Self::Lhd => 0,
            Self::Rhd => 1,
        }
    }
}

/// Adapter WiFi band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiBand {
    #[serde(rename = "2.4ghz")]
    Band24,
    #[default]
    #[serde(rename = "5ghz")]
    Band5,
}

/// Where the microphone is captured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicSource {
    /// Host microphone, PCM is forwarded over the link
    #[default]
    Os,
    /// Microphone built into the adapter
    Box,
}

/// Optional secondary navigation screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavScreenConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Settings sent to the adapter during `start()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DongleConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub dpi: u32,
    pub format: u32,
    pub packet_max: u32,
    pub i_box_version: u32,
    pub phone_work_mode: u32,
    pub night_mode: bool,
    pub hand_drive: HandDrive,
    pub box_name: String,
    pub car_name: String,
    /// Path of a 120x120 PNG uploaded as the adapter icon
    pub icon_path: Option<PathBuf>,
    pub media_delay_ms: u32,
    pub audio_transfer_mode: bool,
    pub wifi_band: WifiBand,
    pub wifi_channel: u32,
    pub mic_source: MicSource,
    pub media_sound: u32,
    pub call_quality: u32,
    pub auto_play: bool,
    pub auto_connect: bool,
    pub android_work_mode: bool,
    pub nav_screen: Option<NavScreenConfig>,
    pub heartbeat_interval_ms: u64,
    pub message_delay_ms: u64,
    pub wifi_pair_delay_ms: u64,
}

impl Default for DongleConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            fps: 30,
            dpi: 160,
            format: 5,
            packet_max: 49152,
            i_box_version: 2,
            phone_work_mode: 2,
            night_mode: false,
            hand_drive: HandDrive::Lhd,
            box_name: "Carlink".to_string(),
            car_name: "Carlink".to_string(),
            icon_path: None,
            media_delay_ms: 300,
            audio_transfer_mode: false,
            wifi_band: WifiBand::Band5,
            wifi_channel: 36,
            mic_source: MicSource::Os,
            media_sound: 1,
            call_quality: 1,
            auto_play: false,
            auto_connect: true,
            android_work_mode: false,
            nav_screen: None,
            heartbeat_interval_ms: 2000,
            message_delay_ms: 120,
            wifi_pair_delay_ms: 15_000,
        }
    }
}

impl DongleConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }

    pub fn wifi_pair_delay(&self) -> Duration {
        Duration::from_millis(self.wifi_pair_delay_ms)
    }
}

/// Mixer tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Hold after a nav prompt ends before music ramps back up
    pub nav_resume_delay_ms: u64,
    /// Forced mute after (re)starting an output sink
    pub warmup_ms: u64,
    /// Byte size of visualizer chunks
    pub visualizer_chunk_size: usize,
    pub music_volume: f32,
    pub nav_volume: f32,
    pub siri_volume: f32,
    pub call_volume: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            nav_resume_delay_ms: 1200,
            warmup_ms: 200,
            visualizer_chunk_size: 4096,
            music_volume: 1.0,
            nav_volume: 1.0,
            siri_volume: 1.0,
            call_volume: 1.0,
        }
    }
}

/// Frame capture settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

impl CaptureConfig {
    /// File frames are written to, or `None` when capture is off
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        match &self.path {
            Some(path) => Ok(Some(path.clone())),
            None => {
                let dirs = ProjectDirs::from("io", "carlink", "carlink").ok_or(ConfigError::NoConfigDir)?;
                Ok(Some(dirs.data_dir().join("frames.bin")))
            }
        }
    }
}

/// The view of the configuration the mixer reads on every decision
#[derive(Debug, Clone, PartialEq)]
pub struct MixerSettings {
    pub media_delay: Duration,
    pub audio_transfer_mode: bool,
    pub nav_resume_delay: Duration,
    pub warmup: Duration,
    pub visualizer_chunk_size: usize,
}

impl Default for MixerSettings {
    fn default() -> Self {
        AppConfig::default().mixer_settings()
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("io", "carlink", "carlink").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load from a file, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path()?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn mixer_settings(&self) -> MixerSettings {
        MixerSettings {
            media_delay: Duration::from_millis(self.dongle.media_delay_ms as u64),
            audio_transfer_mode: self.dongle.audio_transfer_mode,
            nav_resume_delay: Duration::from_millis(self.mixer.nav_resume_delay_ms),
            warmup: Duration::from_millis(self.mixer.warmup_ms),
            visualizer_chunk_size: self.mixer.visualizer_chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [dongle]
            width = 1280
            hand_drive = "rhd"
            wifi_band = "2.4ghz"
            "#,
        )
        .unwrap();

        assert_eq!(config.dongle.width, 1280);
        assert_eq!(config.dongle.height, 480);
        assert_eq!(config.dongle.hand_drive, HandDrive::Rhd);
        assert_eq!(config.dongle.wifi_band, WifiBand::Band24);
        assert_eq!(config.mixer, MixerConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.dongle.box_name = "Test Box".into();
        config.mixer.nav_volume = 0.5;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_mixer_settings() {
        let settings = AppConfig::default().mixer_settings();
        assert_eq!(settings.media_delay, Duration::from_millis(300));
        assert_eq!(settings.warmup, Duration::from_millis(200));
        assert!(!settings.audio_transfer_mode);
    }
}
