//! Application configuration
//!
//! Loaded from TOML; every field has a default so a missing file or a
//! partial file both work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::capture::CaptureConfig;
use crate::audio::playback::SchedulerConfig;
use crate::audio::visualizer::AnalyserSettings;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::profile::{Profile, ProfileCatalog};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub remote: RemoteConfig,
    pub ui: UiConfig,
    /// Extra profiles merged over the stock ones
    pub profiles: Vec<Profile>,
}

/// Audio engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub playback_channels: u16,
    pub capture_frame_size: usize,
    pub speaking_debounce_ms: u64,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            playback_channels: PLAYBACK_CHANNELS,
            capture_frame_size: CAPTURE_FRAME_SIZE,
            speaking_debounce_ms: SPEAKING_DEBOUNCE_MS,
            fft_size: FFT_SIZE,
            smoothing: SMOOTHING_TIME_CONSTANT,
            min_db: MIN_DECIBELS,
            max_db: MAX_DECIBELS,
        }
    }
}

impl AudioConfig {
    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.capture_sample_rate,
            frame_size: self.capture_frame_size,
            tap_size: self.fft_size,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            speaking_debounce: Duration::from_millis(self.speaking_debounce_ms),
            chunk_sample_rate: self.playback_sample_rate,
            chunk_channels: self.playback_channels,
        }
    }

    pub fn analyser(&self) -> AnalyserSettings {
        AnalyserSettings {
            fft_size: self.fft_size,
            smoothing: self.smoothing,
            min_db: self.min_db,
            max_db: self.max_db,
        }
    }

    /// MIME tag for outbound audio at the configured capture rate
    pub fn capture_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.capture_sample_rate)
    }
}

/// Remote speech channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// WebSocket endpoint of the speech service
    pub url: String,
    /// Base URL of the search and speech HTTP services; search is off without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_url: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9000/live".to_string(),
            search_url: None,
        }
    }
}

/// Control API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// `config.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "livehost", "live-host")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.capture_sample_rate == 0 || audio.playback_sample_rate == 0 {
            return Err(Error::Config("sample rates must be positive".to_string()));
        }
        if audio.playback_channels == 0 {
            return Err(Error::Config("playback_channels must be at least 1".to_string()));
        }
        if audio.capture_frame_size == 0 {
            return Err(Error::Config("capture_frame_size must be positive".to_string()));
        }
        if !audio.fft_size.is_power_of_two() || !(32..=32768).contains(&audio.fft_size) {
            return Err(Error::Config(format!(
                "fft_size must be a power of two in 32..=32768, got {}",
                audio.fft_size
            )));
        }
        if !(0.0..1.0).contains(&audio.smoothing) {
            return Err(Error::Config("smoothing must be in [0, 1)".to_string()));
        }
        if audio.min_db >= audio.max_db {
            return Err(Error::Config("min_db must be below max_db".to_string()));
        }
        Ok(())
    }

    /// Stock profiles plus the configured ones
    pub fn catalog(&self) -> ProfileCatalog {
        let mut catalog = ProfileCatalog::builtin();
        for profile in &self.profiles {
            catalog.insert(profile.clone());
        }
        catalog
    }
}
