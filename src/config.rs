//! # Configuration Management Module
//!
//! Persistent recorder settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `output_dir`: Where the host binary writes its trials
//! - `created_by`: Tag written into every file preamble
//! - `position_stream_name`: Source stream that marks a trial as position tracking
//! - `spike_gain_divisor` / `eeg_gain_divisor`: int8 calibration, see [`Config::spike_scale`]
//! - `light_bearings` / `bearing_colours`: Fixed header annotations
//! - `window_max_x`, `window_max_y`, `pixels_per_metre`: Initial arena geometry
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ltx-recorder/config.toml
//! - Linux: ~/.config/ltx-recorder/config.toml
//! - Windows: %APPDATA%\ltx-recorder\config.toml
//!
//! ## Shared Header Settings
//! Arena geometry can be changed by other components while acquisition runs.
//! [`SharedHeaderSettings`] holds those values in atomics and the recording session
//! takes a [`HeaderSettings`] snapshot when it writes the position headers.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    pub created_by: String,
    pub position_stream_name: String,
    pub spike_gain_divisor: f32,
    pub eeg_gain_divisor: f32,
    pub light_bearings: [i32; 4],
    pub bearing_colours: [i32; 4],
    pub window_max_x: i32,
    pub window_max_y: i32,
    pub pixels_per_metre: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ltx-recorder"),
            created_by: "open-ephys-plugin-ltx".to_string(),
            position_stream_name: "bonsai".to_string(),
            spike_gain_divisor: 4.0,
            eeg_gain_divisor: 4.0,
            light_bearings: [0, 180, 0, 0],
            bearing_colours: [330, 150, 0, 0],
            window_max_x: 700,
            window_max_y: 700,
            pixels_per_metre: 795.0,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ltx-recorder")
            .join("config.toml")
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Load config from `path`, writing the default there if the file doesn't exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                log::info!("Created default config at {}", path.display());
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    /// Save config to `path`, creating parent directories as needed
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Multiplier turning a spike voltage into int8 units for a channel with `bit_volts`
    ///
    /// `1 / (bit_volts * spike_gain_divisor)`. A non-positive calibration falls back to 1.0.
    pub fn spike_scale(&self, bit_volts: f32) -> f32 {
        scale_for(bit_volts, self.spike_gain_divisor)
    }

    /// Multiplier turning a continuous voltage into int8 units, as [`Config::spike_scale`]
    pub fn eeg_scale(&self, bit_volts: f32) -> f32 {
        scale_for(bit_volts, self.eeg_gain_divisor)
    }
}

fn scale_for(bit_volts: f32, divisor: f32) -> f32 {
    let denominator = bit_volts * divisor;
    if denominator.is_finite() && denominator > 0.0 {
        1.0 / denominator
    } else {
        1.0
    }
}

/// Values written into the position header, captured at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderSettings {
    pub window_max_x: i32,
    pub window_max_y: i32,
    pub pixels_per_metre: f64,
}

/// Arena geometry that UI components may update while the recorder is running
///
/// Each value is read atomically; there is no guarantee that a snapshot sees
/// a consistent set when several values change at once.
#[derive(Debug)]
pub struct SharedHeaderSettings {
    window_max_x: AtomicI32,
    window_max_y: AtomicI32,
    pixels_per_metre: AtomicU64,
}

impl SharedHeaderSettings {
    pub fn new(settings: HeaderSettings) -> Self {
        Self {
            window_max_x: AtomicI32::new(settings.window_max_x),
            window_max_y: AtomicI32::new(settings.window_max_y),
            pixels_per_metre: AtomicU64::new(settings.pixels_per_metre.to_bits()),
        }
    }

    pub fn set_window(&self, max_x: i32, max_y: i32) {
        self.window_max_x.store(max_x, Ordering::Relaxed);
        self.window_max_y.store(max_y, Ordering::Relaxed);
    }

    pub fn set_pixels_per_metre(&self, value: f64) {
        self.pixels_per_metre.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HeaderSettings {
        HeaderSettings {
            window_max_x: self.window_max_x.load(Ordering::Relaxed),
            window_max_y: self.window_max_y.load(Ordering::Relaxed),
            pixels_per_metre: f64::from_bits(self.pixels_per_metre.load(Ordering::Relaxed)),
        }
    }
}

impl From<&Config> for SharedHeaderSettings {
    fn from(config: &Config) -> Self {
        Self::new(HeaderSettings {
            window_max_x: config.window_max_x,
            window_max_y: config.window_max_y,
            pixels_per_metre: config.pixels_per_metre,
        })
    }
}
