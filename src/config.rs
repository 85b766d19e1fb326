// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

use crate::output::{PcmFormat, VolumeRange};
use crate::pool::{PoolOptions, DEFAULT_CHANNELS};

pub mod error;

pub use error::ConfigError;

/// The device attenuation range.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    /// The quietest level in millibels (default: -500).
    min_millibel: Option<i32>,

    /// The loudest level in millibels (default: 0).
    max_millibel: Option<i32>,
}

/// Overrides for the output PCM format.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Format {
    /// Sample rate in Hz.
    sample_rate: Option<u32>,

    /// Interleaved channel count.
    channels: Option<u16>,
}

/// A YAML representation of the sound pool configuration.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// The output device. Uses the default device if unset.
    device: Option<String>,

    /// The number of playback channels (default: 16).
    channels: Option<usize>,

    /// The device attenuation range.
    volume: Option<Volume>,

    /// Output format overrides. The device's native format is used if unset.
    format: Option<Format>,
}

impl PoolConfig {
    /// Creates a new configuration with every value defaulted.
    pub fn new() -> PoolConfig {
        PoolConfig {
            device: None,
            channels: None,
            volume: None,
            format: None,
        }
    }

    /// Parse a pool configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<PoolConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<PoolConfig>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channels() == 0 {
            return Err(ConfigError::Invalid(
                "channels must be at least 1".to_string(),
            ));
        }

        let range = self.volume_range();
        if range.min > range.max {
            return Err(ConfigError::Invalid(format!(
                "volume min_millibel ({}) is greater than max_millibel ({})",
                range.min, range.max
            )));
        }

        if let Some(format) = self.format() {
            if format.channels == 0 || format.sample_rate == 0 {
                return Err(ConfigError::Invalid(format!(
                    "invalid output format: {}",
                    format
                )));
            }
        }
        Ok(())
    }

    /// Returns the output device name, if one was configured.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Returns the number of channels (default: 16).
    pub fn channels(&self) -> usize {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    /// Returns the configured attenuation range. Unset bounds take the defaults.
    pub fn volume_range(&self) -> VolumeRange {
        let default = VolumeRange::default();
        match &self.volume {
            Some(volume) => VolumeRange::new(
                volume.min_millibel.unwrap_or(default.min),
                volume.max_millibel.unwrap_or(default.max),
            ),
            None => default,
        }
    }

    /// Returns the format override. Any unset field takes the mono 44.1kHz default.
    pub fn format(&self) -> Option<PcmFormat> {
        let format = self.format.as_ref()?;
        let default = PcmFormat::default();
        Some(PcmFormat::new(
            format.channels.unwrap_or(default.channels),
            format.sample_rate.unwrap_or(default.sample_rate),
        ))
    }

    /// Returns pool options for an output running in the given format.
    pub fn pool_options(&self, format: PcmFormat) -> PoolOptions {
        PoolOptions {
            channels: self.channels(),
            format,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::new()
    }
}
