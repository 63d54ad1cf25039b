//! Persisted defaults for the binaries.
//!
//! Stored as TOML under the platform config directory. Everything here is
//! a startup default; live changes go through the engine's command surface.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_PORT, DEFAULT_SAMPLE_RATE};
use crate::dsp::ProcessingSettings;
use crate::error::{Error, Result};
use crate::protocol::AudioFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Dial target for the capture role
    pub endpoint: String,
    /// Listener/dial port
    pub port: u16,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: AudioFormat,
    /// Local playback of received audio when no cable is present
    pub monitoring: bool,
    pub processing: ProcessingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: "192.168.1.100".into(),
            port: DEFAULT_PORT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: AudioFormat::Pcm16,
            monitoring: false,
            processing: ProcessingSettings::default(),
        }
    }
}

impl AppConfig {
    fn path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "micbridge")
            .ok_or_else(|| Error::Config("no config directory available".into()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load the stored config, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_roundtrip() {
        let config = AppConfig {
            endpoint: "10.0.0.7".into(),
            port: 6000,
            format: AudioFormat::PcmFloat32,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let back: AppConfig = toml::from_str("port = 7000\n").unwrap();
        assert_eq!(back.port, 7000);
        assert_eq!(back.sample_rate, DEFAULT_SAMPLE_RATE);
    }
}
