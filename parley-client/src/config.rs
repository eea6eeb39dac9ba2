//! Persistent settings
//!
//! Settings live in `config.json` under the platform config directory. A
//! missing or unreadable file yields defaults; explicit paths report errors.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use parley_common::audio::CAPTURE_FRAME_SAMPLES;
use parley_common::protocol::{
    ChannelConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE_NAME,
    ResponseModality,
};

use crate::constants::{APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_ENDPOINT_URL, SYSTEM_DEFAULT_DEVICE};
use crate::error::ConfigError;
use crate::voice::session::SessionConfig;

/// User-editable session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// WebSocket URL of the conversational endpoint
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Prebuilt voice used for synthesized speech
    #[serde(default = "default_voice_name")]
    pub voice_name: String,
    /// Persona and behavior instructions for the remote agent
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    /// Input device name (empty for system default)
    #[serde(default)]
    pub input_device: String,
    /// Output device name (empty for system default)
    #[serde(default)]
    pub output_device: String,
    /// Samples per outbound frame at 16kHz
    #[serde(default = "default_capture_frame_samples")]
    pub capture_frame_samples: usize,
}

fn default_endpoint_url() -> String {
    DEFAULT_ENDPOINT_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_voice_name() -> String {
    DEFAULT_VOICE_NAME.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

fn default_capture_frame_samples() -> usize {
    CAPTURE_FRAME_SAMPLES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            model: default_model(),
            voice_name: default_voice_name(),
            system_instruction: default_system_instruction(),
            input_device: SYSTEM_DEFAULT_DEVICE.to_string(),
            output_device: SYSTEM_DEFAULT_DEVICE.to_string(),
            capture_frame_samples: default_capture_frame_samples(),
        }
    }
}

impl Settings {
    /// Get the platform-specific settings file path
    ///
    /// Returns None if the config directory cannot be determined.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            match Self::load_from(&path) {
                Ok(settings) => return settings,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring settings file"),
            }
        }

        Self::default()
    }

    /// Load settings from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings = serde_json::from_str(&contents)?;
        if settings.capture_frame_samples == 0 {
            settings.capture_frame_samples = CAPTURE_FRAME_SAMPLES;
        }
        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save settings to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Channel parameters sent to the endpoint on open
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            model: self.model.clone(),
            response_modality: ResponseModality::Audio,
            voice_name: self.voice_name.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            channel: self.channel_config(),
            capture_frame_samples: self.capture_frame_samples,
            ..SessionConfig::default()
        }
    }
}
