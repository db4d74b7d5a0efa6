//! Process-wide configuration
//!
//! Loaded once at startup from TOML and handed to each component by value.
//! A missing file falls back to defaults so the daemon always comes up; a file
//! that exists but does not parse is a startup error.
//!
//! ```toml
//! gyro_enabled = false
//! gyro_sensitivity = 30
//!
//! [button_map]
//! button1 = ["BTN_MODE", "BTN_TR"]
//! button2 = ["KEY_LEFTCTRL", "KEY_2"]
//! button3 = ["MSC_SCAN", "KEY_ESC"]
//! button4 = ["BTN_MODE", "BTN_NORTH"]
//! button5 = ["BTN_MODE"]
//! ```

use crate::chord::{ChordInput, LogicalButton, OutputChord};
use evdev::{Key, MiscType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_ENV: &str = "HANDYCON_CONFIG";
const USER_CONFIG_FILE: &str = "handycon/config.toml";
const SYSTEM_CONFIG_FILE: &str = "/etc/handycon/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Logical button → output chord bindings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ButtonMap {
    pub button1: OutputChord,
    pub button2: OutputChord,
    pub button3: OutputChord,
    pub button4: OutputChord,
    pub button5: OutputChord,
}

impl ButtonMap {
    pub fn chord(&self, button: LogicalButton) -> &OutputChord {
        match button {
            LogicalButton::Button1 => &self.button1,
            LogicalButton::Button2 => &self.button2,
            LogicalButton::Button3 => &self.button3,
            LogicalButton::Button4 => &self.button4,
            LogicalButton::Button5 => &self.button5,
        }
    }
}

impl Default for ButtonMap {
    fn default() -> Self {
        Self {
            // Screenshot
            button1: OutputChord::keys(&[Key::BTN_MODE, Key::BTN_TR]),
            // Quick access menu
            button2: OutputChord::keys(&[Key::KEY_LEFTCTRL, Key::KEY_2]),
            button3: OutputChord::new(vec![
                ChordInput::Misc(MiscType::MSC_SCAN),
                ChordInput::Key(Key::KEY_ESC),
            ]),
            // On-screen keyboard
            button4: OutputChord::keys(&[Key::BTN_MODE, Key::BTN_NORTH]),
            // Home
            button5: OutputChord::keys(&[Key::BTN_MODE]),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HandyconConfig {
    pub button_map: ButtonMap,
    /// Initial state of the runtime gyro toggle
    pub gyro_enabled: bool,
    /// Multiplier from deg/s to stick units
    pub gyro_sensitivity: f64,
}

impl Default for HandyconConfig {
    fn default() -> Self {
        Self {
            button_map: ButtonMap::default(),
            gyro_enabled: false,
            gyro_sensitivity: 30.0,
        }
    }
}

impl HandyconConfig {
    /// Loads the first config file found, or defaults if there is none
    pub fn load() -> Result<Self, ConfigError> {
        match candidate_paths().into_iter().find(|path| path.is_file()) {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.gyro_sensitivity.is_finite() || self.gyro_sensitivity <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "gyro_sensitivity must be a positive number, got {}",
                self.gyro_sensitivity
            )));
        }
        for button in LogicalButton::ALL {
            if self.button_map.chord(button).is_empty() {
                return Err(ConfigError::Invalid(format!("{} has an empty chord", button)));
            }
        }
        Ok(())
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(path));
    }
    match dirs::config_dir() {
        Some(dir) => paths.push(dir.join(USER_CONFIG_FILE)),
        None => warn!("Could not resolve user config directory"),
    }
    paths.push(PathBuf::from(SYSTEM_CONFIG_FILE));
    paths
}
