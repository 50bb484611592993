//! TOML-based configuration persistence for the runtime.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\SRDisplay\config.toml`
//! - Linux:    `~/.config/srdisplay/config.toml`
//! - macOS:    `~/Library/Application Support/SRDisplay/config.toml`
//!
//! The file is a flat settings record:
//!
//! ```toml
//! [display]
//! mode = "horizontal_row"
//! device_count = 3
//! position_switch_interval_secs = 3.0
//! scaling_mode = "scaled_size"
//!
//! [runtime]
//! frame_rate_hz = 60
//! simulate = false
//!
//! [simulator]
//! devices = 3
//! startup_polls = 5
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  This allows
//! the runtime to work on first run (before a config file exists) and with
//! older config files that are missing newer fields.
//!
//! Raw values are stored as written.  Clamping to the topology's bounds
//! happens when the coordinator reads them; [`AppConfig::validate`] only
//! rejects values that can never be meaningful.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use srd_core::{PanelInfo, ScalingMode, TopologyMode};
use thiserror::Error;

use crate::application::settings::DisplaySettings;
use crate::infrastructure::session_backend::SimulatedBackendConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is out of its meaningful range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Behaviour of the simulated device backend used when no device SDK is
    /// linked.
    #[serde(default = "default_simulator")]
    pub simulator: SimulatedBackendConfig,
}

/// What to do when no display hardware can be claimed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDeviceBehavior {
    /// Keep running with zero device slots.
    #[default]
    Continue,
    /// Exit with an error.
    Quit,
}

/// Display topology and device settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default)]
    pub mode: TopologyMode,
    /// Requested number of devices; clamped to the mode's bounds on use.
    #[serde(default = "default_device_count")]
    pub device_count: usize,
    /// Seconds each simulated position is held; clamped to 1–15 on use.
    #[serde(default = "default_switch_interval")]
    pub position_switch_interval_secs: f32,
    #[serde(default)]
    pub scaling_mode: ScalingMode,
    /// Primary panel width in metres.
    #[serde(default = "default_panel_width")]
    pub panel_width: f32,
    /// Primary panel height in metres.
    #[serde(default = "default_panel_height")]
    pub panel_height: f32,
    /// Device-reported physical scale factor.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    /// Never claim a device session.
    #[serde(default)]
    pub run_without_device: bool,
    #[serde(default)]
    pub no_device_behavior: NoDeviceBehavior,
}

/// Runtime loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Coordinator ticks per second.
    #[serde(default = "default_frame_rate")]
    pub frame_rate_hz: u32,
    /// Emulate the layout on one device.
    #[serde(default)]
    pub simulate: bool,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Name of the primary display manager; secondaries append their slot.
    #[serde(default = "default_manager_name")]
    pub manager_name: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_count() -> usize {
    1
}
fn default_switch_interval() -> f32 {
    3.0
}
fn default_panel_width() -> f32 {
    PanelInfo::reference().width
}
fn default_panel_height() -> f32 {
    PanelInfo::reference().height
}
fn default_scale_factor() -> f32 {
    1.0
}
fn default_frame_rate() -> u32 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_manager_name() -> String {
    "SRDisplayManager".to_string()
}
fn default_simulator() -> SimulatedBackendConfig {
    SimulatedBackendConfig {
        devices: 1,
        startup_polls: 5,
        ..SimulatedBackendConfig::default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            runtime: RuntimeConfig::default(),
            simulator: default_simulator(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: TopologyMode::default(),
            device_count: default_device_count(),
            position_switch_interval_secs: default_switch_interval(),
            scaling_mode: ScalingMode::default(),
            panel_width: default_panel_width(),
            panel_height: default_panel_height(),
            scale_factor: default_scale_factor(),
            run_without_device: false,
            no_device_behavior: NoDeviceBehavior::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: default_frame_rate(),
            simulate: false,
            log_level: default_log_level(),
            manager_name: default_manager_name(),
        }
    }
}

impl AppConfig {
    /// Rejects values no clamping can repair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("display.panel_width", self.display.panel_width),
            ("display.panel_height", self.display.panel_height),
            ("display.scale_factor", self.display.scale_factor),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if self.runtime.frame_rate_hz == 0 {
            return Err(ConfigError::Invalid {
                field: "runtime.frame_rate_hz",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The coordinator's view of this configuration.
    pub fn display_settings(&self) -> DisplaySettings {
        DisplaySettings {
            mode: self.display.mode,
            device_count: self.display.device_count,
            position_switch_interval_secs: self.display.position_switch_interval_secs,
            scaling: self.display.scaling_mode,
            panel: PanelInfo {
                width: self.display.panel_width,
                height: self.display.panel_height,
                scale_factor: self.display.scale_factor,
            },
            simulate: self.runtime.simulate,
            run_without_device: self.display.run_without_device,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads and validates `AppConfig` from `path`, returning
/// `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if a value is out of range.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the `SRDisplay`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SRDisplay"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("srdisplay"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("SRDisplay"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
