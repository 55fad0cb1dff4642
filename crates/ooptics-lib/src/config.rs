//! Application configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models;
use crate::protocol::DEFAULT_TIMEOUT_MS;
use crate::transport::ResourceName;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# ooptics configuration. Changes made outside the tool may be overwritten.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Resource string, e.g. "USB0::0x2457::0x1022::RAW". Empty = first detected device.
    #[serde(default)]
    pub resource: String,

    /// Expected model code. Absent = accept whatever registered model the device reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<u16>,

    /// Instrument timeout in milliseconds. Must exceed the integration time.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Integration time applied after open, in milliseconds. Absent = leave the device as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_time_ms: Option<f64>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Config {
            resource: String::new(),
            model: None,
            timeout_ms: default_timeout_ms(),
            integration_time_ms: None,
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `resource` is set but not a `USB...::RAW` resource string.
    InvalidResource(String),
    /// `model` is not in the registry.
    UnknownModel(u16),
    ZeroTimeout,
    /// `integration_time_ms` is zero, negative or not finite.
    InvalidIntegrationTime(f64),
    /// `timeout_ms` does not exceed `integration_time_ms`.
    TimeoutTooShort { timeout_ms: u64, integration_time_ms: f64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidResource(e) => write!(f, "Invalid resource: {e}"),
            ValidationError::UnknownModel(code) => write!(f, "Unknown model code: {code}"),
            ValidationError::ZeroTimeout => write!(f, "timeout_ms must be greater than zero"),
            ValidationError::InvalidIntegrationTime(v) => {
                write!(f, "Invalid integration_time_ms: {v}")
            }
            ValidationError::TimeoutTooShort {
                timeout_ms,
                integration_time_ms,
            } => write!(
                f,
                "timeout_ms ({timeout_ms}) must exceed integration_time_ms ({integration_time_ms})"
            ),
        }
    }
}

/// Milliseconds to a `Duration`, rounded to the nanosecond.
///
/// `None` for zero, negative, non-finite or out-of-range values.
pub fn duration_from_ms(ms: f64) -> Option<Duration> {
    if !ms.is_finite() || ms <= 0.0 {
        return None;
    }
    let nanos = (ms * 1e6).round();
    (nanos < u64::MAX as f64).then(|| Duration::from_nanos(nanos as u64))
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ooptics"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    ///
    /// A header comment is prepended to warn that manual edits may be overwritten.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Save config to the default platform path.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config directory",
            ));
        };
        self.save_to(&path)
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured integration time, if set and representable.
    pub fn integration_time(&self) -> Option<Duration> {
        self.integration_time_ms.and_then(duration_from_ms)
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !self.resource.trim().is_empty()
            && let Err(e) = self.resource.parse::<ResourceName>()
        {
            errors.push(ValidationError::InvalidResource(e.to_string()));
        }

        if let Some(code) = self.model
            && models::resolve(code).is_err()
        {
            errors.push(ValidationError::UnknownModel(code));
        }

        if self.timeout_ms == 0 {
            errors.push(ValidationError::ZeroTimeout);
        }

        if let Some(ms) = self.integration_time_ms {
            if !ms.is_finite() || ms <= 0.0 {
                errors.push(ValidationError::InvalidIntegrationTime(ms));
            } else if self.timeout_ms > 0 && (self.timeout_ms as f64) <= ms {
                errors.push(ValidationError::TimeoutTooShort {
                    timeout_ms: self.timeout_ms,
                    integration_time_ms: ms,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
