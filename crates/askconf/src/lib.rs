//! Configuration loading for askcapture.
//!
//! Imported by every askcapture crate, so it stays dependency-light.
//!
//! # Configuration Layout
//!
//! - **Policy** (`LimitsConfig`, `UploadConfig`): the product limits surfaced to
//!   the UI (recording budget, attachment ceilings) and upload behavior.
//! - **Runtime** (`CaptureConfig`, `MixerConfig`, `PathsConfig`, `TelemetryConfig`):
//!   device, mixing and process-level settings.
//!
//! # Usage
//!
//! ```rust,no_run
//! use askconf::AskConfig;
//!
//! let config = AskConfig::load().expect("Failed to load config");
//! println!("Budget: {}s", config.limits.total_budget_secs);
//! println!("Store: {}", config.paths.store_dir.display());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/askcapture/config.toml` (system)
//! 2. `~/.config/askcapture/config.toml` (user)
//! 3. `./askcapture.toml` (local override, or a path given on the command line)
//! 4. Environment variables (`ASKCAPTURE_*`)
//!
//! Files are merged table-by-table, so a local file only needs the keys it changes.

pub mod limits;
pub mod loader;
pub mod runtime;

pub use limits::{LimitsConfig, UploadConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use runtime::{CaptureConfig, FacingPreference, MixerConfig, PathsConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete askcapture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AskConfig {
    pub limits: LimitsConfig,
    pub capture: CaptureConfig,
    pub mixer: MixerConfig,
    pub upload: UploadConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
}

impl AskConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local `./askcapture.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last())?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let table = loader::parse_table(contents, std::path::Path::new("<inline>"))?;
        let config = loader::from_table(table, None)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the composer unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.total_budget_secs == 0 {
            return Err(ConfigError::Invalid(
                "limits.total_budget_secs must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_attachment_bytes > self.limits.max_total_attachment_bytes {
            return Err(ConfigError::Invalid(format!(
                "limits.max_attachment_bytes ({}) exceeds limits.max_total_attachment_bytes ({})",
                self.limits.max_attachment_bytes, self.limits.max_total_attachment_bytes
            )));
        }
        if self.upload.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.mixer.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "mixer.sample_rate must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# askcapture configuration\n\n{}", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AskConfig::default();
        assert_eq!(config.limits.total_budget_secs, 90);
        assert_eq!(config.limits.max_attachments, 3);
        assert_eq!(config.limits.min_title_chars, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = AskConfig::default();
        let rendered = config.to_toml();
        assert!(rendered.contains("[limits]"));
        assert!(rendered.contains("[mixer]"));

        let parsed = AskConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = AskConfig::from_toml_str(
            r#"
            [limits]
            total_budget_secs = 60

            [capture]
            countdown_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.total_budget_secs, 60);
        assert_eq!(config.limits.max_segments, 3);
        assert_eq!(config.capture.countdown_secs, 0);
        assert!((config.mixer.system_gain - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let result = AskConfig::from_toml_str("[limits]\ntotal_budget_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_attachment_ceilings() {
        let result = AskConfig::from_toml_str(
            "[limits]\nmax_attachment_bytes = 100\nmax_total_attachment_bytes = 10\n",
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
