/*!
 * Configuration support for chargemaster normalization
 *
 * Settings come from built-in defaults, then the user config file, then
 * `CHARGEMASTER_*` environment variables, in increasing priority.
 */

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_CURRENCY};
use crate::{ChargemasterError, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CHARGEMASTER";

/// Runtime configuration for normalization runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Number of data rows per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Largest tolerated ratio of failed rows to rows read
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,

    /// How many rejected rows the diagnostics report lists individually
    #[serde(default = "default_max_reported_rows")]
    pub max_reported_rows: usize,

    /// Currency assigned when a source does not carry one
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Whether to show progress bars during long operations
    #[serde(default = "default_enable_progress_bar")]
    pub enable_progress_bar: bool,

    /// Number of threads for multi-file runs (None = use all available)
    #[serde(default)]
    pub parallel_threads: Option<usize>,

    /// Pretty-print canonical JSON documents
    #[serde(default = "default_pretty_json")]
    pub pretty_json: bool,

    /// Directory for canonical and diagnostics artifacts
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_failure_rate: default_max_failure_rate(),
            max_reported_rows: default_max_reported_rows(),
            default_currency: default_currency(),
            enable_progress_bar: default_enable_progress_bar(),
            parallel_threads: None,
            pretty_json: default_pretty_json(),
            output_dir: None,
        }
    }
}

// Default value functions for serde
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_failure_rate() -> f64 {
    0.10
}

fn default_max_reported_rows() -> usize {
    100
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_enable_progress_bar() -> bool {
    true
}

fn default_pretty_json() -> bool {
    true
}

impl NormalizeConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ChargemasterError::configuration(
                "batch_size must be at least 1",
                Some("Use the default of 250000 rows unless memory is tight"),
            ));
        }

        if !(0.0..=1.0).contains(&self.max_failure_rate) || self.max_failure_rate.is_nan() {
            return Err(ChargemasterError::configuration(
                format!("max_failure_rate must be within [0, 1], got {}", self.max_failure_rate),
                None,
            ));
        }

        if self.default_currency.trim().is_empty() {
            return Err(ChargemasterError::configuration("default_currency must not be empty", None));
        }

        if self.parallel_threads == Some(0) {
            return Err(ChargemasterError::configuration(
                "parallel_threads must be at least 1",
                Some("Leave it unset to use every available core"),
            ));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ChargemasterError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ChargemasterError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/chargemaster/config.toml` on Unix-like systems
    /// or `%APPDATA%\chargemaster\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "chargemaster")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Defaults, then `file` (or the default config file), then environment variables
    ///
    /// Supported environment variables:
    /// - `CHARGEMASTER_BATCH_SIZE`: number of rows
    /// - `CHARGEMASTER_MAX_FAILURE_RATE`: ratio in `[0, 1]`
    /// - `CHARGEMASTER_MAX_REPORTED_ROWS`: number
    /// - `CHARGEMASTER_DEFAULT_CURRENCY`: ISO code
    /// - `CHARGEMASTER_ENABLE_PROGRESS_BAR`: "true" or "false"
    /// - `CHARGEMASTER_PARALLEL_THREADS`: number
    /// - `CHARGEMASTER_PRETTY_JSON`: "true" or "false"
    /// - `CHARGEMASTER_OUTPUT_DIR`: directory path
    pub fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let file = file.map(Path::to_path_buf).or_else(Self::default_config_path);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ChargemasterError::Configuration {
                message: format!("Failed to load configuration: {}", e),
                suggestion: Some(format!("Check the config file and {}_* environment variables", ENV_PREFIX)),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location and environment, or defaults
    pub fn load() -> Self {
        match Self::layered(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default configuration");
                Self::default()
            }
        }
    }
}

/// Builder for customizing configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: NormalizeConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn max_failure_rate(mut self, rate: f64) -> Self {
        self.config.max_failure_rate = rate;
        self
    }

    pub fn max_reported_rows(mut self, rows: usize) -> Self {
        self.config.max_reported_rows = rows;
        self
    }

    pub fn default_currency(mut self, currency: &str) -> Self {
        self.config.default_currency = currency.to_string();
        self
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    /// Set number of parallel threads
    pub fn parallel_threads(mut self, threads: Option<usize>) -> Self {
        self.config.parallel_threads = threads;
        self
    }

    pub fn pretty_json(mut self, pretty: bool) -> Self {
        self.config.pretty_json = pretty;
        self
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Build the configuration
    pub fn build(self) -> NormalizeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = NormalizeConfig::default();
        assert_eq!(config.batch_size, 250_000);
        assert_eq!(config.default_currency, "USD");
        assert!(config.enable_progress_bar);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .batch_size(1_000)
            .max_failure_rate(0.25)
            .progress_bar(false)
            .parallel_threads(Some(4))
            .build();

        assert_eq!(config.batch_size, 1_000);
        assert_eq!(config.max_failure_rate, 0.25);
        assert!(!config.enable_progress_bar);
        assert_eq!(config.parallel_threads, Some(4));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(ConfigBuilder::new().batch_size(0).build().validate().is_err());
        assert!(ConfigBuilder::new().max_failure_rate(1.5).build().validate().is_err());
        assert!(ConfigBuilder::new().parallel_threads(Some(0)).build().validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_with_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "batch_size = 42\n").unwrap();

        let config = NormalizeConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 42);
        assert_eq!(config.max_failure_rate, 0.10);

        let saved = dir.path().join("saved.toml");
        config.save(&saved).unwrap();
        assert_eq!(NormalizeConfig::from_file(&saved).unwrap(), config);
    }

    #[test]
    fn test_layered_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chargemaster.toml");
        std::fs::write(&path, "max_reported_rows = 7\npretty_json = false\n").unwrap();

        let config = NormalizeConfig::layered(Some(path.as_path())).unwrap();
        assert_eq!(config.max_reported_rows, 7);
        assert!(!config.pretty_json);
    }
}
