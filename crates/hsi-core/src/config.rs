//! Configuration for the HTTP stream inspector
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of inspector limits

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

impl ConfigError {
    /// The file was found but its contents are unusable
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            ConfigError::ParseError(_) | ConfigError::ValidationError(_)
        )
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HsiConfig {
    /// Sensor process settings
    pub sensor: SensorSettings,

    /// Inspector limits
    pub inspect: InspectSettings,

    /// Recorded-input test mode
    pub test: TestSettings,

    /// Export settings
    pub export: ExportSettings,
}

/// Sensor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Worker tasks flows are sharded across
    pub workers: usize,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workers: 4,
        }
    }
}

/// Inspector limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectSettings {
    /// Header lines per block before `TOO_MANY_HEADERS` is raised
    pub max_headers: usize,

    /// Outstanding requests per flow before `PIPELINE_OVERFLOW` is raised
    pub max_pipeline_depth: usize,
}

impl Default for InspectSettings {
    fn default() -> Self {
        Self {
            max_headers: 200,
            max_pipeline_depth: 100,
        }
    }
}

/// Test mode settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    /// Write each section's rendering to a per-test-case file
    pub output: bool,

    /// File name prefix, the test number and `.txt` are appended
    pub output_prefix: String,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            output: false,
            output_prefix: "nhttp_out_".to_string(),
        }
    }
}

/// Export settings container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// JSONL file output
    pub jsonl: JsonlExportConfig,
}

/// JSONL export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlExportConfig {
    /// Enable JSONL export
    pub enabled: bool,

    /// Output file path
    pub path: String,

    /// Append to existing file
    pub append: bool,

    /// Flush after each event
    pub flush_each: bool,

    /// Pretty print JSON
    pub pretty: bool,
}

impl Default for JsonlExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/var/lib/hsi/events.jsonl".to_string(),
            append: true,
            flush_each: true,
            pretty: false,
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. HSI_CONFIG environment variable
    /// 3. ~/.config/hsi/config.toml
    /// 4. /etc/hsi/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<HsiConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            HsiConfig::default()
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("HSI_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("HSI_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/hsi/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<HsiConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: HsiConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut HsiConfig) {
        if let Ok(val) = std::env::var("HSI_LOG_LEVEL") {
            config.sensor.log_level = val;
        }
        if let Ok(val) = std::env::var("HSI_WORKERS") {
            config.sensor.workers = val.parse().unwrap_or(config.sensor.workers);
        }

        if let Ok(val) = std::env::var("HSI_MAX_HEADERS") {
            config.inspect.max_headers = val.parse().unwrap_or(config.inspect.max_headers);
        }
        if let Ok(val) = std::env::var("HSI_MAX_PIPELINE_DEPTH") {
            config.inspect.max_pipeline_depth =
                val.parse().unwrap_or(config.inspect.max_pipeline_depth);
        }

        if let Ok(val) = std::env::var("HSI_TEST_OUTPUT") {
            config.test.output = val.parse().unwrap_or(config.test.output);
        }
        if let Ok(val) = std::env::var("HSI_TEST_OUTPUT_PREFIX") {
            config.test.output_prefix = val;
        }

        if let Ok(val) = std::env::var("HSI_JSONL_PATH") {
            config.export.jsonl.path = val;
        }
        if let Ok(val) = std::env::var("HSI_JSONL_ENABLED") {
            config.export.jsonl.enabled = val.parse().unwrap_or(config.export.jsonl.enabled);
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &HsiConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.sensor.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.sensor.log_level, valid_levels
            )));
        }

        if config.sensor.workers == 0 {
            return Err(ConfigError::ValidationError(
                "Worker count cannot be 0".to_string(),
            ));
        }
        if config.inspect.max_headers == 0 {
            return Err(ConfigError::ValidationError(
                "max_headers cannot be 0".to_string(),
            ));
        }
        if config.inspect.max_pipeline_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_pipeline_depth cannot be 0".to_string(),
            ));
        }

        if config.test.output && config.test.output_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "Test output needs a file prefix".to_string(),
            ));
        }
        if config.export.jsonl.enabled && config.export.jsonl.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "JSONL export enabled without a path".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &HsiConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hsi").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HsiConfig::default();
        assert_eq!(config.sensor.log_level, "info");
        assert_eq!(config.inspect.max_headers, 200);
        assert_eq!(config.inspect.max_pipeline_depth, 100);
        assert!(!config.test.output);
        assert_eq!(config.test.output_prefix, "nhttp_out_");
        assert!(!config.export.jsonl.enabled);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [inspect]
            max_headers = 50
        "#;
        let config: HsiConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.inspect.max_headers, 50);
        // Other fields should be default
        assert_eq!(config.inspect.max_pipeline_depth, 100);
        assert_eq!(config.sensor.workers, 4);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [sensor]
            log_level = "trace"
            workers = 2

            [inspect]
            max_headers = 64
            max_pipeline_depth = 8

            [test]
            output = true
            output_prefix = "case_"

            [export.jsonl]
            enabled = true
            path = "/tmp/events.jsonl"
            pretty = true
        "#;

        let config: HsiConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sensor.log_level, "trace");
        assert_eq!(config.sensor.workers, 2);
        assert_eq!(config.inspect.max_pipeline_depth, 8);
        assert!(config.test.output);
        assert_eq!(config.test.output_prefix, "case_");
        assert!(config.export.jsonl.enabled);
        assert!(config.export.jsonl.pretty);
        assert!(config.export.jsonl.append);
    }

    #[test]
    fn test_validation() {
        let loader = ConfigLoader::new();
        assert!(loader.validate(&HsiConfig::default()).is_ok());

        let config = HsiConfig {
            sensor: SensorSettings {
                log_level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(loader.validate(&config).unwrap_err().is_invalid());

        let config = HsiConfig {
            inspect: InspectSettings {
                max_headers: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[test]\noutput = true\n").unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load_from_file(&path).unwrap();
        assert!(config.test.output);

        let missing = loader.load_from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let loader = ConfigLoader::new();
        let mut config = HsiConfig::default();
        config.inspect.max_headers = 17;
        loader.save(&config, &path).unwrap();

        let loaded = loader.load_from_file(&path).unwrap();
        assert_eq!(loaded.inspect, config.inspect);
    }
}
