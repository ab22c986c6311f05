//! Configuration manager implementation

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use crate::error::Result;
use crate::types::OrchestratorConfig;

const DEFAULT_ENV_PREFIX: &str = "LEXCORE";

/// Loads, validates and saves [`OrchestratorConfig`]
pub struct ConfigManager {
    config_path: PathBuf,
    env_prefix: String,
}

impl ConfigManager {
    /// Manager for the default config location
    pub fn new() -> Self {
        Self::with_path(Self::default_config_path())
    }

    /// Manager for an explicit config file
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Use a different environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// `<config dir>/lexcore/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lexcore")
            .join("config.toml")
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the file (if present) overlaid with environment variables
    pub fn load_config(&self) -> Result<OrchestratorConfig> {
        debug!(path = %self.config_path.display(), "Loading configuration");

        let config = Config::builder()
            .add_source(
                File::from(self.config_path.clone())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: OrchestratorConfig = config.try_deserialize()?;
        self.validate_config(&loaded)?;
        Ok(loaded)
    }

    /// Write the configuration as TOML, creating the parent directory
    pub fn save_config(&self, config: &OrchestratorConfig) -> Result<()> {
        self.validate_config(config)?;
        let toml = toml::to_string(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, toml)?;
        Ok(())
    }

    /// See [`OrchestratorConfig::validate`]
    pub fn validate_config(&self, config: &OrchestratorConfig) -> Result<()> {
        config.validate()
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
