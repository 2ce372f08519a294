//! Runtime configuration (metabind.toml)
//!
//! ```toml
//! catalog_path = "metadata.bin"
//! target_version = "13.0"
//! hash = "crc32"
//!
//! [worker]
//! enabled = true
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metabind_engine::{BindingOptions, Crc32Hasher, Fnv1aHasher, NameHasher, PlatformVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during config parsing
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Name-hash strategy the catalog was generated with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// CRC-32 (IEEE)
    #[default]
    Crc32,
    /// 32-bit FNV-1a
    Fnv1a,
}

impl HashKind {
    /// Hasher implementing this strategy
    pub fn hasher(self) -> Arc<dyn NameHasher> {
        match self {
            HashKind::Crc32 => Arc::new(Crc32Hasher),
            HashKind::Fnv1a => Arc::new(Fnv1aHasher),
        }
    }
}

/// Worker context settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Allow spawning worker contexts
    #[serde(default)]
    pub enabled: bool,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Catalog blob location
    pub catalog_path: PathBuf,

    /// Platform version availability is checked against (default "13.0")
    #[serde(default = "default_target_version")]
    pub target_version: String,

    /// Name-hash strategy
    #[serde(default)]
    pub hash: HashKind,

    /// Hide records unavailable on the target version
    #[serde(default = "default_only_available")]
    pub only_available: bool,

    /// Worker settings
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_target_version() -> String {
    "13.0".to_string()
}

fn default_only_available() -> bool {
    true
}

impl RuntimeConfig {
    /// Config for a catalog with every other setting at its default
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            target_version: default_target_version(),
            hash: HashKind::default(),
            only_available: default_only_available(),
            worker: WorkerConfig::default(),
        }
    }

    /// Parse a config from a file. A relative `catalog_path` is resolved
    /// against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        if config.catalog_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.catalog_path = dir.join(&config.catalog_path);
            }
        }
        Ok(config)
    }

    /// Parse a config from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "catalog_path cannot be empty".to_string(),
            ));
        }
        self.target()?;
        Ok(())
    }

    /// Parsed target version
    pub fn target(&self) -> Result<PlatformVersion, ConfigError> {
        self.target_version
            .parse::<PlatformVersion>()
            .map_err(ConfigError::ValidationError)
    }

    /// Binding options for a primary (`worker == false`) or worker context
    pub fn binding_options(&self, worker: bool) -> Result<BindingOptions, ConfigError> {
        Ok(BindingOptions {
            target_version: self.target()?,
            only_available: self.only_available,
            worker,
        })
    }
}
