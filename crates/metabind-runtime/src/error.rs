//! Runtime error types.

use metabind_engine::FormatError;
use metabind_sdk::BindingError;

use crate::config::ConfigError;

/// Errors that can occur while configuring, loading or binding a catalog.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or is invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The catalog blob is malformed
    #[error("Catalog error: {0}")]
    Catalog(#[from] FormatError),

    /// Binding construction or dispatch failed
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),
}
