//! Configuration loading and validation.
//!
//! Defines the [`ConfigSource`] trait for config backends and the
//! [`ConfigVersion`] reported by `/health`. Submodules provide the data
//! model, validation logic, and the file-based sources.

pub mod model;
pub mod sources;
pub mod validation;

use async_trait::async_trait;

use crate::error::CrossoverError;
use model::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigVersion {
    Hash(String),
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash(hash) => f.write_str(hash),
        }
    }
}

// async_trait: sources are held as Box<dyn ConfigSource>.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Where the config comes from, for logs and `/health`.
    fn location(&self) -> String;

    /// Reads and parses the config. Validation is left to the caller so
    /// environment overrides can be applied first.
    async fn load(&self) -> Result<(Config, ConfigVersion), CrossoverError>;
}

/// Loads from `source`, applies env overrides, then validates.
pub async fn load_validated(
    source: &dyn ConfigSource,
) -> Result<(Config, ConfigVersion), CrossoverError> {
    let (mut config, version) = source.load().await?;
    config.apply_env_overrides();
    validation::validate(&config).map_err(|errors| CrossoverError::ConfigValidation { errors })?;
    Ok((config, version))
}
