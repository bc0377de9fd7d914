//! Generic async file-based config source with a SHA-256 version.
//!
//! [`FileSource`] implements [`ConfigSource`] for any file format by taking
//! a deserialization function at construction time; [`FileSource::yaml`],
//! [`FileSource::json`] and [`FileSource::toml`] cover the built-in formats.

use std::path::PathBuf;

use async_trait::async_trait;

use super::sha256_hex;
use crate::config::model::Config;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::CrossoverError;

type Deserialize = fn(&str) -> Result<Config, Box<dyn std::error::Error + Send + Sync>>;

pub struct FileSource {
    path: PathBuf,
    name: &'static str,
    deserialize: Deserialize,
}

impl FileSource {
    #[must_use]
    pub fn new(path: PathBuf, name: &'static str, deserialize: Deserialize) -> Self {
        Self {
            path,
            name,
            deserialize,
        }
    }

    #[cfg(feature = "yaml")]
    #[must_use]
    pub fn yaml(path: PathBuf) -> Self {
        Self::new(path, "yaml", |content| Ok(serde_yml::from_str(content)?))
    }

    #[cfg(feature = "json")]
    #[must_use]
    pub fn json(path: PathBuf) -> Self {
        Self::new(path, "json", |content| Ok(serde_json::from_str(content)?))
    }

    #[cfg(feature = "toml")]
    #[must_use]
    pub fn toml(path: PathBuf) -> Self {
        Self::new(path, "toml", |content| Ok(toml::from_str(content)?))
    }

    async fn read_content(&self) -> Result<String, CrossoverError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CrossoverError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                CrossoverError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), CrossoverError> {
        let content = self.read_content().await?;

        let config = (self.deserialize)(&content).map_err(|e| CrossoverError::ConfigParse {
            path: self.path.display().to_string(),
            source: e,
        })?;

        Ok((config, ConfigVersion::Hash(sha256_hex(content.as_bytes()))))
    }
}
