//! Concrete [`ConfigSource`] implementations.
//!
//! File-based sources (YAML, JSON, TOML) gated by feature flags, the
//! [`parse_config_str`] helper for format-specific deserialization, and
//! [`resolve`] for picking a source from `--config` or the working directory.

pub mod file_source;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::ConfigSource;
use crate::config::model::Config;
use crate::error::CrossoverError;

/// Files tried, in order, when no `--config` is given.
pub const CONFIG_CANDIDATES: &[&str] = &[
    "crossover.yaml",
    "crossover.yml",
    "crossover.json",
    "crossover.toml",
];

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Config, CrossoverError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| CrossoverError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| CrossoverError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| CrossoverError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(CrossoverError::UnsupportedFormat(other.to_string())),
    }
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Picks the source for `explicit`, or the first candidate file that exists.
pub async fn resolve(explicit: Option<&Path>) -> Result<Box<dyn ConfigSource>, CrossoverError> {
    if let Some(path) = explicit {
        return create_file_source(path);
    }

    for name in CONFIG_CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return create_file_source(&path);
        }
    }

    Err(CrossoverError::NoConfigSource {
        hint: "Provide --config <file> or place crossover.yaml in the working directory.\n  \
               Run 'crossover init' to create a config file."
            .into(),
    })
}

/// File source chosen by extension.
pub fn create_file_source(path: &Path) -> Result<Box<dyn ConfigSource>, CrossoverError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => Ok(Box::new(file_source::FileSource::yaml(path.to_path_buf()))),

        #[cfg(feature = "json")]
        "json" => Ok(Box::new(file_source::FileSource::json(path.to_path_buf()))),

        #[cfg(feature = "toml")]
        "toml" => Ok(Box::new(file_source::FileSource::toml(path.to_path_buf()))),

        other => Err(CrossoverError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_lowercase_hex() {
        let hash = sha256_hex(b"crossover");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = create_file_source(Path::new("crossover.ini")).err().unwrap();
        assert!(matches!(err, CrossoverError::UnsupportedFormat(ref ext) if ext == "ini"));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_string_parses() {
        let config = parse_config_str("yaml", "upstream:\n  url: http://up\n", "inline").unwrap();
        assert_eq!(config.upstream.url, "http://up");
    }
}
