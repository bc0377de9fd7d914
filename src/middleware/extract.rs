//! Correlation identifier extraction from request paths.

use regex::Regex;
use uuid::Uuid;

use crate::error::CrossoverError;

/// Characters preceding the user UUID inside a rate-limit request id.
pub const USER_ID_OFFSET: usize = 10;

/// Pulls the correlation identifier out of a request path.
///
/// The pattern is compiled once at construction; an empty or invalid
/// pattern is a construction error, never a per-request one.
#[derive(Debug, Clone)]
pub struct RequestKeyExtractor {
    pattern: Regex,
}

impl RequestKeyExtractor {
    pub fn new(pattern: &str) -> Result<Self, CrossoverError> {
        if pattern.is_empty() {
            return Err(CrossoverError::MissingField { field: "pattern" });
        }
        let pattern = Regex::new(pattern).map_err(|source| CrossoverError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { pattern })
    }

    /// Returns the whole first match in `path`, or `""` when nothing matches.
    #[must_use]
    pub fn extract<'p>(&self, path: &'p str) -> &'p str {
        self.pattern.find(path).map_or("", |m| m.as_str())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Derives the user id from a rate-limit request id.
///
/// Request ids carry a fixed-width prefix followed by the user's UUID in
/// simple or hyphenated form. Returns `None` for ids that are too short or
/// whose tail is not a UUID.
#[must_use]
pub fn user_id_from_request_id(request_id: &str) -> Option<Uuid> {
    let tail = request_id.get(USER_ID_OFFSET..)?;
    Uuid::try_parse(tail).ok()
}
