//! Identity and key validation
//!
//! Namespaces and environments become path segments, so they are checked
//! before any path is derived from them.

use crate::error::{Result, StoreError};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static SEGMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").unwrap());

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap());

/// Whether a namespace or environment name is acceptable.
/// All-dot names would address a parent directory.
pub fn is_valid_segment(segment: &str) -> bool {
    SEGMENT_PATTERN.is_match(segment) && !segment.chars().all(|c| c == '.')
}

/// Whether a variable key may be persisted
pub fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

/// A validated (namespace, environment) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId {
    namespace: String,
    environment: String,
}

impl EnvId {
    /// Malformed names report [`StoreError::NotFound`] rather than a validation error
    pub fn new(namespace: &str, environment: &str) -> Result<Self> {
        if !is_valid_segment(namespace) || !is_valid_segment(environment) {
            return Err(StoreError::NotFound(format!("{}/{}", namespace, environment)));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            environment: environment.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.environment)
    }
}
