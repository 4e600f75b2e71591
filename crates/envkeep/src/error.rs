//! Store errors

use thiserror::Error;

/// Store-specific errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Also returned for malformed identities, so callers cannot tell
    /// a bad name from an absent one.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key name: {0}")]
    InvalidKey(String),

    #[error("Decryption failed - invalid key or corrupted data: {0}")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Missing or invalid encryption key: {0}")]
    MissingKey(String),

    #[error("No valid key/value pairs detected")]
    EmptyImport,

    #[error("Template error: {0}")]
    Template(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when stored data exists but could not be authenticated
    pub fn is_decryption(&self) -> bool {
        matches!(self, StoreError::Decryption(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
