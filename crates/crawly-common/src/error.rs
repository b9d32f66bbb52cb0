//! Error types shared by crawly crates

use thiserror::Error;

/// Result type alias for crawly operations
pub type Result<T> = std::result::Result<T, CrawlyError>;

/// Errors that are not specific to a single record
#[derive(Error, Debug)]
pub enum CrawlyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidSetting { key: String, value: String },
}

impl CrawlyError {
    /// Shorthand for an env/CLI setting that failed to parse
    pub fn invalid_setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        CrawlyError::InvalidSetting {
            key: key.into(),
            value: value.into(),
        }
    }
}
