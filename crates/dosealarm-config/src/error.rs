//! Config errors.

use thiserror::Error;

/// Errors returned while loading or validating a dosealarm config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("cannot read config file: {0}")]
    ReadFailed(#[from] std::io::Error),
    /// A config file is not valid JSON5.
    #[error("malformed JSON5 config: {0}")]
    ParseFailed(#[from] json5::Error),
    /// The merged document does not match the config model.
    #[error("cannot decode config: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    /// A field has the wrong shape, labelled `layer:path`.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
    /// The effective config breaks a cross-field rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}
