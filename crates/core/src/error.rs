//! Core error types for loading configuration and cluster snapshots.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for notready's process-level operations.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("unsupported file format '{extension}' for '{path}'")]
    UnsupportedFormat { path: PathBuf, extension: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported format error.
    pub fn unsupported_format(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.into(),
            extension: extension.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid duration error.
    pub fn invalid_duration(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParseFailed {
            reason: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlParseFailed {
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlParseFailed {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_read_failed_names_the_path() {
        let err = Error::file_read_failed("/tmp/cluster.yaml", "permission denied");
        let message = err.to_string();
        assert!(message.contains("/tmp/cluster.yaml"));
        assert!(message.contains("permission denied"));
    }

    #[test]
    fn toml_errors_convert() {
        let parsed: std::result::Result<toml::Table, _> = toml::from_str("not = [valid");
        let err = parsed.map_err(Error::from).err();
        assert!(matches!(err, Some(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn yaml_errors_convert() {
        let parsed: std::result::Result<Vec<String>, _> = serde_yaml::from_str("{ a: 1 }");
        let err = parsed.map_err(Error::from).err();
        assert!(matches!(err, Some(Error::YamlParseFailed { .. })));
    }
}
