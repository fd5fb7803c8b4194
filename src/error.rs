//! Error kinds surfaced by the codec, the amputation engine and the I/O helpers.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    /// Rejected configuration (amputation rate, empty source, inconsistent metadata).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A column that was asked for is not where it should be.
    #[error("Invalid column '{column}': {message}")]
    InvalidColumn { column: String, message: String },

    /// The imputer failed or handed back something unusable.
    #[error("Imputer '{imputer}' failed: {message}")]
    ImputerFailure { imputer: String, message: String },

    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error("Cannot coerce column '{column}': {message}")]
    TypeCoercion { column: String, message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("CSV error: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SynthError>;

impl SynthError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_column(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidColumn {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn imputer(imputer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImputerFailure {
            imputer: imputer.into(),
            message: message.into(),
        }
    }

    pub fn coercion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeCoercion {
            column: column.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SynthError::configuration("miss_rate must lie in [0.0, 1.0), got 1.5");
        assert_eq!(
            err.to_string(),
            "Configuration error: miss_rate must lie in [0.0, 1.0), got 1.5"
        );

        let err = SynthError::invalid_column("color", "not present in table");
        assert!(err.to_string().contains("'color'"));

        let err = SynthError::imputer("copula", "wrong shape");
        assert!(matches!(err, SynthError::ImputerFailure { .. }));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: SynthError = io_err.into();
        assert!(matches!(err, SynthError::Io { .. }));
    }
}
