//! Error types for ConfScout.
//!
//! Library crates return [`ConfScoutError`]; the CLI converts it into a `color-eyre`
//! report. Page-fetch failures are not errors at this level: the crawler classifies them
//! per attempt and reports a final outcome instead.

use std::path::PathBuf;

/// Top-level error type for all ConfScout operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfScoutError {
    /// Missing or unreadable configuration, or a bad credential.
    #[error("config error: {message}")]
    Config { message: String },

    /// An HTTP client could not be built (bad proxy, TLS setup).
    #[error("network error: {0}")]
    Network(String),

    /// Cache database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The CSV dataset could not be read or encoded.
    #[error("dataset error in {path:?}: {message}")]
    Dataset { path: PathBuf, message: String },

    /// One extraction attempt failed: HTTP status, transport, or an unusable reply.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A setting or address that parsed but makes no sense.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ConfScoutError>;

impl ConfScoutError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn dataset(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a run stopped because it was cancelled rather than because something broke.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ConfScoutError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ConfScoutError::validation("listing_url is not absolute");
        assert!(err.to_string().contains("listing_url"));
    }

    #[test]
    fn io_and_dataset_errors_carry_path() {
        let err = ConfScoutError::io(
            "output/conferences.csv",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("conferences.csv"));

        let err = ConfScoutError::dataset("output/conferences.csv", "unequal lengths");
        assert!(err.to_string().contains("conferences.csv"));
        assert!(err.to_string().contains("unequal lengths"));
    }

    #[test]
    fn only_cancelled_is_cancelled() {
        assert!(ConfScoutError::Cancelled.is_cancelled());
        assert_eq!(ConfScoutError::Cancelled.to_string(), "operation cancelled");
        assert!(!ConfScoutError::Storage("locked".into()).is_cancelled());
    }
}
