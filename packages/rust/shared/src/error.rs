//! Error types for pgarchive.
//!
//! Library crates use [`PgArchiveError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pgarchive operations.
#[derive(Debug, thiserror::Error)]
pub enum PgArchiveError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during preparation or download.
    #[error("network error: {0}")]
    Network(String),

    /// RDF/metadata extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Metadata store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad format name, empty selection, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Archive container write error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Optimization cache unreachable or rejected the credentials.
    #[error("optimization cache error: {0}")]
    Cache(String),

    /// Required external tools are not installed.
    #[error("missing required dependencies: {}", missing.join(", "))]
    MissingDependencies { missing: Vec<String> },

    /// An external program exited unsuccessfully.
    #[error("external tool error: {0}")]
    External(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PgArchiveError>;

impl PgArchiveError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PgArchiveError::config("bad concurrency");
        assert_eq!(err.to_string(), "config error: bad concurrency");

        let err = PgArchiveError::validation("unknown format 'mobi'");
        assert!(err.to_string().contains("'mobi'"));
    }

    #[test]
    fn missing_dependencies_lists_tools() {
        let err = PgArchiveError::MissingDependencies {
            missing: vec!["tar".into(), "jpegoptim".into()],
        };
        assert_eq!(
            err.to_string(),
            "missing required dependencies: tar, jpegoptim"
        );
    }
}
