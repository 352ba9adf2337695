//! Error types for pyramerge.
//!
//! Library crates use [`PyramergeError`] via `thiserror`.
//! The CLI binary wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pyramerge operations.
#[derive(Debug, thiserror::Error)]
pub enum PyramergeError {
    /// Job configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Pyramid descriptor or slab list error.
    #[error("pyramid error: {message}")]
    Pyramid { message: String },

    /// Storage layer error (get/put/copy/link over URI-like paths).
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed instruction line or illegal opcode for the reader state.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// External converter process failed (non-zero exit status).
    #[error("converter error: {0}")]
    Convert(String),

    /// Planning-level error (level conflicts, incompatible sources).
    #[error("plan error: {message}")]
    Plan { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PyramergeError>;

impl PyramergeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a pyramid error from any displayable message.
    pub fn pyramid(msg: impl Into<String>) -> Self {
        Self::Pyramid {
            message: msg.into(),
        }
    }

    /// Create a protocol error from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    /// Create a plan error from any displayable message.
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan {
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
        let err = PyramergeError::config("missing process.directory");
        assert_eq!(err.to_string(), "config error: missing process.directory");

        let err = PyramergeError::plan("different datasources cannot define the same level: 6");
        assert!(err.to_string().contains("same level: 6"));
    }
}
