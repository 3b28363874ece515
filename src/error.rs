//! Error types for remux_batch.
//!
//! Only batch-fatal conditions live here. Anything that goes wrong while a
//! single job runs is captured in that job's [`JobResult`](crate::JobResult)
//! instead.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a batch before any job is launched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream mapping policy or batch settings are unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input path cannot be turned into an output path.
    #[error("invalid input path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// An external tool ran but did not behave as expected.
    #[error("tool execution failed: {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    /// The worker pool could not be created.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Settings file could not be parsed.
    #[error("invalid settings file: {0}")]
    Config(#[from] toml::de::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a tool execution failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
