//! Error types for the blog generation pipeline.
//!
//! Only two kinds of failure ever reach the caller of a pipeline run:
//! [`PipelineError::Config`] (bad prompt/tone/config resources) and
//! [`PipelineError::EmptyInput`] (nothing to write about). Everything the
//! generation service can throw at us is a [`ServiceError`], absorbed by the
//! section generator's retry and fallback handling.

use std::path::PathBuf;

/// Errors surfaced by catalog loading and the pipeline itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or malformed prompt, tone, or pipeline configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// A dotted template path that does not exist in the loaded catalog.
    #[error("prompt template not found: {path}")]
    NotFound { path: String },

    /// A category needs tone guidelines but none were configured.
    #[error("category `{category}` requires tone guidelines but none are configured")]
    MissingPlaceholder { category: String },

    /// No news items survived ingest, so there is nothing to chunk.
    #[error("no news items to generate from")]
    EmptyInput,

    /// Filesystem I/O error with the offending path.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MissingPlaceholder { .. })
    }
}

/// Failures of a single call to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("generation call timed out")]
    Timeout,

    #[error("rate limited by generation service")]
    RateLimited,

    #[error("generation service error (HTTP {0})")]
    Server(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("generation service returned no content")]
    EmptyResponse,
}

impl ServiceError {
    /// Transient errors are worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Server(_) | Self::Network(_)
        )
    }
}
