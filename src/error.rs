//! Error types surfaced by the library.
//!
//! Per-candidate and per-source failures are absorbed where they happen; only
//! configuration problems reach the caller.

use std::time::Duration;
use thiserror::Error;

/// Invalid validation run parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max latency must be positive, got {0:?}")]
    NonPositiveLatency(Duration),

    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("probe timeout must be positive, got {0:?}")]
    NonPositiveTimeout(Duration),

    #[error("invalid test url {url:?}: {reason}")]
    InvalidTestUrl { url: String, reason: String },
}

/// Failure to fetch or decode a proxy list source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}
