//! Proxy Sieve - Proxy List Collector and Validator
//!
//! Collects candidate proxies from public list sources and keeps the ones that
//! answer a live test request within a latency limit, grouped by origin.

pub mod error;
pub mod proxy;

pub use error::{ConfigError, SourceError};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
