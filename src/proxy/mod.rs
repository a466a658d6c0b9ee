//! Proxy module for collecting and validating proxies
//!
//! This module provides functionality for:
//! - Fetching proxy lists from public sources and parsing their layouts
//! - Normalizing raw entries into validated candidates
//! - Probing candidates concurrently under a latency gate
//! - Grouping working proxies by origin and writing the report

pub mod checker;
pub mod geo;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod sources;
pub mod user_agent;

pub use checker::{HttpProbe, Probe, ValidationConfig, Validator};
pub use geo::GeoLocator;
pub use models::{
    dedup_candidates, normalize_batch, Candidate, MalformedCandidate, ProbeOutcome, Protocol,
    RawCandidate,
};
pub use parser::{ParseMethod, ProxyParser};
pub use pipeline::{harvest, validate_to_report};
pub use report::{AggregatedReport, Aggregator, ReportWriter};
pub use sources::{FetcherConfig, ProxySource, SourceFetcher, SourceResult};
