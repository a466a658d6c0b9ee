//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Origin label used when a source does not report one
pub const UNKNOWN_ORIGIN: &str = "Unknown";

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Socks4,
        Protocol::Socks5,
    ];

    pub fn is_socks(&self) -> bool {
        matches!(self, Protocol::Socks4 | Protocol::Socks5)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::Socks4 => write!(f, "socks4"),
            Protocol::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for Protocol {
    type Err = MalformedCandidate;

    /// Case-insensitive match against the four known protocols
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            "SOCKS4" => Ok(Protocol::Socks4),
            "SOCKS5" => Ok(Protocol::Socks5),
            _ => Err(MalformedCandidate::UnknownProtocol(s.to_string())),
        }
    }
}

/// Reasons a raw tuple is rejected during normalization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedCandidate {
    #[error("empty host")]
    EmptyHost,
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
    #[error("unknown protocol: {0:?}")]
    UnknownProtocol(String),
}

/// Untrusted tuple as produced by a source adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    pub host: String,
    pub port: String,
    pub protocol: String,
    pub origin: Option<String>,
}

impl RawCandidate {
    pub fn new(host: &str, port: &str, protocol: &str, origin: Option<&str>) -> Self {
        Self {
            host: host.to_string(),
            port: port.to_string(),
            protocol: protocol.to_string(),
            origin: origin.map(String::from),
        }
    }

    /// Validate the tuple and turn it into a [`Candidate`]
    pub fn normalize(self) -> Result<Candidate, MalformedCandidate> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(MalformedCandidate::EmptyHost);
        }

        let port = match self.port.trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => return Err(MalformedCandidate::InvalidPort(self.port)),
        };

        let protocol: Protocol = self.protocol.parse()?;

        Ok(Candidate {
            host: host.to_string(),
            port,
            protocol,
            origin_label: self.origin.unwrap_or_else(|| UNKNOWN_ORIGIN.to_string()),
        })
    }
}

/// Normalize a batch, silently dropping tuples that fail validation
pub fn normalize_batch(raw: Vec<RawCandidate>) -> Vec<Candidate> {
    raw.into_iter()
        .filter_map(|tuple| {
            let entry = format!("{}:{} ({})", tuple.host, tuple.port, tuple.protocol);
            match tuple.normalize() {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    tracing::debug!(candidate = %entry, error = %e, "Dropping malformed candidate");
                    None
                }
            }
        })
        .collect()
}

/// Remove candidates sharing an endpoint identifier, keeping the first one seen
pub fn dedup_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.endpoint_identifier()))
        .collect()
}

/// One proxy endpoint with its claimed protocol and origin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub origin_label: String,
}

impl Candidate {
    pub fn new(host: &str, port: u16, protocol: Protocol, origin_label: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            protocol,
            origin_label: origin_label.to_string(),
        }
    }

    /// Canonical `protocol://host:port` form used in reports
    pub fn endpoint_identifier(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Get the proxy string in IP:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.endpoint_identifier(), self.origin_label)
    }
}

/// Result of probing a single candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub candidate: Candidate,
    pub success: bool,
    /// Time spent in the network probe, absent when the transport failed
    pub elapsed: Option<Duration>,
    pub endpoint_identifier: String,
    /// Diagnostic for failed probes, only used for logging
    pub failure: Option<String>,
}

impl ProbeOutcome {
    pub fn passed(candidate: Candidate, elapsed: Duration) -> Self {
        Self {
            endpoint_identifier: candidate.endpoint_identifier(),
            candidate,
            success: true,
            elapsed: Some(elapsed),
            failure: None,
        }
    }

    /// A probe that completed but was rejected, e.g. for status or latency
    pub fn rejected(candidate: Candidate, elapsed: Duration, reason: String) -> Self {
        Self {
            endpoint_identifier: candidate.endpoint_identifier(),
            candidate,
            success: false,
            elapsed: Some(elapsed),
            failure: Some(reason),
        }
    }

    pub fn failed(candidate: Candidate, error: String) -> Self {
        Self {
            endpoint_identifier: candidate.endpoint_identifier(),
            candidate,
            success: false,
            elapsed: None,
            failure: Some(error),
        }
    }

    pub fn timeout(candidate: Candidate, after: Duration) -> Self {
        Self::failed(candidate, format!("timed out after {}ms", after.as_millis()))
    }

    /// Promotion gate: successful and strictly faster than `max_latency`
    pub fn is_promoted(&self, max_latency: Duration) -> bool {
        self.success && matches!(self.elapsed, Some(elapsed) if elapsed < max_latency)
    }
}
