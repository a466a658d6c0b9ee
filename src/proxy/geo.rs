//! Origin labels: country code table and optional MMDB lookups

use crate::proxy::models::{Candidate, UNKNOWN_ORIGIN};
use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Country names for the codes proxy list sites report
const COUNTRY_CODES: &[(&str, &str)] = &[
    ("US", "United States"),
    ("RU", "Russia"),
    ("CN", "China"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("UK", "United Kingdom"),
    ("BR", "Brazil"),
    ("IN", "India"),
];

/// Map a source's country code to an origin label, `Unknown` when unmapped
pub fn country_name(code: &str) -> &'static str {
    let code = code.trim();
    COUNTRY_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(UNKNOWN_ORIGIN, |(_, name)| *name)
}

/// GeoLocator for looking up IP addresses in MMDB databases
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// English country name for an IP address string
    pub fn country(&self, ip_str: &str) -> Result<Option<String>> {
        let ip: IpAddr = ip_str.parse()?;
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;

        Ok(city.and_then(|city| city.country.names.english.map(String::from)))
    }

    /// Replace `Unknown` origin labels with the looked-up country where possible
    pub fn label_unknown(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut resolved = 0usize;
        let candidates = candidates
            .into_iter()
            .map(|mut candidate| {
                if candidate.origin_label != UNKNOWN_ORIGIN {
                    return candidate;
                }
                match self.country(&candidate.host) {
                    Ok(Some(country)) => {
                        resolved += 1;
                        candidate.origin_label = country;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(host = %candidate.host, error = %e, "Geo lookup failed")
                    }
                }
                candidate
            })
            .collect();

        tracing::info!(resolved, "Resolved unknown origins");
        candidates
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
