//! Proxy checker module: probe strategy and validation engine
//!
//! A [`Validator`] drives one [`Probe`] per candidate with at most
//! `max_concurrency` probes in flight. The production [`HttpProbe`] builds a
//! dedicated client for every probe, so the candidate's proxy settings never
//! leak into process-wide state or into another probe.

use crate::error::ConfigError;
use crate::proxy::models::{Candidate, ProbeOutcome, Protocol};
use crate::proxy::report::Aggregator;
use crate::proxy::user_agent::next_user_agent;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{header, Client, Proxy as ReqwestProxy, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Default per-probe timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent probes
const DEFAULT_CONCURRENCY: usize = 50;

/// Default latency gate in seconds
const DEFAULT_MAX_LATENCY_SECS: u64 = 5;

/// Default URL to test proxies against
const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Parameters for one validation run
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Probes at or above this latency are not promoted
    pub max_latency: Duration,
    /// Number of probes allowed in flight at once
    pub max_concurrency: usize,
    /// Upper bound for a single probe
    pub probe_timeout: Duration,
    /// URL fetched through each candidate
    pub target_test_url: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_secs(DEFAULT_MAX_LATENCY_SECS),
            max_concurrency: DEFAULT_CONCURRENCY,
            probe_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            target_test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl ValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.target_test_url = url;
        self
    }

    /// Reject configurations no run can be scheduled with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_latency.is_zero() {
            return Err(ConfigError::NonPositiveLatency(self.max_latency));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout(self.probe_timeout));
        }

        let invalid = |reason: String| ConfigError::InvalidTestUrl {
            url: self.target_test_url.clone(),
            reason,
        };
        let url = Url::parse(&self.target_test_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }
}

/// Strategy for testing one candidate.
///
/// Implementations report every failure through the returned outcome and never
/// touch state shared with other probes.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, candidate: &Candidate, config: &ValidationConfig) -> ProbeOutcome;
}

/// Fetches the test URL through the candidate with a per-probe reqwest client
#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }

    /// Proxy URL handed to the transport for a candidate.
    ///
    /// HTTP and HTTPS candidates are both reached as plain forwarding proxies
    /// and carry http and https targets alike. SOCKS5 resolves the target
    /// through the proxy.
    pub fn transport_url(candidate: &Candidate) -> String {
        let scheme = match candidate.protocol {
            Protocol::Http | Protocol::Https => "http",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5h",
        };
        format!("{}://{}:{}", scheme, candidate.host, candidate.port)
    }

    fn create_client(candidate: &Candidate, config: &ValidationConfig) -> reqwest::Result<Client> {
        let proxy = ReqwestProxy::all(Self::transport_url(candidate))?;

        Client::builder()
            .proxy(proxy)
            .timeout(config.probe_timeout)
            .build()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, candidate: &Candidate, config: &ValidationConfig) -> ProbeOutcome {
        let client = match Self::create_client(candidate, config) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::failed(candidate.clone(), e.to_string()),
        };

        let request = client
            .get(&config.target_test_url)
            .header(header::USER_AGENT, next_user_agent());

        let start = Instant::now();
        let fetch = async {
            let response = request.send().await?;
            let status = response.status();
            response.bytes().await?;
            Ok::<_, reqwest::Error>(status)
        };

        match tokio::time::timeout(config.probe_timeout, fetch).await {
            Ok(Ok(status)) => {
                let elapsed = start.elapsed();
                if !status.is_success() {
                    ProbeOutcome::rejected(
                        candidate.clone(),
                        elapsed,
                        format!("HTTP status: {}", status),
                    )
                } else if elapsed >= config.max_latency {
                    ProbeOutcome::rejected(
                        candidate.clone(),
                        elapsed,
                        format!(
                            "response took {}ms, limit {}ms",
                            elapsed.as_millis(),
                            config.max_latency.as_millis()
                        ),
                    )
                } else {
                    ProbeOutcome::passed(candidate.clone(), elapsed)
                }
            }
            Ok(Err(e)) => ProbeOutcome::failed(candidate.clone(), e.to_string()),
            Err(_) => ProbeOutcome::timeout(candidate.clone(), config.probe_timeout),
        }
    }
}

/// Bounded-concurrency validation engine
pub struct Validator<P = HttpProbe> {
    probe: Arc<P>,
}

impl Validator<HttpProbe> {
    /// Create a validator using the live HTTP probe
    pub fn new() -> Self {
        Self::with_probe(HttpProbe::new())
    }
}

impl Default for Validator<HttpProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for Validator<P> {
    fn clone(&self) -> Self {
        Self {
            probe: Arc::clone(&self.probe),
        }
    }
}

impl<P: Probe + 'static> Validator<P> {
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe: Arc::new(probe),
        }
    }

    /// Probe every candidate and return the outcomes in completion order
    ///
    /// Dropping the returned future aborts the tasks still in flight.
    pub async fn validate(
        &self,
        candidates: Vec<Candidate>,
        config: &ValidationConfig,
    ) -> Result<Vec<ProbeOutcome>, ConfigError> {
        config.validate()?;
        Ok(self.outcomes(candidates, config).collect::<Vec<_>>().await)
    }

    /// Probe every candidate, feeding each outcome to `aggregator` as it lands
    pub async fn validate_into(
        &self,
        candidates: Vec<Candidate>,
        config: &ValidationConfig,
        aggregator: &Aggregator,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        self.outcomes(candidates, config)
            .for_each(|outcome| {
                aggregator.accumulate(outcome);
                futures::future::ready(())
            })
            .await;
        Ok(())
    }

    fn outcomes(
        &self,
        candidates: Vec<Candidate>,
        config: &ValidationConfig,
    ) -> impl Stream<Item = ProbeOutcome> {
        let total = candidates.len();
        let limit = config.max_concurrency;
        let config = Arc::new(config.clone());
        let probe = Arc::clone(&self.probe);

        tracing::info!(
            candidates = total,
            concurrency = limit,
            timeout_ms = config.probe_timeout.as_millis() as u64,
            test_url = %config.target_test_url,
            "Starting validation"
        );

        stream::iter(candidates)
            .map(move |candidate| {
                let probe = Arc::clone(&probe);
                let config = Arc::clone(&config);
                async move {
                    let fallback = candidate.clone();
                    // The task is spawned only once buffer_unordered polls this
                    // future, so the concurrency limit covers it.
                    let mut task = AbortOnDrop(tokio::spawn(async move {
                        bounded_probe(probe.as_ref(), candidate, &config).await
                    }));
                    match (&mut task.0).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::warn!(endpoint = %fallback.endpoint_identifier(), error = %e, "Probe task failed");
                            ProbeOutcome::failed(fallback, format!("probe task failed: {e}"))
                        }
                    }
                }
            })
            .buffer_unordered(limit)
    }
}

/// Aborts the wrapped task when the future awaiting it is dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one probe, turning an overrun of `probe_timeout` into a failed outcome
async fn bounded_probe<P: Probe + ?Sized>(
    probe: &P,
    candidate: Candidate,
    config: &ValidationConfig,
) -> ProbeOutcome {
    let result = tokio::time::timeout(config.probe_timeout, probe.probe(&candidate, config)).await;
    match result {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::timeout(candidate, config.probe_timeout),
    }
}
