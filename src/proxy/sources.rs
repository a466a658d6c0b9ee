//! Proxy list sources and document retrieval
//!
//! This module provides functionality for:
//! - The catalogue of public proxy list sites and their document layouts
//! - Fetching a source with retries and rotating User-Agent headers
//! - Turning every fetch or parse failure into an empty result for that source

use crate::error::SourceError;
use crate::proxy::models::{Protocol, RawCandidate};
use crate::proxy::parser::{ParseMethod, ProxyParser};
use crate::proxy::user_agent::next_user_agent;
use futures::stream::{self, StreamExt};
use reqwest::{header, Client};
use std::time::Duration;
use tracing::Instrument;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of retries after a failed fetch
const DEFAULT_RETRIES: usize = 1;

/// Default number of sources fetched at once
const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Default pause between fetch attempts in milliseconds
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Result of fetching a single source
#[derive(Debug, Clone)]
pub struct SourceResult {
    /// Name of the source that was fetched
    pub source: String,
    /// Raw candidates extracted from the source
    pub candidates: Vec<RawCandidate>,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl SourceResult {
    pub fn success(source: String, candidates: Vec<RawCandidate>) -> Self {
        Self {
            source,
            candidates,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            candidates: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for source retrieval
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for each HTTP request
    pub timeout: Duration,
    /// Additional attempts after a failed fetch
    pub retries: usize,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Number of sources fetched concurrently
    pub concurrency: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// A website that publishes a proxy list
#[derive(Debug, Clone)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// URL to fetch proxies from
    pub url: String,
    /// Protocols this source may contribute
    pub protocols: Vec<Protocol>,
    /// Layout of the fetched document
    pub parse_method: ParseMethod,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, protocols: &[Protocol], parse_method: ParseMethod) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            protocols: protocols.to_vec(),
            parse_method,
        }
    }

    /// Keep candidates whose protocol this source may contribute.
    ///
    /// Unrecognized protocol text passes through so normalization rejects it.
    pub fn filter_allowed(&self, candidates: Vec<RawCandidate>) -> Vec<RawCandidate> {
        candidates
            .into_iter()
            .filter(|raw| {
                raw.protocol
                    .parse::<Protocol>()
                    .map_or(true, |p| self.protocols.contains(&p))
            })
            .collect()
    }

    /// The public proxy list sites known to this crate
    pub fn builtin() -> Vec<ProxySource> {
        use ParseMethod::*;
        use Protocol::*;

        vec![
            ProxySource::new("sslproxies", "https://www.sslproxies.org/", &[Https], Table),
            ProxySource::new("free-proxy-list", "https://free-proxy-list.net/", &[Http, Https], Table),
            ProxySource::new("us-proxy", "https://www.us-proxy.org/", &[Http], Table),
            ProxySource::new("socks-proxy", "https://www.socks-proxy.net/", &[Socks4, Socks5], Table),
            ProxySource::new("proxy-list-download-http", "https://www.proxy-list.download/HTTP", &[Http], Text),
            ProxySource::new("proxy-list-download-socks4", "https://www.proxy-list.download/SOCKS4", &[Socks4], Text),
            ProxySource::new("proxy-list-download-socks5", "https://www.proxy-list.download/SOCKS5", &[Socks5], Text),
            ProxySource::new("proxy-list-download-https", "https://www.proxy-list.download/HTTPS", &[Https], Text),
            ProxySource::new("hidemy-name", "https://hidemy.name/en/proxy-list/", &Protocol::ALL, HideMyName),
            ProxySource::new("proxyscan", "https://www.proxyscan.io/", &Protocol::ALL, ProxyScan),
            ProxySource::new("openproxy-space", "https://openproxy.space/list/http", &[Http, Https], OpenProxy),
            ProxySource::new("freeproxylists", "https://www.freeproxylists.net/", &[Http, Https], Table),
            ProxySource::new("spys-one", "https://spys.one/en/free-proxy-list/", &[Http, Https], SpysOne),
            ProxySource::new(
                "geonode",
                "https://proxylist.geonode.com/api/proxy-list?limit=50&page=1&sort_by=lastChecked&sort_type=desc",
                &Protocol::ALL,
                Json,
            ),
            ProxySource::new("proxy-daily", "https://proxy-daily.com/", &[Http, Https], Text),
            ProxySource::new("my-proxy", "https://www.my-proxy.com/free-proxy-list.html", &[Http], MyProxy),
            ProxySource::new(
                "proxyhttp",
                "https://proxyhttp.net/free-list/anonymous-server-hide-ip-address",
                &[Http, Https],
                Table,
            ),
            ProxySource::new("proxynova", "https://www.proxynova.com/proxy-server-list/", &[Http, Https], ProxyNova),
            ProxySource::new(
                "thespeedx-http",
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
                &[Http],
                Text,
            ),
            ProxySource::new("proxyrack", "https://www.proxyrack.com/free-proxy-list/", &[Http, Https], ProxyRack),
            ProxySource::new("proxyscrape", "https://proxyscrape.com/free-proxy-list", &Protocol::ALL, ProxyScrape),
        ]
    }
}

/// Fetches proxy list documents and extracts raw candidates
pub struct SourceFetcher {
    config: FetcherConfig,
    client: Client,
}

impl SourceFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self, SourceError> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Fetch a document body, treating non-2xx responses as errors
    pub async fn fetch_document(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, next_user_agent())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }
        Ok(response.text().await?)
    }

    /// Fetch and parse one source, retrying failed attempts
    pub async fn try_fetch(&self, source: &ProxySource) -> Result<Vec<RawCandidate>, SourceError> {
        let mut attempt = 0;
        let document = loop {
            match self.fetch_document(&source.url).await {
                Ok(document) => break document,
                Err(e) if attempt < self.config.retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let candidates = ProxyParser::parse(source.parse_method, &document, &source.url)?;
        Ok(source.filter_allowed(candidates))
    }

    /// Fetch one source, returning no candidates on any failure
    pub async fn fetch(&self, source: &ProxySource) -> Vec<RawCandidate> {
        self.fetch_with_result(source).await.candidates
    }

    async fn fetch_with_result(&self, source: &ProxySource) -> SourceResult {
        let span = tracing::info_span!("source", name = %source.name, parse = %source.parse_method);
        async {
            match self.try_fetch(source).await {
                Ok(candidates) => {
                    tracing::info!(count = candidates.len(), "Fetched candidates");
                    SourceResult::success(source.name.clone(), candidates)
                }
                Err(e) => {
                    tracing::warn!(url = %source.url, error = %e, "Source failed");
                    SourceResult::failure(source.name.clone(), e.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch several sources concurrently, returning one result per source
    pub async fn fetch_all(&self, sources: &[ProxySource]) -> Vec<SourceResult> {
        stream::iter(sources)
            .map(|source| self.fetch_with_result(source))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local server answering every request with `status` and `body`
    async fn spawn_list_server(status: &'static str, body: &'static str, hits: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                if let Ok((mut socket, _)) = listener.accept().await {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response = format!(
                            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                    });
                }
            }
        });

        port
    }

    fn quick_fetcher(retries: usize) -> SourceFetcher {
        SourceFetcher::with_config(
            FetcherConfig::new()
                .with_timeout(Duration::from_secs(3))
                .with_retries(retries)
                .with_retry_delay(Duration::ZERO),
        )
        .unwrap()
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.retries, DEFAULT_RETRIES);
        assert_eq!(config.concurrency, DEFAULT_FETCH_CONCURRENCY);
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_retries(3)
            .with_concurrency(0);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retries, 3);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_builtin_sources() {
        let sources = ProxySource::builtin();
        assert_eq!(sources.len(), 21);
        for source in &sources {
            assert!(!source.name.is_empty());
            assert!(source.url.starts_with("https://"));
            assert!(!source.protocols.is_empty());
        }
        let mut names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), sources.len());
    }

    #[test]
    fn test_filter_allowed() {
        let source = ProxySource::new("t", "https://t", &[Protocol::Socks4], ParseMethod::Text);
        let kept = source.filter_allowed(vec![
            RawCandidate::new("1.1.1.1", "80", "HTTP", None),
            RawCandidate::new("2.2.2.2", "1080", "SOCKS4", None),
            RawCandidate::new("3.3.3.3", "1080", "GOPHER", None),
        ]);
        let hosts: Vec<_> = kept.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["2.2.2.2", "3.3.3.3"]);
    }

    #[test]
    fn test_source_result() {
        let ok = SourceResult::success("s".to_string(), vec![RawCandidate::new("1.1.1.1", "80", "HTTP", None)]);
        assert!(ok.is_success());
        assert_eq!(ok.candidates.len(), 1);

        let failed = SourceResult::failure("s".to_string(), "Connection failed".to_string());
        assert!(!failed.is_success());
        assert!(failed.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_text_source() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_list_server("200 OK", "1.2.3.4:8080\n5.6.7.8:3128\n", Arc::clone(&hits)).await;
        let source = ProxySource::new(
            "local",
            &format!("http://127.0.0.1:{port}/list.txt"),
            &[Protocol::Http],
            ParseMethod::Text,
        );

        let candidates = quick_fetcher(0).fetch(&source).await;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], RawCandidate::new("1.2.3.4", "8080", "HTTP", Some("Unknown")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_retries_then_yields_nothing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_list_server("500 Internal Server Error", "oops", Arc::clone(&hits)).await;
        let source = ProxySource::new(
            "broken",
            &format!("http://127.0.0.1:{port}/"),
            &[Protocol::Http],
            ParseMethod::Text,
        );

        let fetcher = quick_fetcher(2);
        let err = fetcher.try_fetch(&source).await.unwrap_err();
        assert!(matches!(err, SourceError::Status(s) if s.as_u16() == 500));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert!(fetcher.fetch(&source).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let good = spawn_list_server("200 OK", "1.2.3.4:80", Arc::clone(&hits)).await;
        let bad = spawn_list_server("404 Not Found", "", Arc::clone(&hits)).await;

        let sources = vec![
            ProxySource::new("good", &format!("http://127.0.0.1:{good}/"), &[Protocol::Http], ParseMethod::Text),
            ProxySource::new("bad", &format!("http://127.0.0.1:{bad}/"), &[Protocol::Http], ParseMethod::Text),
            ProxySource::new("json", &format!("http://127.0.0.1:{good}/"), &[Protocol::Http], ParseMethod::Json),
        ];

        let results = quick_fetcher(0).fetch_all(&sources).await;
        assert_eq!(results.len(), 3);
        let by_name = |name: &str| results.iter().find(|r| r.source == name).unwrap();
        assert!(by_name("good").is_success());
        assert_eq!(by_name("good").candidates.len(), 1);
        assert!(!by_name("bad").is_success());
        assert!(!by_name("json").is_success());
    }
}
