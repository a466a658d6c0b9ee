//! End-to-end run: sources → candidates → validation → report

use crate::error::ConfigError;
use crate::proxy::checker::{Probe, ValidationConfig, Validator};
use crate::proxy::models::{normalize_batch, Candidate};
use crate::proxy::report::{AggregatedReport, Aggregator};
use crate::proxy::sources::{ProxySource, SourceFetcher};

/// Fetch every source and normalize the combined output.
///
/// Sources that fail contribute nothing; candidates are not deduplicated.
pub async fn harvest(fetcher: &SourceFetcher, sources: &[ProxySource]) -> Vec<Candidate> {
    let results = fetcher.fetch_all(sources).await;

    let failed = results.iter().filter(|r| !r.is_success()).count();
    let raw: Vec<_> = results.into_iter().flat_map(|r| r.candidates).collect();
    let raw_count = raw.len();
    let candidates = normalize_batch(raw);

    tracing::info!(
        sources = sources.len(),
        failed_sources = failed,
        raw = raw_count,
        candidates = candidates.len(),
        "Harvest complete"
    );
    candidates
}

/// Validate `candidates` and return the frozen report
pub async fn validate_to_report<P: Probe + 'static>(
    validator: &Validator<P>,
    candidates: Vec<Candidate>,
    config: &ValidationConfig,
) -> Result<AggregatedReport, ConfigError> {
    let aggregator = Aggregator::new(config.max_latency);
    validator
        .validate_into(candidates, config, &aggregator)
        .await?;

    tracing::info!(
        probed = aggregator.outcomes_seen(),
        working = aggregator.snapshot().total(),
        "Validation complete"
    );
    Ok(aggregator.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{ProbeOutcome, Protocol};
    use crate::proxy::parser::ParseMethod;
    use crate::proxy::sources::FetcherConfig;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Passes HTTP candidates on even ports, fails everything else
    struct EvenPortProbe;

    #[async_trait]
    impl Probe for EvenPortProbe {
        async fn probe(&self, candidate: &Candidate, _config: &ValidationConfig) -> ProbeOutcome {
            if candidate.port % 2 == 0 {
                ProbeOutcome::passed(candidate.clone(), Duration::from_millis(5))
            } else {
                ProbeOutcome::failed(candidate.clone(), "refused".to_string())
            }
        }
    }

    async fn spawn_document(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_harvest_and_validate() {
        let table = r#"<table><tr><th>ip</th></tr>
<tr><td>1.1.1.1</td><td>8080</td><td>RU</td></tr>
<tr><td>2.2.2.2</td><td>8081</td><td>RU</td></tr>
<tr><td>3.3.3.3</td><td>99999</td><td>US</td></tr>
<tr><td>4.4.4.4</td><td>3128</td><td>US</td></tr>
</table>"#;
        let text = "5.5.5.5:8000\n6.6.6.6:notaport\n";
        let table_port = spawn_document(table).await;
        let text_port = spawn_document(text).await;

        let sources = vec![
            ProxySource::new(
                "table",
                &format!("http://127.0.0.1:{table_port}/"),
                &[Protocol::Http],
                ParseMethod::Table,
            ),
            ProxySource::new(
                "text",
                &format!("http://127.0.0.1:{text_port}/"),
                &[Protocol::Http],
                ParseMethod::Text,
            ),
            ProxySource::new("dead", "http://127.0.0.1:1/", &[Protocol::Http], ParseMethod::Text),
        ];
        let fetcher = SourceFetcher::with_config(
            FetcherConfig::new()
                .with_retries(0)
                .with_timeout(Duration::from_secs(3)),
        )
        .unwrap();

        let candidates = harvest(&fetcher, &sources).await;
        assert_eq!(candidates.len(), 4);

        let config = ValidationConfig::new().with_max_latency(Duration::from_secs(1));
        let report = validate_to_report(&Validator::with_probe(EvenPortProbe), candidates, &config)
            .await
            .unwrap();

        let mut russia = report.by_origin["Russia"].clone();
        russia.sort();
        assert_eq!(russia, vec!["http://1.1.1.1:8080"]);
        assert_eq!(report.by_origin["United States"], vec!["http://4.4.4.4:3128"]);
        assert_eq!(report.by_origin["Unknown"], vec!["http://5.5.5.5:8000"]);
        assert_eq!(report.total(), 3);
    }

    #[tokio::test]
    async fn test_validate_to_report_rejects_bad_config() {
        let config = ValidationConfig::new().with_max_latency(Duration::ZERO);
        let result = validate_to_report(&Validator::with_probe(EvenPortProbe), Vec::new(), &config).await;
        assert!(matches!(result, Err(ConfigError::NonPositiveLatency(_))));
    }
}
