use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_sieve::{
    dedup_candidates, harvest, normalize_batch, validate_to_report, AggregatedReport, Candidate,
    FetcherConfig, GeoLocator, ProxyParser, ProxySource, Protocol, ReportWriter, SourceFetcher,
    ValidationConfig, Validator,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Collects public proxy lists and keeps the proxies that actually work
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "Collects public proxy lists and keeps the proxies that actually work")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the built-in sources, validate every candidate and write the report
    Run {
        /// Only use the named sources (can specify multiple)
        #[arg(short, long)]
        source: Vec<String>,
        /// Timeout in seconds for fetching a source
        #[arg(long, default_value = "10")]
        fetch_timeout: u64,
        /// Retries after a failed source fetch
        #[arg(long, default_value = "1")]
        retries: usize,
        #[command(flatten)]
        validation: ValidationArgs,
    },
    /// Validate proxies listed in a local file
    Check {
        /// Input file with one proxy per line, optionally followed by an origin label
        input: PathBuf,
        /// Protocol for lines without a scheme (http, https, socks4, socks5)
        #[arg(short = 't', long, default_value = "http")]
        protocol: String,
        #[command(flatten)]
        validation: ValidationArgs,
    },
    /// List the built-in proxy sources
    Sources,
}

#[derive(Args)]
struct ValidationArgs {
    /// Maximum accepted response time in seconds
    #[arg(short = 'l', long, default_value = "5.0")]
    max_latency: f64,
    /// Number of concurrent probes
    #[arg(short = 'n', long, default_value = "50")]
    concurrency: usize,
    /// Timeout in seconds for a single probe
    #[arg(long, default_value = "5.0")]
    probe_timeout: f64,
    /// URL to test proxies against
    #[arg(long, default_value = "http://httpbin.org/ip")]
    test_url: String,
    /// Directory the report is written to
    #[arg(short, long, default_value = "Proxy")]
    output: PathBuf,
    /// Drop candidates with the same protocol, host and port before probing
    #[arg(long)]
    dedup: bool,
    /// MMDB file used to label proxies of unknown origin
    #[arg(long)]
    mmdb: Option<PathBuf>,
}

impl ValidationArgs {
    fn config(&self) -> Result<ValidationConfig> {
        let config = ValidationConfig::new()
            .with_max_latency(seconds(self.max_latency, "max latency")?)
            .with_timeout(seconds(self.probe_timeout, "probe timeout")?)
            .with_concurrency(self.concurrency)
            .with_test_url(self.test_url.clone());
        config.validate()?;
        Ok(config)
    }

    fn prepare(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
        let candidates = if self.dedup {
            let before = candidates.len();
            let unique = dedup_candidates(candidates);
            info!(removed = before - unique.len(), "Removed duplicate candidates");
            unique
        } else {
            candidates
        };

        match &self.mmdb {
            Some(path) => {
                let geo = GeoLocator::from_path(path)
                    .with_context(|| format!("failed to open MMDB file {}", path.display()))?;
                Ok(geo.label_unknown(candidates))
            }
            None => Ok(candidates),
        }
    }
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{what} must be a positive number of seconds, got {value}"));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow!("{what} of {value} seconds is out of range: {e}"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if log_format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            source,
            fetch_timeout,
            retries,
            validation,
        } => {
            let config = validation.config()?;

            let mut sources = ProxySource::builtin();
            if !source.is_empty() {
                sources.retain(|s| source.contains(&s.name));
                if sources.is_empty() {
                    return Err(anyhow!("no built-in source matches {:?}", source));
                }
            }

            let fetcher = SourceFetcher::with_config(
                FetcherConfig::new()
                    .with_timeout(Duration::from_secs(fetch_timeout))
                    .with_retries(retries),
            )?;
            let candidates = validation.prepare(harvest(&fetcher, &sources).await)?;
            println!("Found {} candidate proxies", candidates.len());

            let report = validate_to_report(&Validator::new(), candidates, &config).await?;
            write_report(&report, &validation)?;
        }
        Commands::Check {
            input,
            protocol,
            validation,
        } => {
            let config = validation.config()?;
            let protocol: Protocol = protocol.parse()?;

            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let raw = ProxyParser::parse_string(&content, &protocol.to_string());
            let candidates = validation.prepare(normalize_batch(raw))?;
            println!("Loaded {} proxies from {:?}", candidates.len(), input);

            let report = validate_to_report(&Validator::new(), candidates, &config).await?;
            write_report(&report, &validation)?;
        }
        Commands::Sources => {
            for source in ProxySource::builtin() {
                let protocols: Vec<String> =
                    source.protocols.iter().map(|p| p.to_string()).collect();
                println!(
                    "{:<28} {:<12} {:<28} {}",
                    source.name,
                    source.parse_method,
                    protocols.join(","),
                    source.url
                );
            }
        }
    }

    Ok(())
}

fn write_report(report: &AggregatedReport, validation: &ValidationArgs) -> Result<()> {
    let writer = ReportWriter::new(&validation.output);
    writer.write(report)?;

    println!("\nWorking proxies: {}", report.total());
    println!("By origin:");
    for (origin, count) in &report.summary().by_origin {
        println!("  {}: {}", origin, count);
    }
    println!("Saved to {}", writer.dir().display());
    Ok(())
}
