//! Result aggregation and report output
//!
//! The [`Aggregator`] is the only state shared between concurrently finishing
//! probes. Every mutation goes through [`Aggregator::accumulate`], which holds a
//! single lock while it touches both the per-origin map and the combined list.

use crate::proxy::models::ProbeOutcome;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Name of the file holding every promoted endpoint
pub const COMBINED_FILE: &str = "all_proxies.txt";

/// Name of the JSON run summary
pub const SUMMARY_FILE: &str = "summary.json";

/// Promoted endpoints grouped by origin label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedReport {
    /// Endpoint identifiers per origin label, in completion order
    pub by_origin: BTreeMap<String, Vec<String>>,
    /// Every promoted endpoint identifier, in completion order
    pub combined: Vec<String>,
}

impl AggregatedReport {
    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn total(&self) -> usize {
        self.combined.len()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            generated_at: Utc::now(),
            total: self.total(),
            by_origin: self
                .by_origin
                .iter()
                .map(|(label, endpoints)| (label.clone(), endpoints.len()))
                .collect(),
        }
    }

    fn push(&mut self, origin_label: &str, endpoint: String) {
        self.by_origin
            .entry(origin_label.to_string())
            .or_default()
            .push(endpoint.clone());
        self.combined.push(endpoint);
    }
}

/// Counts for one finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub by_origin: BTreeMap<String, usize>,
}

/// Thread-safe accumulator of probe outcomes
#[derive(Debug)]
pub struct Aggregator {
    max_latency: Duration,
    report: Mutex<AggregatedReport>,
    seen: AtomicUsize,
}

impl Aggregator {
    pub fn new(max_latency: Duration) -> Self {
        Self {
            max_latency,
            report: Mutex::new(AggregatedReport::default()),
            seen: AtomicUsize::new(0),
        }
    }

    /// Record one outcome, keeping it only if it passes the promotion gate
    pub fn accumulate(&self, outcome: ProbeOutcome) {
        self.seen.fetch_add(1, Ordering::Relaxed);

        if !outcome.is_promoted(self.max_latency) {
            tracing::debug!(
                endpoint = %outcome.endpoint_identifier,
                origin = %outcome.candidate.origin_label,
                reason = outcome.failure.as_deref().unwrap_or("latency gate"),
                "Proxy rejected"
            );
            return;
        }

        tracing::info!(
            endpoint = %outcome.endpoint_identifier,
            origin = %outcome.candidate.origin_label,
            elapsed_ms = outcome.elapsed.map(|d| d.as_millis() as u64),
            "Working proxy"
        );

        let ProbeOutcome {
            candidate,
            endpoint_identifier,
            ..
        } = outcome;
        self.lock().push(&candidate.origin_label, endpoint_identifier);
    }

    /// Number of outcomes received so far, promoted or not
    pub fn outcomes_seen(&self) -> usize {
        self.seen.load(Ordering::Relaxed)
    }

    /// Copy of the current report
    pub fn snapshot(&self) -> AggregatedReport {
        self.lock().clone()
    }

    pub fn into_report(self) -> AggregatedReport {
        self.report
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Poisoning is ignored, `push` never leaves the two views out of step.
    fn lock(&self) -> MutexGuard<'_, AggregatedReport> {
        self.report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Writes a report as one text file per origin plus a combined listing
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write all report files and return their paths, combined file first
    pub fn write(&self, report: &AggregatedReport) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)?;
        let mut written = Vec::with_capacity(report.by_origin.len() + 2);

        let combined_path = self.dir.join(COMBINED_FILE);
        fs::write(&combined_path, report.combined.join("\n"))?;
        tracing::info!(path = %combined_path.display(), count = report.total(), "Saved proxies");
        written.push(combined_path);

        for (label, endpoints) in &report.by_origin {
            let path = self.dir.join(format!("{}.txt", Self::file_stem(label)));
            fs::write(&path, endpoints.join("\n"))?;
            tracing::info!(
                path = %path.display(),
                origin = %label,
                count = endpoints.len(),
                "Saved proxies for origin"
            );
            written.push(path);
        }

        let summary_path = self.dir.join(SUMMARY_FILE);
        fs::write(
            &summary_path,
            serde_json::to_string_pretty(&report.summary())?,
        )?;
        written.push(summary_path);

        Ok(written)
    }

    /// File-safe form of an origin label
    pub fn file_stem(label: &str) -> String {
        let stem = label.replace([' ', '/'], "_");
        if stem.is_empty() {
            "_".to_string()
        } else {
            stem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{Candidate, Protocol};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn outcome(host: &str, origin: &str, success: bool, elapsed_ms: u64) -> ProbeOutcome {
        let candidate = Candidate::new(host, 8080, Protocol::Http, origin);
        if success {
            ProbeOutcome::passed(candidate, Duration::from_millis(elapsed_ms))
        } else {
            ProbeOutcome::failed(candidate, "connection refused".to_string())
        }
    }

    #[test]
    fn test_accumulate_groups_by_origin() {
        let aggregator = Aggregator::new(Duration::from_secs(2));
        aggregator.accumulate(outcome("1.1.1.1", "Russia", true, 100));
        aggregator.accumulate(outcome("2.2.2.2", "Russia", true, 200));
        aggregator.accumulate(outcome("3.3.3.3", "Germany", true, 300));

        let report = aggregator.snapshot();
        assert_eq!(report.by_origin.len(), 2);
        assert_eq!(
            report.by_origin["Russia"],
            vec!["http://1.1.1.1:8080", "http://2.2.2.2:8080"]
        );
        assert_eq!(report.by_origin["Germany"], vec!["http://3.3.3.3:8080"]);
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn test_accumulate_discards_failed_and_slow() {
        let aggregator = Aggregator::new(Duration::from_secs(2));
        aggregator.accumulate(outcome("1.1.1.1", "Russia", false, 0));
        aggregator.accumulate(outcome("2.2.2.2", "Russia", true, 2000));
        aggregator.accumulate(outcome("3.3.3.3", "Russia", true, 2500));

        let report = aggregator.into_report();
        assert!(report.is_empty());
        assert!(report.by_origin.is_empty());
    }

    #[test]
    fn test_outcomes_seen_counts_everything() {
        let aggregator = Aggregator::new(Duration::from_secs(1));
        aggregator.accumulate(outcome("1.1.1.1", "US", true, 10));
        aggregator.accumulate(outcome("2.2.2.2", "US", false, 0));
        assert_eq!(aggregator.outcomes_seen(), 2);
        assert_eq!(aggregator.snapshot().total(), 1);
    }

    #[test]
    fn test_concurrent_accumulate_is_lossless() {
        let origins = ["Russia", "Germany", "United States", "Unknown"];

        for _ in 0..5 {
            let aggregator = Arc::new(Aggregator::new(Duration::from_millis(500)));
            let mut expected: HashMap<&str, usize> = HashMap::new();
            let mut handles = Vec::new();

            for i in 0..1000usize {
                let origin = origins[i % origins.len()];
                // every third outcome is too slow, every seventh fails outright
                let success = i % 7 != 0;
                let elapsed = if i % 3 == 0 { 900 } else { 50 };
                if success && elapsed < 500 {
                    *expected.entry(origin).or_default() += 1;
                }

                let aggregator = Arc::clone(&aggregator);
                let host = format!("10.0.{}.{}", i / 256, i % 256);
                handles.push(std::thread::spawn(move || {
                    aggregator.accumulate(outcome(&host, origin, success, elapsed));
                }));
            }
            for handle in handles {
                handle.join().unwrap();
            }

            let report = aggregator.snapshot();
            let expected_total: usize = expected.values().sum();
            assert_eq!(report.total(), expected_total);
            assert_eq!(
                report.by_origin.values().map(Vec::len).sum::<usize>(),
                report.combined.len()
            );
            for (origin, count) in &expected {
                assert_eq!(report.by_origin[*origin].len(), *count, "origin {origin}");
            }

            let mut unique = report.combined.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), report.combined.len());
            assert_eq!(aggregator.outcomes_seen(), 1000);
        }
    }

    #[test]
    fn test_summary_counts() {
        let aggregator = Aggregator::new(Duration::from_secs(2));
        aggregator.accumulate(outcome("1.1.1.1", "US", true, 10));
        aggregator.accumulate(outcome("2.2.2.2", "US", true, 10));
        aggregator.accumulate(outcome("3.3.3.3", "China", true, 10));

        let summary = aggregator.snapshot().summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_origin["US"], 2);
        assert_eq!(summary.by_origin["China"], 1);
        let labels: Vec<_> = summary.by_origin.keys().cloned().collect();
        assert_eq!(labels, vec!["China", "US"]);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(ReportWriter::file_stem("United States"), "United_States");
        assert_eq!(ReportWriter::file_stem("A/B C"), "A_B_C");
        assert_eq!(ReportWriter::file_stem("Unknown"), "Unknown");
        assert_eq!(ReportWriter::file_stem(""), "_");
    }

    #[test]
    fn test_writer_writes_combined_and_per_origin_files() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = Aggregator::new(Duration::from_secs(2));
        aggregator.accumulate(outcome("1.1.1.1", "United States", true, 10));
        aggregator.accumulate(outcome("2.2.2.2", "Russia", true, 10));
        aggregator.accumulate(outcome("3.3.3.3", "Russia", true, 10));
        let report = aggregator.into_report();

        let writer = ReportWriter::new(dir.path().join("Proxy"));
        let written = writer.write(&report).unwrap();
        assert_eq!(written.len(), 4);

        let combined = fs::read_to_string(writer.dir().join(COMBINED_FILE)).unwrap();
        let mut lines: Vec<_> = combined.lines().collect();
        lines.sort();
        assert_eq!(
            lines,
            vec!["http://1.1.1.1:8080", "http://2.2.2.2:8080", "http://3.3.3.3:8080"]
        );

        let russia = fs::read_to_string(writer.dir().join("Russia.txt")).unwrap();
        assert_eq!(russia, "http://2.2.2.2:8080\nhttp://3.3.3.3:8080");
        let us = fs::read_to_string(writer.dir().join("United_States.txt")).unwrap();
        assert_eq!(us, "http://1.1.1.1:8080");

        let summary: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(writer.dir().join(SUMMARY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["total"], 3);
        assert_eq!(summary["by_origin"]["Russia"], 2);
    }

    #[test]
    fn test_writer_handles_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let written = writer.write(&AggregatedReport::default()).unwrap();
        assert_eq!(written.len(), 2);
        let combined = fs::read_to_string(dir.path().join(COMBINED_FILE)).unwrap();
        assert!(combined.is_empty());
    }
}
