//! Pipeline counters and latency histograms.
//!
//! Purely observational: recording never fails and never blocks the caller beyond an
//! atomic increment or a short map update. [`PipelineMetrics::render_prometheus`]
//! produces the text exposition format served at `/metrics`.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Upper bounds (seconds) of the latency histogram buckets.
pub const LATENCY_BUCKETS: [f64; 12] = [
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Fixed-bucket latency histogram.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if let Some(idx) = LATENCY_BUCKETS.iter().position(|bound| secs <= *bound) {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum_seconds: self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Point-in-time copy of a histogram. `buckets` are non-cumulative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<u64>,
    pub count: u64,
    pub sum_seconds: f64,
}

/// Counters and histograms shared by the pipeline, cache layer and query service.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub ingest_attempts: AtomicU64,
    pub ingest_successes: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_errors: AtomicU64,
    pub query_cache_hits: AtomicU64,
    pub query_cache_misses: AtomicU64,
    pub metadata_write_retries: AtomicU64,
    pub reprocessed: AtomicU64,
    pub quarantined: AtomicU64,
    failures: RwLock<BTreeMap<&'static str, u64>>,
    pub extraction_latency: LatencyHistogram,
    pub ocr_latency: LatencyHistogram,
    pub ingest_latency: LatencyHistogram,
}

/// Point-in-time copy of all pipeline metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub ingest_attempts: u64,
    pub ingest_successes: u64,
    pub failures: BTreeMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    /// Hits over ingestion lookups only.
    pub cache_hit_ratio: f64,
    pub query_cache_hits: u64,
    pub query_cache_misses: u64,
    pub metadata_write_retries: u64,
    pub reprocessed: u64,
    pub quarantined: u64,
    pub extraction_latency: HistogramSnapshot,
    pub ocr_latency: HistogramSnapshot,
    pub ingest_latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    pub fn failures_of(&self, code: ErrorCode) -> u64 {
        self.failures.get(code.label()).copied().unwrap_or(0)
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.ingest_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.ingest_successes.fetch_add(1, Ordering::Relaxed);
        self.ingest_latency.observe(elapsed);
    }

    /// Count a failed or rejected ingestion under its error kind.
    pub fn record_failure(&self, code: ErrorCode) {
        if let Ok(mut failures) = self.failures.write() {
            *failures.entry(code.label()).or_insert(0) += 1;
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_cache_hit(&self) {
        self.query_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_cache_miss(&self) {
        self.query_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metadata_retry(&self) {
        self.metadata_write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reprocessed(&self) {
        self.reprocessed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quarantined(&self) {
        self.quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        let failures = self
            .failures
            .read()
            .map(|f| f.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();

        MetricsSnapshot {
            ingest_attempts: self.ingest_attempts.load(Ordering::Relaxed),
            ingest_successes: self.ingest_successes.load(Ordering::Relaxed),
            failures,
            cache_hits,
            cache_misses,
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            cache_hit_ratio: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            query_cache_hits: self.query_cache_hits.load(Ordering::Relaxed),
            query_cache_misses: self.query_cache_misses.load(Ordering::Relaxed),
            metadata_write_retries: self.metadata_write_retries.load(Ordering::Relaxed),
            reprocessed: self.reprocessed.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            extraction_latency: self.extraction_latency.snapshot(),
            ocr_latency: self.ocr_latency.snapshot(),
            ingest_latency: self.ingest_latency.snapshot(),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        counter(&mut out, "docuquery_ingest_attempts_total", "Ingestion attempts.", snap.ingest_attempts);
        counter(&mut out, "docuquery_ingest_success_total", "Successful ingestions.", snap.ingest_successes);

        let _ = writeln!(out, "# HELP docuquery_ingest_failures_total Failed or rejected ingestions by kind.");
        let _ = writeln!(out, "# TYPE docuquery_ingest_failures_total counter");
        for (kind, value) in &snap.failures {
            let _ = writeln!(out, "docuquery_ingest_failures_total{{kind=\"{kind}\"}} {value}");
        }

        counter(&mut out, "docuquery_cache_hits_total", "Cache hits.", snap.cache_hits);
        counter(&mut out, "docuquery_cache_misses_total", "Cache misses.", snap.cache_misses);
        counter(&mut out, "docuquery_cache_errors_total", "Cache backend errors absorbed as misses.", snap.cache_errors);
        let _ = writeln!(out, "# HELP docuquery_cache_hit_ratio Cache hits over ingestion lookups.");
        let _ = writeln!(out, "# TYPE docuquery_cache_hit_ratio gauge");
        let _ = writeln!(out, "docuquery_cache_hit_ratio {}", snap.cache_hit_ratio);
        counter(&mut out, "docuquery_query_cache_hits_total", "Query lookups served from cache.", snap.query_cache_hits);
        counter(&mut out, "docuquery_query_cache_misses_total", "Query lookups missing the cache.", snap.query_cache_misses);
        counter(
            &mut out,
            "docuquery_metadata_write_retries_total",
            "Metadata writes retried in the background.",
            snap.metadata_write_retries,
        );
        counter(&mut out, "docuquery_reprocessed_total", "Failed documents re-ingested by the sweep.", snap.reprocessed);
        counter(&mut out, "docuquery_quarantined_total", "Documents quarantined after repeated failures.", snap.quarantined);

        histogram(&mut out, "docuquery_extraction_duration_seconds", "Extraction service latency.", &snap.extraction_latency);
        histogram(&mut out, "docuquery_ocr_duration_seconds", "OCR service latency.", &snap.ocr_latency);
        histogram(&mut out, "docuquery_ingest_duration_seconds", "End-to-end ingestion latency.", &snap.ingest_latency);

        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn histogram(out: &mut String, name: &str, help: &str, snap: &HistogramSnapshot) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} histogram");
    let mut cumulative = 0;
    for (bound, count) in LATENCY_BUCKETS.iter().zip(&snap.buckets) {
        cumulative += count;
        let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", snap.count);
    let _ = writeln!(out, "{name}_sum {}", snap.sum_seconds);
    let _ = writeln!(out, "{name}_count {}", snap.count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().cache_hit_ratio, 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_query_cache_miss();
        metrics.record_query_cache_miss();
        assert_eq!(metrics.snapshot().cache_hit_ratio, 0.75);
    }

    #[test]
    fn test_failures_by_kind() {
        let metrics = PipelineMetrics::new();
        metrics.record_failure(ErrorCode::PayloadTooLarge);
        metrics.record_failure(ErrorCode::PayloadTooLarge);
        metrics.record_failure(ErrorCode::ServiceTimeout);

        let snap = metrics.snapshot();
        assert_eq!(snap.failures_of(ErrorCode::PayloadTooLarge), 2);
        assert_eq!(snap.failures_of(ErrorCode::ServiceTimeout), 1);
        assert_eq!(snap.failures_of(ErrorCode::EmptyPayload), 0);
    }

    #[test]
    fn test_histogram_buckets() {
        let hist = LatencyHistogram::default();
        hist.observe(Duration::from_millis(10));
        hist.observe(Duration::from_millis(700));
        hist.observe(Duration::from_secs(1000));

        let snap = hist.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.buckets[0], 1);
        assert_eq!(snap.buckets[4], 1);
        assert_eq!(snap.buckets.iter().sum::<u64>(), 2);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = PipelineMetrics::new();
        metrics.record_attempt();
        metrics.record_success(Duration::from_millis(120));
        metrics.record_failure(ErrorCode::UnsupportedType);

        let text = metrics.render_prometheus();
        assert!(text.contains("docuquery_ingest_attempts_total 1"));
        assert!(text.contains("docuquery_ingest_failures_total{kind=\"unsupported_type\"} 1"));
        assert!(text.contains("docuquery_ingest_duration_seconds_bucket{le=\"0.25\"} 1"));
        assert!(text.contains("docuquery_ingest_duration_seconds_count 1"));
    }
}
