// SPDX-License-Identifier: MIT
//
// Docgate: Secure Document-Access Proxy

//! Metrics collection and reporting

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Registration surface
    registrations_total: AtomicU64,
    registrations_rejected: AtomicU64,

    // Resolution surface
    resolutions_total: AtomicU64,
    resolutions_failed: AtomicU64,
    bytes_streamed: AtomicU64,

    // Policy rejections
    rate_limited_total: AtomicU64,
    circuit_rejections_total: AtomicU64,

    // Upstream health
    upstream_failures_total: AtomicU64,

    // Housekeeping
    links_swept_total: AtomicU64,

    // Latency tracking (microseconds)
    resolution_latencies: RwLock<Vec<u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                registrations_total: AtomicU64::new(0),
                registrations_rejected: AtomicU64::new(0),
                resolutions_total: AtomicU64::new(0),
                resolutions_failed: AtomicU64::new(0),
                bytes_streamed: AtomicU64::new(0),
                rate_limited_total: AtomicU64::new(0),
                circuit_rejections_total: AtomicU64::new(0),
                upstream_failures_total: AtomicU64::new(0),
                links_swept_total: AtomicU64::new(0),
                resolution_latencies: RwLock::new(Vec::with_capacity(10000)),
            }),
        }
    }

    pub fn record_registration(&self) {
        self.inner.registrations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration_rejected(&self) {
        self.inner.registrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution(&self, bytes: usize, latency_micros: u64) {
        self.inner.resolutions_total.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_streamed.fetch_add(bytes as u64, Ordering::Relaxed);

        let mut latencies = self.inner.resolution_latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > 10000 {
            latencies.drain(0..5000);
        }
    }

    pub fn record_resolution_failure(&self) {
        self.inner.resolutions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.inner.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.inner.circuit_rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.inner.upstream_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, removed: usize) {
        self.inner.links_swept_total.fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn registrations_total(&self) -> u64 {
        self.inner.registrations_total.load(Ordering::Relaxed)
    }

    pub fn resolutions_total(&self) -> u64 {
        self.inner.resolutions_total.load(Ordering::Relaxed)
    }

    pub fn resolutions_failed(&self) -> u64 {
        self.inner.resolutions_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_streamed(&self) -> u64 {
        self.inner.bytes_streamed.load(Ordering::Relaxed)
    }

    pub fn rate_limited_total(&self) -> u64 {
        self.inner.rate_limited_total.load(Ordering::Relaxed)
    }

    pub fn circuit_rejections_total(&self) -> u64 {
        self.inner.circuit_rejections_total.load(Ordering::Relaxed)
    }

    pub fn upstream_failures_total(&self) -> u64 {
        self.inner.upstream_failures_total.load(Ordering::Relaxed)
    }

    pub fn links_swept_total(&self) -> u64 {
        self.inner.links_swept_total.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.resolution_latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_percentile(0.99)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP docgate_resolutions_total Total download resolutions served\n");
        output.push_str("# TYPE docgate_resolutions_total counter\n");
        output.push_str(&format!("docgate_resolutions_total {}\n", self.resolutions_total()));

        output.push_str("# HELP docgate_resolutions_failed Total failed resolutions\n");
        output.push_str("# TYPE docgate_resolutions_failed counter\n");
        output.push_str(&format!("docgate_resolutions_failed {}\n", self.resolutions_failed()));

        output.push_str("# HELP docgate_registrations_total Total links registered\n");
        output.push_str("# TYPE docgate_registrations_total counter\n");
        output.push_str(&format!("docgate_registrations_total {}\n", self.registrations_total()));

        output.push_str("# HELP docgate_bytes_streamed Total document bytes streamed to clients\n");
        output.push_str("# TYPE docgate_bytes_streamed counter\n");
        output.push_str(&format!("docgate_bytes_streamed {}\n", self.bytes_streamed()));

        output.push_str("# HELP docgate_rate_limited_total Resolutions denied by the rate limiter\n");
        output.push_str("# TYPE docgate_rate_limited_total counter\n");
        output.push_str(&format!("docgate_rate_limited_total {}\n", self.rate_limited_total()));

        output.push_str("# HELP docgate_circuit_rejections_total Resolutions fast-failed by the circuit breaker\n");
        output.push_str("# TYPE docgate_circuit_rejections_total counter\n");
        output.push_str(&format!(
            "docgate_circuit_rejections_total {}\n",
            self.circuit_rejections_total()
        ));

        output.push_str("# HELP docgate_upstream_failures_total Upstream fetch failures\n");
        output.push_str("# TYPE docgate_upstream_failures_total counter\n");
        output.push_str(&format!(
            "docgate_upstream_failures_total {}\n",
            self.upstream_failures_total()
        ));

        output.push_str("# HELP docgate_links_swept_total Expired links removed by the sweep\n");
        output.push_str("# TYPE docgate_links_swept_total counter\n");
        output.push_str(&format!("docgate_links_swept_total {}\n", self.links_swept_total()));

        output.push_str("# HELP docgate_uptime_seconds Service uptime in seconds\n");
        output.push_str("# TYPE docgate_uptime_seconds gauge\n");
        output.push_str(&format!("docgate_uptime_seconds {}\n", self.uptime_seconds()));

        if let Some(p50) = self.latency_p50() {
            output.push_str("# HELP docgate_latency_p50_microseconds Resolution latency 50th percentile\n");
            output.push_str("# TYPE docgate_latency_p50_microseconds gauge\n");
            output.push_str(&format!("docgate_latency_p50_microseconds {}\n", p50));
        }

        if let Some(p99) = self.latency_p99() {
            output.push_str("# HELP docgate_latency_p99_microseconds Resolution latency 99th percentile\n");
            output.push_str("# TYPE docgate_latency_p99_microseconds gauge\n");
            output.push_str(&format!("docgate_latency_p99_microseconds {}\n", p99));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();

        metrics.record_resolution(1024, 100);
        metrics.record_resolution(2048, 200);
        metrics.record_resolution_failure();
        metrics.record_rate_limited();

        assert_eq!(metrics.resolutions_total(), 2);
        assert_eq!(metrics.resolutions_failed(), 1);
        assert_eq!(metrics.bytes_streamed(), 3072);
        assert_eq!(metrics.rate_limited_total(), 1);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = Metrics::new();

        for i in 1..=100 {
            metrics.record_resolution(100, i);
        }

        let p50 = metrics.latency_p50().unwrap();
        assert!((45..=55).contains(&p50));

        let p99 = metrics.latency_p99().unwrap();
        assert!((95..=100).contains(&p99));
    }

    #[test]
    fn test_prometheus_format_contains_counters() {
        let metrics = Metrics::new();
        metrics.record_resolution(512, 50);
        metrics.record_sweep(3);

        let output = metrics.prometheus_format();
        assert!(output.contains("docgate_resolutions_total 1"));
        assert!(output.contains("docgate_bytes_streamed 512"));
        assert!(output.contains("docgate_links_swept_total 3"));
    }
}
