//! Server metrics
//!
//! Prometheus-compatible counters, gauges and latency histograms, kept per
//! protocol command. NO_SUCH_KEY outcomes are counted apart from errors.

use crate::protocol::Status;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 100.0, 1000.0,
];

/// Fixed-bucket histogram for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value_ms: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value_ms <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics for one protocol command
#[derive(Debug, Default)]
pub struct CommandMetrics {
    pub requests_total: Counter,
    pub requests_ok: Counter,
    pub requests_not_found: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Metrics registry owned by one server instance
#[derive(Debug)]
pub struct MetricsRegistry {
    commands: Mutex<BTreeMap<&'static str, Arc<CommandMetrics>>>,

    pub total_requests: Counter,
    pub total_errors: Counter,
    pub bytes_in: Counter,
    pub bytes_out: Counter,
    pub handshakes_rejected: Counter,

    /// Mirrors the store's running total; monotonic
    pub expired_keys: Gauge,

    pub active_connections: Gauge,
    pub live_keys: Gauge,
    pub keys_with_ttl: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(BTreeMap::new()),
            total_requests: Counter::default(),
            total_errors: Counter::default(),
            bytes_in: Counter::default(),
            bytes_out: Counter::default(),
            handshakes_rejected: Counter::default(),
            expired_keys: Gauge::default(),
            active_connections: Gauge::default(),
            live_keys: Gauge::default(),
            keys_with_ttl: Gauge::default(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a command
    pub fn command(&self, name: &'static str) -> Arc<CommandMetrics> {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.entry(name).or_default().clone()
    }

    /// Record one completed request
    pub fn record(&self, name: &'static str, duration: Duration, status: Status) {
        let command = self.command(name);

        command.requests_total.inc();
        command.latency.observe(duration.as_secs_f64() * 1000.0);
        self.total_requests.inc();

        if status.is_ok() {
            command.requests_ok.inc();
        } else if status.is_not_found() {
            command.requests_not_found.inc();
        } else {
            command.requests_error.inc();
            self.total_errors.inc();
        }
    }

    /// Refresh the gauges that mirror store state
    pub fn sync_store(&self, stats: &crate::server::StoreStats) {
        self.live_keys.set(stats.keys as u64);
        self.keys_with_ttl.set(stats.keys_with_ttl as u64);
        self.expired_keys.set(stats.expired_total);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let scalars: [(&str, &str, &str, u64); 10] = [
            ("requests_total", "counter", "Total number of requests", self.total_requests.get()),
            ("errors_total", "counter", "Requests that failed", self.total_errors.get()),
            ("bytes_in_total", "counter", "Value bytes received", self.bytes_in.get()),
            ("bytes_out_total", "counter", "Value bytes sent", self.bytes_out.get()),
            (
                "handshakes_rejected_total",
                "counter",
                "Connections rejected during handshake",
                self.handshakes_rejected.get(),
            ),
            ("expired_keys_total", "counter", "Keys removed by expiry", self.expired_keys.get()),
            (
                "active_connections",
                "gauge",
                "Current active connections",
                self.active_connections.get(),
            ),
            ("keys", "gauge", "Live keys", self.live_keys.get()),
            ("keys_with_ttl", "gauge", "Live keys carrying a TTL", self.keys_with_ttl.get()),
            ("uptime_seconds", "gauge", "Server uptime in seconds", self.uptime_seconds()),
        ];
        for (name, kind, help, value) in scalars {
            let _ = writeln!(out, "# HELP fabrickv_{} {}", name, help);
            let _ = writeln!(out, "# TYPE fabrickv_{} {}", name, kind);
            let _ = writeln!(out, "fabrickv_{} {}", name, value);
        }

        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());

        out.push_str("# HELP fabrickv_command_requests_total Requests per command and outcome\n");
        out.push_str("# TYPE fabrickv_command_requests_total counter\n");
        for (name, metrics) in commands.iter() {
            for (outcome, counter) in [
                ("ok", &metrics.requests_ok),
                ("not_found", &metrics.requests_not_found),
                ("error", &metrics.requests_error),
            ] {
                let _ = writeln!(
                    out,
                    "fabrickv_command_requests_total{{command=\"{}\",outcome=\"{}\"}} {}",
                    name,
                    outcome,
                    counter.get()
                );
            }
        }

        out.push_str("# HELP fabrickv_command_duration_ms Command duration in milliseconds\n");
        out.push_str("# TYPE fabrickv_command_duration_ms histogram\n");
        for (name, metrics) in commands.iter() {
            for (le, count) in metrics.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "fabrickv_command_duration_ms_bucket{{command=\"{}\",le=\"{}\"}} {}",
                    name, le, count
                );
            }
            let _ = writeln!(
                out,
                "fabrickv_command_duration_ms_sum{{command=\"{}\"}} {}",
                name,
                metrics.latency.sum()
            );
            let _ = writeln!(
                out,
                "fabrickv_command_duration_ms_count{{command=\"{}\"}} {}",
                name,
                metrics.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
