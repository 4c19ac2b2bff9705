//! Prometheus-compatible metrics
//!
//! - Request latency histograms and counters per endpoint
//! - Allocation outcomes (commits, cancellations, refusals by kind)
//! - Conflict retries, commit timeouts and commit latency

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the latency buckets
    pub fn new() -> Self {
        let buckets = (0..=LATENCY_BUCKETS.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets,
            boundaries: LATENCY_BUCKETS.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        // Find the bucket
        let mut bucket_idx = self.boundaries.len();
        for (i, &boundary) in self.boundaries.iter().enumerate() {
            if value <= boundary {
                bucket_idx = i;
                break;
            }
        }

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed); // Store as microseconds for precision
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get histogram data for Prometheus format
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        // +Inf bucket
        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    /// Get sum of all observed values
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0 // Convert back from microseconds
    }

    /// Get count of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter for tracking request counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Endpoint metrics
#[derive(Debug)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::new(),
            requests_error: Counter::new(),
            latency: Histogram::new(),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics registry shared by the HTTP layer and the coordinator
#[derive(Debug)]
pub struct MetricsRegistry {
    /// Per-endpoint metrics
    endpoints: Mutex<HashMap<String, Arc<EndpointMetrics>>>,

    /// Global counters
    pub total_requests: Counter,
    pub total_errors: Counter,

    /// Allocation outcomes
    pub allocations_committed: Counter,
    pub allocations_cancelled: Counter,
    pub rejected_full: Counter,
    pub rejected_invalid_state: Counter,
    pub conflict_retries: Counter,
    pub conflicts_exhausted: Counter,
    pub commit_timeouts: Counter,
    pub allocation_latency: Histogram,

    /// Gauges
    pub active_connections: Gauge,
    pub event_subscribers: Gauge,

    /// Start time for uptime calculation
    start_time: Instant,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            total_requests: Counter::new(),
            total_errors: Counter::new(),
            allocations_committed: Counter::new(),
            allocations_cancelled: Counter::new(),
            rejected_full: Counter::new(),
            rejected_invalid_state: Counter::new(),
            conflict_retries: Counter::new(),
            conflicts_exhausted: Counter::new(),
            commit_timeouts: Counter::new(),
            allocation_latency: Histogram::new(),
            active_connections: Gauge::new(),
            event_subscribers: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    fn endpoints(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<EndpointMetrics>>> {
        // A poisoned map only means a panic mid-insert; counters stay usable.
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get or create metrics for an endpoint
    pub fn endpoint(&self, path: &str) -> Arc<EndpointMetrics> {
        self.endpoints()
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(EndpointMetrics::new()))
            .clone()
    }

    /// Record a request
    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(path);

        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0); // Convert to ms

        self.total_requests.inc();

        if !success {
            endpoint.requests_error.inc();
            self.total_errors.inc();
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 9] = [
            ("roomalloc_requests_total", "Total number of requests", &self.total_requests),
            ("roomalloc_errors_total", "Total number of errors", &self.total_errors),
            (
                "roomalloc_allocations_committed_total",
                "Allocations committed",
                &self.allocations_committed,
            ),
            (
                "roomalloc_allocations_cancelled_total",
                "Allocations cancelled",
                &self.allocations_cancelled,
            ),
            (
                "roomalloc_rejected_full_total",
                "Allocations refused because the room was full",
                &self.rejected_full,
            ),
            (
                "roomalloc_rejected_invalid_state_total",
                "Allocations refused because the application was not eligible",
                &self.rejected_invalid_state,
            ),
            (
                "roomalloc_conflict_retries_total",
                "Attempts repeated after an optimistic-concurrency conflict",
                &self.conflict_retries,
            ),
            (
                "roomalloc_conflicts_exhausted_total",
                "Calls that ran out of attempts",
                &self.conflicts_exhausted,
            ),
            (
                "roomalloc_commit_timeouts_total",
                "Commits not acknowledged in time",
                &self.commit_timeouts,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP roomalloc_active_connections Current active connections\n");
        out.push_str("# TYPE roomalloc_active_connections gauge\n");
        let _ = writeln!(
            out,
            "roomalloc_active_connections {}",
            self.active_connections.get()
        );

        out.push_str("# HELP roomalloc_event_subscribers Open change feed subscriptions\n");
        out.push_str("# TYPE roomalloc_event_subscribers gauge\n");
        let _ = writeln!(
            out,
            "roomalloc_event_subscribers {}",
            self.event_subscribers.get()
        );

        out.push_str("# HELP roomalloc_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE roomalloc_uptime_seconds gauge\n");
        let _ = writeln!(out, "roomalloc_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP roomalloc_allocation_duration_ms AllocateRoom latency in milliseconds\n");
        out.push_str("# TYPE roomalloc_allocation_duration_ms histogram\n");
        write_histogram(&mut out, "roomalloc_allocation_duration_ms", None, &self.allocation_latency);

        // Per-endpoint metrics
        let endpoints = self.endpoints();

        out.push_str("# HELP roomalloc_endpoint_requests_total Requests per endpoint\n");
        out.push_str("# TYPE roomalloc_endpoint_requests_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "roomalloc_endpoint_requests_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_total.get()
            );
        }

        out.push_str("# HELP roomalloc_endpoint_errors_total Errors per endpoint\n");
        out.push_str("# TYPE roomalloc_endpoint_errors_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "roomalloc_endpoint_errors_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_error.get()
            );
        }

        out.push_str("# HELP roomalloc_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE roomalloc_request_duration_ms histogram\n");
        for (path, metrics) in endpoints.iter() {
            write_histogram(
                &mut out,
                "roomalloc_request_duration_ms",
                Some(path.as_str()),
                &metrics.latency,
            );
        }

        out
    }
}

fn write_histogram(out: &mut String, name: &str, path: Option<&str>, hist: &Histogram) {
    use std::fmt::Write;
    let label = |extra: &str| match (path, extra.is_empty()) {
        (Some(p), true) => format!("{{path=\"{}\"}}", p),
        (Some(p), false) => format!("{{path=\"{}\",{}}}", p, extra),
        (None, true) => String::new(),
        (None, false) => format!("{{{}}}", extra),
    };

    for (le, count) in hist.get_buckets() {
        let bound = if le.is_infinite() {
            "le=\"+Inf\"".to_string()
        } else {
            format!("le=\"{}\"", le)
        };
        let _ = writeln!(out, "{}_bucket{} {}", name, label(&bound), count);
    }
    let _ = writeln!(out, "{}_sum{} {}", name, label(""), hist.sum());
    let _ = writeln!(out, "{}_count{} {}", name, label(""), hist.count());
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(500.0);

        assert_eq!(hist.count(), 3);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        // cumulative counts
        assert_eq!(buckets[1], (5.0, 1));
        assert_eq!(buckets[4], (50.0, 2));
        assert_eq!(buckets.last().map(|b| b.1), Some(3));
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();

        assert_eq!(gauge.get(), 0);
        gauge.inc();
        gauge.inc();
        assert_eq!(gauge.get(), 2);
        gauge.dec();
        gauge.dec();
        gauge.dec();
        // never wraps below zero
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_metrics_registry() {
        let registry = MetricsRegistry::new();

        registry.record_request("/test", Duration::from_millis(50), true);
        registry.record_request("/test", Duration::from_millis(100), false);

        assert_eq!(registry.total_requests.get(), 2);
        assert_eq!(registry.total_errors.get(), 1);

        let endpoint = registry.endpoint("/test");
        assert_eq!(endpoint.requests_total.get(), 2);
        assert_eq!(endpoint.requests_error.get(), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.allocations_committed.inc();
        for _ in 0..3 {
            registry.conflict_retries.inc();
        }
        registry.allocation_latency.observe(12.0);
        registry.record_request("/api/allocations", Duration::from_millis(8), true);

        let text = registry.to_prometheus();
        assert!(text.contains("roomalloc_allocations_committed_total 1"));
        assert!(text.contains("roomalloc_conflict_retries_total 3"));
        assert!(text.contains("roomalloc_allocation_duration_ms_count 1"));
        assert!(text.contains("roomalloc_allocation_duration_ms_bucket{le=\"+Inf\"} 1"));
        assert!(text.contains("roomalloc_endpoint_requests_total{path=\"/api/allocations\"} 1"));
    }
}
