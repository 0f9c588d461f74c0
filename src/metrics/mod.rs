//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_gauge_with_registry,
};
use std::sync::Arc;
use std::time::Duration;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Completion client metrics
    pub completion_requests: CounterVec,
    pub completion_request_duration: HistogramVec,
    pub completion_retries: Counter,

    // Context window metrics
    pub window_tokens: Histogram,
    pub window_turns_evicted: Counter,

    // Dispatch metrics
    pub turns_enqueued: Counter,
    pub replies_sent: CounterVec,
    pub active_conversations: IntGauge,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let completion_requests = register_counter_vec_with_registry!(
            Opts::new("completion_requests_total", "Total completion requests by outcome"),
            &["outcome"],
            registry
        )?;

        let completion_request_duration = register_histogram_vec_with_registry!(
            "completion_request_duration_seconds",
            "Completion request duration in seconds",
            &["outcome"],
            registry
        )?;

        let completion_retries = register_counter_with_registry!(
            Opts::new("completion_retries_total", "Total resubmissions after overload"),
            registry
        )?;

        let window_tokens = register_histogram_with_registry!(
            HistogramOpts::new("context_window_tokens", "Tokens charged per trimmed window")
                .buckets(vec![256.0, 512.0, 1024.0, 2048.0, 4096.0, 7000.0, 8192.0, 16384.0]),
            registry
        )?;

        let window_turns_evicted = register_counter_with_registry!(
            Opts::new("context_turns_evicted_total", "History turns left out of a window"),
            registry
        )?;

        let turns_enqueued = register_counter_with_registry!(
            Opts::new("dispatch_turns_enqueued_total", "Inbound turns accepted for dispatch"),
            registry
        )?;

        let replies_sent = register_counter_vec_with_registry!(
            Opts::new("dispatch_replies_total", "Replies handed to the transport"),
            &["status"],
            registry
        )?;

        let active_conversations = register_int_gauge_with_registry!(
            Opts::new("dispatch_active_conversations", "Conversations with a live worker"),
            registry
        )?;

        Ok(Self {
            registry,
            completion_requests,
            completion_request_duration,
            completion_retries,
            window_tokens,
            window_turns_evicted,
            turns_enqueued,
            replies_sent,
            active_conversations,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completion request outcome and its latency
    pub fn record_completion(&self, outcome: &str, elapsed: Duration) {
        self.completion_requests.with_label_values(&[outcome]).inc();
        self.completion_request_duration
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a trimmed window against the history it came from
    pub fn record_window(&self, tokens: usize, history_len: usize, window_len: usize) {
        self.window_tokens.observe(tokens as f64);
        // The retained system turn can make the window no shorter than history.
        let evicted = history_len.saturating_sub(window_len);
        if evicted > 0 {
            self.window_turns_evicted.inc_by(evicted as f64);
        }
    }

    /// Record a reply delivery attempt
    pub fn record_reply(&self, delivered: bool) {
        let status = if delivered { "success" } else { "error" };
        self.replies_sent.with_label_values(&[status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
