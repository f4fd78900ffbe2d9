use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    // Transaction metrics
    pub transactions_started: IntCounter,
    pub transactions_ended: IntCounter,
    pub transactions_timed_out: IntCounter,
    pub active_transactions: IntGauge,

    // Segment metrics
    pub segments_created: IntCounter,
    pub segments_dropped: IntCounter,

    // Query metrics
    pub query_samples_recorded: IntCounter,
    pub query_duration: Histogram,

    // Pool metrics
    pub acquire_attempts: IntCounter,
    pub acquire_retries: IntCounter,
    pub acquire_exhausted: IntCounter,
    pub handles_destroyed: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation failed");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration failed");
    counter
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transactions_started = counter(
            &registry,
            "txn_tracer_transactions_started_total",
            "Total number of transactions started",
        );
        let transactions_ended = counter(
            &registry,
            "txn_tracer_transactions_ended_total",
            "Total number of transactions finalized",
        );
        let transactions_timed_out = counter(
            &registry,
            "txn_tracer_transactions_timed_out_total",
            "Transactions finalized by the idle reaper",
        );
        let active_transactions = IntGauge::new(
            "txn_tracer_active_transactions",
            "Number of transactions currently in flight",
        )
        .expect("metric creation failed");
        registry
            .register(Box::new(active_transactions.clone()))
            .expect("metric registration failed");

        let segments_created = counter(
            &registry,
            "txn_tracer_segments_created_total",
            "Total number of segments created",
        );
        let segments_dropped = counter(
            &registry,
            "txn_tracer_segments_dropped_total",
            "Segments rejected after transaction end or with an unknown parent",
        );

        let query_samples_recorded = counter(
            &registry,
            "txn_tracer_query_samples_recorded_total",
            "Query executions recorded into sample tables",
        );
        let query_duration = Histogram::with_opts(HistogramOpts::new(
            "txn_tracer_query_duration_seconds",
            "Duration of sampled queries in seconds",
        ))
        .expect("metric creation failed");
        registry
            .register(Box::new(query_duration.clone()))
            .expect("metric registration failed");

        let acquire_attempts = counter(
            &registry,
            "txn_tracer_pool_acquire_attempts_total",
            "Total number of pool acquire attempts",
        );
        let acquire_retries = counter(
            &registry,
            "txn_tracer_pool_acquire_retries_total",
            "Acquire attempts retried after a failure",
        );
        let acquire_exhausted = counter(
            &registry,
            "txn_tracer_pool_acquire_exhausted_total",
            "Acquisitions that gave up after the attempt limit",
        );
        let handles_destroyed = counter(
            &registry,
            "txn_tracer_pool_handles_destroyed_total",
            "Pooled handles destroyed",
        );

        Self {
            registry,
            transactions_started,
            transactions_ended,
            transactions_timed_out,
            active_transactions,
            segments_created,
            segments_dropped,
            query_samples_recorded,
            query_duration,
            acquire_attempts,
            acquire_retries,
            acquire_exhausted,
            handles_destroyed,
        }
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new()
            .encode(&self.gather_metrics(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
