//! Prometheus metrics for the queue, workers and lock pool

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub tasks_pushed_total: IntCounterVec,
    pub tasks_processed_total: IntCounterVec,
    pub task_execution_seconds: HistogramVec,
    pub tasks_in_flight: IntGauge,
    pub claim_races_total: IntCounter,
    pub deferred_published_total: IntCounter,
    pub broker_idle_polls_total: IntCounter,
    pub consumer_lock_failures_total: IntCounter,
    pub http_requests_total: IntCounter,
    pub http_requests_in_flight: IntGauge,
    pub http_request_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_pushed_total = IntCounterVec::new(
            Opts::new("tasks_pushed_total", "Tasks created by push, by initial status"),
            &["status"],
        )?;
        let tasks_processed_total = IntCounterVec::new(
            Opts::new(
                "tasks_processed_total",
                "Tasks executed, by handler and persisted status",
            ),
            &["handler", "status"],
        )?;
        let task_execution_seconds = HistogramVec::new(
            HistogramOpts::new("task_execution_seconds", "Handler execution time"),
            &["handler"],
        )?;
        let tasks_in_flight = IntGauge::new("tasks_in_flight", "Handlers currently running")?;
        let claim_races_total = IntCounter::new(
            "claim_races_total",
            "Claims lost to another worker",
        )?;
        let deferred_published_total = IntCounter::new(
            "deferred_published_total",
            "Task references republished by the deferred bridge",
        )?;
        let broker_idle_polls_total = IntCounter::new(
            "broker_idle_polls_total",
            "Broker iterations that found no eligible task",
        )?;
        let consumer_lock_failures_total = IntCounter::new(
            "consumer_lock_failures_total",
            "Consumer allocations that found no free signer",
        )?;
        let http_requests_total = IntCounter::new("http_requests_total", "HTTP requests served")?;
        let http_requests_in_flight =
            IntGauge::new("http_requests_in_flight", "HTTP requests in flight")?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency",
        ))?;

        registry.register(Box::new(tasks_pushed_total.clone()))?;
        registry.register(Box::new(tasks_processed_total.clone()))?;
        registry.register(Box::new(task_execution_seconds.clone()))?;
        registry.register(Box::new(tasks_in_flight.clone()))?;
        registry.register(Box::new(claim_races_total.clone()))?;
        registry.register(Box::new(deferred_published_total.clone()))?;
        registry.register(Box::new(broker_idle_polls_total.clone()))?;
        registry.register(Box::new(consumer_lock_failures_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            tasks_pushed_total,
            tasks_processed_total,
            task_execution_seconds,
            tasks_in_flight,
            claim_races_total,
            deferred_published_total,
            broker_idle_polls_total,
            consumer_lock_failures_total,
            http_requests_total,
            http_requests_in_flight,
            http_request_duration_seconds,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
