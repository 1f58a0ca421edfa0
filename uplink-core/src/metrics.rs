//! Prometheus metrics of the ingestion pipeline. Every crate of the process registers into the one
//! global registry, which is rendered by the `/metrics` endpoint.

use std::sync::OnceLock;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::{Error, Result};

pub const SINK_LABEL: &str = "sink";
pub const PARTITION_LABEL: &str = "partition";

const PAYLOADS_ACCEPTED_TOTAL: &str = "uplink_payloads_accepted";
const FLUSHED_BATCHES_TOTAL: &str = "uplink_flushed_batches";
const FLUSHED_ROWS_TOTAL: &str = "uplink_flushed_rows";
const FLUSH_ERRORS_TOTAL: &str = "uplink_flush_errors";
const FLUSH_DURATION: &str = "uplink_flush_duration_seconds";

#[derive(Default)]
pub struct GlobalRegistry {
    pub registry: parking_lot::Mutex<Registry>,
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

pub fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::default)
}

/// Renders the global registry in the Prometheus text format.
pub fn encode_registry() -> Result<String> {
    let registry = global_registry().registry.lock();
    let mut buffer = String::new();
    encode(&mut buffer, &registry)
        .map_err(|e| Error::Metrics(format!("encoding the registry: {e}")))?;
    Ok(buffer)
}

pub type Labels = Vec<(String, String)>;

pub struct BackendMetrics {
    pub payloads_accepted: Family<Labels, Counter>,
    pub flushed_batches: Family<Labels, Counter>,
    pub flushed_rows: Family<Labels, Counter>,
    pub flush_errors: Family<Labels, Counter>,
    pub flush_duration: Family<Labels, Histogram>,
}

impl BackendMetrics {
    fn new() -> Self {
        let metrics = Self {
            payloads_accepted: Family::default(),
            flushed_batches: Family::default(),
            flushed_rows: Family::default(),
            flush_errors: Family::default(),
            flush_duration: Family::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0005, 2.0, 16))
            }),
        };

        let mut registry = global_registry().registry.lock();
        registry.register(
            PAYLOADS_ACCEPTED_TOTAL,
            "Payloads taken off the intake queue by the backend worker",
            metrics.payloads_accepted.clone(),
        );
        registry.register(
            FLUSHED_BATCHES_TOTAL,
            "Batches written to the sink",
            metrics.flushed_batches.clone(),
        );
        registry.register(
            FLUSHED_ROWS_TOTAL,
            "Rows written to the sink",
            metrics.flushed_rows.clone(),
        );
        registry.register(
            FLUSH_ERRORS_TOTAL,
            "Batches the sink failed to write",
            metrics.flush_errors.clone(),
        );
        registry.register(
            FLUSH_DURATION,
            "Time spent writing one batch to the sink",
            metrics.flush_duration.clone(),
        );

        metrics
    }
}

static BACKEND_METRICS: OnceLock<BackendMetrics> = OnceLock::new();

pub fn backend_metrics() -> &'static BackendMetrics {
    BACKEND_METRICS.get_or_init(BackendMetrics::new)
}

pub(crate) fn sink_labels(sink: &str) -> Labels {
    vec![(SINK_LABEL.to_string(), sink.to_string())]
}

pub(crate) fn partition_labels(sink: &str, partition: &str) -> Labels {
    vec![
        (SINK_LABEL.to_string(), sink.to_string()),
        (PARTITION_LABEL.to_string(), partition.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_metrics_are_exposed() {
        backend_metrics()
            .payloads_accepted
            .get_or_create(&partition_labels("console", "metricstest"))
            .inc();

        let text = encode_registry().unwrap();
        assert!(text.contains("uplink_payloads_accepted_total"), "{text}");
        assert!(text.contains("partition=\"metricstest\""), "{text}");
        assert!(text.contains("uplink_flush_duration_seconds"), "{text}");
    }
}
