use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use tracing::{debug, error};
use uplink_core::metrics::{encode_registry, global_registry};

// Define the labels for the metrics
const METHOD_LABEL: &str = "method";
const PATH_LABEL: &str = "path";
const STATUS_LABEL: &str = "status";

// Define the metrics
const HTTP_REQUESTS_TOTAL: &str = "http_requests";
const HTTP_REQUESTS_DURATION: &str = "http_requests_duration";

pub(crate) struct ServingMetrics {
    pub(crate) http_requests_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) http_requests_duration: Family<Vec<(String, String)>, Histogram>,
}

impl ServingMetrics {
    fn new() -> Self {
        let http_requests_total = Family::<Vec<(String, String)>, Counter>::default();
        let http_requests_duration =
            Family::<Vec<(String, String)>, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 20))
            });

        let metrics = Self {
            http_requests_total,
            http_requests_duration,
        };

        let mut registry = global_registry().registry.lock();
        registry.register(
            HTTP_REQUESTS_TOTAL,
            "A Counter to keep track of the total number of HTTP requests",
            metrics.http_requests_total.clone(),
        );
        registry.register(
            HTTP_REQUESTS_DURATION,
            "A Histogram to keep track of the duration of HTTP requests in microseconds",
            metrics.http_requests_duration.clone(),
        );

        metrics
    }
}

static SERVING_METRICS: OnceLock<ServingMetrics> = OnceLock::new();

pub(crate) fn serving_metrics() -> &'static ServingMetrics {
    SERVING_METRICS.get_or_init(ServingMetrics::new)
}

/// Snapshot of every metric of the process in the Prometheus text format.
pub(crate) async fn metrics_handler() -> Response {
    // make sure the HTTP metrics are registered even before the first request is measured
    serving_metrics();

    match encode_registry() {
        Ok(buffer) => {
            debug!(size = buffer.len(), "Exposing metrics");
            buffer.into_response()
        }
        Err(e) => {
            error!(?e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Emit request metrics and also latency metrics.
pub(crate) async fn capture_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let path = match request.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => request.uri().path().to_owned(),
    };
    let method = request.method().to_string();

    let response = next.run(request).await;

    let latency = start.elapsed().as_micros() as f64;
    let status = response.status().as_u16().to_string();

    let labels = vec![
        (METHOD_LABEL.to_string(), method),
        (PATH_LABEL.to_string(), path),
        (STATUS_LABEL.to_string(), status),
    ];

    let metrics = serving_metrics();
    metrics
        .http_requests_duration
        .get_or_create(&labels)
        .observe(latency);
    metrics.http_requests_total.get_or_create(&labels).inc();

    response
}
