use std::time::Duration;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use tower::ServiceBuilder;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, info_span};
use uuid::Uuid;

use self::ingest::{preflight, receive_payload};
use crate::AppState;
use crate::metrics::{capture_metrics, metrics_handler};

/// decoding, validation and hand off of `/v0/log` payloads
mod ingest;

const UNTRACED_PATHS: [&str; 3] = ["/metrics", "/health", "/livez"];

/// The full router: ingestion, health and metrics endpoints with tracing and metrics around them.
/// Only the probe and scrape endpoints get `probe_timeout`. A `/v0/log` request is never cut
/// short, once its payload sits in the intake slot it will be written, so the caller must get the
/// answer.
pub(crate) fn router(app: AppState, probe_timeout: Duration) -> Router {
    let layers = ServiceBuilder::new()
        // Add tracing to all requests
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |req: &Request<Body>| {
                    let req_path = req.uri().path();
                    if UNTRACED_PATHS.contains(&req_path) {
                        // No request id for probes and scrapes
                        return info_span!("request", method=?req.method(), path=req_path);
                    }

                    // Millisecond timestamp part of a v7 UUID plus its last 5 characters.
                    // Example of a UUID v7: 01951b72-d0f4-711e-baba-4efe03d9cb76
                    let uuid = Uuid::now_v7().to_string();
                    let tid = format!("{}{}{}", &uuid[..8], &uuid[9..13], &uuid[uuid.len() - 5..]);

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str);

                    info_span!("request", tid, method=?req.method(), path=req_path, matched_path)
                })
                .on_response(
                    |response: &Response<Body>, latency: Duration, _span: &Span| {
                        if response.status().is_server_error() {
                            // 5xx responses will be logged at 'error' level in `on_failure`
                            return;
                        }
                        tracing::info!(status=?response.status(), ?latency)
                    },
                )
                .on_failure(
                    |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                        tracing::error!(?error, ?latency, "Server error");
                    },
                ),
        )
        // capture metrics for all requests
        .layer(middleware::from_fn(capture_metrics));

    let probes: Router<AppState> = Router::new()
        .route("/health", get(health_check))
        .route("/livez", get(livez))
        .route("/metrics", get(metrics_handler))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            probe_timeout,
        ));

    Router::new()
        .merge(probes)
        .route("/v0/log", post(receive_payload).options(preflight))
        .with_state(app)
        .layer(layers)
}

async fn health_check() -> impl IntoResponse {
    "ok"
}

async fn livez() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
