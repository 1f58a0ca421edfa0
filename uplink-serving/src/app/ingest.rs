use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, warn};
use uplink_core::{Attributes, PartitionKey, Payload, validate_payload};
use uuid::Uuid;

use crate::AppState;

/// Body of `POST /v0/log`. Missing fields decode to their zero values and are then reported by
/// validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogRequest {
    warehouse: Option<String>,
    source: String,
    schema: String,
    client_timestamp: i64,
    data: Attributes,
}

impl LogRequest {
    fn into_payload(self, id: String, server_timestamp: i64) -> Payload {
        Payload {
            id,
            key: PartitionKey::new(self.warehouse, self.schema),
            source: self.source,
            client_timestamp: self.client_timestamp,
            server_timestamp,
            attributes: self.data,
        }
    }
}

fn respond(status: StatusCode, body: String) -> Response {
    (status, [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], body).into_response()
}

/// CORS preflight for browser clients.
pub(super) async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")])
}

/// The body is read as JSON whatever the content type says, clients commonly send `text/json`.
pub(super) async fn receive_payload(State(app): State<AppState>, body: Bytes) -> Response {
    let request: LogRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(?e, "Failed to decode body");
            return respond(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let payload = request.into_payload(Uuid::now_v7().to_string(), Utc::now().timestamp_millis());

    if let Err(e) = validate_payload(&payload) {
        debug!(partition = %payload.key, reason = %e, "Rejected payload");
        return respond(StatusCode::BAD_REQUEST, e.to_string());
    }

    let id = payload.id.clone();
    match app.backend.accept(payload).await {
        Ok(()) => {
            debug!(%id, "Accepted payload");
            respond(StatusCode::OK, String::new())
        }
        Err(e) => {
            error!(?e, "Backend is not accepting payloads");
            respond(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use parking_lot::Mutex;
    use tower::ServiceExt;
    use uplink_core::{Backend, Batch, Error, FlushPolicy, Sink};

    use super::*;
    use crate::app::router;

    /// Keeps every written row in memory.
    #[derive(Clone, Default)]
    pub(crate) struct CollectingSink {
        pub(crate) rows: Arc<Mutex<Vec<Payload>>>,
    }

    impl Sink for CollectingSink {
        async fn write(&mut self, batch: Batch<'_>) -> uplink_core::Result<()> {
            self.rows.lock().extend_from_slice(batch.rows);
            Ok(())
        }
    }

    struct FailingSink;

    impl Sink for FailingSink {
        async fn write(&mut self, _batch: Batch<'_>) -> uplink_core::Result<()> {
            Err(Error::Io("disk full".to_string()))
        }
    }

    /// Takes its time over every write.
    #[derive(Clone, Default)]
    struct SlowSink {
        rows: Arc<Mutex<Vec<Payload>>>,
    }

    impl Sink for SlowSink {
        async fn write(&mut self, batch: Batch<'_>) -> uplink_core::Result<()> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.rows.lock().extend_from_slice(batch.rows);
            Ok(())
        }
    }

    fn app(backend: &Backend) -> Router {
        router(
            AppState {
                backend: backend.handle(),
            },
            Duration::from_secs(5),
        )
    }

    async fn post(router: &Router, body: &str) -> (StatusCode, Option<String>, String) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v0/log")
            .header("Content-Type", "text/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cors = response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, cors, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_accepts_valid_payload() {
        let sink = CollectingSink::default();
        let backend = Backend::spawn("test", sink.clone(), FlushPolicy::EveryEntry, None);
        let router = app(&backend);

        let (status, cors, body) = post(
            &router,
            r#"{"source":"web","schema":"s1","warehouse":"w1","client_timestamp":5,"data":{"a1":1,"b2":"x"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cors.as_deref(), Some("*"));
        assert!(body.is_empty());

        drop(router);
        backend.join().await.unwrap();

        let rows = sink.rows.lock().clone();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.key, PartitionKey::new(Some("w1".to_string()), "s1"));
        assert_eq!(row.source, "web");
        assert_eq!(row.client_timestamp, 5);
        assert!(row.server_timestamp > 0);
        assert!(Uuid::parse_str(&row.id).is_ok());
        assert_eq!(row.attributes.len(), 2);
    }

    #[tokio::test]
    async fn test_validation_examples() {
        let backend = Backend::spawn("test", CollectingSink::default(), FlushPolicy::EveryEntry, None);
        let router = app(&backend);

        let rejected = [
            r#"{"schema":"s1","warehouse":"w1","client_timestamp":0,"data":{"a":1}}"#,
            r#"{"schema":"S1","client_timestamp":5,"data":{"a1":1}}"#,
            r#"{"schema":"s1","client_timestamp":5,"data":{}}"#,
            r#"{"schema":"s1","client_timestamp":5,"data":{"id":1}}"#,
        ];
        for body in rejected {
            let (status, cors, message) = post(&router, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(cors.as_deref(), Some("*"));
            assert!(!message.is_empty(), "{body}");
        }

        let (status, _, message) = post(&router, r#"{"schema":"s1","client_timestamp":0}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("client_timestamp"), "{message}");

        let (status, _, message) =
            post(&router, r#"{"schema":"s1","client_timestamp":5,"data":{"id":1}}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("\"id\""), "{message}");

        let (status, _, _) = post(
            &router,
            r#"{"schema":"s1","client_timestamp":5,"data":{"a1":1}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejects_malformed_json() {
        let backend = Backend::spawn("test", CollectingSink::default(), FlushPolicy::EveryEntry, None);
        let router = app(&backend);

        let (status, _, message) = post(&router, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!message.is_empty());

        // nested values are not attributes
        let (status, _, _) = post(
            &router,
            r#"{"schema":"s1","client_timestamp":5,"data":{"a1":{"b":1}}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unavailable_after_backend_failure() {
        let backend = Backend::spawn("test", FailingSink, FlushPolicy::EveryEntry, None);
        let router = app(&backend);
        let body = r#"{"schema":"s1","client_timestamp":5,"data":{"a1":1}}"#;

        let (status, _, _) = post(&router, body).await;
        assert_eq!(status, StatusCode::OK);
        assert!(backend.join().await.is_err());

        let (status, cors, message) = post(&router, body).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(cors.as_deref(), Some("*"));
        assert!(!message.is_empty());
    }

    #[tokio::test]
    async fn test_slow_flush_does_not_time_out_ingestion() {
        let sink = SlowSink::default();
        let backend = Backend::spawn("test", sink.clone(), FlushPolicy::EveryEntry, None);
        let router = router(
            AppState {
                backend: backend.handle(),
            },
            Duration::from_millis(100),
        );
        let body = r#"{"schema":"s1","client_timestamp":5,"data":{"a1":1}}"#;

        // the second payload waits for the worker to finish writing the first one
        let (first, _, _) = post(&router, body).await;
        let (second, _, _) = post(&router, body).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);

        drop(router);
        backend.join().await.unwrap();
        assert_eq!(sink.rows.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_preflight() {
        let backend = Backend::spawn("test", CollectingSink::default(), FlushPolicy::EveryEntry, None);
        let router = app(&backend);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v0/log")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
