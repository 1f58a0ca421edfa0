//! Fire and forget client for an uplink server.
//!
//! ```no_run
//! # async fn run() -> uplink_client::Result<()> {
//! let mut client = uplink_client::Client::new("http://localhost:8000/v0/log", "checkout")?;
//!
//! let mut data = serde_json::Map::new();
//! data.insert("amount".to_string(), 42.into());
//! client.track("orders", data).await?;
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_QUEUE_SIZE: usize = 100;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Attribute values keyed by attribute name.
pub type Data = Map<String, Value>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Client is closed")]
    Closed,

    #[error("Build Error - {0}")]
    Build(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Serialize)]
struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<String>,
    source: String,
    schema: String,
    client_timestamp: i64,
    data: Data,
}

/// ClientBuilder with custom queue size, timeout and warehouse.
pub struct ClientBuilder {
    server: String,
    source: String,
    warehouse: Option<String>,
    queue_size: usize,
    request_timeout: Duration,
}

impl ClientBuilder {
    /// `server` is the full URL of the log endpoint, `source` labels every event sent.
    pub fn new(server: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            source: source.into(),
            warehouse: None,
            queue_size: DEFAULT_QUEUE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Scopes every event to a warehouse.
    pub fn warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    /// Events that can wait for the worker before `track` blocks.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Builds the client and starts its worker. Needs a tokio runtime.
    pub fn build(self) -> Result<Client> {
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| Error::Build(format!("creating the HTTP client: {e}")))?;

        let (sender, receiver) = mpsc::channel(self.queue_size);
        let worker = tokio::spawn(run(http, self.server, receiver));

        Ok(Client {
            source: self.source,
            warehouse: self.warehouse,
            sender: Some(sender),
            worker: Some(worker),
        })
    }
}

/// Queues events and sends them from a background task. Delivery failures are logged, never
/// returned.
pub struct Client {
    source: String,
    warehouse: Option<String>,
    sender: Option<mpsc::Sender<Event>>,
    worker: Option<JoinHandle<()>>,
}

impl Client {
    pub fn new(server: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        ClientBuilder::new(server, source).build()
    }

    /// Stamps the event with the current time and queues it. Fails once the client is closed.
    pub async fn track(&self, schema: &str, data: Data) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(Error::Closed)?;
        let event = Event {
            warehouse: self.warehouse.clone(),
            source: self.source.clone(),
            schema: schema.to_string(),
            client_timestamp: Utc::now().timestamp_millis(),
            data,
        };
        sender.send(event).await.map_err(|_| Error::Closed)
    }

    /// Stops accepting events and waits until every queued event has been sent.
    pub async fn close(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(?e, "Client worker failed");
            }
        }
    }
}

async fn run(http: reqwest::Client, server: String, mut receiver: mpsc::Receiver<Event>) {
    debug!(%server, "Client worker started");

    while let Some(event) = receiver.recv().await {
        match http.post(&server).json(&event).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                let status = response.status();
                let reason = response.text().await.unwrap_or_default();
                warn!(%status, %reason, schema = %event.schema, "Event was rejected");
            }
            Err(e) => {
                warn!(?e, schema = %event.schema, "Failed to send event");
            }
        }
    }

    info!("Client worker stopped");
}
