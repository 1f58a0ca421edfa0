//! The backend owns the per partition state and the sink. Producers hand payloads over through a
//! single intake queue; one worker task takes them off one at a time, tracks headers, buffers rows
//! and writes a partition to the sink whenever the flush policy says so.
//!
//! A producer is released only once the worker has taken its payload, which is the only
//! backpressure in the system. A failed write stops the worker and its error is returned from
//! [Backend::join].

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::batch::{BatchStore, FlushPolicy};
use crate::header::{HeaderSet, HeaderTracker};
use crate::metrics::{backend_metrics, partition_labels, sink_labels};
use crate::payload::{PartitionKey, Payload};
use crate::sink::console::ConsoleSink;
use crate::sink::local_file::LocalFileSink;
use crate::sink::object_store::ObjectStoreSink;
use crate::sink::{Batch, Sink, SinkType};
use crate::{Error, Result};

/// One slot, together with the receipt below a producer waits for the worker itself.
const INTAKE_CAPACITY: usize = 1;
const DEFAULT_ENTRIES_PER_FILE: usize = 1000;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

static EMPTY_HEADERS: HeaderSet = HeaderSet::new();

/// Headers and rows of every partition, and the policy that decides when they are written.
#[derive(Debug)]
pub(crate) struct Accumulator {
    headers: HeaderTracker,
    rows: BatchStore,
    policy: FlushPolicy,
}

impl Accumulator {
    pub(crate) fn new(policy: FlushPolicy) -> Self {
        Self {
            headers: HeaderTracker::default(),
            rows: BatchStore::default(),
            policy,
        }
    }

    /// Records the payload and returns its partition when it is due for a flush.
    pub(crate) fn accept(&mut self, payload: Payload) -> Option<PartitionKey> {
        let key = payload.key.clone();
        self.headers.update(&key, payload.attribute_names());
        let buffered = self.rows.append(payload);
        self.policy.should_flush(buffered).then_some(key)
    }

    pub(crate) fn batch<'a>(&'a self, key: &'a PartitionKey) -> Batch<'a> {
        Batch {
            key,
            headers: self.headers.get(key).unwrap_or(&EMPTY_HEADERS),
            rows: self.rows.rows(key),
        }
    }

    /// Forgets the rows of a flushed partition, and its headers when the policy asks for it.
    pub(crate) fn reset(&mut self, key: &PartitionKey) {
        self.rows.clear(key);
        if self.policy.resets_headers() {
            self.headers.reset(key);
        }
    }

    pub(crate) fn expired(&self, max_age: Duration) -> Vec<PartitionKey> {
        self.rows.expired(max_age)
    }

    pub(crate) fn pending(&self) -> Vec<PartitionKey> {
        self.rows.pending()
    }
}

/// A payload on its way to the worker. `received` fires as soon as the worker has taken it.
struct BackendMessage {
    payload: Payload,
    received: oneshot::Sender<()>,
}

/// Cheap to clone, every producer gets its own.
#[derive(Clone)]
pub struct BackendHandle {
    sender: mpsc::Sender<BackendMessage>,
}

impl BackendHandle {
    /// Hands the payload to the worker and waits until the worker has taken it. Fails once the
    /// worker has stopped.
    pub async fn accept(&self, payload: Payload) -> Result<()> {
        let (received, rx) = oneshot::channel();
        self.sender
            .send(BackendMessage { payload, received })
            .await
            .map_err(|_| Error::Backend("backend worker has stopped".to_string()))?;

        rx.await
            .map_err(|e| Error::ActorPatternRecv(format!("payload was not received: {e}")))
    }
}

struct BackendActor<S> {
    intake: mpsc::Receiver<BackendMessage>,
    sink: S,
    sink_name: &'static str,
    state: Accumulator,
    sweep_interval: Option<Duration>,
}

impl<S> BackendActor<S>
where
    S: Sink,
{
    fn new(
        intake: mpsc::Receiver<BackendMessage>,
        sink: S,
        sink_name: &'static str,
        policy: FlushPolicy,
        sweep_interval: Option<Duration>,
    ) -> Self {
        Self {
            intake,
            sink,
            sink_name,
            state: Accumulator::new(policy),
            sweep_interval,
        }
    }

    async fn run(mut self) -> Result<()> {
        info!(
            sink = self.sink_name,
            policy = ?self.state.policy,
            sweep_interval = ?self.sweep_interval,
            "Backend worker started"
        );

        let mut sweep = self.sweep_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                message = self.intake.recv() => match message {
                    Some(message) => self.handle(message).await?,
                    None => break,
                },
                _ = tick(&mut sweep) => self.sweep().await?,
            }
        }

        self.drain().await?;
        info!(sink = self.sink_name, "Backend worker stopped");
        Ok(())
    }

    async fn handle(&mut self, message: BackendMessage) -> Result<()> {
        let BackendMessage { payload, received } = message;
        // the producer may have given up waiting, the payload is still ours
        let _ = received.send(());

        backend_metrics()
            .payloads_accepted
            .get_or_create(&partition_labels(self.sink_name, &payload.key.to_string()))
            .inc();

        match self.state.accept(payload) {
            Some(key) => self.flush(&key).await,
            None => Ok(()),
        }
    }

    /// Writes out every partition whose oldest row has waited a full sweep interval.
    async fn sweep(&mut self) -> Result<()> {
        let Some(period) = self.sweep_interval else {
            return Ok(());
        };
        for key in self.state.expired(period) {
            debug!(partition = %key, "Flushing partition on sweep");
            self.flush(&key).await?;
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        let pending = self.state.pending();
        if !pending.is_empty() {
            info!(partitions = pending.len(), "Intake closed, flushing pending partitions");
        }
        for key in pending {
            self.flush(&key).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, key: &PartitionKey) -> Result<()> {
        let batch = self.state.batch(key);
        let rows = batch.rows.len();
        if rows == 0 {
            return Ok(());
        }

        let labels = sink_labels(self.sink_name);
        let start = Instant::now();

        if let Err(e) = self.sink.write(batch).await {
            backend_metrics().flush_errors.get_or_create(&labels).inc();
            error!(partition = %key, rows, ?e, "Failed to write batch");
            return Err(e);
        }

        let metrics = backend_metrics();
        metrics
            .flush_duration
            .get_or_create(&labels)
            .observe(start.elapsed().as_secs_f64());
        metrics.flushed_batches.get_or_create(&labels).inc();
        metrics.flushed_rows.get_or_create(&labels).inc_by(rows as u64);

        debug!(partition = %key, rows, "Flushed partition");
        self.state.reset(key);
        Ok(())
    }
}

async fn tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// A running backend: the handle producers use and the worker task.
pub struct Backend {
    handle: BackendHandle,
    worker: JoinHandle<Result<()>>,
}

impl Backend {
    /// Starts a worker for any sink.
    pub fn spawn<S>(
        sink_name: &'static str,
        sink: S,
        policy: FlushPolicy,
        sweep_interval: Option<Duration>,
    ) -> Self
    where
        S: Sink + 'static,
    {
        let (sender, receiver) = mpsc::channel(INTAKE_CAPACITY);
        let actor = BackendActor::new(receiver, sink, sink_name, policy, sweep_interval);
        let worker = tokio::spawn(actor.run());
        Self {
            handle: BackendHandle { sender },
            worker,
        }
    }

    pub fn handle(&self) -> BackendHandle {
        self.handle.clone()
    }

    /// Waits for the worker. It stops after every handle is dropped and the pending partitions are
    /// written, or as soon as a write fails.
    pub async fn join(self) -> Result<()> {
        let Backend { handle, worker } = self;
        drop(handle);
        match worker.await {
            Ok(result) => result,
            Err(e) => Err(Error::Backend(format!("backend worker panicked: {e}"))),
        }
    }
}

/// BackendBuilder builds the configured sink and starts the worker for it.
pub struct BackendBuilder {
    sink_type: SinkType,
    entries_per_file: usize,
    sweep_interval: Option<Duration>,
}

impl BackendBuilder {
    pub fn new(sink_type: SinkType) -> Self {
        Self {
            sink_type,
            entries_per_file: DEFAULT_ENTRIES_PER_FILE,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }

    pub fn entries_per_file(mut self, entries_per_file: usize) -> Self {
        self.entries_per_file = entries_per_file;
        self
    }

    /// `None` turns the time based flush off.
    pub fn sweep_interval(mut self, sweep_interval: Option<Duration>) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Builds the sink, which for the object store includes checking the bucket, and starts the
    /// worker.
    pub async fn build(self) -> Result<Backend> {
        if self.entries_per_file == 0 {
            return Err(Error::Config(
                "entries per file must be greater than 0".to_string(),
            ));
        }

        let name = self.sink_type.name();
        let policy = self.sink_type.flush_policy(self.entries_per_file);

        let backend = match self.sink_type {
            SinkType::Console => {
                Backend::spawn(name, ConsoleSink::stdout(), policy, self.sweep_interval)
            }
            SinkType::LocalFile(config) => {
                tokio::fs::create_dir_all(&config.dir).await?;
                Backend::spawn(
                    name,
                    LocalFileSink::new(config),
                    policy,
                    self.sweep_interval,
                )
            }
            SinkType::ObjectStore(config) => {
                let sink = ObjectStoreSink::connect(&config).await?;
                Backend::spawn(name, sink, policy, self.sweep_interval)
            }
        };
        Ok(backend)
    }
}
