use crate::Result;
use crate::batch::FlushPolicy;
use crate::config::{LocalFileConfig, ObjectStoreConfig};
use crate::header::HeaderSet;
use crate::payload::{PartitionKey, Payload};

/// [console] sink streams every payload to stdout as soon as it is accepted.
#[path = "sink/console.rs"]
pub mod console;

/// [local_file] sink writes one new file per flushed batch.
#[path = "sink/local_file.rs"]
pub mod local_file;

/// [object_store] sink uploads one object per flushed batch to an S3 compatible bucket.
#[path = "sink/object_store.rs"]
pub mod object_store;

/// Rows of one partition handed to a sink, together with the columns they are rendered against.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub key: &'a PartitionKey,
    pub headers: &'a HeaderSet,
    pub rows: &'a [Payload],
}

/// Destination of flushed batches.
#[trait_variant::make(Sink: Send)]
#[allow(dead_code)]
pub trait LocalSink {
    /// Serialize and commit the batch. An error means the batch was not persisted.
    async fn write(&mut self, batch: Batch<'_>) -> Result<()>;
}

/// The sinks a backend can be built with.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkType {
    Console,
    LocalFile(LocalFileConfig),
    ObjectStore(ObjectStoreConfig),
}

impl SinkType {
    /// Console streams, the file based sinks accumulate `entries_per_file` rows.
    pub fn flush_policy(&self, entries_per_file: usize) -> FlushPolicy {
        match self {
            SinkType::Console => FlushPolicy::EveryEntry,
            SinkType::LocalFile(_) | SinkType::ObjectStore(_) => {
                FlushPolicy::Threshold { entries_per_file }
            }
        }
    }

    /// Name used for the `sink` metric label and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SinkType::Console => "console",
            SinkType::LocalFile(_) => "localfile",
            SinkType::ObjectStore(_) => "s3file",
        }
    }
}
