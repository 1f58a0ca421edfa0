//! Ingestion engine of uplink. Payloads are validated, grouped per partition (schema, optionally
//! scoped to a warehouse), tracked against the set of attribute names seen so far and written out
//! as pipe delimited batches to one of the sinks.

mod error;
pub use crate::error::{Error, Result};

pub mod backend;
pub use crate::backend::{Backend, BackendBuilder, BackendHandle};

mod batch;
pub use crate::batch::FlushPolicy;

pub mod codec;
pub mod config;

mod header;
pub use crate::header::HeaderSet;

pub mod metrics;

pub mod payload;
pub use crate::payload::{AttributeValue, Attributes, PartitionKey, Payload};

pub mod sink;
pub use crate::sink::{Batch, Sink, SinkType};

pub mod validate;
pub use crate::validate::{ValidationError, validate_payload};
