use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::payload::{PartitionKey, Payload};

/// Decides, after every insert, whether a partition has to be written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Write every payload as soon as it arrives. Headers survive the write so the column order
    /// stays continuous for the lifetime of the process.
    EveryEntry,
    /// Accumulate until the partition holds at least `entries_per_file` rows. Rows and headers are
    /// reset together so each file describes its own columns.
    Threshold { entries_per_file: usize },
}

impl FlushPolicy {
    pub fn should_flush(&self, buffered: usize) -> bool {
        match self {
            FlushPolicy::EveryEntry => buffered > 0,
            FlushPolicy::Threshold { entries_per_file } => buffered >= *entries_per_file,
        }
    }

    /// Whether a flush also clears the partition's header set.
    pub fn resets_headers(&self) -> bool {
        matches!(self, FlushPolicy::Threshold { .. })
    }
}

#[derive(Debug)]
struct Buffered {
    rows: Vec<Payload>,
    oldest: Instant,
}

/// Payloads accepted for each partition and not yet flushed.
#[derive(Debug, Default)]
pub(crate) struct BatchStore {
    partitions: HashMap<PartitionKey, Buffered>,
}

impl BatchStore {
    /// Appends a payload to its partition and returns the partition's row count.
    pub(crate) fn append(&mut self, payload: Payload) -> usize {
        let buffered = self
            .partitions
            .entry(payload.key.clone())
            .or_insert_with(|| Buffered {
                rows: Vec::new(),
                oldest: Instant::now(),
            });
        buffered.rows.push(payload);
        buffered.rows.len()
    }

    pub(crate) fn rows(&self, key: &PartitionKey) -> &[Payload] {
        self.partitions
            .get(key)
            .map(|b| b.rows.as_slice())
            .unwrap_or_default()
    }

    /// Drops every buffered row of the partition.
    pub(crate) fn clear(&mut self, key: &PartitionKey) -> usize {
        self.partitions
            .remove(key)
            .map(|b| b.rows.len())
            .unwrap_or_default()
    }

    /// Partitions whose oldest row has waited at least `max_age`.
    pub(crate) fn expired(&self, max_age: Duration) -> Vec<PartitionKey> {
        let now = Instant::now();
        let mut keys: Vec<_> = self
            .partitions
            .iter()
            .filter(|(_, b)| !b.rows.is_empty() && now.duration_since(b.oldest) >= max_age)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every partition with buffered rows.
    pub(crate) fn pending(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<_> = self
            .partitions
            .iter()
            .filter(|(_, b)| !b.rows.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}
