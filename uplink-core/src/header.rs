use std::collections::HashMap;

use crate::payload::PartitionKey;

/// Ordered attribute names of one partition, in first-seen order. Names are compared by value and
/// never repeat, so a column keeps its position until the set is reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    names: Vec<String>,
}

impl HeaderSet {
    pub const fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Appends every name that is not present yet, in the order given. Returns how many columns
    /// were added.
    pub fn extend<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> usize {
        let before = self.names.len();
        for name in names {
            if !self.contains(name) {
                self.names.push(name.to_string());
            }
        }
        self.names.len() - before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for HeaderSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut set = HeaderSet::new();
        set.extend(iter);
        set
    }
}

/// Header sets for every partition with buffered rows.
#[derive(Debug, Default)]
pub(crate) struct HeaderTracker {
    headers: HashMap<PartitionKey, HeaderSet>,
}

impl HeaderTracker {
    /// Merges the attribute names of one payload into the partition's header set, creating the set
    /// on first use. Callers pass names in lexicographic order so the scan is deterministic.
    pub(crate) fn update<'a>(
        &mut self,
        key: &PartitionKey,
        names: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        match self.headers.get_mut(key) {
            Some(headers) => headers.extend(names),
            None => {
                let headers: HeaderSet = names.into_iter().collect();
                let added = headers.len();
                self.headers.insert(key.clone(), headers);
                added
            }
        }
    }

    pub(crate) fn get(&self, key: &PartitionKey) -> Option<&HeaderSet> {
        self.headers.get(key)
    }

    /// Drops the partition's header set, the next payload starts a fresh column order.
    pub(crate) fn reset(&mut self, key: &PartitionKey) -> Option<HeaderSet> {
        self.headers.remove(key)
    }
}
