use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the logical table a payload belongs to. Every partition key gets its own header set
/// and row buffer inside the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub warehouse: Option<String>,
    pub schema: String,
}

impl PartitionKey {
    pub fn new(warehouse: Option<String>, schema: impl Into<String>) -> Self {
        Self {
            warehouse,
            schema: schema.into(),
        }
    }

    /// A key without warehouse partitioning.
    pub fn schema(schema: impl Into<String>) -> Self {
        Self::new(None, schema)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.warehouse {
            Some(warehouse) => write!(f, "{}-{}", warehouse, self.schema),
            None => write!(f, "{}", self.schema),
        }
    }
}

/// Scalar value of a single attribute. Nested JSON (objects, arrays) is not representable and is
/// rejected while decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => Ok(()),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

#[cfg(test)]
impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

#[cfg(test)]
impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(value.into())
    }
}

/// Attributes keyed by name. The ordered map gives the lexicographic scan order the header
/// tracker relies on.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// The unit of work flowing through the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Assigned by the boundary layer, never by the backend.
    pub id: String,
    pub key: PartitionKey,
    pub source: String,
    /// Milliseconds since epoch, as reported by the client.
    pub client_timestamp: i64,
    /// Milliseconds since epoch, stamped on receipt.
    pub server_timestamp: i64,
    pub attributes: Attributes,
}

impl Payload {
    /// Attribute names in lexicographic order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Builds a payload with the given attributes; id and timestamps are fixed so rows are
    /// predictable.
    pub(crate) fn payload(key: PartitionKey, attributes: &[(&str, AttributeValue)]) -> Payload {
        Payload {
            id: "id-1".to_string(),
            key,
            source: "tests".to_string(),
            client_timestamp: 1_700_000_000_000,
            server_timestamp: 1_700_000_000_500,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}
