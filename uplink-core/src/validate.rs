//! Payload validation. Runs at the boundary, before a payload is handed to the backend, and
//! reports only the first rule a payload breaks.

use std::sync::LazyLock;

use regex::Regex;

use crate::payload::Payload;

const PARTITION_PATTERN: &str = "^[a-z][0-9a-z]+$";
const KEY_PATTERN: &str = "^[a-z][0-9a-z_]*[a-z0-9]$";

const MIN_KEY_LENGTH: usize = 2;
const MAX_KEY_LENGTH: usize = 128;

/// Attribute names that would collide with the fixed output columns.
pub const RESERVED_KEYS: [&str; 5] = [
    "id",
    "server_timestamp",
    "client_timestamp",
    "source",
    "event",
];

static VALID_PARTITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PARTITION_PATTERN).expect("partition pattern is valid"));
static VALID_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(KEY_PATTERN).expect("key pattern is valid"));

/// Reason a payload was rejected. The [`Display`](std::fmt::Display) output is returned to the
/// caller verbatim.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("client_timestamp field must be greater than 0")]
    ClientTimestamp,

    #[error(
        "Warehouse \"{0}\" contains unacceptable characters. Warehouse names must match the following regular expression: {pattern}",
        pattern = PARTITION_PATTERN
    )]
    Warehouse(String),

    #[error(
        "Schema \"{0}\" contains unacceptable characters. Schema names must match the following regular expression: {pattern}",
        pattern = PARTITION_PATTERN
    )]
    Schema(String),

    #[error("At least one data field must be provided in the payload")]
    EmptyData,

    #[error(
        "Data key \"{0}\" contains unacceptable characters. Key names must match the following regular expression: {pattern}",
        pattern = KEY_PATTERN
    )]
    KeyCharacters(String),

    #[error("Data key \"{0}\" is a reserved word and must not be used")]
    ReservedKey(String),

    #[error(
        "Data key \"{0}\" has an invalid length. It must be between {min} and {max} characters",
        min = MIN_KEY_LENGTH,
        max = MAX_KEY_LENGTH
    )]
    KeyLength(String),
}

/// Checks a payload against the naming and content rules, in order.
pub fn validate_payload(payload: &Payload) -> Result<(), ValidationError> {
    if payload.client_timestamp <= 0 {
        return Err(ValidationError::ClientTimestamp);
    }

    if let Some(warehouse) = &payload.key.warehouse {
        if !VALID_PARTITION.is_match(warehouse) {
            return Err(ValidationError::Warehouse(warehouse.clone()));
        }
    }

    if !VALID_PARTITION.is_match(&payload.key.schema) {
        return Err(ValidationError::Schema(payload.key.schema.clone()));
    }

    if payload.attributes.is_empty() {
        return Err(ValidationError::EmptyData);
    }

    payload.attribute_names().try_for_each(validate_key)
}

/// Checks a single attribute name.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if !VALID_KEY.is_match(key) {
        return Err(ValidationError::KeyCharacters(key.to_string()));
    }

    if RESERVED_KEYS.contains(&key) {
        return Err(ValidationError::ReservedKey(key.to_string()));
    }

    let len = key.chars().count();
    if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&len) {
        return Err(ValidationError::KeyLength(key.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::test_utils::payload;
    use crate::payload::{AttributeValue, PartitionKey};

    fn warehouse_key(warehouse: &str, schema: &str) -> PartitionKey {
        PartitionKey::new(Some(warehouse.to_string()), schema)
    }

    #[test]
    fn test_accepts_valid_payload() {
        let p = payload(PartitionKey::schema("s1"), &[("a1", 1i64.into())]);
        assert_eq!(validate_payload(&p), Ok(()));

        let p = payload(warehouse_key("w1", "s1"), &[("a_b", "x".into())]);
        assert_eq!(validate_payload(&p), Ok(()));
    }

    #[test]
    fn test_rejects_non_positive_timestamp() {
        let mut p = payload(warehouse_key("w1", "s1"), &[("a", 1i64.into())]);
        p.client_timestamp = 0;
        assert_eq!(validate_payload(&p), Err(ValidationError::ClientTimestamp));

        p.client_timestamp = -5;
        assert_eq!(validate_payload(&p), Err(ValidationError::ClientTimestamp));
    }

    #[test]
    fn test_timestamp_checked_before_names() {
        let mut p = payload(PartitionKey::schema("S1"), &[]);
        p.client_timestamp = 0;
        assert_eq!(validate_payload(&p), Err(ValidationError::ClientTimestamp));
    }

    #[test]
    fn test_rejects_bad_partition_names() {
        let p = payload(PartitionKey::schema("S1"), &[("a1", 1i64.into())]);
        assert_eq!(
            validate_payload(&p),
            Err(ValidationError::Schema("S1".to_string()))
        );

        // single character names do not satisfy the pattern
        let p = payload(PartitionKey::schema("s"), &[("a1", 1i64.into())]);
        assert!(matches!(validate_payload(&p), Err(ValidationError::Schema(_))));

        let p = payload(warehouse_key("1w", "s1"), &[("a1", 1i64.into())]);
        assert_eq!(
            validate_payload(&p),
            Err(ValidationError::Warehouse("1w".to_string()))
        );

        let p = payload(warehouse_key("", "s1"), &[("a1", 1i64.into())]);
        assert!(matches!(
            validate_payload(&p),
            Err(ValidationError::Warehouse(_))
        ));
    }

    #[test]
    fn test_rejects_empty_data() {
        let p = payload(PartitionKey::schema("s1"), &[]);
        assert_eq!(validate_payload(&p), Err(ValidationError::EmptyData));
    }

    #[test]
    fn test_rejects_reserved_keys() {
        for reserved in RESERVED_KEYS {
            let p = payload(PartitionKey::schema("s1"), &[(reserved, 1i64.into())]);
            assert_eq!(
                validate_payload(&p),
                Err(ValidationError::ReservedKey(reserved.to_string()))
            );
        }
    }

    #[test]
    fn test_rejects_bad_key_characters() {
        for key in ["A1", "a-b", "ab_", "_ab", "1ab", "a b", "a"] {
            assert_eq!(
                validate_key(key),
                Err(ValidationError::KeyCharacters(key.to_string())),
                "{key}"
            );
        }
    }

    #[test]
    fn test_key_length_bounds() {
        let longest = "a".repeat(MAX_KEY_LENGTH);
        assert_eq!(validate_key(&longest), Ok(()));

        let too_long = "a".repeat(MAX_KEY_LENGTH + 1);
        assert_eq!(
            validate_key(&too_long),
            Err(ValidationError::KeyLength(too_long.clone()))
        );

        assert_eq!(validate_key("ab"), Ok(()));
    }

    #[test]
    fn test_first_bad_key_wins() {
        let p = payload(
            PartitionKey::schema("s1"),
            &[
                ("zz", AttributeValue::Null),
                ("id", 1i64.into()),
                ("source", 1i64.into()),
            ],
        );
        // keys are scanned in lexicographic order
        assert_eq!(
            validate_payload(&p),
            Err(ValidationError::ReservedKey("id".to_string()))
        );
    }

    #[test]
    fn test_messages_name_the_field() {
        let err = ValidationError::Schema("S1".to_string());
        assert_eq!(
            err.to_string(),
            "Schema \"S1\" contains unacceptable characters. Schema names must match the following regular expression: ^[a-z][0-9a-z]+$"
        );
        assert_eq!(
            ValidationError::ReservedKey("id".to_string()).to_string(),
            "Data key \"id\" is a reserved word and must not be used"
        );
    }
}
