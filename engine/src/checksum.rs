//! Per-record checksum computation.
//!
//! Checksums are SHA-256 digests over a canonical serialization of a
//! record's fields. The canonical form sorts field names lexicographically
//! at every nesting level, so two records with the same logical content
//! always produce the same digest no matter the insertion order.

use crate::{error::Result, Error, Record};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Fields excluded from checksums by default. These are bookkeeping fields
/// that stores rewrite on every round trip and must not count as divergence.
pub const DEFAULT_CHECKSUM_EXCLUSIONS: [&str; 3] = ["_user", "_raw", "_batchID"];

/// The default exclusion set as an owned collection.
pub fn default_exclusions() -> std::collections::BTreeSet<String> {
    DEFAULT_CHECKSUM_EXCLUSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Compute the SHA-256 checksum of a record, as a 64-character lowercase
/// hex digest.
///
/// Fields named in `exclude` are dropped before hashing. Remaining fields
/// are serialized in sorted key order; nested objects serialize with sorted
/// keys as well (serde_json's map type is ordered), so field insertion
/// order never affects the result.
pub fn record_checksum(
    record: &Record,
    exclude: &std::collections::BTreeSet<String>,
) -> Result<String> {
    let filtered: BTreeMap<&String, &serde_json::Value> = record
        .fields()
        .filter(|(name, _)| !exclude.contains(*name))
        .collect();

    let canonical =
        serde_json::to_string(&filtered).map_err(|e| Error::Unserializable(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Compare two records for content equality, ignoring excluded fields.
pub fn records_equal(
    r1: &Record,
    r2: &Record,
    exclude: &std::collections::BTreeSet<String>,
) -> bool {
    let filter = |r: &Record| -> BTreeMap<String, serde_json::Value> {
        r.fields()
            .filter(|(name, _)| !exclude.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    };
    filter(r1) == filter(r2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checksum(value: serde_json::Value) -> String {
        record_checksum(&Record::from_value(value).unwrap(), &default_exclusions()).unwrap()
    }

    #[test]
    fn checksum_is_64_hex_chars() {
        let digest = checksum(json!({"_key": "rec-1", "name": "Test", "value": 42}));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn checksum_excludes_default_fields() {
        let with_bookkeeping = checksum(json!({
            "_key": "rec-1",
            "name": "Test",
            "_user": "admin",
            "_raw": "data",
            "_batchID": "123",
        }));
        let without = checksum(json!({"_key": "rec-1", "name": "Test"}));

        assert_eq!(with_bookkeeping, without);
    }

    #[test]
    fn checksum_respects_custom_exclusions() {
        let exclude: std::collections::BTreeSet<String> =
            ["internal".to_string()].into_iter().collect();

        let r1 = Record::from_value(json!({"_key": "rec-1", "name": "Test", "internal": "x"}))
            .unwrap();
        let r2 = Record::from_value(json!({"_key": "rec-1", "name": "Test"})).unwrap();

        assert_eq!(
            record_checksum(&r1, &exclude).unwrap(),
            record_checksum(&r2, &std::collections::BTreeSet::new()).unwrap()
        );
    }

    #[test]
    fn checksum_ignores_insertion_order() {
        let r1 = Record::from_fields([
            ("_key", json!("rec-1")),
            ("alpha", json!(1)),
            ("beta", json!(2)),
        ]);
        let r2 = Record::from_fields([
            ("beta", json!(2)),
            ("_key", json!("rec-1")),
            ("alpha", json!(1)),
        ]);

        let exclude = default_exclusions();
        assert_eq!(
            record_checksum(&r1, &exclude).unwrap(),
            record_checksum(&r2, &exclude).unwrap()
        );
    }

    #[test]
    fn checksum_differs_on_any_field_change() {
        assert_ne!(
            checksum(json!({"_key": "rec-1", "value": 1})),
            checksum(json!({"_key": "rec-1", "value": 2}))
        );
        assert_ne!(
            checksum(json!({"_key": "rec-1"})),
            checksum(json!({"_key": "rec-2"}))
        );
    }

    #[test]
    fn checksum_handles_nested_data() {
        let digest = checksum(json!({
            "_key": "rec-1",
            "metadata": {"created": "2026-01-01", "tags": ["tag1", "tag2"]},
            "values": [1, 2, 3],
        }));
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn checksum_handles_unicode_and_nulls() {
        let unicode = checksum(json!({"_key": "rec-1", "name": "Tëst Üñîcödé 日本語"}));
        assert_eq!(unicode.len(), 64);

        let nulls = checksum(json!({"_key": "rec-1", "name": null, "value": null}));
        assert_eq!(nulls.len(), 64);
    }

    #[test]
    fn records_equal_ignores_excluded_fields() {
        let exclude = default_exclusions();
        let r1 = Record::from_value(json!({"_key": "rec-1", "name": "A", "_user": "admin"}))
            .unwrap();
        let r2 = Record::from_value(json!({"_key": "rec-1", "name": "A", "_user": "other"}))
            .unwrap();
        let r3 = Record::from_value(json!({"_key": "rec-1", "name": "B"})).unwrap();

        assert!(records_equal(&r1, &r2, &exclude));
        assert!(!records_equal(&r1, &r3, &exclude));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_scalar() -> impl Strategy<Value = serde_json::Value> {
            prop_oneof![
                any::<i64>().prop_map(|n| json!(n)),
                any::<bool>().prop_map(|b| json!(b)),
                "[a-z]{0,12}".prop_map(|s| json!(s)),
                Just(serde_json::Value::Null),
            ]
        }

        proptest! {
            #[test]
            fn prop_checksum_order_independent(
                fields in proptest::collection::vec(("[a-z]{1,8}", arb_scalar()), 1..8),
            ) {
                let forward = Record::from_fields(fields.clone());
                let reversed = Record::from_fields(fields.into_iter().rev());

                let exclude = default_exclusions();
                prop_assert_eq!(
                    record_checksum(&forward, &exclude).unwrap(),
                    record_checksum(&reversed, &exclude).unwrap()
                );
            }

            #[test]
            fn prop_checksum_deterministic(
                fields in proptest::collection::vec(("[a-z]{1,8}", arb_scalar()), 0..8),
            ) {
                let record = Record::from_fields(fields);
                let exclude = default_exclusions();

                let first = record_checksum(&record, &exclude).unwrap();
                let second = record_checksum(&record, &exclude).unwrap();
                prop_assert_eq!(first, second);
            }
        }
    }
}
