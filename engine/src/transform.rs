//! Record transformation: field exclusion, field mapping, and the
//! selection-time filter predicate.

use crate::{profile::FilterQuery, Record, SyncProfile};

/// Transform a record for writing to a destination.
///
/// Fields named in the profile's `field_exclusions` are dropped, then the
/// remaining fields are renamed per `field_mappings`; unmapped fields pass
/// through unchanged. The filter predicate is *not* applied here; it runs
/// at selection time, before a record ever enters the pipeline.
pub fn transform_record(record: &Record, profile: &SyncProfile) -> Record {
    let mut result = Record::new();

    for (field, value) in record.fields() {
        if profile.field_exclusions.contains(field) {
            continue;
        }

        let dest_field = profile
            .field_mappings
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.clone());
        result.insert(dest_field, value.clone());
    }

    result
}

/// Whether a record satisfies every equality constraint in the query.
///
/// A missing field never equals a constraint value. An empty query matches
/// everything.
pub fn matches_filter(record: &Record, query: &FilterQuery) -> bool {
    query
        .iter()
        .all(|(field, expected)| record.get(field) == Some(expected))
}
