//! Deterministic conflict resolution for divergent records.
//!
//! Resolution is invoked only when source and destination both hold a
//! record with the same primary key and their checksums differ. Every
//! strategy is a pure function of the two records; the manual-review
//! strategy defers instead of deciding and never touches the destination.

use crate::{Record, RecordKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conflict resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The source record replaces the destination record (default).
    #[default]
    SourceWins,
    /// The destination record is kept; the source copy is discarded.
    DestinationWins,
    /// The record with the numerically larger timestamp field wins;
    /// ties favor the source.
    NewestWins,
    /// Destination provides the base, source fields overlay it. Source
    /// wins on field-level collisions; destination-only fields survive.
    /// List-valued fields are replaced wholesale, not merged element-wise.
    Merge,
    /// Neither side is applied; the conflict is queued for out-of-band
    /// review and the destination record stays untouched.
    ManualReview,
}

/// A conflict deferred for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEntry {
    /// Primary key of the divergent record
    pub key: RecordKey,
    /// The source side at detection time
    pub source: Record,
    /// The destination side at detection time
    pub destination: Record,
    /// When the divergence was detected
    pub detected_at: DateTime<Utc>,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write this record to the destination.
    Apply(Record),
    /// Queue the conflict; leave the destination untouched.
    Queue(ConflictEntry),
}

/// Resolve a conflict between a source and a destination record.
pub fn resolve(
    source: &Record,
    destination: &Record,
    strategy: ConflictStrategy,
    timestamp_field: &str,
    detected_at: DateTime<Utc>,
) -> Resolution {
    match strategy {
        ConflictStrategy::SourceWins => Resolution::Apply(source.clone()),
        ConflictStrategy::DestinationWins => Resolution::Apply(destination.clone()),
        ConflictStrategy::NewestWins => {
            let src_time = numeric_field(source, timestamp_field);
            let dest_time = numeric_field(destination, timestamp_field);
            if src_time >= dest_time {
                Resolution::Apply(source.clone())
            } else {
                Resolution::Apply(destination.clone())
            }
        }
        ConflictStrategy::Merge => {
            let mut merged = destination.clone();
            for (field, value) in source.fields() {
                merged.insert(field.clone(), value.clone());
            }
            Resolution::Apply(merged)
        }
        ConflictStrategy::ManualReview => Resolution::Queue(ConflictEntry {
            key: source.key_owned(),
            source: source.clone(),
            destination: destination.clone(),
            detected_at,
        }),
    }
}

// Missing or non-numeric timestamps compare as 0, matching how upstream
// stores treat records that were never stamped.
fn numeric_field(record: &Record, field: &str) -> f64 {
    record
        .get(field)
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}
