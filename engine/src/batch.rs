//! Batching and resumable checkpoints.
//!
//! Records are written in ordered chunks; after each chunk is durably
//! written a checkpoint marks the progress. Resuming from a checkpoint
//! yields exactly the chunks not yet confirmed, with no gaps or repeats.
//! Combined with idempotent per-record destination writes this gives
//! at-least-once delivery.

use crate::RecordKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resumable marker of replication progress.
///
/// Checkpoints are plain serializable data; persisting them across process
/// restarts is the caller's job. The engine only guarantees that replaying
/// from a checkpoint produces the correct remaining batch sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Index of the last batch confirmed written
    pub batch_index: usize,
    /// Primary key of the last record in that batch
    pub last_key: RecordKey,
    /// Total records processed up to and including that batch
    pub records_processed: u64,
    /// When the batch was confirmed
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Record a checkpoint for a freshly confirmed batch.
    pub fn after_batch(
        batch_index: usize,
        last_key: impl Into<RecordKey>,
        records_processed: u64,
    ) -> Self {
        Self {
            batch_index,
            last_key: last_key.into(),
            records_processed,
            created_at: Utc::now(),
        }
    }
}

/// Split records into ordered batches of at most `size` items.
///
/// Relative order is preserved and the final batch may be smaller. A size
/// of zero puts everything into one batch.
pub fn batch_records<T: Clone>(records: &[T], size: usize) -> Vec<Vec<T>> {
    if records.is_empty() {
        return Vec::new();
    }
    let size = if size == 0 { records.len() } else { size };
    records.chunks(size).map(|chunk| chunk.to_vec()).collect()
}

/// The batches remaining after a checkpoint: every batch with an index
/// greater than the checkpoint's, in order.
pub fn resume_from<T: Clone>(records: &[T], size: usize, checkpoint: &Checkpoint) -> Vec<Vec<T>> {
    batch_records(records, size)
        .into_iter()
        .enumerate()
        .filter(|(index, _)| *index > checkpoint.batch_index)
        .map(|(_, batch)| batch)
        .collect()
}
