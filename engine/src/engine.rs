//! The sync engine: orchestrates one replication run between a source and
//! a destination handler under a sync profile.
//!
//! A run proceeds sequentially batch-by-batch, so batch N+1 is never
//! written before batch N's checkpoint is recorded. The engine does no
//! I/O of its own; all blocking happens inside the injected handlers.
//! Cancellation is cooperative and checked at batch boundaries; the
//! in-flight batch always completes and the last checkpoint survives.

use crate::{
    batch::{batch_records, resume_from, Checkpoint},
    checksum::record_checksum,
    conflict::{resolve, ConflictEntry, Resolution},
    error::Result,
    transform::transform_record,
    CollectionName, Record, RecordKey, SyncHandler, SyncMode, SyncProfile, KEY_FIELD,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

/// Cooperative cancellation flag for a running sync.
///
/// Clone the token before starting a run and flip it from another thread;
/// the engine checks it at batch boundaries. There is no hard interrupt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Every record written, no errors.
    Success,
    /// The run completed but some record writes or deletes failed.
    PartialFailure,
    /// Cancelled cooperatively; the last finished batch is checkpointed.
    Cancelled,
    /// Aborted before or during the run by a connection, collection
    /// creation, or fingerprinting failure.
    Aborted,
}

/// Outcome of a sync run, as a plain serializable structure for a
/// scheduler or UI layer to persist, display, or alert on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// True when the run finished with no errors at all
    pub success: bool,
    /// Terminal state of the run
    pub status: SyncStatus,
    /// Mode the run executed
    pub mode: SyncMode,
    /// Collection that was synchronized
    pub collection: CollectionName,
    /// Records read from the source (after filtering)
    pub records_read: u64,
    /// Records written to the destination
    pub records_written: u64,
    /// Records deleted at the destination
    pub records_deleted: u64,
    /// Records skipped as unchanged or already present
    pub records_skipped: u64,
    /// Records whose write failed
    pub records_failed: u64,
    /// Conflicts detected (same key, differing checksums)
    pub conflicts_detected: u64,
    /// Conflicts resolved automatically
    pub conflicts_resolved: u64,
    /// Batches written
    pub batches_processed: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Fatal error that aborted the run, if any
    pub error_message: Option<String>,
    /// Per-record errors collected along the way
    pub errors: Vec<String>,
    /// One checkpoint per confirmed batch
    pub checkpoints: Vec<Checkpoint>,
    /// Conflicts queued for manual review during this run
    pub conflicts: Vec<ConflictEntry>,
}

impl SyncResult {
    fn start(mode: SyncMode, collection: &str) -> Self {
        Self {
            success: false,
            status: SyncStatus::Aborted,
            mode,
            collection: collection.to_string(),
            records_read: 0,
            records_written: 0,
            records_deleted: 0,
            records_skipped: 0,
            records_failed: 0,
            conflicts_detected: 0,
            conflicts_resolved: 0,
            batches_processed: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            errors: Vec::new(),
            checkpoints: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// Destination keys absent from the source.
pub fn find_orphans(
    source_keys: &BTreeSet<RecordKey>,
    dest_keys: &BTreeSet<RecordKey>,
) -> BTreeSet<RecordKey> {
    dest_keys.difference(source_keys).cloned().collect()
}

/// Orchestrates replication runs for one profile.
///
/// The engine holds no shared mutable state between runs: the conflict
/// queue and checkpoint list are part of each run's [`SyncResult`], so
/// concurrent runs against different destinations never interleave.
pub struct SyncEngine {
    profile: SyncProfile,
    cancel: CancelToken,
}

impl SyncEngine {
    /// Create an engine for a profile.
    pub fn new(profile: SyncProfile) -> Self {
        Self {
            profile,
            cancel: CancelToken::new(),
        }
    }

    /// The profile driving this engine.
    pub fn profile(&self) -> &SyncProfile {
        &self.profile
    }

    /// A token that cancels runs of this engine cooperatively.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute one sync run.
    ///
    /// Connects both handlers, ensures the destination collection exists
    /// (creating it from the source schema when missing), then runs the
    /// profile's mode. Per-record failures are collected and the run
    /// continues; connection and fingerprinting failures abort it.
    /// Handlers are disconnected on every exit path.
    pub fn sync(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
    ) -> SyncResult {
        let mut result = SyncResult::start(self.profile.sync_mode, collection);
        info!(
            profile = %self.profile.name,
            collection,
            mode = ?self.profile.sync_mode,
            "starting sync run"
        );

        let outcome = self
            .prepare(source, destination, collection)
            .and_then(|()| match self.profile.sync_mode {
                SyncMode::FullSync | SyncMode::MasterSlave => {
                    self.run_full(source, destination, collection, &mut result, None)
                }
                SyncMode::Incremental => {
                    self.run_incremental(source, destination, collection, &mut result)
                }
                SyncMode::AppendOnly => {
                    self.run_append_only(source, destination, collection, &mut result)
                }
            });

        self.finish(&mut result, outcome);
        source.disconnect();
        destination.disconnect();
        result
    }

    /// Resume an interrupted run from a checkpoint.
    ///
    /// Full and master/slave runs replay exactly the batches after the
    /// checkpointed one. Incremental and append-only runs recompute their
    /// delta from scratch, which already skips everything previously
    /// written, so they simply rerun.
    pub fn resume(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
        checkpoint: &Checkpoint,
    ) -> SyncResult {
        match self.profile.sync_mode {
            SyncMode::Incremental | SyncMode::AppendOnly => {
                return self.sync(source, destination, collection)
            }
            SyncMode::FullSync | SyncMode::MasterSlave => {}
        }

        let mut result = SyncResult::start(self.profile.sync_mode, collection);
        info!(
            profile = %self.profile.name,
            collection,
            batch_index = checkpoint.batch_index,
            "resuming sync run from checkpoint"
        );

        let outcome = self
            .prepare(source, destination, collection)
            .and_then(|()| {
                self.run_full(source, destination, collection, &mut result, Some(checkpoint))
            });

        self.finish(&mut result, outcome);
        source.disconnect();
        destination.disconnect();
        result
    }

    fn prepare(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
    ) -> Result<()> {
        source.connect()?;
        destination.connect()?;

        if !destination.collection_exists(collection) {
            let schema = source.get_schema(collection);
            destination.create_collection(collection, schema.as_ref())?;
            debug!(collection, "created missing destination collection");
        }
        Ok(())
    }

    fn finish(&self, result: &mut SyncResult, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                result.status = if self.cancel.is_cancelled() {
                    SyncStatus::Cancelled
                } else if result.errors.is_empty() {
                    SyncStatus::Success
                } else {
                    SyncStatus::PartialFailure
                };
                result.success = result.errors.is_empty();
            }
            Err(e) => {
                warn!(error = %e, "sync run aborted");
                result.status = SyncStatus::Aborted;
                result.success = false;
                result.error_message = Some(e.to_string());
                result.errors.push(e.to_string());
            }
        }
        result.completed_at = Some(Utc::now());
        info!(
            status = ?result.status,
            read = result.records_read,
            written = result.records_written,
            deleted = result.records_deleted,
            skipped = result.records_skipped,
            failed = result.records_failed,
            "sync run finished"
        );
    }

    fn read_source(
        &self,
        source: &dyn SyncHandler,
        collection: &str,
    ) -> Result<Vec<Record>> {
        source
            .read_records(collection, self.profile.filter(), None, 0, 0)?
            .collect()
    }

    fn read_dest_keys(
        &self,
        destination: &dyn SyncHandler,
        collection: &str,
    ) -> Result<BTreeSet<RecordKey>> {
        let fields = [KEY_FIELD.to_string()];
        let records: Vec<Record> = destination
            .read_records(collection, None, Some(&fields), 0, 0)?
            .collect::<Result<_>>()?;
        Ok(records.iter().map(|r| r.key_owned()).collect())
    }

    fn write_batch(
        &self,
        destination: &mut dyn SyncHandler,
        collection: &str,
        index: usize,
        batch: &[Record],
        result: &mut SyncResult,
    ) {
        let transformed: Vec<Record> = batch
            .iter()
            .map(|r| transform_record(r, &self.profile))
            .collect();

        let (written, errors) =
            destination.write_records(collection, &transformed, self.profile.preserve_key);

        result.records_written += written as u64;
        result.records_failed += (transformed.len() - written) as u64;
        if !errors.is_empty() {
            warn!(
                batch = index,
                failed = errors.len(),
                "record writes failed in batch"
            );
        }
        result.errors.extend(errors);
        result.batches_processed += 1;

        // Checkpoint against the pre-transform key: a profile may rename
        // or drop the key field on write, and resume needs the source key.
        let last_key = batch.last().map(|r| r.key_owned()).unwrap_or_default();
        result
            .checkpoints
            .push(Checkpoint::after_batch(index, last_key, result.records_written));
        debug!(batch = index, written, "batch written");
    }

    fn write_batches(
        &self,
        destination: &mut dyn SyncHandler,
        collection: &str,
        records: &[Record],
        result: &mut SyncResult,
    ) {
        let batches = batch_records(records, self.profile.batch_size);
        for (index, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            self.write_batch(destination, collection, index, batch, result);
        }
    }

    fn run_full(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
        result: &mut SyncResult,
        resume_at: Option<&Checkpoint>,
    ) -> Result<()> {
        let source_records = self.read_source(source, collection)?;
        result.records_read = source_records.len() as u64;

        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let delete_orphans = self.profile.deletes_orphans();
        let dest_keys = if delete_orphans {
            self.read_dest_keys(destination, collection)?
        } else {
            BTreeSet::new()
        };

        match resume_at {
            None => self.write_batches(destination, collection, &source_records, result),
            Some(checkpoint) => {
                let remaining =
                    resume_from(&source_records, self.profile.batch_size, checkpoint);
                for (offset, batch) in remaining.iter().enumerate() {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let index = checkpoint.batch_index + 1 + offset;
                    self.write_batch(destination, collection, index, batch, result);
                }
            }
        }

        if delete_orphans && !self.cancel.is_cancelled() {
            let source_keys: BTreeSet<RecordKey> =
                source_records.iter().map(|r| r.key_owned()).collect();
            let orphans: Vec<RecordKey> =
                find_orphans(&source_keys, &dest_keys).into_iter().collect();
            if !orphans.is_empty() {
                let (deleted, errors) = destination.delete_records(collection, &orphans);
                result.records_deleted += deleted as u64;
                if !errors.is_empty() {
                    warn!(failed = errors.len(), "orphan deletes failed");
                }
                result.errors.extend(errors);
            }
        }

        Ok(())
    }

    fn run_incremental(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
        result: &mut SyncResult,
    ) -> Result<()> {
        let exclude = &self.profile.checksum_exclusions;

        // Destination state up front: checksum plus the record itself,
        // which the conflict resolver needs.
        let dest_records: Vec<Record> = destination
            .read_records(collection, None, None, 0, 0)?
            .collect::<Result<_>>()?;
        let mut dest_state: BTreeMap<RecordKey, (String, Record)> = BTreeMap::new();
        for record in dest_records {
            let digest = record_checksum(&record, exclude)?;
            dest_state.insert(record.key_owned(), (digest, record));
        }

        let source_records = self.read_source(source, collection)?;
        result.records_read = source_records.len() as u64;

        let detected_at = Utc::now();
        let mut to_write: Vec<Record> = Vec::new();
        for record in &source_records {
            if self.cancel.is_cancelled() {
                break;
            }

            match dest_state.get(record.key()) {
                None => to_write.push(record.clone()),
                Some((dest_digest, dest_record)) => {
                    let source_digest = record_checksum(record, exclude)?;
                    if source_digest == *dest_digest {
                        result.records_skipped += 1;
                        continue;
                    }

                    result.conflicts_detected += 1;
                    match resolve(
                        record,
                        dest_record,
                        self.profile.conflict_resolution,
                        &self.profile.timestamp_field,
                        detected_at,
                    ) {
                        Resolution::Apply(resolved) => {
                            result.conflicts_resolved += 1;
                            to_write.push(resolved);
                        }
                        Resolution::Queue(entry) => {
                            debug!(key = %entry.key, "conflict queued for manual review");
                            result.conflicts.push(entry);
                        }
                    }
                }
            }
        }

        self.write_batches(destination, collection, &to_write, result);
        Ok(())
    }

    fn run_append_only(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
        result: &mut SyncResult,
    ) -> Result<()> {
        let dest_keys = self.read_dest_keys(destination, collection)?;

        let source_records = self.read_source(source, collection)?;
        result.records_read = source_records.len() as u64;

        let mut to_add: Vec<Record> = Vec::new();
        for record in &source_records {
            if dest_keys.contains(record.key()) {
                result.records_skipped += 1;
            } else {
                to_add.push(record.clone());
            }
        }

        self.write_batches(destination, collection, &to_add, result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConflictStrategy, MemoryHandler};
    use serde_json::json;

    fn record(key: &str, value: i64) -> Record {
        Record::from_value(json!({"_key": key, "value": value})).unwrap()
    }

    fn seeded_source(count: usize) -> MemoryHandler {
        let mut source = MemoryHandler::new("source");
        let records = (0..count).map(|i| record(&format!("rec-{i:03}"), i as i64)).collect();
        source.seed_collection("items", records);
        source
    }

    #[test]
    fn full_sync_into_empty_destination() {
        let mut source = seeded_source(10);
        let mut dest = MemoryHandler::new("dest");

        let engine = SyncEngine::new(SyncProfile::new("full", SyncMode::FullSync));
        let result = engine.sync(&mut source, &mut dest, "items");

        assert!(result.success);
        assert_eq!(result.status, SyncStatus::Success);
        assert_eq!(result.records_read, 10);
        assert_eq!(result.records_written, 10);
        assert_eq!(result.records_deleted, 0);
        assert_eq!(dest.records("items").len(), 10);
        assert!(!source.is_connected());
        assert!(!dest.is_connected());
    }

    #[test]
    fn connection_failure_aborts_before_writes() {
        let mut source = seeded_source(5);
        let mut dest = MemoryHandler::new("dest");
        dest.fail_connections(true);

        let engine = SyncEngine::new(SyncProfile::new("full", SyncMode::FullSync));
        let result = engine.sync(&mut source, &mut dest, "items");

        assert!(!result.success);
        assert_eq!(result.status, SyncStatus::Aborted);
        assert!(result.error_message.is_some());
        assert_eq!(result.records_written, 0);
        assert!(dest.records("items").is_empty());
    }

    #[test]
    fn checkpoints_follow_batches() {
        let mut source = seeded_source(25);
        let mut dest = MemoryHandler::new("dest");

        let profile = SyncProfile::new("full", SyncMode::FullSync).with_batch_size(10);
        let engine = SyncEngine::new(profile);
        let result = engine.sync(&mut source, &mut dest, "items");

        assert_eq!(result.batches_processed, 3);
        assert_eq!(result.checkpoints.len(), 3);
        assert_eq!(result.checkpoints[0].batch_index, 0);
        assert_eq!(result.checkpoints[0].last_key, "rec-009");
        assert_eq!(result.checkpoints[2].last_key, "rec-024");
        assert_eq!(result.checkpoints[2].records_processed, 25);
    }

    #[test]
    fn checkpoint_key_survives_key_field_mapping() {
        let mut source = seeded_source(4);
        let mut dest = MemoryHandler::new("dest");

        // The destination gets renamed keys, but resume works against the
        // source ordering, so checkpoints must carry the source key.
        let profile = SyncProfile::new("renamed", SyncMode::FullSync)
            .with_field_mapping(crate::KEY_FIELD, "id")
            .with_batch_size(2);
        let engine = SyncEngine::new(profile);
        let result = engine.sync(&mut source, &mut dest, "items");

        assert_eq!(result.checkpoints.len(), 2);
        assert_eq!(result.checkpoints[0].last_key, "rec-001");
        assert_eq!(result.checkpoints[1].last_key, "rec-003");
    }

    #[test]
    fn cancellation_stops_at_batch_boundary() {
        let mut source = seeded_source(30);
        let mut dest = MemoryHandler::new("dest");

        let profile = SyncProfile::new("full", SyncMode::FullSync).with_batch_size(10);
        let engine = SyncEngine::new(profile);
        engine.cancel_token().cancel();

        let result = engine.sync(&mut source, &mut dest, "items");

        assert_eq!(result.status, SyncStatus::Cancelled);
        assert_eq!(result.records_written, 0);
        assert!(dest.records("items").is_empty());
    }

    #[test]
    fn partial_write_failures_do_not_stop_the_run() {
        let mut source = seeded_source(10);
        let mut dest = MemoryHandler::new("dest");
        dest.fail_writes_for("rec-003");
        dest.fail_writes_for("rec-007");

        let profile = SyncProfile::new("full", SyncMode::FullSync).with_batch_size(2);
        let engine = SyncEngine::new(profile);
        let result = engine.sync(&mut source, &mut dest, "items");

        assert!(!result.success);
        assert_eq!(result.status, SyncStatus::PartialFailure);
        assert_eq!(result.records_written, 8);
        assert_eq!(result.records_failed, 2);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.batches_processed, 5);
    }

    #[test]
    fn incremental_skips_unchanged_and_queues_manual_conflicts() {
        let mut source = MemoryHandler::new("source");
        source.seed_collection(
            "items",
            vec![record("same", 1), record("changed", 99), record("new", 3)],
        );

        let mut dest = MemoryHandler::new("dest");
        dest.seed_collection("items", vec![record("same", 1), record("changed", 2)]);

        let profile = SyncProfile::new("inc", SyncMode::Incremental)
            .with_conflict_strategy(ConflictStrategy::ManualReview);
        let engine = SyncEngine::new(profile);
        let result = engine.sync(&mut source, &mut dest, "items");

        assert_eq!(result.records_skipped, 1);
        assert_eq!(result.records_written, 1); // only "new"
        assert_eq!(result.conflicts_detected, 1);
        assert_eq!(result.conflicts_resolved, 0);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].key, "changed");

        // Destination untouched for the queued conflict
        assert_eq!(
            dest.get_record_by_key("items", "changed").unwrap().get("value"),
            Some(&json!(2))
        );
    }

    #[test]
    fn resume_replays_only_remaining_batches() {
        let mut source = seeded_source(30);
        let mut dest = MemoryHandler::new("dest");

        let profile = SyncProfile::new("full", SyncMode::FullSync).with_batch_size(10);
        let engine = SyncEngine::new(profile);

        // Pretend batches 0 and 1 were already confirmed.
        let checkpoint = Checkpoint::after_batch(1, "rec-019", 20);
        let result = engine.resume(&mut source, &mut dest, "items", &checkpoint);

        assert!(result.success);
        assert_eq!(result.records_written, 10);
        assert_eq!(result.batches_processed, 1);
        assert_eq!(result.checkpoints.len(), 1);
        assert_eq!(result.checkpoints[0].batch_index, 2);
        assert_eq!(dest.keys("items"), vec!["rec-020", "rec-021", "rec-022", "rec-023", "rec-024", "rec-025", "rec-026", "rec-027", "rec-028", "rec-029"]);
    }

    #[test]
    fn destination_collection_created_from_source_schema() {
        use crate::{CollectionSchema, FieldDef, FieldType};

        let mut source = seeded_source(3);
        source
            .create_collection(
                "items",
                Some(&CollectionSchema::new(
                    "items",
                    vec![FieldDef::required("value", FieldType::Int)],
                )),
            )
            .unwrap();
        let mut dest = MemoryHandler::new("dest");
        assert!(!dest.collection_exists("items"));

        let engine = SyncEngine::new(SyncProfile::new("full", SyncMode::FullSync));
        let result = engine.sync(&mut source, &mut dest, "items");

        assert!(result.success);
        assert!(dest.collection_exists("items"));
        assert!(dest.get_schema("items").is_some());
    }

    #[test]
    fn filter_applies_at_selection_time() {
        let mut source = MemoryHandler::new("source");
        source.seed_collection(
            "items",
            vec![
                Record::from_value(json!({"_key": "a", "region": "eu"})).unwrap(),
                Record::from_value(json!({"_key": "b", "region": "us"})).unwrap(),
                Record::from_value(json!({"_key": "c", "region": "eu"})).unwrap(),
            ],
        );
        let mut dest = MemoryHandler::new("dest");

        let profile =
            SyncProfile::new("filtered", SyncMode::FullSync).with_filter("region", json!("eu"));
        let engine = SyncEngine::new(profile);
        let result = engine.sync(&mut source, &mut dest, "items");

        assert_eq!(result.records_read, 2);
        assert_eq!(dest.keys("items"), vec!["a", "c"]);
    }
}
