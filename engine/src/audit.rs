//! Integrity auditing and repair.
//!
//! The [`Auditor`] probes destinations without writing anything: it
//! compares record counts and Merkle fingerprints against the source,
//! then drills down to exact key lists when fingerprints disagree. The
//! [`Reconciler`] turns a probe into a repair plan and, in apply mode,
//! executes it and re-probes to confirm convergence.

use crate::{
    checksum::{default_exclusions, record_checksum},
    merkle::merkle_root,
    CollectionName, Record, RecordKey, Result, SyncHandler,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Outcome of probing one destination collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// Counts and fingerprints match.
    Ok,
    /// Reachable but diverged from the source.
    Mismatch,
    /// The collection does not exist at the destination.
    MissingCollection,
    /// The handler could not be reached.
    Unreachable,
    /// The probe itself failed partway.
    Error,
}

/// Comparison of one destination collection against the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Name of the probed destination handler
    pub destination: String,
    /// Collection that was compared
    pub collection: CollectionName,
    /// What the probe concluded
    pub status: ProbeStatus,
    /// Record count at the source
    pub source_count: usize,
    /// Record count at the destination
    pub dest_count: usize,
    /// Merkle fingerprint of the source collection
    pub source_fingerprint: Option<String>,
    /// Merkle fingerprint of the destination collection
    pub dest_fingerprint: Option<String>,
    /// Keys present at the source but not the destination
    pub missing_keys: Vec<RecordKey>,
    /// Keys present at the destination but not the source
    pub extra_keys: Vec<RecordKey>,
    /// Keys present on both sides with differing checksums
    pub mismatched_keys: Vec<RecordKey>,
    /// Why the probe failed, when it did
    pub error_message: Option<String>,
}

impl ProbeResult {
    fn new(destination: &str, collection: &str) -> Self {
        Self {
            destination: destination.to_string(),
            collection: collection.to_string(),
            status: ProbeStatus::Error,
            source_count: 0,
            dest_count: 0,
            source_fingerprint: None,
            dest_fingerprint: None,
            missing_keys: Vec::new(),
            extra_keys: Vec::new(),
            mismatched_keys: Vec::new(),
            error_message: None,
        }
    }

    fn unreachable(destination: &str, collection: &str, reason: String) -> Self {
        let mut result = Self::new(destination, collection);
        result.status = ProbeStatus::Unreachable;
        result.error_message = Some(reason);
        result
    }
}

/// Rolled-up health of a whole audit sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Every probe came back clean.
    Ok,
    /// At least one destination diverged or is missing a collection.
    Degraded,
    /// At least one probe was unreachable or failed outright.
    Error,
    /// Nothing was probed.
    Unknown,
}

/// Report covering every destination and collection of one audit sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// When the sweep ran
    pub generated_at: DateTime<Utc>,
    /// Worst status observed across all probes
    pub overall: AuditStatus,
    /// One entry per destination and collection
    pub probes: Vec<ProbeResult>,
}

impl IntegrityReport {
    fn from_probes(probes: Vec<ProbeResult>) -> Self {
        let overall = if probes.is_empty() {
            AuditStatus::Unknown
        } else if probes
            .iter()
            .any(|p| matches!(p.status, ProbeStatus::Unreachable | ProbeStatus::Error))
        {
            AuditStatus::Error
        } else if probes
            .iter()
            .any(|p| matches!(p.status, ProbeStatus::Mismatch | ProbeStatus::MissingCollection))
        {
            AuditStatus::Degraded
        } else {
            AuditStatus::Ok
        };

        Self {
            generated_at: Utc::now(),
            overall,
            probes,
        }
    }

    /// Human-readable one-line-per-probe summary with short fingerprints.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("integrity audit: {:?}", self.overall)];
        for probe in &self.probes {
            lines.push(format!(
                "  {}/{}: {:?} ({} vs {} records, {} vs {})",
                probe.destination,
                probe.collection,
                probe.status,
                probe.source_count,
                probe.dest_count,
                short(probe.source_fingerprint.as_deref()),
                short(probe.dest_fingerprint.as_deref()),
            ));
        }
        lines.join("\n")
    }
}

fn short(fingerprint: Option<&str>) -> String {
    match fingerprint {
        Some(f) => f.chars().take(12).collect(),
        None => "-".to_string(),
    }
}

/// Read-only integrity prober.
#[derive(Debug, Clone)]
pub struct Auditor {
    checksum_exclusions: BTreeSet<String>,
}

impl Default for Auditor {
    fn default() -> Self {
        Self::new()
    }
}

impl Auditor {
    /// Auditor with the default checksum exclusions.
    pub fn new() -> Self {
        Self {
            checksum_exclusions: default_exclusions(),
        }
    }

    /// Override the fields excluded from record checksums. Must match
    /// the exclusions the sync profile used, or every probe reports a
    /// spurious mismatch.
    pub fn with_exclusions(mut self, exclude: BTreeSet<String>) -> Self {
        self.checksum_exclusions = exclude;
        self
    }

    /// Probe one destination collection. Both handlers must already be
    /// connected; the probe performs reads only.
    pub fn probe(
        &self,
        source: &dyn SyncHandler,
        destination: &dyn SyncHandler,
        collection: &str,
    ) -> ProbeResult {
        let mut result = ProbeResult::new(destination.name(), collection);

        if !destination.collection_exists(collection) {
            result.status = ProbeStatus::MissingCollection;
            return result;
        }

        if let Err(e) = self.compare(source, destination, collection, &mut result) {
            warn!(
                destination = %result.destination,
                collection,
                error = %e,
                "integrity probe failed"
            );
            result.status = ProbeStatus::Error;
            result.error_message = Some(e.to_string());
        }
        result
    }

    /// Probe every collection on every destination and roll the results
    /// up into one report. Handlers are connected for the sweep and
    /// disconnected afterwards; an unreachable handler degrades its own
    /// probes rather than aborting the sweep.
    pub fn audit_all(
        &self,
        source: &mut dyn SyncHandler,
        destinations: &mut [Box<dyn SyncHandler>],
        collections: &[String],
    ) -> IntegrityReport {
        let mut probes = Vec::new();

        if let Err(e) = source.connect() {
            for destination in destinations.iter() {
                for collection in collections {
                    probes.push(ProbeResult::unreachable(
                        destination.name(),
                        collection,
                        format!("source unreachable: {e}"),
                    ));
                }
            }
            return IntegrityReport::from_probes(probes);
        }

        for destination in destinations.iter_mut() {
            match destination.connect() {
                Err(e) => {
                    for collection in collections {
                        probes.push(ProbeResult::unreachable(
                            destination.name(),
                            collection,
                            e.to_string(),
                        ));
                    }
                }
                Ok(()) => {
                    for collection in collections {
                        probes.push(self.probe(source, destination.as_ref(), collection));
                    }
                    destination.disconnect();
                }
            }
        }

        source.disconnect();
        let report = IntegrityReport::from_probes(probes);
        info!(overall = ?report.overall, probes = report.probes.len(), "audit sweep finished");
        report
    }

    fn checksums(
        &self,
        handler: &dyn SyncHandler,
        collection: &str,
    ) -> Result<BTreeMap<RecordKey, String>> {
        let records: Vec<Record> = handler
            .read_records(collection, None, None, 0, 0)?
            .collect::<Result<_>>()?;

        let mut sums = BTreeMap::new();
        for record in records {
            let digest = record_checksum(&record, &self.checksum_exclusions)?;
            sums.insert(record.key_owned(), digest);
        }
        Ok(sums)
    }

    fn compare(
        &self,
        source: &dyn SyncHandler,
        destination: &dyn SyncHandler,
        collection: &str,
        result: &mut ProbeResult,
    ) -> Result<()> {
        let source_sums = self.checksums(source, collection)?;
        let dest_sums = self.checksums(destination, collection)?;

        result.source_count = source_sums.len();
        result.dest_count = dest_sums.len();

        // Per-key checksums are already in key order, so the roots are
        // comparable regardless of each store's physical ordering.
        let source_leaves: Vec<String> = source_sums.values().cloned().collect();
        let dest_leaves: Vec<String> = dest_sums.values().cloned().collect();
        result.source_fingerprint = Some(merkle_root(&source_leaves));
        result.dest_fingerprint = Some(merkle_root(&dest_leaves));

        if result.source_fingerprint == result.dest_fingerprint {
            result.status = ProbeStatus::Ok;
            return Ok(());
        }

        for (key, digest) in &source_sums {
            match dest_sums.get(key) {
                None => result.missing_keys.push(key.clone()),
                Some(dest_digest) if dest_digest != digest => {
                    result.mismatched_keys.push(key.clone())
                }
                Some(_) => {}
            }
        }
        for key in dest_sums.keys() {
            if !source_sums.contains_key(key) {
                result.extra_keys.push(key.clone());
            }
        }

        result.status = ProbeStatus::Mismatch;
        debug!(
            destination = %result.destination,
            collection,
            missing = result.missing_keys.len(),
            extra = result.extra_keys.len(),
            mismatched = result.mismatched_keys.len(),
            "fingerprint mismatch"
        );
        Ok(())
    }
}

/// Whether a reconcile run writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Build the plan but touch nothing.
    DryRun,
    /// Execute the plan and re-probe.
    Apply,
}

/// The exact repairs a probe calls for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePlan {
    /// Destination handler the plan targets
    pub destination: String,
    /// Collection the plan targets
    pub collection: CollectionName,
    /// Keys to copy from the source (absent at the destination)
    pub copy: Vec<RecordKey>,
    /// Keys to overwrite with the source version (checksum mismatch)
    pub overwrite: Vec<RecordKey>,
    /// Keys to delete at the destination (absent at the source)
    pub delete: Vec<RecordKey>,
}

impl ReconcilePlan {
    /// True when nothing needs repairing.
    pub fn is_empty(&self) -> bool {
        self.copy.is_empty() && self.overwrite.is_empty() && self.delete.is_empty()
    }
}

/// What a reconcile run did (or would do).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// Mode the run executed
    pub mode: ReconcileMode,
    /// The repair plan that was built
    pub plan: ReconcilePlan,
    /// Records copied to the destination
    pub records_copied: usize,
    /// Records overwritten at the destination
    pub records_overwritten: usize,
    /// Records deleted at the destination
    pub records_deleted: usize,
    /// Errors hit while applying the plan
    pub errors: Vec<String>,
    /// Probe status after the run (the initial probe for dry runs)
    pub post_status: ProbeStatus,
    /// Whether the destination matches the source after the run
    pub converged: bool,
}

/// Repairs a diverged destination from the source of truth.
///
/// The source is never written to; repairs flow in one direction only.
#[derive(Debug, Clone)]
pub struct Reconciler {
    auditor: Auditor,
    mode: ReconcileMode,
    delete_extras: bool,
}

impl Reconciler {
    /// Reconciler that copies, overwrites, and deletes extras by default.
    pub fn new(auditor: Auditor, mode: ReconcileMode) -> Self {
        Self {
            auditor,
            mode,
            delete_extras: true,
        }
    }

    /// Whether destination-only records are deleted. When off, extras are
    /// left in place and a collection holding any cannot converge.
    pub fn with_delete_extras(mut self, delete_extras: bool) -> Self {
        self.delete_extras = delete_extras;
        self
    }

    /// Probe, plan, and (in apply mode) repair one collection, then
    /// re-probe to confirm convergence. Handlers are connected for the
    /// run and disconnected afterwards.
    pub fn reconcile(
        &self,
        source: &mut dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome {
            mode: self.mode,
            plan: ReconcilePlan {
                destination: destination.name().to_string(),
                collection: collection.to_string(),
                ..ReconcilePlan::default()
            },
            records_copied: 0,
            records_overwritten: 0,
            records_deleted: 0,
            errors: Vec::new(),
            post_status: ProbeStatus::Error,
            converged: false,
        };

        if let Err(e) = source.connect().and_then(|()| destination.connect()) {
            source.disconnect();
            destination.disconnect();
            outcome.post_status = ProbeStatus::Unreachable;
            outcome.errors.push(e.to_string());
            return outcome;
        }

        let probe = self.auditor.probe(source, destination, collection);
        self.plan_from_probe(source, collection, &probe, &mut outcome);
        info!(
            destination = %outcome.plan.destination,
            collection,
            copy = outcome.plan.copy.len(),
            overwrite = outcome.plan.overwrite.len(),
            delete = outcome.plan.delete.len(),
            mode = ?self.mode,
            "reconcile plan built"
        );

        match self.mode {
            ReconcileMode::DryRun => {
                outcome.post_status = probe.status;
                outcome.converged = probe.status == ProbeStatus::Ok;
            }
            ReconcileMode::Apply => {
                self.apply(source, destination, collection, &probe, &mut outcome);
                let post = self.auditor.probe(source, destination, collection);
                outcome.post_status = post.status;
                outcome.converged = post.status == ProbeStatus::Ok;
            }
        }

        source.disconnect();
        destination.disconnect();
        outcome
    }

    fn plan_from_probe(
        &self,
        source: &dyn SyncHandler,
        collection: &str,
        probe: &ProbeResult,
        outcome: &mut ReconcileOutcome,
    ) {
        match probe.status {
            ProbeStatus::MissingCollection => {
                // Everything at the source needs copying.
                match source.read_records(collection, None, None, 0, 0) {
                    Ok(stream) => {
                        for record in stream {
                            match record {
                                Ok(r) => outcome.plan.copy.push(r.key_owned()),
                                Err(e) => outcome.errors.push(e.to_string()),
                            }
                        }
                    }
                    Err(e) => outcome.errors.push(e.to_string()),
                }
            }
            _ => {
                outcome.plan.copy = probe.missing_keys.clone();
                outcome.plan.overwrite = probe.mismatched_keys.clone();
                if self.delete_extras {
                    outcome.plan.delete = probe.extra_keys.clone();
                }
            }
        }
    }

    fn apply(
        &self,
        source: &dyn SyncHandler,
        destination: &mut dyn SyncHandler,
        collection: &str,
        probe: &ProbeResult,
        outcome: &mut ReconcileOutcome,
    ) {
        if probe.status == ProbeStatus::MissingCollection {
            let schema = source.get_schema(collection);
            if let Err(e) = destination.create_collection(collection, schema.as_ref()) {
                outcome.errors.push(e.to_string());
                return;
            }
        }

        let fetch = |keys: &[RecordKey], errors: &mut Vec<String>| -> Vec<Record> {
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                match source.get_record_by_key(collection, key) {
                    Some(record) => records.push(record),
                    None => errors.push(format!("source record vanished: {key}")),
                }
            }
            records
        };

        let copies = fetch(&outcome.plan.copy, &mut outcome.errors);
        let (written, errors) = destination.write_records(collection, &copies, true);
        outcome.records_copied = written;
        outcome.errors.extend(errors);

        let overwrites = fetch(&outcome.plan.overwrite, &mut outcome.errors);
        let (written, errors) = destination.write_records(collection, &overwrites, true);
        outcome.records_overwritten = written;
        outcome.errors.extend(errors);

        if !outcome.plan.delete.is_empty() {
            let (deleted, errors) = destination.delete_records(collection, &outcome.plan.delete);
            outcome.records_deleted = deleted;
            outcome.errors.extend(errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryHandler;
    use serde_json::json;

    fn record(key: &str, value: i64) -> Record {
        Record::from_value(json!({"_key": key, "value": value})).unwrap()
    }

    fn pair() -> (MemoryHandler, MemoryHandler) {
        let mut source = MemoryHandler::new("source");
        source.seed_collection("items", vec![record("a", 1), record("b", 2), record("c", 3)]);
        let mut dest = MemoryHandler::new("replica");
        dest.seed_collection("items", vec![record("a", 1), record("b", 2), record("c", 3)]);
        (source, dest)
    }

    #[test]
    fn identical_collections_probe_ok() {
        let (source, dest) = pair();
        let auditor = Auditor::new();

        let probe = auditor.probe(&source, &dest, "items");

        assert_eq!(probe.status, ProbeStatus::Ok);
        assert_eq!(probe.source_count, 3);
        assert_eq!(probe.dest_count, 3);
        assert_eq!(probe.source_fingerprint, probe.dest_fingerprint);
        assert!(probe.missing_keys.is_empty());
    }

    #[test]
    fn divergence_is_localized_to_keys() {
        let (source, mut dest) = pair();
        dest.seed_collection(
            "items",
            vec![record("a", 1), record("b", 99), record("d", 4)],
        );
        let auditor = Auditor::new();

        let probe = auditor.probe(&source, &dest, "items");

        assert_eq!(probe.status, ProbeStatus::Mismatch);
        assert_eq!(probe.missing_keys, vec!["c"]);
        assert_eq!(probe.extra_keys, vec!["d"]);
        assert_eq!(probe.mismatched_keys, vec!["b"]);
        assert_ne!(probe.source_fingerprint, probe.dest_fingerprint);
    }

    #[test]
    fn missing_collection_is_reported() {
        let (source, _) = pair();
        let dest = MemoryHandler::new("replica");
        let auditor = Auditor::new();

        let probe = auditor.probe(&source, &dest, "items");
        assert_eq!(probe.status, ProbeStatus::MissingCollection);
    }

    #[test]
    fn audit_all_rolls_up_worst_status() {
        let (mut source, healthy) = pair();
        let mut diverged = MemoryHandler::new("diverged");
        diverged.seed_collection("items", vec![record("a", 1)]);
        let mut unreachable = MemoryHandler::new("offline");
        unreachable.fail_connections(true);

        let mut destinations: Vec<Box<dyn SyncHandler>> = vec![
            Box::new(healthy),
            Box::new(diverged),
            Box::new(unreachable),
        ];
        let auditor = Auditor::new();
        let report = auditor.audit_all(&mut source, &mut destinations, &["items".to_string()]);

        assert_eq!(report.overall, AuditStatus::Error);
        assert_eq!(report.probes.len(), 3);
        assert_eq!(report.probes[0].status, ProbeStatus::Ok);
        assert_eq!(report.probes[1].status, ProbeStatus::Mismatch);
        assert_eq!(report.probes[2].status, ProbeStatus::Unreachable);
        assert!(report.summary().contains("offline"));
    }

    #[test]
    fn audit_all_without_probes_is_unknown() {
        let (mut source, _) = pair();
        let mut destinations: Vec<Box<dyn SyncHandler>> = Vec::new();
        let report = Auditor::new().audit_all(&mut source, &mut destinations, &[]);
        assert_eq!(report.overall, AuditStatus::Unknown);
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let (mut source, mut dest) = pair();
        dest.seed_collection("items", vec![record("a", 1), record("x", 9)]);

        let reconciler = Reconciler::new(Auditor::new(), ReconcileMode::DryRun);
        let outcome = reconciler.reconcile(&mut source, &mut dest, "items");

        assert_eq!(outcome.plan.copy, vec!["b", "c"]);
        assert_eq!(outcome.plan.delete, vec!["x"]);
        assert_eq!(outcome.records_copied, 0);
        assert_eq!(outcome.records_deleted, 0);
        assert!(!outcome.converged);
        assert!(dest.get_record_by_key("items", "x").is_some());
    }

    #[test]
    fn apply_converges_a_diverged_replica() {
        let (mut source, mut dest) = pair();
        dest.seed_collection(
            "items",
            vec![record("a", 1), record("b", 99), record("x", 9)],
        );

        let reconciler = Reconciler::new(Auditor::new(), ReconcileMode::Apply);
        let outcome = reconciler.reconcile(&mut source, &mut dest, "items");

        assert!(outcome.converged);
        assert_eq!(outcome.post_status, ProbeStatus::Ok);
        assert_eq!(outcome.records_copied, 1); // "c"
        assert_eq!(outcome.records_overwritten, 1); // "b"
        assert_eq!(outcome.records_deleted, 1); // "x"
        assert!(outcome.errors.is_empty());
        assert_eq!(dest.keys("items"), vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_extras_off_preserves_destination_only_records() {
        let (mut source, mut dest) = pair();
        dest.seed_collection(
            "items",
            vec![record("a", 1), record("b", 99), record("local-note", 7)],
        );

        let reconciler = Reconciler::new(Auditor::new(), ReconcileMode::Apply)
            .with_delete_extras(false);
        let outcome = reconciler.reconcile(&mut source, &mut dest, "items");

        // Missing and mismatched keys are still repaired.
        assert_eq!(outcome.records_copied, 1); // "c"
        assert_eq!(outcome.records_overwritten, 1); // "b"
        assert!(outcome.plan.delete.is_empty());
        assert_eq!(outcome.records_deleted, 0);
        assert!(dest.get_record_by_key("items", "local-note").is_some());
        // The surviving extra keeps the replica diverged.
        assert!(!outcome.converged);
        assert_eq!(outcome.post_status, ProbeStatus::Mismatch);
    }

    #[test]
    fn delete_extras_on_by_default() {
        let (mut source, mut dest) = pair();
        dest.seed_collection("items", vec![record("a", 1), record("extra", 0)]);

        let outcome = Reconciler::new(Auditor::new(), ReconcileMode::Apply)
            .reconcile(&mut source, &mut dest, "items");

        assert_eq!(outcome.records_deleted, 1);
        assert!(dest.get_record_by_key("items", "extra").is_none());
        assert!(outcome.converged);
    }

    #[test]
    fn unreachable_destination_releases_the_source_connection() {
        let (mut source, mut dest) = pair();
        dest.fail_connections(true);

        let reconciler = Reconciler::new(Auditor::new(), ReconcileMode::Apply);
        let outcome = reconciler.reconcile(&mut source, &mut dest, "items");

        assert_eq!(outcome.post_status, ProbeStatus::Unreachable);
        assert!(!outcome.errors.is_empty());
        assert!(!source.is_connected());
        assert!(!dest.is_connected());
    }

    #[test]
    fn apply_creates_a_missing_collection() {
        let (mut source, _) = pair();
        let mut dest = MemoryHandler::new("replica");

        let reconciler = Reconciler::new(Auditor::new(), ReconcileMode::Apply);
        let outcome = reconciler.reconcile(&mut source, &mut dest, "items");

        assert!(outcome.converged);
        assert_eq!(outcome.records_copied, 3);
        assert_eq!(dest.keys("items"), vec!["a", "b", "c"]);
    }
}
