//! Sync profiles - per-run configuration.
//!
//! A profile is immutable during a run: the engine clones what it needs up
//! front and never re-reads caller state mid-flight.

use crate::{checksum, conflict::ConflictStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A conjunction of field = value equality constraints, applied at
/// selection time when reading from a source.
pub type FilterQuery = BTreeMap<String, serde_json::Value>;

/// Synchronization modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replace destination content with source content.
    #[default]
    FullSync,
    /// Write only new or changed records, resolving conflicts; never delete.
    Incremental,
    /// Write only records whose key is absent at the destination.
    AppendOnly,
    /// Full sync with orphan deletion forced on; source is authoritative.
    MasterSlave,
}

/// Configuration for a single sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProfile {
    /// Profile name, for logs and results
    pub name: String,
    /// Which sync mode to run
    pub sync_mode: SyncMode,
    /// How to resolve divergent records when both sides hold a key
    pub conflict_resolution: ConflictStrategy,
    /// Maximum records per written batch
    pub batch_size: usize,
    /// Whether full sync deletes destination keys absent from source
    pub delete_orphans: bool,
    /// Whether destination writes keep the source primary key
    pub preserve_key: bool,
    /// Field compared numerically by the newest-wins strategy
    pub timestamp_field: String,
    /// Rename fields on write: source name -> destination name
    pub field_mappings: BTreeMap<String, String>,
    /// Fields dropped before writing
    pub field_exclusions: BTreeSet<String>,
    /// Selection-time filter; failing records never enter the pipeline
    pub filter_query: FilterQuery,
    /// Fields ignored when fingerprinting records
    pub checksum_exclusions: BTreeSet<String>,
}

impl SyncProfile {
    /// Create a profile with defaults: batch size 1000, source-wins
    /// conflicts, keys preserved, no orphan deletion.
    pub fn new(name: impl Into<String>, sync_mode: SyncMode) -> Self {
        Self {
            name: name.into(),
            sync_mode,
            conflict_resolution: ConflictStrategy::default(),
            batch_size: 1000,
            delete_orphans: false,
            preserve_key: true,
            timestamp_field: "_updated".to_string(),
            field_mappings: BTreeMap::new(),
            field_exclusions: BTreeSet::new(),
            filter_query: FilterQuery::new(),
            checksum_exclusions: checksum::default_exclusions(),
        }
    }

    /// Builder-style: set the conflict resolution strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_resolution = strategy;
        self
    }

    /// Builder-style: set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder-style: enable or disable orphan deletion.
    pub fn with_delete_orphans(mut self, delete_orphans: bool) -> Self {
        self.delete_orphans = delete_orphans;
        self
    }

    /// Builder-style: set the timestamp field for newest-wins resolution.
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    /// Builder-style: rename a field on write.
    pub fn with_field_mapping(
        mut self,
        source: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        self.field_mappings.insert(source.into(), dest.into());
        self
    }

    /// Builder-style: drop a field on write.
    pub fn with_field_exclusion(mut self, field: impl Into<String>) -> Self {
        self.field_exclusions.insert(field.into());
        self
    }

    /// Builder-style: add an equality constraint to the selection filter.
    pub fn with_filter(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.filter_query.insert(field.into(), value);
        self
    }

    /// The query passed to source reads, or `None` when no filter is set.
    pub fn filter(&self) -> Option<&FilterQuery> {
        if self.filter_query.is_empty() {
            None
        } else {
            Some(&self.filter_query)
        }
    }

    /// Whether this run deletes orphans. Master/slave forces it on.
    pub fn deletes_orphans(&self) -> bool {
        self.delete_orphans || self.sync_mode == SyncMode::MasterSlave
    }
}
