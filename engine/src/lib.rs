//! # MirrorSync Engine
//!
//! A replication and integrity verification engine for keyed record
//! collections.
//!
//! This crate provides the core logic for keeping collections of JSON
//! records consistent between a source of truth and one or more
//! destination stores. It handles content checksums, Merkle collection
//! fingerprints, XOR parity blocks, record transformation, conflict
//! resolution, batched checkpointed replication, and integrity auditing
//! with guaranteed determinism - the same inputs always produce the same
//! outputs.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform;
//!   all storage access goes through the [`SyncHandler`] trait
//! - **Deterministic**: checksums and fingerprints depend only on record
//!   content, never on physical ordering or timing
//! - **Testable**: pure logic plus an in-memory handler, no mocks needed
//! - **Resumable**: one checkpoint per confirmed batch, so an interrupted
//!   run continues where it stopped
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Data is exchanged as flat JSON objects identified by a `_key` field.
//! [`record_checksum`] hashes a record's canonical serialization, and
//! [`merkle_root`] folds per-record checksums into a single collection
//! fingerprint so two stores can be compared without transferring records.
//!
//! ### Sync Modes
//!
//! A [`SyncProfile`] selects one of four modes:
//! - [`SyncMode::FullSync`] - Replicate everything, optionally deleting orphans
//! - [`SyncMode::Incremental`] - Write only records whose checksum changed
//! - [`SyncMode::AppendOnly`] - Add new records, never touch existing ones
//! - [`SyncMode::MasterSlave`] - Full sync with forced orphan deletion
//!
//! ### Conflicts
//!
//! When the same key differs on both sides, a [`ConflictStrategy`] decides:
//! source wins, destination wins, newest timestamp wins, field-level merge,
//! or queue the pair for manual review.
//!
//! ### Integrity
//!
//! The [`Auditor`] probes destinations read-only and reports divergence down
//! to exact keys; the [`Reconciler`] repairs it. [`compute_parity`] and
//! [`recover_block`] add an XOR parity layer for reconstructing one lost
//! checksum block per group.
//!
//! ## Quick Start
//!
//! ```rust
//! use mirrorsync_engine::{
//!     MemoryHandler, Record, SyncEngine, SyncMode, SyncProfile,
//! };
//! use serde_json::json;
//!
//! // 1. Seed a source store
//! let mut source = MemoryHandler::new("primary");
//! source.seed_collection(
//!     "users",
//!     vec![
//!         Record::from_value(json!({"_key": "u1", "name": "Alice"})).unwrap(),
//!         Record::from_value(json!({"_key": "u2", "name": "Bob"})).unwrap(),
//!     ],
//! );
//! let mut replica = MemoryHandler::new("replica");
//!
//! // 2. Run a full sync
//! let profile = SyncProfile::new("nightly", SyncMode::FullSync);
//! let engine = SyncEngine::new(profile);
//! let result = engine.sync(&mut source, &mut replica, "users");
//!
//! assert!(result.success);
//! assert_eq!(result.records_written, 2);
//! assert_eq!(replica.keys("users"), vec!["u1", "u2"]);
//! ```
//!
//! ## Handlers
//!
//! Adapters for real stores implement [`SyncHandler`]. The engine treats a
//! handler as a restartable key-ordered record stream plus batched write
//! and delete entry points that report per-record failures instead of
//! aborting the run.

pub mod audit;
pub mod batch;
pub mod checksum;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod handler;
pub mod memory;
pub mod merkle;
pub mod parity;
pub mod profile;
pub mod record;
pub mod schema;
pub mod transform;

// Re-export main types at crate root
pub use audit::{
    AuditStatus, Auditor, IntegrityReport, ProbeResult, ProbeStatus, ReconcileMode,
    ReconcileOutcome, ReconcilePlan, Reconciler,
};
pub use batch::{batch_records, resume_from, Checkpoint};
pub use checksum::{
    default_exclusions, record_checksum, records_equal, DEFAULT_CHECKSUM_EXCLUSIONS,
};
pub use conflict::{resolve, ConflictEntry, ConflictStrategy, Resolution};
pub use engine::{find_orphans, CancelToken, SyncEngine, SyncResult, SyncStatus};
pub use error::{Error, Result};
pub use handler::{RecordStream, SyncHandler};
pub use memory::MemoryHandler;
pub use merkle::{collection_fingerprint, empty_root, merkle_root};
pub use parity::{checksum_blocks, compute_parity, recover_block, verify_parity};
pub use profile::{FilterQuery, SyncMode, SyncProfile};
pub use record::{Record, KEY_FIELD};
pub use schema::{CollectionSchema, FieldDef, FieldType};
pub use transform::{matches_filter, transform_record};

/// Type aliases for clarity
pub type RecordKey = String;
pub type CollectionName = String;
pub type Fingerprint = String;
