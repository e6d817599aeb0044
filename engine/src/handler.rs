//! The handler contract between the engine and concrete stores.
//!
//! The engine performs no network I/O itself; all blocking happens inside
//! the injected source and destination handlers. Protocol adapters (REST,
//! database-wire, object storage, log ingestion, filesystem export) each
//! implement this trait independently and the engine never branches on
//! destination type.

use crate::{error::Result, profile::FilterQuery, CollectionSchema, Record};

/// A lazy, finite stream of records from one read call.
///
/// Every call to [`SyncHandler::read_records`] returns a fresh stream, so
/// source iteration is restartable per destination run.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Capability interface every source or destination store must satisfy.
///
/// Write and delete report per-record failures as `(count, errors)` pairs
/// rather than aborting: the engine collects them as partial failures and
/// keeps going. Connection-level problems surface as `Err` and abort a run
/// before any writes.
pub trait SyncHandler {
    /// Stable name for logs, results, and reports.
    fn name(&self) -> &str;

    /// Establish the connection. Idempotent when already connected.
    fn connect(&mut self) -> Result<()>;

    /// Close the connection. Never fails.
    fn disconnect(&mut self);

    /// Whether the handler currently holds a connection.
    fn is_connected(&self) -> bool;

    /// Probe the connection without establishing state the engine relies
    /// on. Returns success plus a human-readable message.
    fn test_connection(&mut self) -> (bool, String);

    /// Whether a collection exists at this store.
    fn collection_exists(&self, collection: &str) -> bool;

    /// Create a collection, optionally from a source schema.
    fn create_collection(
        &mut self,
        collection: &str,
        schema: Option<&CollectionSchema>,
    ) -> Result<()>;

    /// Fetch the schema of a collection, if the store tracks one.
    fn get_schema(&self, collection: &str) -> Option<CollectionSchema>;

    /// Read records from a collection.
    ///
    /// `query` is a conjunction of field equality constraints applied at
    /// the store, `fields` an optional projection, `skip`/`limit` a window
    /// (`limit == 0` means unbounded). Iteration order must be stable per
    /// read for checkpointing to be meaningful.
    fn read_records(
        &self,
        collection: &str,
        query: Option<&FilterQuery>,
        fields: Option<&[String]>,
        skip: usize,
        limit: usize,
    ) -> Result<RecordStream<'_>>;

    /// Write a batch of records. Each record either fully replaces the
    /// stored record with its key or fails; partial field writes never
    /// happen. When `preserve_key` is false the store assigns fresh keys.
    ///
    /// Returns the number written and one message per failed record.
    fn write_records(
        &mut self,
        collection: &str,
        records: &[Record],
        preserve_key: bool,
    ) -> (usize, Vec<String>);

    /// Replace a single record by key.
    fn update_record(&mut self, collection: &str, key: &str, record: &Record) -> Result<()>;

    /// Delete records by key. Returns the number deleted and one message
    /// per failed key.
    fn delete_records(&mut self, collection: &str, keys: &[String]) -> (usize, Vec<String>);

    /// Count records, optionally restricted by a query.
    fn get_record_count(&self, collection: &str, query: Option<&FilterQuery>) -> Result<usize>;

    /// Fetch a single record by key.
    fn get_record_by_key(&self, collection: &str, key: &str) -> Option<Record>;
}
