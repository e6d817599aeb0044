//! In-memory handler: an embedded store satisfying [`SyncHandler`].
//!
//! Backs the test suites and works as a lightweight embedded destination.
//! Collections are `BTreeMap`s keyed by record key, so read iteration is
//! always in key order. Fault injection hooks simulate unreachable stores
//! and per-record write/delete failures.

use crate::{
    error::Result, handler::RecordStream, profile::FilterQuery, transform::matches_filter,
    CollectionSchema, Error, Record, SyncHandler, KEY_FIELD,
};
use std::collections::{BTreeMap, BTreeSet};

/// An in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryHandler {
    name: String,
    connected: bool,
    fail_connect: bool,
    fail_write_keys: BTreeSet<String>,
    fail_delete_keys: BTreeSet<String>,
    auto_key: u64,
    collections: BTreeMap<String, BTreeMap<String, Record>>,
    schemas: BTreeMap<String, CollectionSchema>,
}

impl MemoryHandler {
    /// Create an empty handler.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Make subsequent connection attempts fail.
    pub fn fail_connections(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    /// Make writes for a specific key fail.
    pub fn fail_writes_for(&mut self, key: impl Into<String>) {
        self.fail_write_keys.insert(key.into());
    }

    /// Make deletes for a specific key fail.
    pub fn fail_deletes_for(&mut self, key: impl Into<String>) {
        self.fail_delete_keys.insert(key.into());
    }

    /// Create a collection and fill it with records, replacing any
    /// previous content. Records keep their own keys.
    pub fn seed_collection(&mut self, collection: impl Into<String>, records: Vec<Record>) {
        let map = records
            .into_iter()
            .map(|r| (r.key_owned(), r))
            .collect();
        self.collections.insert(collection.into(), map);
    }

    /// All records of a collection in key order. Empty for an unknown
    /// collection.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.collections
            .get(collection)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys of a collection in order.
    pub fn keys(&self, collection: &str) -> Vec<String> {
        self.collections
            .get(collection)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn next_auto_key(&mut self) -> String {
        self.auto_key += 1;
        format!("auto-{}", self.auto_key)
    }

    fn project(record: &Record, fields: Option<&[String]>) -> Record {
        match fields {
            None => record.clone(),
            Some(fields) => Record::from_fields(
                record
                    .fields()
                    .filter(|(name, _)| fields.iter().any(|f| f == *name))
                    .map(|(name, value)| (name.clone(), value.clone())),
            ),
        }
    }
}

impl SyncHandler for MemoryHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(Error::ConnectionFailed {
                handler: self.name.clone(),
                reason: "simulated connection failure".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn test_connection(&mut self) -> (bool, String) {
        if self.fail_connect {
            (false, "simulated connection failure".to_string())
        } else {
            (true, "ok".to_string())
        }
    }

    fn collection_exists(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    fn create_collection(
        &mut self,
        collection: &str,
        schema: Option<&CollectionSchema>,
    ) -> Result<()> {
        self.collections
            .entry(collection.to_string())
            .or_default();
        if let Some(schema) = schema {
            self.schemas.insert(collection.to_string(), schema.clone());
        }
        Ok(())
    }

    fn get_schema(&self, collection: &str) -> Option<CollectionSchema> {
        self.schemas.get(collection).cloned()
    }

    fn read_records(
        &self,
        collection: &str,
        query: Option<&FilterQuery>,
        fields: Option<&[String]>,
        skip: usize,
        limit: usize,
    ) -> Result<RecordStream<'_>> {
        let map = self
            .collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let selected: Vec<Record> = map
            .values()
            .filter(|record| query.map_or(true, |q| matches_filter(record, q)))
            .skip(skip)
            .take(if limit == 0 { usize::MAX } else { limit })
            .map(|record| Self::project(record, fields))
            .collect();

        Ok(Box::new(selected.into_iter().map(Ok)))
    }

    fn write_records(
        &mut self,
        collection: &str,
        records: &[Record],
        preserve_key: bool,
    ) -> (usize, Vec<String>) {
        let mut written = 0;
        let mut errors = Vec::new();

        for record in records {
            let key = if preserve_key && !record.key().is_empty() {
                record.key_owned()
            } else {
                self.next_auto_key()
            };

            if self.fail_write_keys.contains(&key) {
                errors.push(format!("write failed for key '{key}'"));
                continue;
            }

            if let Some(schema) = self.schemas.get(collection) {
                if let Err(e) = schema.validate_record(record) {
                    errors.push(format!("invalid record '{key}': {e}"));
                    continue;
                }
            }

            let mut stored = record.clone();
            stored.insert(KEY_FIELD, serde_json::Value::String(key.clone()));
            self.collections
                .entry(collection.to_string())
                .or_default()
                .insert(key, stored);
            written += 1;
        }

        (written, errors)
    }

    fn update_record(&mut self, collection: &str, key: &str, record: &Record) -> Result<()> {
        let map = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        if !map.contains_key(key) {
            return Err(Error::RecordNotFound(key.to_string()));
        }

        let mut stored = record.clone();
        stored.insert(KEY_FIELD, serde_json::Value::String(key.to_string()));
        map.insert(key.to_string(), stored);
        Ok(())
    }

    fn delete_records(&mut self, collection: &str, keys: &[String]) -> (usize, Vec<String>) {
        let Some(map) = self.collections.get_mut(collection) else {
            return (0, vec![format!("collection not found: {collection}")]);
        };

        let mut deleted = 0;
        let mut errors = Vec::new();
        for key in keys {
            if self.fail_delete_keys.contains(key) {
                errors.push(format!("delete failed for key '{key}'"));
                continue;
            }
            if map.remove(key).is_some() {
                deleted += 1;
            } else {
                errors.push(format!("record not found: {key}"));
            }
        }

        (deleted, errors)
    }

    fn get_record_count(&self, collection: &str, query: Option<&FilterQuery>) -> Result<usize> {
        let map = self
            .collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        Ok(match query {
            None => map.len(),
            Some(q) => map.values().filter(|r| matches_filter(r, q)).count(),
        })
    }

    fn get_record_by_key(&self, collection: &str, key: &str) -> Option<Record> {
        self.collections.get(collection)?.get(key).cloned()
    }
}
