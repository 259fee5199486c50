//! Record store abstraction.
//!
//! Sessions persist through a minimal blocking key/value contract so the host
//! can back them with any durable store. Keys are the rendered
//! [`RecordKey`](crate::RecordKey) strings; values are JSON.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;

/// Trait for durable record stores.
///
/// All calls are blocking. Failures are reported as
/// [`Error::Store`](crate::Error::Store) and are fatal to the caller.
pub trait RecordStore: Send + Sync {
    /// Load a record. Returns `Ok(None)` if it doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Insert a record if absent.
    ///
    /// Returns `false` and leaves the existing value untouched when the key
    /// is already present.
    fn create(&self, key: &str, value: &Value) -> Result<bool>;

    /// Insert or overwrite a record.
    fn update(&self, key: &str, value: &Value) -> Result<()>;

    /// Delete a record. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Delete many records as a single batch. Returns how many existed.
    fn delete_many(&self, keys: &[String]) -> Result<usize>;

    /// List every record whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

/// Per-operation call counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub scans: usize,
}

impl OpCounts {
    /// Calls that can modify the store.
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    scans: AtomicUsize,
}

/// In-process record store.
///
/// Counts every call so callers can assert how many reads and writes a
/// session lifecycle costs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Value>>,
    counters: Counters,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn ops(&self) -> OpCounts {
        OpCounts {
            gets: self.counters.gets.load(Ordering::Relaxed),
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            scans: self.counters.scans.load(Ordering::Relaxed),
        }
    }

    /// Reset the call counters (records are kept).
    pub fn reset_ops(&self) {
        for counter in [
            &self.counters.gets,
            &self.counters.creates,
            &self.counters.updates,
            &self.counters.deletes,
            &self.counters.scans,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Read a record without counting the access.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.records.read().get(key).cloned()
    }

    /// Check whether a record exists, without counting the access.
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.read().get(key).cloned())
    }

    fn create(&self, key: &str, value: &Value) -> Result<bool> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.write();
        if records.contains_key(key) {
            trace!(key = %key, "Record already exists, create skipped");
            return Ok(false);
        }
        records.insert(key.to_string(), value.clone());
        Ok(true)
    }

    fn update(&self, key: &str, value: &Value) -> Result<()> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        self.records.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.write().remove(key).is_some())
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.write();
        Ok(keys.iter().filter(|k| records.remove(*k).is_some()).count())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        let records = self.records.read();
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
