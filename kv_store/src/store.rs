//! The key-value contract and an in-memory implementation

use crate::KvError;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A sorted, string-keyed store
///
/// This is the only persistence surface the kernel consumes. Implementations
/// that group writes into transactions override the transaction hooks; the
/// defaults describe an auto-commit engine where every write is durable on
/// its own.
pub trait KeyValueStore: Send {
    /// Returns the value for `key`, if any
    fn get(&self, key: &str) -> Option<String>;

    /// Returns the value for `key`, failing if it is absent
    fn get_required(&self, key: &str) -> Result<String, KvError> {
        self.get(key)
            .ok_or_else(|| KvError::MissingKey(key.to_string()))
    }

    /// Returns the smallest key strictly greater than `previous_key`
    fn get_next_key(&self, previous_key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str);

    fn delete(&mut self, key: &str);

    /// Starts grouping writes
    fn begin_transaction(&mut self) -> Result<(), KvError> {
        Ok(())
    }

    /// Makes grouped writes durable
    fn commit_transaction(&mut self) -> Result<(), KvError> {
        Ok(())
    }

    /// Discards grouped writes
    fn rollback_transaction(&mut self) -> Result<(), KvError> {
        Ok(())
    }
}

/// Returns the first key after `previous_key` in a sorted map.
pub(crate) fn next_key_in(map: &BTreeMap<String, String>, previous_key: &str) -> Option<String> {
    map.range::<str, _>((Bound::Excluded(previous_key), Bound::Unbounded))
        .next()
        .map(|(key, _)| key.clone())
}

/// Auto-commit store held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: BTreeMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every entry in key order (for testing).
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn get_next_key(&self, previous_key: &str) -> Option<String> {
        next_key_in(&self.entries, previous_key)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn delete(&mut self, key: &str) {
        self.entries.remove(key);
    }
}
