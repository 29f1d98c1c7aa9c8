//! Journaled key-value store with crash-consistent recovery.
//!
//! Every write is appended to a journal tagged with its transaction. Only
//! transactions followed by a `Commit` entry survive [`JournaledKvStore::recover`],
//! so a crash in the middle of a multi-step kernel mutation leaves the store
//! exactly as it was before the mutation began.

use crate::store::next_key_in;
use crate::transaction::{Transaction, TransactionError, TransactionId};
use crate::{KeyValueStore, KvError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

/// Journal length below which the store never compacts on its own.
const COMPACT_MIN_ENTRIES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum JournalEntry {
    Set {
        tx_id: TransactionId,
        key: String,
        value: String,
    },
    Delete {
        tx_id: TransactionId,
        key: String,
    },
    Commit {
        tx_id: TransactionId,
    },
}

impl JournalEntry {
    fn tx_id(&self) -> TransactionId {
        match self {
            JournalEntry::Set { tx_id, .. }
            | JournalEntry::Delete { tx_id, .. }
            | JournalEntry::Commit { tx_id } => *tx_id,
        }
    }
}

/// Journaled store with an optional backing file.
///
/// Writes outside an explicit transaction commit immediately. Inside a
/// transaction, writes land in an overlay that reads observe and that
/// [`KeyValueStore::rollback_transaction`] discards.
///
/// Once the journal holds more than twice as many entries as there are live
/// keys (and at least `COMPACT_MIN_ENTRIES`), it is rewritten as a single
/// snapshot the next time no transaction is open.
#[derive(Debug, Clone, Default)]
pub struct JournaledKvStore {
    committed: BTreeMap<String, String>,
    overlay: BTreeMap<String, Option<String>>,
    active: Option<Transaction>,
    journal: Vec<JournalEntry>,
    next_tx: u64,
    path: Option<PathBuf>,
}

impl JournaledKvStore {
    pub fn new() -> Self {
        Self {
            next_tx: 1,
            ..Self::default()
        }
    }

    /// Opens a store backed by `path`, recovering from the journal there if
    /// the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref();
        let mut store = if path.exists() {
            let bytes = fs::read(path).map_err(|e| KvError::Io(e.to_string()))?;
            let entries: Vec<JournalEntry> =
                serde_json::from_slice(&bytes).map_err(|e| KvError::Codec(e.to_string()))?;
            Self::from_journal(entries)
        } else {
            Self::new()
        };
        store.path = Some(path.to_path_buf());
        log::debug!(
            "opened journaled store at {} with {} keys",
            path.display(),
            store.committed.len()
        );
        Ok(store)
    }

    /// Reconstructs the store from a journal snapshot.
    ///
    /// This simulates a restart where journal entries were persisted externally.
    pub fn from_journal(entries: Vec<JournalEntry>) -> Self {
        let next_tx = entries
            .iter()
            .map(|entry| entry.tx_id().as_u64())
            .max()
            .unwrap_or(0)
            + 1;
        let mut store = Self {
            journal: entries,
            next_tx,
            ..Self::default()
        };
        store.recover();
        store
    }

    /// Rebuilds committed state from the journal, ignoring transactions that
    /// never committed.
    pub fn recover(&mut self) {
        let committed: BTreeSet<TransactionId> = self
            .journal
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Commit { tx_id } => Some(*tx_id),
                _ => None,
            })
            .collect();

        self.committed.clear();
        self.overlay.clear();
        self.active = None;
        for entry in &self.journal {
            if !committed.contains(&entry.tx_id()) {
                continue;
            }
            match entry {
                JournalEntry::Set { key, value, .. } => {
                    self.committed.insert(key.clone(), value.clone());
                }
                JournalEntry::Delete { key, .. } => {
                    self.committed.remove(key);
                }
                JournalEntry::Commit { .. } => {}
            }
        }
    }

    /// Returns the journal entries (for testing).
    pub fn journal_entries(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// Returns a clone of the journal entries.
    pub fn journal_clone(&self) -> Vec<JournalEntry> {
        self.journal.clone()
    }

    /// Returns whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.active.is_some()
    }

    /// Writes the journal to the backing file, if there is one.
    pub fn flush(&self) -> Result<(), KvError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&self.journal).map_err(|e| KvError::Codec(e.to_string()))?;
        fs::write(path, bytes).map_err(|e| KvError::Io(e.to_string()))
    }

    /// Replaces the journal with a single committed snapshot of current state.
    pub fn compact(&mut self) -> Result<(), KvError> {
        if let Some(tx) = &self.active {
            return Err(TransactionError::AlreadyActive(tx.id()).into());
        }
        self.rewrite_journal();
        self.flush()
    }

    fn needs_compaction(&self) -> bool {
        self.journal.len() > COMPACT_MIN_ENTRIES.max(2 * self.committed.len())
    }

    /// Must only run with no transaction open.
    fn rewrite_journal(&mut self) {
        let before = self.journal.len();
        let tx_id = self.allocate_tx_id();
        let mut journal: Vec<JournalEntry> = self
            .committed
            .iter()
            .map(|(key, value)| JournalEntry::Set {
                tx_id,
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        journal.push(JournalEntry::Commit { tx_id });
        self.journal = journal;
        log::debug!(
            "compacted journal from {} to {} entries",
            before,
            self.journal.len()
        );
    }

    fn allocate_tx_id(&mut self) -> TransactionId {
        let id = TransactionId::new(self.next_tx);
        self.next_tx += 1;
        id
    }

    fn write(&mut self, key: &str, value: Option<&str>) {
        let open_tx = self.active.as_mut().map(|tx| {
            tx.record_write();
            tx.id()
        });
        let (tx_id, autocommit) = match open_tx {
            Some(tx_id) => (tx_id, false),
            None => (self.allocate_tx_id(), true),
        };

        self.journal.push(match value {
            Some(value) => JournalEntry::Set {
                tx_id,
                key: key.to_string(),
                value: value.to_string(),
            },
            None => JournalEntry::Delete {
                tx_id,
                key: key.to_string(),
            },
        });

        if autocommit {
            self.journal.push(JournalEntry::Commit { tx_id });
            match value {
                Some(value) => {
                    self.committed.insert(key.to_string(), value.to_string());
                }
                None => {
                    self.committed.remove(key);
                }
            }
            if self.needs_compaction() {
                self.rewrite_journal();
            }
        } else {
            self.overlay
                .insert(key.to_string(), value.map(str::to_string));
        }
    }
}

impl KeyValueStore for JournaledKvStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.overlay.get(key) {
            Some(pending) => pending.clone(),
            None => self.committed.get(key).cloned(),
        }
    }

    fn get_next_key(&self, previous_key: &str) -> Option<String> {
        let mut cursor = previous_key.to_string();
        let from_committed = loop {
            match next_key_in(&self.committed, &cursor) {
                Some(key) if matches!(self.overlay.get(&key), Some(None)) => cursor = key,
                other => break other,
            }
        };
        let from_overlay = self
            .overlay
            .range::<str, _>((Bound::Excluded(previous_key), Bound::Unbounded))
            .find(|(_, value)| value.is_some())
            .map(|(key, _)| key.clone());

        match (from_committed, from_overlay) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        self.write(key, Some(value));
    }

    fn delete(&mut self, key: &str) {
        self.write(key, None);
    }

    fn begin_transaction(&mut self) -> Result<(), KvError> {
        if let Some(tx) = &self.active {
            return Err(TransactionError::AlreadyActive(tx.id()).into());
        }
        let tx_id = self.allocate_tx_id();
        self.active = Some(Transaction::new(tx_id));
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), KvError> {
        let mut tx = self.active.take().ok_or(TransactionError::NotActive)?;
        for (key, value) in std::mem::take(&mut self.overlay) {
            match value {
                Some(value) => {
                    self.committed.insert(key, value);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
        if tx.writes() > 0 {
            self.journal.push(JournalEntry::Commit { tx_id: tx.id() });
        }
        tx.commit()?;
        if self.needs_compaction() {
            self.rewrite_journal();
        }
        self.flush()
    }

    fn rollback_transaction(&mut self) -> Result<(), KvError> {
        let mut tx = self.active.take().ok_or(TransactionError::NotActive)?;
        let tx_id = tx.id();
        self.journal.retain(|entry| entry.tx_id() != tx_id);
        self.overlay.clear();
        log::debug!("rolled back {} ({} writes)", tx_id, tx.writes());
        tx.rollback()?;
        Ok(())
    }
}
