//! Append-only run history and its repository backends.

use crate::error::HarnessError;
use crate::records::{Generation, TestRun};
use netharness_env::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// A frozen terminal run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HistoryEntry {
    Test(TestRun),
    Generation(Generation),
}

impl HistoryEntry {
    pub fn id(&self) -> RunId {
        match self {
            HistoryEntry::Test(run) => run.id,
            HistoryEntry::Generation(generation) => generation.id,
        }
    }
}

/// Storage for terminal runs.
///
/// Entries are never mutated after insertion; appending an id twice is an
/// error.
pub trait HistoryRepository: Send + Sync {
    /// Appends a terminal run.
    fn append(&self, entry: HistoryEntry) -> Result<(), HarnessError>;

    /// All entries in insertion order.
    fn entries(&self) -> Vec<HistoryEntry>;

    /// Returns true if an entry with this id exists.
    fn contains(&self, id: RunId) -> bool;

    /// Test runs, optionally filtered by topology.
    fn test_runs(&self, topology_id: Option<&str>) -> Vec<TestRun> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                HistoryEntry::Test(run) if topology_id.map_or(true, |t| run.topology_id == t) => Some(run),
                _ => None,
            })
            .collect()
    }

    /// Generations in insertion order.
    fn generations(&self) -> Vec<Generation> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                HistoryEntry::Generation(generation) => Some(generation),
                HistoryEntry::Test(_) => None,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process history (the default backend).
#[derive(Default)]
pub struct InMemoryHistory {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<HistoryEntry>,
    ids: HashSet<RunId>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryRepository for InMemoryHistory {
    fn append(&self, entry: HistoryEntry) -> Result<(), HarnessError> {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !state.ids.insert(entry.id()) {
            return Err(HarnessError::StorageError(format!("run {} already recorded", entry.id())));
        }
        state.entries.push(entry);
        Ok(())
    }

    fn entries(&self) -> Vec<HistoryEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    fn contains(&self, id: RunId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(&id)
    }

    fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }
}

/// Sled-backed persistent history.
///
/// Entries are stored as JSON under a big-endian sequence key, so iteration
/// order is insertion order. The in-memory view is hydrated on open.
pub struct SledHistory {
    db: sled::Db,
    cache: InMemoryHistory,
}

impl SledHistory {
    /// Opens (or creates) a persistent history at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HarnessError> {
        let db = sled::open(path)
            .map_err(|e| HarnessError::StorageError(format!("Failed to open sled DB: {}", e)))?;
        Self::hydrate(db)
    }

    /// Creates a temporary history that is deleted on drop.
    pub fn open_temp() -> Result<Self, HarnessError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| HarnessError::StorageError(format!("Failed to open temp DB: {}", e)))?;
        Self::hydrate(db)
    }

    fn hydrate(db: sled::Db) -> Result<Self, HarnessError> {
        let cache = InMemoryHistory::new();
        for item in db.iter() {
            let (_, value) = item.map_err(|e| HarnessError::StorageError(format!("Iteration failed: {}", e)))?;
            let entry: HistoryEntry = serde_json::from_slice(&value)
                .map_err(|e| HarnessError::StorageError(format!("Corrupt history entry: {}", e)))?;
            cache.append(entry)?;
        }
        Ok(Self { db, cache })
    }
}

impl HistoryRepository for SledHistory {
    fn append(&self, entry: HistoryEntry) -> Result<(), HarnessError> {
        if self.cache.contains(entry.id()) {
            return Err(HarnessError::StorageError(format!("run {} already recorded", entry.id())));
        }

        let value = serde_json::to_vec(&entry)
            .map_err(|e| HarnessError::StorageError(format!("Encode failed: {}", e)))?;
        let seq = self
            .db
            .generate_id()
            .map_err(|e| HarnessError::StorageError(format!("Sequence failed: {}", e)))?;
        self.db
            .insert(seq.to_be_bytes(), value)
            .map_err(|e| HarnessError::StorageError(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| HarnessError::StorageError(format!("Flush failed: {}", e)))?;

        self.cache.append(entry)
    }

    fn entries(&self) -> Vec<HistoryEntry> {
        self.cache.entries()
    }

    fn contains(&self, id: RunId) -> bool {
        self.cache.contains(id)
    }

    fn len(&self) -> usize {
        self.cache.len()
    }
}
