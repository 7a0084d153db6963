//! ledger.rs
//! Per-simulation cache of (variable, period) results with the bookkeeping the
//! engine needs: resolution state, provenance, reverse dependencies and the
//! wait-for relation between concurrent resolutions.

use super::error::ComputationError;
use crate::period::Period;
use crate::store::VariableId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// One value per record of the variable's entity, shared between cache and callers.
pub type Array = Arc<Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub variable: VariableId,
    pub period: Period,
}

impl CacheKey {
    pub fn new(variable: VariableId, period: Period) -> Self {
        Self { variable, period }
    }
}

/// Identifies one top-level resolution (and its call stack) across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Uncomputed,
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    InProgress { owner: TaskId },
    Done(Array),
    Failed(ComputationError),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    slot: Slot,
    /// Keys this entry read while computing.
    reads: HashSet<CacheKey>,
    /// Keys that read this entry.
    dependents: HashSet<CacheKey>,
}

impl CacheEntry {
    fn new(slot: Slot) -> Self {
        Self { slot, reads: HashSet::new(), dependents: HashSet::new() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: HashMap<CacheKey, CacheEntry>,
    /// task -> key it is blocked on
    waiting: HashMap<TaskId, CacheKey>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self, key: &CacheKey) -> EntryStatus {
        match self.entries.get(key).map(|e| &e.slot) {
            None => EntryStatus::Uncomputed,
            Some(Slot::InProgress { .. }) => EntryStatus::InProgress,
            Some(Slot::Done(_)) => EntryStatus::Done,
            Some(Slot::Failed(_)) => EntryStatus::Failed,
        }
    }

    pub(crate) fn slot(&self, key: &CacheKey) -> Option<&Slot> {
        self.entries.get(key).map(|e| &e.slot)
    }

    pub fn value(&self, key: &CacheKey) -> Option<&Array> {
        match self.slot(key)? {
            Slot::Done(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self, key: &CacheKey) -> Option<&ComputationError> {
        match self.slot(key)? {
            Slot::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// uncomputed -> in-progress
    pub(crate) fn begin(&mut self, key: CacheKey, owner: TaskId) {
        self.entries.insert(key, CacheEntry::new(Slot::InProgress { owner }));
    }

    /// in-progress -> done | failed
    pub(crate) fn finish(&mut self, key: CacheKey, result: Result<Array, ComputationError>) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.slot = match result {
                Ok(v) => Slot::Done(v),
                Err(e) => Slot::Failed(e),
            };
        }
    }

    /// in-progress -> uncomputed, for resolutions abandoned by cancellation.
    pub(crate) fn abandon(&mut self, key: CacheKey) {
        self.remove(key);
    }

    /// Records that `reader` consumed `source`.
    pub(crate) fn link(&mut self, reader: CacheKey, source: CacheKey) {
        if let Some(entry) = self.entries.get_mut(&reader) {
            entry.reads.insert(source);
        }
        if let Some(entry) = self.entries.get_mut(&source) {
            entry.dependents.insert(reader);
        }
    }

    pub fn reads(&self, key: &CacheKey) -> Vec<CacheKey> {
        let mut reads: Vec<CacheKey> = self.entries.get(key).map(|e| e.reads.iter().copied().collect()).unwrap_or_default();
        reads.sort();
        reads
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }

    /// Every cached key that read, directly or transitively, one of `start`
    /// (the start keys included when cached).
    pub fn downstream_from(&self, start: &[CacheKey]) -> HashSet<CacheKey> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from(start.to_vec());
        while let Some(key) = queue.pop_front() {
            if let Some(entry) = self.entries.get(&key) {
                if visited.insert(key) {
                    queue.extend(entry.dependents.iter().copied());
                }
            }
        }
        visited
    }

    /// Drops `start` and everything computed from it. Returns the dropped keys.
    pub fn invalidate(&mut self, start: &[CacheKey]) -> HashSet<CacheKey> {
        let dirty = self.downstream_from(start);
        for &key in &dirty {
            self.remove(key);
        }
        dirty
    }

    fn remove(&mut self, key: CacheKey) {
        if let Some(entry) = self.entries.remove(&key) {
            for source in entry.reads {
                if let Some(src) = self.entries.get_mut(&source) {
                    src.dependents.remove(&key);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.waiting.clear();
    }

    pub(crate) fn set_waiting(&mut self, task: TaskId, key: CacheKey) {
        self.waiting.insert(task, key);
    }

    pub(crate) fn clear_waiting(&mut self, task: TaskId) {
        self.waiting.remove(&task);
    }

    /// Follows the owner/wait-for chain starting at the owner of `key`. If it
    /// reaches `me`, blocking on `key` would deadlock; the keys on the loop are returned.
    pub(crate) fn wait_cycle(&self, me: TaskId, key: CacheKey) -> Option<Vec<CacheKey>> {
        let mut chain = vec![key];
        let mut seen = HashSet::new();
        let mut current = key;
        loop {
            let owner = match self.slot(&current)? {
                Slot::InProgress { owner } => *owner,
                _ => return None,
            };
            if owner == me {
                return Some(chain);
            }
            if !seen.insert(owner) {
                return None;
            }
            current = *self.waiting.get(&owner)?;
            chain.push(current);
        }
    }
}
