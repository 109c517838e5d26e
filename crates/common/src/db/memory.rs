//! In-process fallback store
//!
//! One mutex-guarded table per entity. Valid for a single instance only: there
//! is no cross-process coordination. Callers must never hold a table guard
//! across an `.await`.

use crate::db::models::{ComparisonRow, DocumentRow, ExportRow, QueueItemRow};
use crate::errors::{AppError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Rows of one entity plus its id counter
#[derive(Debug)]
pub struct MemTable<R> {
    next_id: i32,
    rows: BTreeMap<i32, R>,
}

impl<R> Default for MemTable<R> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

impl<R> MemTable<R> {
    /// Reserve the next id. Ids are never reused, even after deletes.
    pub fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: i32) -> Option<&R> {
        self.rows.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut R> {
        self.rows.get_mut(&id)
    }

    pub fn insert(&mut self, id: i32, row: R) {
        self.rows.insert(id, row);
    }

    pub fn remove(&mut self, id: i32) -> Option<R> {
        self.rows.remove(&id)
    }

    /// Rows in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut R> {
        self.rows.values_mut()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Process-local store shared by every repository built on the same backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub(crate) documents: Mutex<MemTable<DocumentRow>>,
    pub(crate) comparisons: Mutex<MemTable<ComparisonRow>>,
    pub(crate) exports: Mutex<MemTable<ExportRow>>,
    pub(crate) queue: Mutex<MemTable<QueueItemRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Acquire a table guard, surfacing poisoning as an internal error
pub(crate) fn lock<'a, R>(table: &'a Mutex<MemTable<R>>, name: &str) -> Result<MutexGuard<'a, MemTable<R>>> {
    table.lock().map_err(|_| AppError::Internal {
        message: format!("in-memory table {} is poisoned", name),
    })
}
