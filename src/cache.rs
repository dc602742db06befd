//! Lookup cache shared by every evaluation of one script run.
//!
//! Discovery can be expensive, so results are memoized per `(EntryId, path)`.
//! Two tasks may race to discover the same key; both compute, the first
//! insert wins and the loser adopts the kept value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::discovery::PropertyDiscoveryResult;
use crate::error::Result;
use crate::pipeline::ProjectionDef;
use crate::storage::{EntryId, Examiner, OtherHasher, StorageEntry};

#[derive(Debug, Default)]
pub struct LookupCache {
    kept: Mutex<HashMap<(EntryId, String), PropertyDiscoveryResult, OtherHasher>>,
    loads: AtomicU64,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, id: EntryId, path: &str) -> Option<PropertyDiscoveryResult> {
        let kept = self.kept.lock().unwrap_or_else(PoisonError::into_inner);
        kept.get(&(id, path.to_owned())).cloned()
    }
    /// Keeps `found` unless the key is already present, and returns whichever value is kept.
    pub fn keep(&self, id: EntryId, path: &str, found: PropertyDiscoveryResult) -> PropertyDiscoveryResult {
        let mut kept = self.kept.lock().unwrap_or_else(PoisonError::into_inner);
        kept.entry((id, path.to_owned())).or_insert(found).clone()
    }
    pub fn len(&self) -> usize {
        self.kept.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// How many times discovery went past the cache.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

/// An examiner fronted by a lookup cache.
#[derive(Clone)]
pub struct CachedExaminer {
    examiner: Arc<dyn Examiner>,
    cache: Arc<LookupCache>,
}

impl CachedExaminer {
    pub fn new(examiner: Arc<dyn Examiner>) -> Self {
        Self::with_cache(examiner, Arc::new(LookupCache::new()))
    }
    pub fn with_cache(examiner: Arc<dyn Examiner>, cache: Arc<LookupCache>) -> Self {
        Self { examiner, cache }
    }
    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }
    pub fn discover(&self, entry: &StorageEntry, path: &str) -> Result<PropertyDiscoveryResult> {
        if let Some(hit) = self.cache.get(entry.id(), path) {
            trace!(entry = %entry, path, "cache hit");
            return Ok(hit);
        }
        self.cache.loads.fetch_add(1, Ordering::Relaxed);
        let found = self.examiner.discover_property(entry, path)?;
        Ok(self.cache.keep(entry.id(), path, found))
    }
    /// Discovers every column of a projection. A failed discovery or a value
    /// of the wrong kind becomes `NotFound` in that column.
    pub fn examine(&self, entry: &StorageEntry, projection: &ProjectionDef) -> Vec<PropertyDiscoveryResult> {
        projection
            .columns()
            .iter()
            .map(|column| match self.discover(entry, &column.path) {
                Ok(found) if column.column_type.accepts(&found) => found,
                Ok(_) => PropertyDiscoveryResult::not_found("type mismatch"),
                Err(e) => PropertyDiscoveryResult::not_found(e.to_string()),
            })
            .collect()
    }
}

