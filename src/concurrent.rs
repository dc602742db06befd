//! Concurrent evaluation of one condition over a set of entries.
//!
//! Every entry gets its own task, optionally admitted through a semaphore.
//! Discovery is blocking, so the evaluation itself runs on the blocking pool.
//! The limit is advisory: it is checked when a task starts, again once the
//! task holds its permit, and a last time before a match is kept, but tasks
//! already in flight may still push the count past it. A failing entry is
//! logged and left out; it never aborts the others. A failing column only
//! empties its cell.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use roaring::RoaringTreemap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::cache::CachedExaminer;
use crate::config::EngineConfig;
use crate::discovery::PropertyDiscoveryResult;
use crate::error::Result;
use crate::evaluator::matches;
use crate::result::{DataCell, QueryResultRow};
use crate::script::{ColumnDescriptor, Condition};
use crate::storage::{EntryHasher, EntryId, StorageEntry};

/// The entries that matched, keyed by id. Carries no order.
#[derive(Debug, Default)]
pub struct Matches {
    rows: HashMap<EntryId, QueryResultRow, EntryHasher>,
}

impl Matches {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn contains(&self, id: EntryId) -> bool {
        self.rows.contains_key(&id)
    }
    pub fn ids(&self) -> RoaringTreemap {
        self.rows.keys().copied().collect()
    }
    /// The matched rows ordered by entry id.
    pub fn into_rows(self) -> Vec<QueryResultRow> {
        let mut rows: Vec<QueryResultRow> = self.rows.into_values().collect();
        rows.sort_by_key(|row| row.entry.id());
        rows
    }
}

struct Shared {
    examiner: CachedExaminer,
    condition: Arc<Condition>,
    columns: Vec<ColumnDescriptor>,
    limit: Option<usize>,
    kept: Mutex<HashMap<EntryId, QueryResultRow, EntryHasher>>,
}

impl Shared {
    fn saturated(&self) -> bool {
        match self.limit {
            Some(limit) => self.kept.lock().unwrap_or_else(PoisonError::into_inner).len() >= limit,
            None => false,
        }
    }
    fn evaluate(&self, entry: &Arc<StorageEntry>) -> Result<Option<QueryResultRow>> {
        if !matches(&self.condition, entry, &self.examiner)? {
            return Ok(None);
        }
        let mut cells = BTreeMap::new();
        for column in &self.columns {
            let found = self.examiner.discover(entry, &column.prop).unwrap_or_else(|e| {
                debug!(entry = %entry, path = %column.prop, error = %e, "column discovery failed, cell left empty");
                PropertyDiscoveryResult::not_found(e.to_string())
            });
            cells.insert(column.title.clone(), DataCell::from(&found));
        }
        Ok(Some(QueryResultRow::with_cells(Arc::clone(entry), cells)))
    }
    fn keep(&self, row: QueryResultRow) {
        if self.saturated() {
            trace!(entry = %row.entry, "limit reached, match discarded");
            return;
        }
        let mut kept = self.kept.lock().unwrap_or_else(PoisonError::into_inner);
        kept.insert(row.entry.id(), row);
    }
}

pub struct EntryEvaluation {
    examiner: CachedExaminer,
    entries: Vec<Arc<StorageEntry>>,
    condition: Arc<Condition>,
    limit: Option<usize>,
    columns: Vec<ColumnDescriptor>,
    permits: Option<usize>,
}

impl EntryEvaluation {
    pub fn new(examiner: CachedExaminer, entries: Vec<Arc<StorageEntry>>, condition: Arc<Condition>) -> Self {
        Self {
            examiner,
            entries,
            condition,
            limit: None,
            columns: Vec::new(),
            permits: EngineConfig::default().entry_permits(false),
        }
    }
    /// Zero or negative means unlimited.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = (limit > 0).then_some(limit as usize);
        self
    }
    /// Switches to the projection variant.
    pub fn columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.columns = columns;
        self
    }
    /// Defaults to the configured filter permits.
    /// `None` runs every entry task without admission control.
    pub fn permits(mut self, permits: Option<usize>) -> Self {
        self.permits = permits;
        self
    }

    pub async fn execute(self) -> Matches {
        if self.entries.is_empty() {
            return Matches::default();
        }
        let total = self.entries.len();
        let gate = self.permits.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let shared = Arc::new(Shared {
            examiner: self.examiner,
            condition: self.condition,
            columns: self.columns,
            limit: self.limit,
            kept: Mutex::new(HashMap::default()),
        });

        let mut tasks = JoinSet::new();
        for entry in self.entries {
            let shared = Arc::clone(&shared);
            let gate = gate.clone();
            tasks.spawn(async move {
                if shared.saturated() {
                    trace!(entry = %entry, "limit reached, entry skipped");
                    return;
                }
                let _permit = match gate {
                    Some(gate) => match gate.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    None => None,
                };
                if shared.saturated() {
                    trace!(entry = %entry, "limit reached while waiting for a permit, entry skipped");
                    return;
                }
                let uri = entry.uri().to_owned();
                let work = Arc::clone(&shared);
                match tokio::task::spawn_blocking(move || work.evaluate(&entry)).await {
                    Ok(Ok(Some(row))) => shared.keep(row),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => warn!(entry = %uri, error = %e, "entry evaluation failed, excluding entry"),
                    Err(e) => warn!(entry = %uri, error = %e, "entry evaluation task failed, excluding entry"),
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "entry task aborted");
            }
        }

        let kept = match Arc::try_unwrap(shared) {
            Ok(shared) => shared.kept.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => std::mem::take(&mut *shared.kept.lock().unwrap_or_else(PoisonError::into_inner)),
        };
        debug!(entries = total, matched = kept.len(), "entry evaluation finished");
        Matches { rows: kept }
    }
}
