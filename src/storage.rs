//! The storage boundary consumed by the execution core.
//!
//! Entries are handed to the core by an external index and are only ever
//! *read*: the core asks the index for the entries covered by an
//! [`IndexingTarget`], asks it to refresh a target, and asks an [`Examiner`]
//! to discover properties on individual entries. Entries never point back at
//! the index that owns them; an [`EntryId`] is a plain handle into the
//! owner's registry.
//!
//! [`MemoryStorage`] is an in-memory reference implementation of both the
//! index and the object loader, used by tests, benches and the demo binary.

use core::hash::BuildHasherDefault;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use roaring::RoaringTreemap;
use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::discovery::{ObjectExaminer, PropertyDiscoveryResult};
use crate::error::{ArcScriptError, Result};

// ------------- EntryId -------------
pub type EntryId = u64;

pub type EntryHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: EntryId = 0;

#[derive(Debug)]
pub struct EntryIdGenerator {
    lower_bound: EntryId,
}
impl EntryIdGenerator {
    pub fn new() -> Self {
        Self { lower_bound: GENESIS }
    }
    pub fn generate(&mut self) -> EntryId {
        self.lower_bound += 1;
        self.lower_bound
    }
}
impl Default for EntryIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- StorageEntry -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageEntry {
    id: EntryId,
    uri: String,
    schema: String,
    #[serde(rename = "type")]
    type_name: String,
}
impl StorageEntry {
    pub fn new(id: EntryId, uri: impl Into<String>, schema: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            schema: schema.into(),
            type_name: type_name.into(),
        }
    }
    pub fn id(&self) -> EntryId {
        self.id
    }
    pub fn uri(&self) -> &str {
        &self.uri
    }
    pub fn schema(&self) -> &str {
        &self.schema
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}
impl fmt::Display for StorageEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

// ------------- IndexingTarget -------------
/// A `(schemas, types)` filter scoping an index or query instruction.
/// An empty set means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexingTarget {
    pub schemas: BTreeSet<String>,
    pub types: BTreeSet<String>,
}
impl IndexingTarget {
    pub fn new(schemas: BTreeSet<String>, types: BTreeSet<String>) -> Self {
        Self { schemas, types }
    }
    pub fn any() -> Self {
        Self::default()
    }
    pub fn is_any(&self) -> bool {
        self.schemas.is_empty() && self.types.is_empty()
    }
    pub fn covers(&self, entry: &StorageEntry) -> bool {
        (self.schemas.is_empty() || self.schemas.contains(entry.schema()))
            && (self.types.is_empty() || self.types.contains(entry.type_name()))
    }
}

// ------------- IndexingStrategy -------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStrategy {
    /// Nothing is fetched up front; entries surface as they are referenced.
    OnDemand,
    #[default]
    Initial,
    /// Like `Initial`, but every indexed entry is loaded as well.
    Full,
}
impl IndexingStrategy {
    pub fn fetches_entries(&self) -> bool {
        !matches!(self, IndexingStrategy::OnDemand)
    }
}
impl fmt::Display for IndexingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IndexingStrategy::OnDemand => write!(f, "ON_DEMAND"),
            IndexingStrategy::Initial => write!(f, "INITIAL"),
            IndexingStrategy::Full => write!(f, "FULL"),
        }
    }
}

// ------------- Boundaries -------------
pub trait StorageIndex: Send + Sync {
    /// The entries already materialized for the target.
    fn get(&self, target: &IndexingTarget) -> Vec<Arc<StorageEntry>>;
    /// (Re)index the target and report how many entries it now covers.
    fn refresh(&self, strategy: IndexingStrategy, target: &IndexingTarget) -> Result<u64>;
}

pub trait Examiner: Send + Sync {
    fn discover_property(&self, entry: &StorageEntry, path: &str) -> Result<PropertyDiscoveryResult>;
}

pub trait ObjectLoader: Send + Sync {
    /// Every stored version of the entry's object, oldest first.
    fn load(&self, entry: &StorageEntry) -> Result<Vec<Value>>;
}

/// A storage instance as seen by the engine: an index plus an examiner.
#[derive(Clone)]
pub struct StorageInstance {
    index: Arc<dyn StorageIndex>,
    examiner: Arc<dyn Examiner>,
}
impl StorageInstance {
    pub fn new(index: Arc<dyn StorageIndex>, examiner: Arc<dyn Examiner>) -> Self {
        Self { index, examiner }
    }
    pub fn index(&self) -> Arc<dyn StorageIndex> {
        Arc::clone(&self.index)
    }
    pub fn examiner(&self) -> Arc<dyn Examiner> {
        Arc::clone(&self.examiner)
    }
}

// ------------- MemoryStorage -------------
#[derive(Debug)]
struct KeptEntry {
    entry: Arc<StorageEntry>,
    versions: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    generator: Mutex<EntryIdGenerator>,
    kept: Mutex<HashMap<EntryId, KeptEntry, EntryHasher>>,
    indexed: Mutex<RoaringTreemap>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
    /// Stores an object as the first version of a new entry.
    pub fn add(&self, uri: impl Into<String>, schema: impl Into<String>, type_name: impl Into<String>, object: Value) -> Arc<StorageEntry> {
        let id = self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate();
        let entry = Arc::new(StorageEntry::new(id, uri, schema, type_name));
        self.kept.lock().unwrap_or_else(PoisonError::into_inner).insert(
            id,
            KeptEntry {
                entry: Arc::clone(&entry),
                versions: vec![object],
            },
        );
        entry
    }
    pub fn add_version(&self, id: EntryId, object: Value) -> Result<()> {
        let mut kept = self.kept.lock()?;
        let kept_entry = kept
            .get_mut(&id)
            .ok_or_else(|| ArcScriptError::Index(format!("unknown entry {id}")))?;
        kept_entry.versions.push(object);
        Ok(())
    }
    pub fn len(&self) -> usize {
        self.kept.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn indexed_len(&self) -> u64 {
        self.indexed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
    /// Wires this storage up as both the index and the object source of an instance.
    pub fn instance(self: &Arc<Self>) -> StorageInstance {
        let index: Arc<dyn StorageIndex> = Arc::clone(self) as Arc<dyn StorageIndex>;
        let loader: Arc<dyn ObjectLoader> = Arc::clone(self) as Arc<dyn ObjectLoader>;
        StorageInstance::new(index, Arc::new(ObjectExaminer::new(loader)))
    }
}

impl StorageIndex for MemoryStorage {
    fn get(&self, target: &IndexingTarget) -> Vec<Arc<StorageEntry>> {
        let kept = self.kept.lock().unwrap_or_else(PoisonError::into_inner);
        let indexed = self.indexed.lock().unwrap_or_else(PoisonError::into_inner);
        indexed
            .iter()
            .filter_map(|id| kept.get(&id))
            .filter(|k| target.covers(&k.entry))
            .map(|k| Arc::clone(&k.entry))
            .collect()
    }
    fn refresh(&self, strategy: IndexingStrategy, target: &IndexingTarget) -> Result<u64> {
        if !strategy.fetches_entries() {
            debug!(%strategy, "refresh skipped, entries are discovered on demand");
            return Ok(0);
        }
        let kept = self.kept.lock()?;
        let mut indexed = self.indexed.lock()?;
        let mut count = 0;
        for kept_entry in kept.values().filter(|k| target.covers(&k.entry)) {
            indexed.insert(kept_entry.entry.id());
            if strategy == IndexingStrategy::Full && kept_entry.versions.is_empty() {
                debug!(entry = %kept_entry.entry, "full refresh found an entry without versions");
            }
            count += 1;
        }
        info!(%strategy, count, total = indexed.len(), "index refreshed");
        Ok(count)
    }
}

impl ObjectLoader for MemoryStorage {
    fn load(&self, entry: &StorageEntry) -> Result<Vec<Value>> {
        let kept = self.kept.lock()?;
        kept.get(&entry.id())
            .map(|k| k.versions.clone())
            .ok_or_else(|| ArcScriptError::discovery("", format!("{} is unreachable", entry.uri())))
    }
}
