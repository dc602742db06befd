#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arcscript::discovery::PropertyDiscoveryResult;
use arcscript::error::{ArcScriptError, Result};
use arcscript::storage::{EntryId, Examiner, MemoryStorage, StorageEntry, StorageInstance};
use serde_json::json;

pub const CUSTOMERS: usize = 10;
/// Customers 0..6 are vip.
pub const VIPS: usize = 6;

/// Ten customers in `crm/Customer` and two employees in `hr/Employee`.
pub fn storage() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    for i in 0..CUSTOMERS {
        storage.add(
            format!("crm/customer/{i}"),
            "crm",
            "Customer",
            json!({
                "name": format!("customer-{i}"),
                "age": 20 + i,
                "vip": i < VIPS,
                "tags": if i % 2 == 0 { json!(["even", "known"]) } else { json!([]) },
                "address": {"city": if i < 3 { "Oslo" } else { "Bergen" }},
                "orders": (0..i % 3).map(|n| json!({"total": n * 100})).collect::<Vec<_>>(),
            }),
        );
    }
    storage.add("hr/employee/1", "hr", "Employee", json!({"name": "Ann", "salary": 100}));
    storage.add("hr/employee/2", "hr", "Employee", json!({"name": "Bob", "salary": null}));
    storage
}

/// Wraps an examiner, counting discoveries per `(entry, path)` and failing
/// every discovery on one uri, or on one path, when asked to.
pub struct CountingExaminer {
    inner: Arc<dyn Examiner>,
    calls: Mutex<HashMap<(EntryId, String), usize>>,
    failing_uri: Option<String>,
    failing_path: Option<String>,
}

impl CountingExaminer {
    pub fn new(inner: Arc<dyn Examiner>) -> Self {
        Self { inner, calls: Mutex::new(HashMap::new()), failing_uri: None, failing_path: None }
    }
    pub fn failing_on(mut self, uri: impl Into<String>) -> Self {
        self.failing_uri = Some(uri.into());
        self
    }
    pub fn failing_on_path(mut self, path: impl Into<String>) -> Self {
        self.failing_path = Some(path.into());
        self
    }
    pub fn calls(&self, id: EntryId, path: &str) -> usize {
        self.calls.lock().unwrap().get(&(id, path.to_owned())).copied().unwrap_or(0)
    }
    pub fn calls_for_path(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|((_, p), _)| p == path).map(|(_, n)| n).sum()
    }
    pub fn max_calls(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

impl Examiner for CountingExaminer {
    fn discover_property(&self, entry: &StorageEntry, path: &str) -> Result<PropertyDiscoveryResult> {
        *self.calls.lock().unwrap().entry((entry.id(), path.to_owned())).or_insert(0) += 1;
        if self.failing_uri.as_deref() == Some(entry.uri()) || self.failing_path.as_deref() == Some(path) {
            return Err(ArcScriptError::discovery(path, "storage went away"));
        }
        self.inner.discover_property(entry, path)
    }
}

/// The storage's own instance with its examiner replaced by a counting one.
pub fn counted(storage: &Arc<MemoryStorage>) -> (StorageInstance, Arc<CountingExaminer>) {
    let instance = storage.instance();
    let counting = Arc::new(CountingExaminer::new(instance.examiner()));
    (StorageInstance::new(instance.index(), counting.clone()), counting)
}
