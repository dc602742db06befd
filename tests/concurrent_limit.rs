mod common;

use std::sync::Arc;

use arcscript::cache::CachedExaminer;
use arcscript::concurrent::EntryEvaluation;
use arcscript::predicate::Predicate;
use arcscript::result::DataCell;
use arcscript::script::{Assertion, ColumnDescriptor, Condition};
use arcscript::storage::{IndexingStrategy, IndexingTarget, MemoryStorage, StorageIndex};
use common::{storage, CountingExaminer, CUSTOMERS, VIPS};
use serde_json::json;

fn vip() -> Arc<Condition> {
    Arc::new(Condition::of(Assertion::new("vip", Predicate::Is(json!(true)))))
}

fn indexed() -> (Arc<arcscript::storage::MemoryStorage>, Vec<Arc<arcscript::storage::StorageEntry>>) {
    let storage = storage();
    let target = IndexingTarget::new(["crm".to_string()].into(), ["Customer".to_string()].into());
    storage.refresh(IndexingStrategy::Initial, &target).unwrap();
    let entries = storage.get(&target);
    assert_eq!(entries.len(), CUSTOMERS);
    (storage, entries)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limit_is_advisory_but_bounded() {
    let (storage, entries) = indexed();
    for _ in 0..20 {
        let examiner = CachedExaminer::new(storage.instance().examiner());
        let matches = EntryEvaluation::new(examiner, entries.clone(), vip())
            .limit(3)
            .execute()
            .await;
        assert!(
            (3..=VIPS).contains(&matches.len()),
            "limit 3 over {VIPS} matches kept {}",
            matches.len()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entries_waiting_for_a_permit_skip_once_the_limit_is_reached() {
    let storage = Arc::new(MemoryStorage::new());
    for i in 0..50 {
        storage.add(format!("crm/customer/{i}"), "crm", "Customer", json!({"vip": true}));
    }
    storage.refresh(IndexingStrategy::Initial, &IndexingTarget::any()).unwrap();
    let entries = storage.get(&IndexingTarget::any());
    assert_eq!(entries.len(), 50);

    let counting = Arc::new(CountingExaminer::new(storage.instance().examiner()));
    let matches = EntryEvaluation::new(CachedExaminer::new(counting.clone()), entries, vip())
        .limit(1)
        .permits(Some(1))
        .execute()
        .await;
    assert_eq!(matches.len(), 1);
    assert_eq!(
        counting.calls_for_path("vip"),
        1,
        "a single permit admits one entry at a time, and the first match saturates the limit"
    );
}

#[tokio::test]
async fn failing_columns_leave_the_row_with_an_empty_cell() {
    let (storage, entries) = indexed();
    let counting = Arc::new(CountingExaminer::new(storage.instance().examiner()).failing_on_path("name"));
    let matches = EntryEvaluation::new(CachedExaminer::new(counting), entries, vip())
        .columns(vec![ColumnDescriptor::new("vip"), ColumnDescriptor::new("name")])
        .execute()
        .await;
    assert_eq!(matches.len(), VIPS, "a failing column does not drop the match");
    for row in matches.into_rows() {
        assert_eq!(row.cell("name"), Some(&DataCell::no_value()));
        assert_eq!(row.cell("vip").unwrap().value, "true");
    }
}

#[tokio::test]
async fn unlimited_keeps_every_match() {
    let (storage, entries) = indexed();
    let examiner = CachedExaminer::new(storage.instance().examiner());
    let matches = EntryEvaluation::new(examiner, entries, vip()).limit(0).permits(None).execute().await;
    assert_eq!(matches.len(), VIPS);
    assert_eq!(matches.ids().len(), VIPS as u64);
}

#[tokio::test]
async fn failing_entries_are_excluded() {
    let (storage, entries) = indexed();
    let failing = entries[0].clone();
    let counting = Arc::new(CountingExaminer::new(storage.instance().examiner()).failing_on(failing.uri()));
    let matches = EntryEvaluation::new(CachedExaminer::new(counting), entries, vip())
        .execute()
        .await;
    assert_eq!(matches.len(), VIPS - 1, "only the failing vip should be missing");
    assert!(!matches.contains(failing.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn projection_loads_each_property_once() {
    let (storage, entries) = indexed();
    let counting = Arc::new(CountingExaminer::new(storage.instance().examiner()));
    let matches = EntryEvaluation::new(CachedExaminer::new(counting.clone()), entries, vip())
        .columns(vec![ColumnDescriptor::new("vip"), ColumnDescriptor::new("name")])
        .permits(Some(10))
        .execute()
        .await;
    assert_eq!(matches.len(), VIPS);
    assert_eq!(counting.max_calls(), 1, "condition and projection share the cache");
    assert_eq!(counting.calls_for_path("vip"), CUSTOMERS);
    assert_eq!(counting.calls_for_path("name"), VIPS, "only matches are projected");
    let rows = matches.into_rows();
    assert_eq!(rows[0].cell("vip").unwrap().value, "true");
}

#[tokio::test]
async fn empty_entry_set_short_circuits() {
    let (storage, _) = indexed();
    let matches = EntryEvaluation::new(CachedExaminer::new(storage.instance().examiner()), Vec::new(), vip())
        .execute()
        .await;
    assert!(matches.is_empty());
}
