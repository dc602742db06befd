mod common;

use std::sync::Arc;

use arcscript::cache::LookupCache;
use arcscript::config::EngineConfig;
use arcscript::pipeline::SortDef;
use arcscript::predicate::Predicate;
use arcscript::result::{ArcScriptResult, DataCell, InstructionResult};
use arcscript::script::{
    ArcScript, Assertion, ColumnDescriptor, Condition, IndexInstruction, Quantifier, QueryInstruction,
    UpdateInstruction,
};
use arcscript::storage::{IndexingStrategy, StorageInstance};
use arcscript::Engine;
use common::{counted, storage, CountingExaminer, CUSTOMERS, VIPS};
use serde_json::json;

fn vip() -> Condition {
    Condition::of(Assertion::new("vip", Predicate::Is(json!(true))))
}

fn customers() -> QueryInstruction {
    QueryInstruction::new(["crm"]).types(["Customer"])
}

#[tokio::test]
async fn query_runs_behind_an_implicit_index() {
    let storage = storage();
    let result = Engine::default()
        .execute(ArcScript::new().query(customers().filter(vip())), &storage.instance())
        .await;
    let results = result.results();
    assert_eq!(results.len(), 2, "implicit index plus the query");
    match &results[0] {
        InstructionResult::IndexingPerformed { implicit, count, text, .. } => {
            assert!(implicit);
            assert_eq!(*count, CUSTOMERS as u64);
            assert_eq!(text, "index type Customer in schema crm with method INITIAL");
        }
        other => panic!("expected indexing first, got {other:?}"),
    }
    match &results[1] {
        InstructionResult::QueryPerformed { text, result_set, .. } => {
            assert_eq!(text, "select type Customer from schema crm where vip is true");
            assert_eq!(result_set.len(), VIPS);
            assert!(result_set.rows.iter().all(|r| r.entry.schema() == "crm"));
        }
        other => panic!("expected a query, got {other:?}"),
    }
}

#[tokio::test]
async fn later_instructions_see_earlier_indexing() {
    let storage = storage();
    let script = ArcScript::new()
        .index(IndexInstruction::new(["crm"]).types(["Customer"]).strategy(IndexingStrategy::OnDemand))
        .query(customers())
        .index(IndexInstruction::new(["crm"]).types(["Customer"]))
        .query(customers());
    let result = Engine::default().execute(script, &storage.instance()).await;
    let sizes: Vec<usize> = result.result_sets().map(|rs| rs.len()).collect();
    assert_eq!(sizes, vec![0, CUSTOMERS], "on-demand indexing materializes nothing up front");
}

#[tokio::test]
async fn update_is_reported_as_unknown_error() {
    let storage = storage();
    let script = ArcScript::new()
        .query(customers())
        .update(UpdateInstruction::new(["crm"]));
    match Engine::default().execute(script, &storage.instance()).await {
        ArcScriptResult::UnknownError { message } => assert!(message.contains("not supported"), "{message}"),
        other => panic!("expected an unknown error, got {other:?}"),
    }
    assert_eq!(storage.indexed_len(), CUSTOMERS as u64, "earlier effects are not rolled back");
}

#[tokio::test]
async fn empty_schemas_abort_before_anything_runs() {
    let storage = storage();
    let script = ArcScript::new()
        .index(IndexInstruction::new(["crm"]))
        .query(QueryInstruction::new(Vec::<String>::new()));
    let result = Engine::default().execute(script, &storage.instance()).await;
    assert!(matches!(result, ArcScriptResult::ImpermissibleInstruction { .. }), "{result:?}");
    assert_eq!(storage.indexed_len(), 0, "no instruction may run");
}

#[tokio::test]
async fn projected_columns_become_cells() {
    let storage = storage();
    let query = customers()
        .filter(Condition::of(Assertion::new("address.city", Predicate::Is(json!("Oslo")))))
        .show(ColumnDescriptor::new("name"))
        .show(ColumnDescriptor::titled("address.city", "city"))
        .show(ColumnDescriptor::titled("tags", "tags"));
    let result = Engine::default().execute(ArcScript::new().query(query), &storage.instance()).await;
    let rs = result.result_sets().next().expect("one result set");
    assert_eq!(rs.len(), 3);
    assert_eq!(rs.meta.columns.len(), 3);
    let first = &rs.rows[0];
    assert_eq!(first.cell("name").unwrap().value, "customer-0");
    assert_eq!(first.cell("city").unwrap().value, "Oslo");
    assert_eq!(first.cell("tags").unwrap().value, r#"["even","known"]"#);
}

#[tokio::test]
async fn ordered_queries_sort_then_limit() {
    let storage = storage();
    let query = customers()
        .filter(vip())
        .show(ColumnDescriptor::new("name"))
        .order_by(SortDef::desc("age"))
        .limit(3);
    let result = Engine::default().execute(ArcScript::new().query(query), &storage.instance()).await;
    let rs = result.result_sets().next().expect("one result set");
    let names: Vec<&str> = rs.rows.iter().map(|r| r.cell("name").unwrap().value.as_str()).collect();
    assert_eq!(names, vec!["customer-5", "customer-4", "customer-3"]);
    let titles: Vec<&str> = rs.meta.columns.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["name", "age"], "sort keys are projected too");
}

#[tokio::test]
async fn ordering_does_not_change_which_rows_a_failing_column_keeps() {
    let storage = storage();
    let plain = storage.instance();
    let failing = Arc::new(CountingExaminer::new(plain.examiner()).failing_on_path("name"));
    let instance = StorageInstance::new(plain.index(), failing);
    let engine = Engine::default();
    let query = || customers().filter(vip()).show(ColumnDescriptor::new("name"));

    let unsorted = engine.execute(ArcScript::new().query(query()), &instance).await;
    let sorted = engine
        .execute(ArcScript::new().query(query().order_by(SortDef::asc("age"))), &instance)
        .await;
    for result in [&unsorted, &sorted] {
        let rs = result.result_sets().next().expect("one result set");
        assert_eq!(rs.len(), VIPS);
        assert!(rs.rows.iter().all(|r| r.cell("name") == Some(&DataCell::no_value())));
    }
}

#[tokio::test]
async fn quantified_conditions_run_end_to_end() {
    let storage = storage();
    let big_order = Condition::of(Assertion::new("total", Predicate::Is(json!(100))));
    let query = customers().filter(Condition::of(Assertion::quantified("orders", Quantifier::Any, big_order)));
    let result = Engine::default().execute(ArcScript::new().query(query), &storage.instance()).await;
    // orders has i % 3 elements with totals 0, 100, ...
    let expected = (0..CUSTOMERS).filter(|i| i % 3 == 2).count();
    assert_eq!(result.result_sets().next().unwrap().len(), expected);
}

#[tokio::test]
async fn a_supplied_cache_is_reused_across_runs() {
    let storage = storage();
    let (instance, counting) = counted(&storage);
    let cache = Arc::new(LookupCache::new());
    let engine = Engine::new(EngineConfig::default());
    for _ in 0..2 {
        let result = engine
            .execute_with_cache(ArcScript::new().query(customers().filter(vip())), &instance, Arc::clone(&cache))
            .await;
        assert!(result.is_ok());
    }
    assert_eq!(counting.calls_for_path("vip"), CUSTOMERS, "second run should be served from the cache");
    assert_eq!(cache.loads(), CUSTOMERS as u64);
}

#[tokio::test]
async fn results_serialize_for_consumers() {
    let storage = storage();
    let result = Engine::default()
        .execute(ArcScript::new().query(customers().filter(vip()).limit(1)), &storage.instance())
        .await;
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["results"][1]["kind"], "query_performed");
}
