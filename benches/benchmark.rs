use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use arcscript::cache::CachedExaminer;
use arcscript::discovery::resolve;
use arcscript::evaluator::matches;
use arcscript::predicate::Predicate;
use arcscript::script::{ArcScript, Assertion, Condition, Quantifier, QueryInstruction};
use arcscript::storage::MemoryStorage;
use arcscript::Engine;

fn storage(size: usize) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    for i in 0..size {
        storage.add(
            format!("bench/{i}"),
            "bench",
            "Item",
            json!({"n": i, "even": i % 2 == 0, "parts": [{"w": i % 7}, {"w": i % 5}]}),
        );
    }
    storage
}

fn condition() -> Condition {
    let heavy = Condition::of(Assertion::new("w", Predicate::Is(json!(3))));
    Condition::of(Assertion::new("even", Predicate::Is(json!(true))))
        .or(Assertion::new("n", Predicate::In(vec![json!(1), json!(3), json!(5)])))
        .and(Assertion::quantified("parts", Quantifier::Any, heavy))
}

fn bench_resolve(c: &mut Criterion) {
    let object = json!({"a": {"b": [{"c": 1}, {"c": 2}, {"c": [3, 4]}]}});
    c.bench_function("resolve multicast path", |b| b.iter(|| resolve(black_box(&object), black_box("a.b.c"))));
}

fn bench_condition(c: &mut Criterion) {
    let storage = storage(1);
    let instance = storage.instance();
    let entry = storage.add("bench/x", "bench", "Item", json!({"n": 3, "even": false, "parts": [{"w": 3}]}));
    let condition = condition();
    c.bench_function("fold over cached entry", |b| {
        let examiner = CachedExaminer::new(instance.examiner());
        b.iter(|| matches(black_box(&condition), &entry, &examiner))
    });
}

fn bench_script(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let storage = storage(2_000);
    let instance = storage.instance();
    let engine = Engine::default();
    c.bench_function("query 2000 entries", |b| {
        b.iter(|| {
            let script = ArcScript::new().query(QueryInstruction::new(["bench"]).filter(condition()));
            runtime.block_on(engine.execute(script, &instance))
        })
    });
}

criterion_group!(benches, bench_resolve, bench_condition, bench_script);
criterion_main!(benches);
