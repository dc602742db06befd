use arcscript::error::ArcScriptError;
use arcscript::planner::plan;
use arcscript::script::{IndexInstruction, Instruction, QueryInstruction, UpdateInstruction};
use arcscript::storage::IndexingStrategy;

fn is_implicit_index_for(instruction: &Instruction, query: &QueryInstruction) -> bool {
    matches!(instruction, Instruction::Index(index) if index.implicit && index.covers(query))
}

#[test]
fn unindexed_query_gets_an_index_in_front() {
    let query = QueryInstruction::new(["crm"]).types(["Customer"]);
    let planned = plan(vec![Instruction::Query(query.clone())], IndexingStrategy::Initial).unwrap();
    assert_eq!(planned.len(), 2);
    assert!(is_implicit_index_for(&planned.instructions()[0], &query));
    assert_eq!(planned.instructions()[1], Instruction::Query(query));
    assert_eq!(planned.implicit_count(), 1);
}

#[test]
fn matching_index_before_the_query_is_enough() {
    let query = QueryInstruction::new(["crm"]).types(["Customer"]);
    let index = IndexInstruction::new(["crm"]).types(["Customer"]);
    let planned = plan(
        vec![Instruction::Index(index), Instruction::Query(query)],
        IndexingStrategy::Initial,
    )
    .unwrap();
    assert_eq!(planned.len(), 2, "no implicit index expected");
    assert_eq!(planned.implicit_count(), 0);
}

#[test]
fn only_exact_targets_count() {
    let query = QueryInstruction::new(["crm"]).types(["Customer"]);
    let broader = IndexInstruction::new(["crm"]);
    let planned = plan(
        vec![Instruction::Index(broader), Instruction::Query(query.clone())],
        IndexingStrategy::Initial,
    )
    .unwrap();
    assert_eq!(planned.len(), 3, "an index over a broader target does not cover the query");
    assert!(is_implicit_index_for(&planned.instructions()[1], &query));
}

#[test]
fn indexes_after_the_query_do_not_count() {
    let query = QueryInstruction::new(["crm"]);
    let index = IndexInstruction::new(["crm"]);
    let planned = plan(
        vec![Instruction::Query(query.clone()), Instruction::Index(index)],
        IndexingStrategy::Initial,
    )
    .unwrap();
    assert_eq!(planned.len(), 3);
    assert!(is_implicit_index_for(&planned.instructions()[0], &query));
}

#[test]
fn insertions_land_at_their_original_positions() {
    let first = QueryInstruction::new(["a"]);
    let second = QueryInstruction::new(["b"]);
    let third = QueryInstruction::new(["a"]);
    let planned = plan(
        vec![
            Instruction::Query(first.clone()),
            Instruction::Update(UpdateInstruction::new(["a"])),
            Instruction::Query(second.clone()),
            Instruction::Query(third.clone()),
        ],
        IndexingStrategy::Full,
    )
    .unwrap();
    let rendered: Vec<String> = planned.instructions().iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec![
            "index in schema a with method FULL".to_string(),
            first.to_string(),
            "update types [] in schemas [a]".to_string(),
            "index in schema b with method FULL".to_string(),
            second.to_string(),
            // implicit indexes are inserted, they never satisfy later queries
            "index in schema a with method FULL".to_string(),
            third.to_string(),
        ]
    );
}

#[test]
fn empty_schema_set_is_impermissible() {
    let result = plan(
        vec![
            Instruction::Index(IndexInstruction::new(["crm"])),
            Instruction::Query(QueryInstruction::new(Vec::<String>::new())),
        ],
        IndexingStrategy::Initial,
    );
    match result {
        Err(ArcScriptError::Impermissible { instruction, .. }) => {
            assert_eq!(instruction, "select every type from every schema where true");
        }
        other => panic!("expected an impermissible instruction, got {other:?}"),
    }
}
