//! Runs a planned script against a storage instance, one instruction at a
//! time, so every instruction observes the effects of the ones before it.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::{CachedExaminer, LookupCache};
use crate::concurrent::EntryEvaluation;
use crate::config::EngineConfig;
use crate::error::{ArcScriptError, Result};
use crate::pipeline::{ColumnDef, DataRow, ExecutionContext, Pipeline, ProjectionDef};
use crate::planner::plan;
use crate::result::{ArcScriptResult, DataCell, InstructionResult, QueryResultRow, ResultSet, ResultSetMeta};
use crate::script::{ArcScript, ColumnDescriptor, IndexInstruction, Instruction, QueryInstruction};
use crate::storage::{StorageEntry, StorageInstance};

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a script with a lookup cache of its own.
    pub async fn execute(&self, script: ArcScript, instance: &StorageInstance) -> ArcScriptResult {
        self.execute_with_cache(script, instance, Arc::new(LookupCache::new())).await
    }

    pub async fn execute_with_cache(
        &self,
        script: ArcScript,
        instance: &StorageInstance,
        cache: Arc<LookupCache>,
    ) -> ArcScriptResult {
        let started = Instant::now();
        let plan = match plan(script.into_instructions(), self.config.default_strategy) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "script rejected");
                return ArcScriptResult::from_error(&e);
            }
        };
        info!(instructions = plan.len(), implicit = plan.implicit_count(), "script started");
        let examiner = CachedExaminer::with_cache(instance.examiner(), cache);
        let mut results = Vec::with_capacity(plan.len());
        for instruction in plan {
            let outcome = match &instruction {
                Instruction::Index(index) => self.run_index(index, instance).await,
                Instruction::Query(query) => self.run_query(query, instance, &examiner).await,
                Instruction::Update(update) => Err(ArcScriptError::Unsupported(format!(
                    "{update}: updates are not supported"
                ))),
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(instruction = %instruction, error = %e, "instruction failed, script aborted");
                    return ArcScriptResult::from_error(&e);
                }
            }
        }
        info!(ms = started.elapsed().as_secs_f64() * 1000.0, "script complete");
        ArcScriptResult::Ok { results }
    }

    async fn run_index(&self, index: &IndexInstruction, instance: &StorageInstance) -> Result<InstructionResult> {
        let text = index.to_string();
        info!(instruction = %text, "indexing started");
        let started = Instant::now();
        let storage = instance.index();
        let strategy = index.strategy;
        let target = index.target();
        let count = tokio::task::spawn_blocking(move || storage.refresh(strategy, &target)).await??;
        let elapsed = started.elapsed();
        info!(instruction = %text, count, ms = elapsed.as_secs_f64() * 1000.0, "indexing complete");
        Ok(InstructionResult::IndexingPerformed {
            implicit: index.implicit,
            schemas: index.schemas.clone(),
            types: index.types.clone(),
            text,
            count,
            elapsed,
        })
    }

    async fn run_query(
        &self,
        query: &QueryInstruction,
        instance: &StorageInstance,
        examiner: &CachedExaminer,
    ) -> Result<InstructionResult> {
        let text = query.to_string();
        info!(instruction = %text, "query started");
        let started = Instant::now();
        let storage = instance.index();
        let target = query.target();
        let entries = tokio::task::spawn_blocking(move || storage.get(&target)).await?;
        debug!(entries = entries.len(), "query entries fetched");

        let (columns, rows) = if query.sort.is_empty() {
            let matches = EntryEvaluation::new(examiner.clone(), entries, Arc::new(query.condition.clone()))
                .limit(query.limit)
                .columns(query.columns.clone())
                .permits(self.config.entry_permits(!query.columns.is_empty()))
                .execute()
                .await;
            (query.columns.clone(), matches.into_rows())
        } else {
            self.run_ordered(query, entries, examiner).await?
        };

        let elapsed = started.elapsed();
        info!(instruction = %text, rows = rows.len(), ms = elapsed.as_secs_f64() * 1000.0, "query complete");
        Ok(InstructionResult::QueryPerformed {
            text,
            result_set: ResultSet::new(ResultSetMeta { columns, elapsed }, rows),
            elapsed,
        })
    }

    /// Filter, project and sort through the pipeline, then apply the limit
    /// to the ordered rows.
    async fn run_ordered(
        &self,
        query: &QueryInstruction,
        entries: Vec<Arc<StorageEntry>>,
        examiner: &CachedExaminer,
    ) -> Result<(Vec<ColumnDescriptor>, Vec<QueryResultRow>)> {
        let mut columns = query.columns.clone();
        for sort in &query.sort {
            if !columns.iter().any(|c| c.title == sort.identifier || c.prop == sort.identifier) {
                columns.push(ColumnDescriptor::new(sort.identifier.clone()));
            }
        }
        let projection = Arc::new(ProjectionDef::new(
            columns
                .iter()
                .map(|c| ColumnDef::new(c.prop.clone()).alias(c.title.clone()))
                .collect(),
        ));
        let ctx = ExecutionContext::new(examiner.clone(), &self.config);
        let source = tokio_stream::iter(entries.into_iter().map(Ok::<_, ArcScriptError>));
        let ordered = Pipeline::new(ctx)
            .filter(Arc::new(query.condition.clone()))
            .project(Arc::clone(&projection))
            .sort(query.sort.clone())
            .collect(source)
            .await?;

        let mut rows = Vec::with_capacity(ordered.len());
        for row in ordered {
            let DataRow::Projection(projected) = row else {
                continue;
            };
            let Some(entry) = projected.entry else {
                continue;
            };
            let cells = columns
                .iter()
                .zip(&projected.columns)
                .map(|(column, found)| (column.title.clone(), DataCell::from(found)))
                .collect();
            rows.push(QueryResultRow::with_cells(entry, cells));
        }
        if let Some(limit) = query.limited() {
            rows.truncate(limit);
        }
        Ok((columns, rows))
    }
}
