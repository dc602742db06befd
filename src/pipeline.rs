//! Streaming pipeline: scan → filter → project → sort.
//!
//! Stages hand rows to each other through [`DataStream`]s. Every stream ends
//! with exactly one [`DataRow::Terminal`], emitted after every real row the
//! stage will ever produce. A stage driver owns its row tasks in a
//! [`JoinSet`], awaits all of them, and only then lets its [`RowSink`] go,
//! which is what emits the sentinel. Dropping the sink on any exit path,
//! including a failing source or a panicking driver, still terminates the
//! stream.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::cache::CachedExaminer;
use crate::config::EngineConfig;
use crate::discovery::{Primitive, PropertyDiscoveryResult};
use crate::error::{ArcScriptError, Result};
use crate::evaluator::{evaluate, EvalContext, Subject};
use crate::script::Condition;
use crate::storage::StorageEntry;

// ------------- Rows -------------
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRow {
    pub entry: Option<Arc<StorageEntry>>,
    pub columns: Vec<PropertyDiscoveryResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataRow {
    /// End of stream, never carries data.
    Terminal,
    Entry(Arc<StorageEntry>),
    Projection(ProjectionRow),
}
impl DataRow {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DataRow::Terminal)
    }
    pub fn entry(&self) -> Option<&Arc<StorageEntry>> {
        match self {
            DataRow::Terminal => None,
            DataRow::Entry(entry) => Some(entry),
            DataRow::Projection(row) => row.entry.as_ref(),
        }
    }
}

// ------------- Projections -------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Temporal,
    List,
    Object,
    #[default]
    Any,
}
impl ColumnType {
    /// Whether a discovered value may stand in a column of this type. The
    /// "none" family fits every column.
    pub fn accepts(&self, found: &PropertyDiscoveryResult) -> bool {
        if found.is_none() {
            return true;
        }
        match self {
            ColumnType::Any => true,
            ColumnType::String => matches!(found, PropertyDiscoveryResult::Primitive(Primitive::String(_))),
            ColumnType::Number => matches!(found, PropertyDiscoveryResult::Primitive(Primitive::Number(_))),
            ColumnType::Boolean => matches!(found, PropertyDiscoveryResult::Primitive(Primitive::Boolean(_))),
            ColumnType::Temporal => false,
            ColumnType::List => matches!(found, PropertyDiscoveryResult::List(_)),
            ColumnType::Object => matches!(found, PropertyDiscoveryResult::Complex(_)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(default)]
    pub column_type: ColumnType,
    pub path: String,
    #[serde(default)]
    pub alias: Option<String>,
}
impl ColumnDef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { column_type: ColumnType::Any, path: path.into(), alias: None }
    }
    pub fn typed(column_type: ColumnType, path: impl Into<String>) -> Self {
        Self { column_type, path: path.into(), alias: None }
    }
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
    /// The alias when there is one, the path otherwise.
    pub fn identifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionDef {
    columns: Vec<ColumnDef>,
}
impl ProjectionDef {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }
    pub fn len(&self) -> usize {
        self.columns.len()
    }
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.path == path)
    }
    pub fn index_of_identifier(&self, identifier: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.alias.as_deref() == Some(identifier))
            .or_else(|| self.index_of(identifier))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortDef {
    pub identifier: String,
    #[serde(default)]
    pub direction: SortDirection,
}
impl SortDef {
    pub fn asc(identifier: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), direction: SortDirection::Asc }
    }
    pub fn desc(identifier: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), direction: SortDirection::Desc }
    }
}

// ------------- Streams -------------
/// Row bookkeeping of the stage feeding a stream.
#[derive(Debug, Default)]
pub struct StageStats {
    seen: AtomicU64,
    processed: AtomicU64,
    emitted: AtomicU64,
}
impl StageStats {
    pub fn seen(&self) -> u64 {
        self.seen.load(AtomicOrdering::Acquire)
    }
    pub fn processed(&self) -> u64 {
        self.processed.load(AtomicOrdering::Acquire)
    }
    pub fn emitted(&self) -> u64 {
        self.emitted.load(AtomicOrdering::Acquire)
    }
    fn count(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::AcqRel);
    }
}

/// The producing half of a [`DataStream`]. Emits the sentinel when dropped.
pub struct RowSink {
    tx: mpsc::UnboundedSender<DataRow>,
    stats: Arc<StageStats>,
}
impl RowSink {
    pub fn emit(&self, row: DataRow) {
        if row.is_terminal() {
            return;
        }
        StageStats::count(&self.stats.emitted);
        // a closed receiver means nobody is listening any more
        let _ = self.tx.send(row);
    }
}
impl Drop for RowSink {
    fn drop(&mut self) {
        let _ = self.tx.send(DataRow::Terminal);
    }
}

pub struct DataStream {
    rows: mpsc::UnboundedReceiver<DataRow>,
    projection: Option<Arc<ProjectionDef>>,
    stats: Arc<StageStats>,
    finished: bool,
}

impl DataStream {
    pub fn channel(projection: Option<Arc<ProjectionDef>>) -> (RowSink, DataStream) {
        let (tx, rows) = mpsc::unbounded_channel();
        let stats = Arc::new(StageStats::default());
        let sink = RowSink { tx, stats: Arc::clone(&stats) };
        (sink, DataStream { rows, projection, stats, finished: false })
    }
    /// A finite stream over already materialized rows.
    pub fn from_rows(rows: Vec<DataRow>, projection: Option<Arc<ProjectionDef>>) -> DataStream {
        let (sink, stream) = Self::channel(projection);
        for row in rows {
            StageStats::count(&sink.stats.seen);
            StageStats::count(&sink.stats.processed);
            sink.emit(row);
        }
        stream
    }
    pub fn projection(&self) -> Option<&Arc<ProjectionDef>> {
        self.projection.as_ref()
    }
    pub fn stats(&self) -> Arc<StageStats> {
        Arc::clone(&self.stats)
    }
    /// The next row; `Terminal` once the stream is exhausted, however often it is asked.
    pub async fn next(&mut self) -> DataRow {
        if self.finished {
            return DataRow::Terminal;
        }
        match self.rows.recv().await {
            Some(DataRow::Terminal) | None => {
                self.finished = true;
                DataRow::Terminal
            }
            Some(row) => row,
        }
    }
    /// Drains every real row.
    pub async fn collect(mut self) -> Vec<DataRow> {
        let mut rows = Vec::new();
        loop {
            let row = self.next().await;
            if row.is_terminal() {
                return rows;
            }
            rows.push(row);
        }
    }
}

// ------------- Stages -------------
/// What every stage of one pipeline shares.
#[derive(Clone)]
pub struct ExecutionContext {
    pub examiner: CachedExaminer,
    pub workers: Arc<Semaphore>,
    pub nulls_first: bool,
}
impl ExecutionContext {
    pub fn new(examiner: CachedExaminer, config: &EngineConfig) -> Self {
        Self {
            examiner,
            workers: Arc::new(Semaphore::new(config.worker_count())),
            nulls_first: config.nulls_first,
        }
    }
}

/// Wraps a lazy entry source. Source errors end the stream early.
pub fn scan<S>(source: S) -> DataStream
where
    S: Stream<Item = Result<Arc<StorageEntry>>> + Send + 'static,
{
    let (sink, stream) = DataStream::channel(None);
    tokio::spawn(async move {
        let mut source = Box::pin(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(entry) => {
                    StageStats::count(&sink.stats.seen);
                    StageStats::count(&sink.stats.processed);
                    sink.emit(DataRow::Entry(entry));
                }
                Err(e) => {
                    warn!(error = %e, "scan source failed, ending stream");
                    break;
                }
            }
        }
        trace!(rows = sink.stats.emitted(), "scan finished");
    });
    stream
}

trait RowMapper: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn map(&self, row: DataRow) -> Result<Option<DataRow>>;
}

fn spawn_mapping_stage(
    ctx: &ExecutionContext,
    mut input: DataStream,
    mapper: Arc<dyn RowMapper>,
    projection: Option<Arc<ProjectionDef>>,
) -> DataStream {
    let (sink, output) = DataStream::channel(projection);
    let workers = Arc::clone(&ctx.workers);
    tokio::spawn(async move {
        let stage = mapper.name();
        let mut tasks = JoinSet::new();
        loop {
            let row = input.next().await;
            if row.is_terminal() {
                break;
            }
            StageStats::count(&sink.stats.seen);
            let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                warn!(stage, "worker pool closed, abandoning stage");
                StageStats::count(&sink.stats.processed);
                break;
            };
            let mapper = Arc::clone(&mapper);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                mapper.map(row)
            });
            while let Some(done) = tasks.try_join_next() {
                settle(stage, done, &sink);
            }
        }
        while let Some(done) = tasks.join_next().await {
            settle(stage, done, &sink);
        }
        let (seen, processed) = (sink.stats.seen(), sink.stats.processed());
        debug_assert_eq!(seen, processed, "{stage} stage lost rows");
        debug!(stage, seen, processed, emitted = sink.stats.emitted(), "stage finished");
    });
    output
}

fn settle(stage: &'static str, done: std::result::Result<Result<Option<DataRow>>, tokio::task::JoinError>, sink: &RowSink) {
    StageStats::count(&sink.stats.processed);
    match done {
        Ok(Ok(Some(row))) => sink.emit(row),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => warn!(stage, error = %e, "row failed, dropping it"),
        Err(e) => warn!(stage, error = %e, "row task failed, dropping it"),
    }
}

struct FilterStep {
    examiner: CachedExaminer,
    condition: Arc<Condition>,
    projection: Option<Arc<ProjectionDef>>,
}
impl RowMapper for FilterStep {
    fn name(&self) -> &'static str {
        "filter"
    }
    fn map(&self, row: DataRow) -> Result<Option<DataRow>> {
        let subject = match (&row, &self.projection) {
            (DataRow::Entry(entry), _) => Subject::Entry(entry),
            (DataRow::Projection(projected), Some(projection)) => Subject::Row { row: projected, projection: &**projection },
            (DataRow::Projection(projected), None) => match &projected.entry {
                Some(entry) => Subject::Entry(entry),
                None => return Err(ArcScriptError::Pipeline("projection row without definition or entry".into())),
            },
            (DataRow::Terminal, _) => return Ok(None),
        };
        let keep = evaluate(&self.condition, &EvalContext::new(subject, &self.examiner))?;
        Ok(keep.then_some(row))
    }
}

struct Remap {
    /// For each target column, the upstream column it copies, if any.
    sources: Vec<Option<usize>>,
    missing: ProjectionDef,
}

struct ProjectStep {
    examiner: CachedExaminer,
    target: Arc<ProjectionDef>,
    remap: Option<Remap>,
}
impl ProjectStep {
    fn new(examiner: CachedExaminer, target: Arc<ProjectionDef>, upstream: Option<&ProjectionDef>) -> Self {
        let remap = upstream.map(|upstream| {
            let sources: Vec<Option<usize>> = target.columns().iter().map(|c| upstream.index_of(&c.path)).collect();
            let missing = target
                .columns()
                .iter()
                .zip(&sources)
                .filter(|(_, source)| source.is_none())
                .map(|(column, _)| column.clone())
                .collect();
            Remap { sources, missing: ProjectionDef::new(missing) }
        });
        Self { examiner, target, remap }
    }
}
impl RowMapper for ProjectStep {
    fn name(&self) -> &'static str {
        "projection"
    }
    fn map(&self, row: DataRow) -> Result<Option<DataRow>> {
        match (row, &self.remap) {
            (DataRow::Entry(entry), _) => {
                let columns = self.examiner.examine(&entry, &self.target);
                Ok(Some(DataRow::Projection(ProjectionRow { entry: Some(entry), columns })))
            }
            (DataRow::Projection(upstream), Some(remap)) => {
                let mut fresh = if remap.missing.is_empty() {
                    Vec::new()
                } else {
                    let entry = upstream.entry.as_ref().ok_or_else(|| {
                        ArcScriptError::Pipeline("cannot discover missing columns without a backing entry".into())
                    })?;
                    self.examiner.examine(entry, &remap.missing)
                }
                .into_iter();
                let columns = remap
                    .sources
                    .iter()
                    .map(|source| match source {
                        Some(i) => upstream.columns.get(*i).cloned().unwrap_or(PropertyDiscoveryResult::NoValue),
                        None => fresh.next().unwrap_or(PropertyDiscoveryResult::NoValue),
                    })
                    .collect();
                Ok(Some(DataRow::Projection(ProjectionRow { entry: upstream.entry, columns })))
            }
            (DataRow::Projection(_), None) => Err(ArcScriptError::Pipeline("projection row without definition".into())),
            (DataRow::Terminal, _) => Ok(None),
        }
    }
}

pub fn filter(ctx: &ExecutionContext, input: DataStream, condition: Arc<Condition>) -> DataStream {
    let projection = input.projection().cloned();
    let step = FilterStep {
        examiner: ctx.examiner.clone(),
        condition,
        projection: projection.clone(),
    };
    spawn_mapping_stage(ctx, input, Arc::new(step), projection)
}

pub fn project(ctx: &ExecutionContext, input: DataStream, target: Arc<ProjectionDef>) -> DataStream {
    let step = ProjectStep::new(ctx.examiner.clone(), Arc::clone(&target), input.projection().map(Arc::as_ref));
    spawn_mapping_stage(ctx, input, Arc::new(step), Some(target))
}

/// Buffers the whole input, then re-emits it ordered. Unknown identifiers
/// are rejected before anything is consumed.
pub fn sort(ctx: &ExecutionContext, mut input: DataStream, defs: &[SortDef]) -> Result<DataStream> {
    let projection = input
        .projection()
        .cloned()
        .ok_or_else(|| ArcScriptError::Pipeline("sorting requires a projection stream".into()))?;
    let keys = defs
        .iter()
        .map(|def| {
            projection
                .index_of_identifier(&def.identifier)
                .map(|i| (i, def.direction))
                .ok_or_else(|| ArcScriptError::Pipeline(format!("unknown sort identifier '{}'", def.identifier)))
        })
        .collect::<Result<Vec<_>>>()?;
    let nulls_first = ctx.nulls_first;
    let (sink, output) = DataStream::channel(Some(projection));
    tokio::spawn(async move {
        let mut rows = Vec::new();
        loop {
            match input.next().await {
                DataRow::Terminal => break,
                DataRow::Projection(row) => {
                    StageStats::count(&sink.stats.seen);
                    rows.push(row);
                }
                other => {
                    // a stream declaring a projection carries only projection rows
                    StageStats::count(&sink.stats.seen);
                    warn!(row = ?other, "sort input is malformed, stopping without output");
                    return;
                }
            }
        }
        rows.sort_by(|a, b| compare_rows(a, b, &keys, nulls_first));
        for row in rows {
            StageStats::count(&sink.stats.processed);
            sink.emit(DataRow::Projection(row));
        }
    });
    Ok(output)
}

fn compare_rows(a: &ProjectionRow, b: &ProjectionRow, keys: &[(usize, SortDirection)], nulls_first: bool) -> Ordering {
    static MISSING: PropertyDiscoveryResult = PropertyDiscoveryResult::NoValue;
    for (index, direction) in keys {
        let left = a.columns.get(*index).unwrap_or(&MISSING);
        let right = b.columns.get(*index).unwrap_or(&MISSING);
        let ordering = compare_values(left, right, *direction, nulls_first);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub fn compare_values(
    left: &PropertyDiscoveryResult,
    right: &PropertyDiscoveryResult,
    direction: SortDirection,
    nulls_first: bool,
) -> Ordering {
    let none_side = if nulls_first { Ordering::Less } else { Ordering::Greater };
    let ordering = match (left.is_none(), right.is_none()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return none_side,
        (false, true) => return none_side.reverse(),
        (false, false) => match (left, right) {
            (PropertyDiscoveryResult::Primitive(a), PropertyDiscoveryResult::Primitive(b)) => a.compare(b),
            (PropertyDiscoveryResult::Primitive(_), _) => Ordering::Less,
            (_, PropertyDiscoveryResult::Primitive(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        },
    };
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

// ------------- Pipeline -------------
enum Step {
    Filter(Arc<Condition>),
    Project(Arc<ProjectionDef>),
    Sort(Vec<SortDef>),
}

/// Chains stages on top of a scan.
pub struct Pipeline {
    ctx: ExecutionContext,
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx, steps: Vec::new() }
    }
    pub fn filter(mut self, condition: Arc<Condition>) -> Self {
        self.steps.push(Step::Filter(condition));
        self
    }
    pub fn project(mut self, projection: Arc<ProjectionDef>) -> Self {
        self.steps.push(Step::Project(projection));
        self
    }
    pub fn sort(mut self, defs: Vec<SortDef>) -> Self {
        self.steps.push(Step::Sort(defs));
        self
    }
    /// Starts every stage. Must be called from within a tokio runtime.
    pub fn execute<S>(self, source: S) -> Result<DataStream>
    where
        S: Stream<Item = Result<Arc<StorageEntry>>> + Send + 'static,
    {
        let mut data = scan(source);
        for step in self.steps {
            data = match step {
                Step::Filter(condition) => filter(&self.ctx, data, condition),
                Step::Project(projection) => project(&self.ctx, data, projection),
                Step::Sort(defs) => sort(&self.ctx, data, &defs)?,
            };
        }
        Ok(data)
    }
    pub async fn collect<S>(self, source: S) -> Result<Vec<DataRow>>
    where
        S: Stream<Item = Result<Arc<StorageEntry>>> + Send + 'static,
    {
        Ok(self.execute(source)?.collect().await)
    }
}
