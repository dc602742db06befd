//! What a script run reports back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::discovery::PropertyDiscoveryResult;
use crate::error::ArcScriptError;
use crate::script::ColumnDescriptor;
use crate::storage::StorageEntry;

lazy_static! {
    static ref ERROR_POSITION: Regex = Regex::new(r"line (\d+), column (\d+)").unwrap();
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64() * 1000.0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArcScriptResult {
    CompilationError { line: u32, column: u32, message: String },
    UnknownError { message: String },
    ImpermissibleInstruction { message: String, offending_text: String },
    Ok { results: Vec<InstructionResult> },
}

impl ArcScriptResult {
    /// Classifies an error message coming from outside the engine. A
    /// `line N, column M` marker makes it a compilation error.
    pub fn from_error_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let position = ERROR_POSITION.captures(&message).and_then(|caps| {
            let line = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let column = caps.get(2)?.as_str().parse::<u32>().ok()?;
            Some((line, column))
        });
        match position {
            Some((line, column)) => ArcScriptResult::CompilationError { line, column, message },
            None => ArcScriptResult::UnknownError { message },
        }
    }
    pub fn from_error(error: &ArcScriptError) -> Self {
        match error {
            ArcScriptError::Impermissible { message, instruction } => ArcScriptResult::ImpermissibleInstruction {
                message: message.clone(),
                offending_text: instruction.clone(),
            },
            other => ArcScriptResult::UnknownError { message: other.to_string() },
        }
    }
    pub fn is_ok(&self) -> bool {
        matches!(self, ArcScriptResult::Ok { .. })
    }
    pub fn results(&self) -> &[InstructionResult] {
        match self {
            ArcScriptResult::Ok { results } => results,
            _ => &[],
        }
    }
    /// Result sets of every query, in execution order.
    pub fn result_sets(&self) -> impl Iterator<Item = &ResultSet> {
        self.results().iter().filter_map(|r| match r {
            InstructionResult::QueryPerformed { result_set, .. } => Some(result_set),
            InstructionResult::IndexingPerformed { .. } => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstructionResult {
    IndexingPerformed {
        implicit: bool,
        schemas: BTreeSet<String>,
        types: BTreeSet<String>,
        text: String,
        count: u64,
        #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
        elapsed: Duration,
    },
    QueryPerformed {
        text: String,
        result_set: ResultSet,
        #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
        elapsed: Duration,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSetMeta {
    pub columns: Vec<ColumnDescriptor>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    pub meta: ResultSetMeta,
    pub rows: Vec<QueryResultRow>,
}
impl ResultSet {
    pub fn new(meta: ResultSetMeta, rows: Vec<QueryResultRow>) -> Self {
        Self { meta, rows }
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn entries(&self) -> Vec<Arc<StorageEntry>> {
        self.rows.iter().map(|r| Arc::clone(&r.entry)).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResultRow {
    pub entry: Arc<StorageEntry>,
    /// Cells keyed by column title.
    pub cells: BTreeMap<String, DataCell>,
}
impl QueryResultRow {
    pub fn new(entry: Arc<StorageEntry>) -> Self {
        Self { entry, cells: BTreeMap::new() }
    }
    pub fn with_cells(entry: Arc<StorageEntry>, cells: BTreeMap<String, DataCell>) -> Self {
        Self { entry, cells }
    }
    pub fn cell(&self, title: &str) -> Option<&DataCell> {
        self.cells.get(title)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Simple,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataCell {
    pub kind: CellType,
    pub value: String,
}
impl DataCell {
    pub fn no_value() -> Self {
        Self::simple("")
    }
    pub fn simple(value: impl Into<String>) -> Self {
        Self { kind: CellType::Simple, value: value.into() }
    }
    pub fn complex(value: impl Into<String>) -> Self {
        Self { kind: CellType::Complex, value: value.into() }
    }
}
impl From<&PropertyDiscoveryResult> for DataCell {
    fn from(found: &PropertyDiscoveryResult) -> Self {
        match found {
            PropertyDiscoveryResult::NoValue | PropertyDiscoveryResult::NotFound(_) => DataCell::no_value(),
            PropertyDiscoveryResult::Primitive(p) => DataCell::simple(p.to_string()),
            PropertyDiscoveryResult::Complex(_) | PropertyDiscoveryResult::List(_) => DataCell::complex(found.to_string()),
        }
    }
}
