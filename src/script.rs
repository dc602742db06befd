//! The compiled form of an ArcScript: an ordered list of instructions.
//!
//! Scripts are produced by an external compiler (or deserialized from JSON by
//! a harness) and are immutable once handed to the engine. Every instruction
//! renders back to a canonical text, which is what results report as the
//! instruction text.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::SortDef;
use crate::predicate::Predicate;
use crate::storage::{IndexingStrategy, IndexingTarget};

fn set_of<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn bracketed(set: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = set.iter().map(String::as_str).collect();
    format!("[{}]", joined.join(", "))
}

// ------------- ArcScript -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcScript {
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}
impl ArcScript {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn index(mut self, instruction: IndexInstruction) -> Self {
        self.instructions.push(Instruction::Index(instruction));
        self
    }
    pub fn query(mut self, instruction: QueryInstruction) -> Self {
        self.instructions.push(Instruction::Query(instruction));
        self
    }
    pub fn update(mut self, instruction: UpdateInstruction) -> Self {
        self.instructions.push(Instruction::Update(instruction));
        self
    }
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum Instruction {
    Index(IndexInstruction),
    Query(QueryInstruction),
    Update(UpdateInstruction),
}
impl Instruction {
    pub fn schemas(&self) -> &BTreeSet<String> {
        match self {
            Instruction::Index(i) => &i.schemas,
            Instruction::Query(q) => &q.schemas,
            Instruction::Update(u) => &u.schemas,
        }
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Index(i) => write!(f, "{i}"),
            Instruction::Query(q) => write!(f, "{q}"),
            Instruction::Update(u) => write!(f, "{u}"),
        }
    }
}

// ------------- IndexInstruction -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInstruction {
    pub schemas: BTreeSet<String>,
    #[serde(default)]
    pub types: BTreeSet<String>,
    #[serde(default)]
    pub strategy: IndexingStrategy,
    /// Set on instructions the planner inserted ahead of a query.
    #[serde(default)]
    pub implicit: bool,
}
impl IndexInstruction {
    pub fn new<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schemas: set_of(schemas),
            types: BTreeSet::new(),
            strategy: IndexingStrategy::default(),
            implicit: false,
        }
    }
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = set_of(types);
        self
    }
    pub fn strategy(mut self, strategy: IndexingStrategy) -> Self {
        self.strategy = strategy;
        self
    }
    /// The index instruction a query needs when nothing before it indexed its target.
    pub fn implicit_for(query: &QueryInstruction, strategy: IndexingStrategy) -> Self {
        Self {
            schemas: query.schemas.clone(),
            types: query.types.clone(),
            strategy,
            implicit: true,
        }
    }
    pub fn target(&self) -> IndexingTarget {
        IndexingTarget::new(self.schemas.clone(), self.types.clone())
    }
    /// Exact set equality on both schemas and types.
    pub fn covers(&self, query: &QueryInstruction) -> bool {
        self.schemas == query.schemas && self.types == query.types
    }
}
impl fmt::Display for IndexInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "index ")?;
        match self.types.len() {
            0 => {}
            1 => write!(f, "type {} ", self.types.iter().next().map_or("", String::as_str))?,
            _ => write!(f, "types {} ", bracketed(&self.types))?,
        }
        match self.schemas.len() {
            0 => write!(f, "everywhere ")?,
            1 => write!(f, "in schema {} ", self.schemas.iter().next().map_or("", String::as_str))?,
            _ => write!(f, "in schemas {} ", bracketed(&self.schemas))?,
        }
        write!(f, "with method {}", self.strategy)
    }
}

// ------------- QueryInstruction -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub prop: String,
    pub title: String,
}
impl ColumnDescriptor {
    pub fn new(prop: impl Into<String>) -> Self {
        let prop = prop.into();
        Self { title: prop.clone(), prop }
    }
    pub fn titled(prop: impl Into<String>, title: impl Into<String>) -> Self {
        Self { prop: prop.into(), title: title.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInstruction {
    pub schemas: BTreeSet<String>,
    #[serde(default)]
    pub types: BTreeSet<String>,
    #[serde(default)]
    pub condition: Condition,
    /// Zero or negative means unlimited.
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub sort: Vec<SortDef>,
}
impl QueryInstruction {
    pub fn new<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schemas: set_of(schemas),
            types: BTreeSet::new(),
            condition: Condition::new(),
            limit: -1,
            columns: Vec::new(),
            sort: Vec::new(),
        }
    }
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = set_of(types);
        self
    }
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
    pub fn show(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }
    pub fn order_by(mut self, sort: SortDef) -> Self {
        self.sort.push(sort);
        self
    }
    pub fn target(&self) -> IndexingTarget {
        IndexingTarget::new(self.schemas.clone(), self.types.clone())
    }
    pub fn limited(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit as usize)
    }
}
impl fmt::Display for QueryInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "select ")?;
        match self.types.len() {
            0 => write!(f, "every type ")?,
            1 => write!(f, "type {} ", self.types.iter().next().map_or("", String::as_str))?,
            _ => write!(f, "types {} ", bracketed(&self.types))?,
        }
        write!(f, "from ")?;
        match self.schemas.len() {
            0 => write!(f, "every schema ")?,
            1 => write!(f, "schema {} ", self.schemas.iter().next().map_or("", String::as_str))?,
            _ => write!(f, "schemas {} ", bracketed(&self.schemas))?,
        }
        if self.condition.is_empty() {
            write!(f, "where true")?;
        } else {
            let rendered = self.condition.to_string();
            write!(f, "where {}", &rendered[1..rendered.len() - 1])?;
        }
        if self.limit > 0 {
            write!(f, " limit {}", self.limit)?;
        }
        Ok(())
    }
}

// ------------- UpdateInstruction -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInstruction {
    pub schemas: BTreeSet<String>,
    #[serde(default)]
    pub types: BTreeSet<String>,
}
impl UpdateInstruction {
    pub fn new<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { schemas: set_of(schemas), types: BTreeSet::new() }
    }
}
impl fmt::Display for UpdateInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "update types {} in schemas {}", bracketed(&self.types), bracketed(&self.schemas))
    }
}

// ------------- Condition -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    And,
    Or,
}
impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Relation::And => write!(f, "AND"),
            Relation::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionElement {
    Assertion(Assertion),
    Condition(Condition),
}
impl From<Assertion> for ConditionElement {
    fn from(assertion: Assertion) -> Self {
        ConditionElement::Assertion(assertion)
    }
}
impl From<Condition> for ConditionElement {
    fn from(condition: Condition) -> Self {
        ConditionElement::Condition(condition)
    }
}
impl fmt::Display for ConditionElement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConditionElement::Assertion(a) => write!(f, "{a}"),
            ConditionElement::Condition(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub relation: Relation,
    pub element: ConditionElement,
}

/// A flat, left-to-right boolean fold over its clauses. The relation of the
/// first clause is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition {
    clauses: Vec<Clause>,
}
impl Condition {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn of(element: impl Into<ConditionElement>) -> Self {
        Self::new().or(element)
    }
    pub fn and(self, element: impl Into<ConditionElement>) -> Self {
        self.push(Relation::And, element)
    }
    pub fn or(self, element: impl Into<ConditionElement>) -> Self {
        self.push(Relation::Or, element)
    }
    pub fn push(mut self, relation: Relation, element: impl Into<ConditionElement>) -> Self {
        self.clauses.push(Clause { relation, element: element.into() });
        self
    }
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
    pub fn len(&self) -> usize {
        self.clauses.len()
    }
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " {} ", clause.relation)?;
            }
            write!(f, "{}", clause.element)?;
        }
        write!(f, ")")
    }
}

// ------------- Assertion -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    Any,
    All,
    None,
}
impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Quantifier::Any => write!(f, "any_match"),
            Quantifier::All => write!(f, "all_match"),
            Quantifier::None => write!(f, "none_match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Predicate(Predicate),
    Quantified { quantifier: Quantifier, condition: Condition },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub path: String,
    pub check: Check,
}
impl Assertion {
    pub fn new(path: impl Into<String>, predicate: Predicate) -> Self {
        Self { path: path.into(), check: Check::Predicate(predicate) }
    }
    pub fn quantified(path: impl Into<String>, quantifier: Quantifier, condition: Condition) -> Self {
        Self {
            path: path.into(),
            check: Check::Quantified { quantifier, condition },
        }
    }
}
impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.check {
            Check::Predicate(p) => write!(f, "{} {}", self.path, p),
            Check::Quantified { quantifier, condition } => write!(f, "{} {} {}", self.path, quantifier, condition),
        }
    }
}
