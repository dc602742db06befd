//! Condition evaluation.
//!
//! A condition is folded strictly left to right with no precedence between
//! `AND` and `OR`, so `a OR b AND c` means `(a OR b) AND c`. Nothing can be
//! short-circuited across the whole fold, but an operand whose relation
//! cannot change the running state is skipped and never discovered.

use crate::cache::CachedExaminer;
use crate::discovery::PropertyDiscoveryResult;
use crate::error::Result;
use crate::pipeline::{ProjectionDef, ProjectionRow};
use crate::script::{Assertion, Check, Condition, ConditionElement, Quantifier, Relation};
use crate::storage::StorageEntry;

/// What assertion paths are resolved against.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Entry(&'a StorageEntry),
    /// A discovered value, typically one list element under a quantifier.
    Value(&'a PropertyDiscoveryResult),
    /// A projected row; paths naming a projected column read the column.
    Row {
        row: &'a ProjectionRow,
        projection: &'a ProjectionDef,
    },
}

#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub subject: Subject<'a>,
    pub examiner: &'a CachedExaminer,
}

impl<'a> EvalContext<'a> {
    pub fn new(subject: Subject<'a>, examiner: &'a CachedExaminer) -> Self {
        Self { subject, examiner }
    }
    pub fn entry(entry: &'a StorageEntry, examiner: &'a CachedExaminer) -> Self {
        Self::new(Subject::Entry(entry), examiner)
    }
    fn with_subject(&self, subject: Subject<'a>) -> Self {
        Self { subject, examiner: self.examiner }
    }
    pub fn resolve(&self, path: &str) -> Result<PropertyDiscoveryResult> {
        match self.subject {
            Subject::Entry(entry) => self.examiner.discover(entry, path),
            Subject::Value(value) => Ok(value.resolve(path)),
            Subject::Row { row, projection } => match projection.index_of(path) {
                Some(i) if i < row.columns.len() => Ok(row.columns[i].clone()),
                _ => match &row.entry {
                    Some(entry) => self.examiner.discover(entry, path),
                    None => Ok(PropertyDiscoveryResult::not_found(format!(
                        "'{path}' is not projected and the row has no backing entry"
                    ))),
                },
            },
        }
    }
}

/// An empty condition holds.
pub fn evaluate(condition: &Condition, ctx: &EvalContext<'_>) -> Result<bool> {
    let mut clauses = condition.clauses().iter();
    let Some(first) = clauses.next() else {
        return Ok(true);
    };
    let mut state = evaluate_element(&first.element, ctx)?;
    for clause in clauses {
        state = match (clause.relation, state) {
            (Relation::And, true) | (Relation::Or, false) => evaluate_element(&clause.element, ctx)?,
            (Relation::And, false) => false,
            (Relation::Or, true) => true,
        };
    }
    Ok(state)
}

fn evaluate_element(element: &ConditionElement, ctx: &EvalContext<'_>) -> Result<bool> {
    match element {
        ConditionElement::Assertion(assertion) => evaluate_assertion(assertion, ctx),
        ConditionElement::Condition(nested) => evaluate(nested, ctx),
    }
}

pub fn evaluate_assertion(assertion: &Assertion, ctx: &EvalContext<'_>) -> Result<bool> {
    let found = ctx.resolve(&assertion.path)?;
    match &assertion.check {
        Check::Predicate(predicate) => predicate.test(&found),
        Check::Quantified { quantifier, condition } => {
            let PropertyDiscoveryResult::List(elements) = &found else {
                return Ok(false);
            };
            quantify(*quantifier, elements, condition, ctx)
        }
    }
}

fn quantify(
    quantifier: Quantifier,
    elements: &[PropertyDiscoveryResult],
    condition: &Condition,
    ctx: &EvalContext<'_>,
) -> Result<bool> {
    for element in elements {
        let holds = evaluate(condition, &ctx.with_subject(Subject::Value(element)))?;
        match (quantifier, holds) {
            (Quantifier::Any, true) => return Ok(true),
            (Quantifier::None, true) => return Ok(false),
            (Quantifier::All, false) => return Ok(false),
            _ => {}
        }
    }
    Ok(!matches!(quantifier, Quantifier::Any))
}

/// Evaluates a condition against a single entry.
pub fn matches(condition: &Condition, entry: &StorageEntry, examiner: &CachedExaminer) -> Result<bool> {
    evaluate(condition, &EvalContext::entry(entry, examiner))
}
