//! Predicates testing a single discovered property against expected operands.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::discovery::{Primitive, PropertyDiscoveryResult};
use crate::error::{ArcScriptError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    Is(Value),
    Not(Value),
    In(Vec<Value>),
    IsEmpty,
    IsPresent,
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Overlaps(Map<String, Value>),
    HasSize(usize),
    ListContains(Vec<Value>),
    ContainsExactly(Vec<Value>),
    ContainsExactlyInAnyOrder(Vec<Value>),
}

impl Predicate {
    pub fn test(&self, found: &PropertyDiscoveryResult) -> Result<bool> {
        use PropertyDiscoveryResult as Found;
        Ok(match self {
            Predicate::Is(expected) => equals(found, expected)?,
            Predicate::Not(expected) => !equals(found, expected)?,
            Predicate::In(candidates) => {
                for candidate in candidates {
                    if equals(found, candidate)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::IsEmpty => found.is_none(),
            Predicate::IsPresent => found.is_some(),
            Predicate::Contains(needle) => string_found(found).is_some_and(|s| s.contains(needle.as_str())),
            Predicate::StartsWith(prefix) => string_found(found).is_some_and(|s| s.starts_with(prefix.as_str())),
            Predicate::EndsWith(suffix) => string_found(found).is_some_and(|s| s.ends_with(suffix.as_str())),
            Predicate::Overlaps(expected) => match found {
                Found::Complex(actual) => expected
                    .iter()
                    .any(|(key, value)| actual.get(key).is_some_and(|a| a == value)),
                _ => false,
            },
            Predicate::HasSize(size) => matches!(found, Found::List(elements) if elements.len() == *size),
            Predicate::ListContains(expected) => match found {
                Found::List(elements) => contains_all(elements, expected),
                _ => false,
            },
            Predicate::ContainsExactly(expected) => match found {
                Found::List(elements) => {
                    elements.len() == expected.len()
                        && elements.iter().zip(expected).all(|(e, o)| element_equals(e, o))
                }
                _ => false,
            },
            Predicate::ContainsExactlyInAnyOrder(expected) => match found {
                Found::List(elements) => elements.len() == expected.len() && contains_all(elements, expected),
                _ => false,
            },
        })
    }

    pub fn op(&self) -> &'static str {
        match self {
            Predicate::Is(_) | Predicate::IsEmpty | Predicate::IsPresent => "is",
            Predicate::Not(_) => "not",
            Predicate::In(_) => "in",
            Predicate::Contains(_) | Predicate::ListContains(_) => "contains",
            Predicate::StartsWith(_) => "starts_with",
            Predicate::EndsWith(_) => "ends_with",
            Predicate::Overlaps(_) => "overlaps",
            Predicate::HasSize(_) => "has_size",
            Predicate::ContainsExactly(_) => "contains_exactly",
            Predicate::ContainsExactlyInAnyOrder(_) => "contains_exactly_in_any_order",
        }
    }
}

fn string_found(found: &PropertyDiscoveryResult) -> Option<&str> {
    match found {
        PropertyDiscoveryResult::Primitive(Primitive::String(s)) => Some(s),
        _ => None,
    }
}

fn contains_all(elements: &[PropertyDiscoveryResult], expected: &[Value]) -> bool {
    expected
        .iter()
        .all(|o| elements.iter().any(|e| element_equals(e, o)))
}

fn element_equals(element: &PropertyDiscoveryResult, expected: &Value) -> bool {
    element.is_some() && equals(element, expected).unwrap_or(false)
}

/// Type-strict equality between a discovered value and an operand.
fn equals(found: &PropertyDiscoveryResult, expected: &Value) -> Result<bool> {
    use PropertyDiscoveryResult as Found;
    Ok(match expected {
        Value::Null => matches!(found, Found::NoValue),
        Value::Bool(b) => matches!(found, Found::Primitive(Primitive::Boolean(actual)) if actual == b),
        Value::String(s) => matches!(found, Found::Primitive(Primitive::String(actual)) if actual == s),
        Value::Number(n) => match found {
            Found::Primitive(Primitive::Number(actual)) => numbers_equal(actual, n),
            _ => false,
        },
        Value::Object(map) => matches!(found, Found::Complex(actual) if actual == map),
        Value::Array(_) => {
            return Err(ArcScriptError::Comparison(
                "equality against a list operand is not supported".into(),
            ));
        }
    })
}

// A floating point discovery compares as floating point, anything else as a
// truncated integer.
fn numbers_equal(actual: &Number, expected: &Number) -> bool {
    if actual.is_f64() {
        return match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(e)) => a.total_cmp(&e).is_eq(),
            _ => false,
        };
    }
    match (as_integer(actual), as_integer(expected)) {
        (Some(a), Some(e)) => a == e,
        _ => false,
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
        .or_else(|| n.as_f64().map(|f| f.trunc() as i128))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let list = |values: &[Value]| {
            let joined: Vec<String> = values.iter().map(Value::to_string).collect();
            format!("( {} )", joined.join(", "))
        };
        match self {
            Predicate::Is(v) | Predicate::Not(v) => write!(f, "{} {}", self.op(), v),
            Predicate::In(vs) if vs.is_empty() => write!(f, "in {{{{ EMPTY SET }}}}"),
            Predicate::In(vs) | Predicate::ListContains(vs) | Predicate::ContainsExactly(vs) | Predicate::ContainsExactlyInAnyOrder(vs) => {
                write!(f, "{} {}", self.op(), list(vs))
            }
            Predicate::IsEmpty => write!(f, "is empty"),
            Predicate::IsPresent => write!(f, "is present"),
            Predicate::Contains(s) | Predicate::StartsWith(s) | Predicate::EndsWith(s) => {
                write!(f, "{} {}", self.op(), Value::String(s.clone()))
            }
            Predicate::Overlaps(map) => write!(f, "overlaps {}", Value::Object(map.clone())),
            Predicate::HasSize(n) => write!(f, "has_size {n}"),
        }
    }
}
