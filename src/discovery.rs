//! Property discovery: what a dotted path resolves to on a stored object.
//!
//! A path is split on `.`. Each segment steps into a map by key or into a
//! list by position. A non-numeric segment applied to a list *multicasts*
//! the rest of the path over every element and collects the results into a
//! list, flattening nested multicasts. The empty path means the value itself.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::Result;
use crate::storage::{Examiner, ObjectLoader, StorageEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Primitive {
    Boolean(bool),
    Number(Number),
    String(String),
}

impl Primitive {
    fn rank(&self) -> u8 {
        match self {
            Primitive::Boolean(_) => 0,
            Primitive::Number(_) => 1,
            Primitive::String(_) => 2,
        }
    }
    /// Orders booleans before numbers before strings.
    pub fn compare(&self, other: &Primitive) -> std::cmp::Ordering {
        match (self, other) {
            (Primitive::Boolean(a), Primitive::Boolean(b)) => a.cmp(b),
            (Primitive::Number(a), Primitive::Number(b)) => compare_numbers(a, b),
            (Primitive::String(a), Primitive::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

pub(crate) fn compare_numbers(a: &Number, b: &Number) -> std::cmp::Ordering {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a.cmp(&b);
    }
    let a = a.as_f64().unwrap_or(f64::NAN);
    let b = b.as_f64().unwrap_or(f64::NAN);
    a.total_cmp(&b)
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Primitive::Boolean(b) => write!(f, "{b}"),
            Primitive::Number(n) => write!(f, "{n}"),
            Primitive::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyDiscoveryResult {
    /// The property is present but holds nothing (`null`, missing key, index past the end).
    NoValue,
    /// The path cannot be followed on this object.
    NotFound(String),
    Primitive(Primitive),
    Complex(Map<String, Value>),
    List(Vec<PropertyDiscoveryResult>),
}

impl PropertyDiscoveryResult {
    pub fn not_found(reason: impl Into<String>) -> Self {
        PropertyDiscoveryResult::NotFound(reason.into())
    }
    /// True for both members of the "none" family.
    pub fn is_none(&self) -> bool {
        matches!(self, PropertyDiscoveryResult::NoValue | PropertyDiscoveryResult::NotFound(_))
    }
    pub fn is_some(&self) -> bool {
        !self.is_none()
    }
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PropertyDiscoveryResult::NoValue,
            Value::Bool(b) => PropertyDiscoveryResult::Primitive(Primitive::Boolean(*b)),
            Value::Number(n) => PropertyDiscoveryResult::Primitive(Primitive::Number(n.clone())),
            Value::String(s) => PropertyDiscoveryResult::Primitive(Primitive::String(s.clone())),
            Value::Array(list) => PropertyDiscoveryResult::List(list.iter().map(Self::from_value).collect()),
            Value::Object(map) => PropertyDiscoveryResult::Complex(map.clone()),
        }
    }
    /// The JSON form of a discovered value; `None` for `NotFound`.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            PropertyDiscoveryResult::NoValue => Some(Value::Null),
            PropertyDiscoveryResult::NotFound(_) => None,
            PropertyDiscoveryResult::Primitive(Primitive::Boolean(b)) => Some(Value::Bool(*b)),
            PropertyDiscoveryResult::Primitive(Primitive::Number(n)) => Some(Value::Number(n.clone())),
            PropertyDiscoveryResult::Primitive(Primitive::String(s)) => Some(Value::String(s.clone())),
            PropertyDiscoveryResult::Complex(map) => Some(Value::Object(map.clone())),
            PropertyDiscoveryResult::List(elements) => Some(Value::Array(
                elements.iter().map(|e| e.to_value().unwrap_or(Value::Null)).collect(),
            )),
        }
    }
    /// Resolves a path relative to an already discovered value.
    pub fn resolve(&self, path: &str) -> PropertyDiscoveryResult {
        if path.is_empty() {
            return self.clone();
        }
        match self.to_value() {
            Some(value) => resolve(&value, path),
            None => self.clone(),
        }
    }
}

impl fmt::Display for PropertyDiscoveryResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PropertyDiscoveryResult::NoValue => write!(f, ""),
            PropertyDiscoveryResult::NotFound(reason) => write!(f, "<not found: {reason}>"),
            PropertyDiscoveryResult::Primitive(p) => write!(f, "{p}"),
            PropertyDiscoveryResult::Complex(map) => write!(f, "{}", Value::Object(map.clone())),
            PropertyDiscoveryResult::List(_) => match self.to_value() {
                Some(value) => write!(f, "{value}"),
                None => write!(f, "[]"),
            },
        }
    }
}

struct Discovered {
    result: PropertyDiscoveryResult,
    multicast: bool,
}
impl Discovered {
    fn single(result: PropertyDiscoveryResult) -> Self {
        Self { result, multicast: false }
    }
}

/// Resolves a dotted path against a JSON value.
pub fn resolve(value: &Value, path: &str) -> PropertyDiscoveryResult {
    if path.is_empty() {
        return PropertyDiscoveryResult::from_value(value);
    }
    let segments: Vec<&str> = path.split('.').collect();
    walk(value, &segments).result
}

fn walk(value: &Value, segments: &[&str]) -> Discovered {
    let Some((head, rest)) = segments.split_first() else {
        return Discovered::single(PropertyDiscoveryResult::from_value(value));
    };
    match value {
        Value::Null => Discovered::single(PropertyDiscoveryResult::NoValue),
        Value::Object(map) => match map.get(*head) {
            Some(child) => walk(child, rest),
            None => Discovered::single(PropertyDiscoveryResult::NoValue),
        },
        Value::Array(list) => match head.parse::<i64>() {
            Ok(index) if index < 0 => Discovered::single(PropertyDiscoveryResult::not_found(format!(
                "[{index}] is not a valid list index"
            ))),
            Ok(index) => match list.get(index as usize) {
                Some(child) => walk(child, rest),
                None => Discovered::single(PropertyDiscoveryResult::NoValue),
            },
            Err(_) => {
                let mut collected = Vec::with_capacity(list.len());
                for element in list {
                    let found = walk(element, segments);
                    match found.result {
                        PropertyDiscoveryResult::List(inner) if found.multicast => collected.extend(inner),
                        other => collected.push(other),
                    }
                }
                Discovered {
                    result: PropertyDiscoveryResult::List(collected),
                    multicast: true,
                }
            }
        },
        _ => Discovered::single(PropertyDiscoveryResult::not_found(format!(
            "path terminated early at '{head}'"
        ))),
    }
}

/// Resolves paths against the stored versions of an entry, newest first.
pub struct ObjectExaminer {
    loader: Arc<dyn ObjectLoader>,
}

impl ObjectExaminer {
    pub fn new(loader: Arc<dyn ObjectLoader>) -> Self {
        Self { loader }
    }
}

impl Examiner for ObjectExaminer {
    fn discover_property(&self, entry: &StorageEntry, path: &str) -> Result<PropertyDiscoveryResult> {
        let versions = self.loader.load(entry)?;
        if let [only] = versions.as_slice() {
            return Ok(resolve(only, path));
        }
        // the newest version that can follow the path wins
        Ok(versions
            .iter()
            .rev()
            .map(|version| resolve(version, path))
            .find(|found| !matches!(found, PropertyDiscoveryResult::NotFound(_)))
            .unwrap_or(PropertyDiscoveryResult::NoValue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multicast_flattens_nested_lists() {
        let value = json!({"groups": [{"members": [{"n": 1}, {"n": 2}]}, {"members": [{"n": 3}]}]});
        let found = resolve(&value, "groups.members.n");
        assert_eq!(
            found.to_value(),
            Some(json!([1, 2, 3])),
            "nested multicasts should collapse into one list"
        );
    }

    #[test]
    fn terminal_lists_are_kept_whole() {
        let value = json!({"items": [{"tags": ["a", "b"]}, {"tags": ["c"]}]});
        let found = resolve(&value, "items.tags");
        assert_eq!(found.to_value(), Some(json!([["a", "b"], ["c"]])));
    }

    #[test]
    fn negative_index_is_not_found() {
        let value = json!({"list": [1, 2]});
        assert!(matches!(resolve(&value, "list.-1"), PropertyDiscoveryResult::NotFound(_)));
        assert_eq!(resolve(&value, "list.5"), PropertyDiscoveryResult::NoValue);
    }
}
