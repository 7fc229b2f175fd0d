//! In-process evaluation of compiled filters against JSON payloads.
//!
//! Mirrors how a payload index applies the filter, so compiled output can be checked
//! without a running vector store. Dotted keys descend through objects; on arrays a
//! numeric segment indexes and any other segment fans out over the elements.

use super::{Clause, FieldCondition, Match, Range, StructuredFilter};
use serde_json::Value as JsonValue;

impl StructuredFilter {
    /// Check if a payload matches. `must` entries are AND-ed, `should` entries OR-ed
    /// (ignored when empty), `must_not` entries AND-NOT-ed.
    pub fn matches(&self, payload: &JsonValue) -> bool {
        if !self.must.iter().all(|clause| clause.matches(payload)) {
            return false;
        }
        if !self.should.is_empty() && !self.should.iter().any(|clause| clause.matches(payload)) {
            return false;
        }
        !self.must_not.iter().any(|clause| clause.matches(payload))
    }
}

impl Clause {
    pub fn matches(&self, payload: &JsonValue) -> bool {
        match self {
            Clause::Field(condition) => condition.matches(payload),
            // Missing counts as null.
            Clause::IsNull { is_null } => lookup(payload, &is_null.key)
                .iter()
                .all(|value| value.is_null()),
            Clause::IsEmpty { is_empty } => lookup(payload, &is_empty.key)
                .iter()
                .all(|value| is_empty_value(value)),
            Clause::Filter(filter) => filter.matches(payload),
        }
    }
}

impl FieldCondition {
    /// True when one value at `key` (or one element of an array there) satisfies both
    /// the match and the range.
    pub fn matches(&self, payload: &JsonValue) -> bool {
        lookup(payload, &self.key)
            .into_iter()
            .flat_map(|value| match value {
                JsonValue::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .any(|value| {
                self.r#match.as_ref().map_or(true, |m| m.accepts(value))
                    && self.range.as_ref().map_or(true, |r| r.accepts(value))
            })
    }
}

impl Match {
    fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            Match::Value { value: expected } => values_equal(value, expected),
            Match::Any { any } => any.iter().any(|expected| values_equal(value, expected)),
            Match::Text { text } => value
                .as_str()
                .is_some_and(|s| s.to_lowercase().contains(&text.to_lowercase())),
        }
    }
}

impl Range {
    fn accepts(&self, value: &JsonValue) -> bool {
        let Some(x) = value.as_f64() else {
            return false;
        };
        self.gt.map_or(true, |b| x > b)
            && self.gte.map_or(true, |b| x >= b)
            && self.lt.map_or(true, |b| x < b)
            && self.lte.map_or(true, |b| x <= b)
    }
}

fn lookup<'a>(payload: &'a JsonValue, key: &str) -> Vec<&'a JsonValue> {
    let mut current = vec![payload];
    for segment in key.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                JsonValue::Object(map) => next.extend(map.get(segment)),
                JsonValue::Array(items) => match segment.parse::<usize>() {
                    Ok(idx) => next.extend(items.get(idx)),
                    Err(_) => next.extend(items.iter().filter_map(|item| item.get(segment))),
                },
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn is_empty_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    }
}
