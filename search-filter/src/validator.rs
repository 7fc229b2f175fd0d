//! Pre-flight checks on raw filter objects.
//!
//! The validator enforces the size and depth limits that bound compilation cost, checks
//! every operand against its operator, and returns a sanitized copy in which ISO-8601
//! dates used in ordering comparisons are replaced by epoch seconds.

use crate::errors::FilterError;
use crate::operators::{is_operator_key, Operator};
use crate::parser::DEFAULT_MAX_DEPTH;
use crate::path::FieldPath;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeSet;
use std::str::FromStr;

pub const DEFAULT_MAX_ARRAY_SIZE: usize = 100;
pub const DEFAULT_MAX_FILTER_SIZE: usize = 1000;

/// Compiled program size cap for `$regex` patterns.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,
    #[serde(default = "default_max_filter_size")]
    pub max_filter_size: usize,
    #[serde(default)]
    pub allow_unknown_operators: bool,
    /// Field paths (or their root segment) a filter may reference. `None` allows all.
    #[serde(default)]
    pub allowed_fields: Option<BTreeSet<String>>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_array_size: default_max_array_size(),
            max_filter_size: default_max_filter_size(),
            allow_unknown_operators: false,
            allowed_fields: None,
        }
    }
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_max_array_size() -> usize {
    DEFAULT_MAX_ARRAY_SIZE
}

fn default_max_filter_size() -> usize {
    DEFAULT_MAX_FILTER_SIZE
}

/// A filter that passed validation. Only the validator constructs one.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedQuery(JsonValue);

impl SanitizedQuery {
    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterValidator {
    config: ValidatorConfig,
}

impl FilterValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        if config.allow_unknown_operators {
            tracing::warn!("Filter validator passes unknown operators through unchecked");
        }
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, raw: &JsonValue) -> Result<SanitizedQuery, FilterError> {
        let result = self.validate_inner(raw);
        match &result {
            Ok(_) => tracing::debug!("Filter passed validation"),
            Err(e) => tracing::debug!("Filter rejected: {}", e),
        }
        result
    }

    fn validate_inner(&self, raw: &JsonValue) -> Result<SanitizedQuery, FilterError> {
        let map = raw
            .as_object()
            .ok_or_else(|| FilterError::invalid("", "filter must be an object"))?;

        let mut elements = 0;
        self.measure(raw, 1, "", &mut elements)?;

        let sanitized = self.validate_object(map, "")?;
        Ok(SanitizedQuery(JsonValue::Object(sanitized)))
    }

    /// Walks the whole structure once, enforcing the depth and element-count limits
    /// before any per-operator work happens.
    fn measure(
        &self,
        value: &JsonValue,
        depth: usize,
        path: &str,
        elements: &mut usize,
    ) -> Result<(), FilterError> {
        match value {
            JsonValue::Object(map) => {
                if depth > self.config.max_depth {
                    return Err(FilterError::invalid(
                        path,
                        format!(
                            "nesting depth {} exceeds maximum of {}",
                            depth, self.config.max_depth
                        ),
                    ));
                }
                for (key, child) in map {
                    self.count_element(elements)?;
                    self.measure(child, depth + 1, &join(path, key), elements)?;
                }
            }
            JsonValue::Array(items) => {
                for (idx, child) in items.iter().enumerate() {
                    self.count_element(elements)?;
                    self.measure(child, depth, &index(path, idx), elements)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn count_element(&self, elements: &mut usize) -> Result<(), FilterError> {
        *elements += 1;
        if *elements > self.config.max_filter_size {
            return Err(FilterError::invalid(
                "",
                format!(
                    "filter has more than {} elements",
                    self.config.max_filter_size
                ),
            ));
        }
        Ok(())
    }

    fn validate_object(
        &self,
        map: &Map<String, JsonValue>,
        path: &str,
    ) -> Result<Map<String, JsonValue>, FilterError> {
        let mut sanitized = Map::new();
        for (key, value) in map {
            let key_path = join(path, key);
            if is_operator_key(key) {
                let checked = match Operator::from_str(key) {
                    Ok(op) if op.is_logical() => {
                        self.validate_logical(op, value, None, &key_path)?
                    }
                    Ok(op) => {
                        return Err(FilterError::invalid(
                            key_path,
                            format!("operator {} requires a field", op),
                        ))
                    }
                    Err(_) if self.config.allow_unknown_operators => value.clone(),
                    Err(msg) => return Err(FilterError::invalid(key_path, msg)),
                };
                sanitized.insert(key.clone(), checked);
            } else {
                self.check_field(key, &key_path)?;
                let checked = self.validate_field_value(key, value, &key_path)?;
                sanitized.insert(key.clone(), checked);
            }
        }
        Ok(sanitized)
    }

    fn check_field(&self, field: &str, path: &str) -> Result<(), FilterError> {
        let field_path = FieldPath::parse(field).map_err(|e| FilterError::invalid(path, e))?;
        if let Some(allowed) = &self.config.allowed_fields {
            if !allowed.contains(field_path.as_str()) && !allowed.contains(field_path.root()) {
                return Err(FilterError::invalid(
                    path,
                    format!("field '{}' is not allowed", field),
                ));
            }
        }
        Ok(())
    }

    fn validate_field_value(
        &self,
        field: &str,
        value: &JsonValue,
        path: &str,
    ) -> Result<JsonValue, FilterError> {
        let operators = match value {
            JsonValue::Object(map) if map.keys().any(|k| is_operator_key(k)) => map,
            _ => return Ok(value.clone()),
        };
        if !operators.keys().all(|k| is_operator_key(k)) {
            return Err(FilterError::invalid(
                path,
                "object mixes operators and field names",
            ));
        }

        let mut sanitized = Map::new();
        for (key, operand) in operators {
            let key_path = join(path, key);
            let checked = match Operator::from_str(key) {
                Ok(op) if op.is_logical() => {
                    self.validate_logical(op, operand, Some(field), &key_path)?
                }
                Ok(op) => self.validate_operand(op, operand, &key_path)?,
                Err(_) if self.config.allow_unknown_operators => operand.clone(),
                Err(msg) => return Err(FilterError::invalid(key_path, msg)),
            };
            sanitized.insert(key.clone(), checked);
        }
        Ok(JsonValue::Object(sanitized))
    }

    fn validate_logical(
        &self,
        op: Operator,
        value: &JsonValue,
        scope: Option<&str>,
        path: &str,
    ) -> Result<JsonValue, FilterError> {
        if op == Operator::Not {
            let map = value
                .as_object()
                .ok_or_else(|| FilterError::invalid(path, "$not requires a single object"))?;
            return match scope {
                None => Ok(JsonValue::Object(self.validate_object(map, path)?)),
                Some(field) => self.validate_field_value(field, value, path),
            };
        }

        let clauses = match value.as_array() {
            Some(items) if !items.is_empty() => items,
            _ => {
                return Err(FilterError::invalid(
                    path,
                    format!("{} requires a non-empty array of objects", op),
                ))
            }
        };
        let mut sanitized = Vec::with_capacity(clauses.len());
        for (idx, clause) in clauses.iter().enumerate() {
            let clause_path = index(path, idx);
            let checked = match (scope, clause) {
                (None, JsonValue::Object(map)) => {
                    JsonValue::Object(self.validate_object(map, &clause_path)?)
                }
                (None, _) => {
                    return Err(FilterError::invalid(
                        clause_path,
                        format!("{} clauses must be objects", op),
                    ))
                }
                (Some(field), _) => self.validate_field_value(field, clause, &clause_path)?,
            };
            sanitized.push(checked);
        }
        Ok(JsonValue::Array(sanitized))
    }

    fn validate_operand(
        &self,
        op: Operator,
        operand: &JsonValue,
        path: &str,
    ) -> Result<JsonValue, FilterError> {
        match op {
            // Same literal rules as implicit equality: composites compare as JSON.
            Operator::Eq | Operator::Ne => Ok(operand.clone()),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                comparable(operand, path, op)
            }
            Operator::In | Operator::Nin | Operator::All => {
                let items = operand.as_array().ok_or_else(|| {
                    FilterError::invalid(path, format!("{} requires an array", op))
                })?;
                self.check_array_size(items, path)?;
                let not_primitive = |v: &JsonValue| v.is_array() || v.is_object() || v.is_null();
                if let Some(idx) = items.iter().position(not_primitive) {
                    return Err(FilterError::invalid(
                        index(path, idx),
                        format!("{} values must be non-null primitives", op),
                    ));
                }
                Ok(operand.clone())
            }
            Operator::Contains | Operator::NotContains => match operand {
                JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
                    Ok(operand.clone())
                }
                _ => Err(FilterError::invalid(
                    path,
                    format!("{} requires a string, number or boolean", op),
                )),
            },
            Operator::Size => match operand.as_u64() {
                Some(_) => Ok(operand.clone()),
                None => Err(FilterError::invalid(
                    path,
                    "$size requires a non-negative integer",
                )),
            },
            Operator::Exists | Operator::Null | Operator::Empty => match operand {
                JsonValue::Bool(_) => Ok(operand.clone()),
                _ => Err(FilterError::invalid(
                    path,
                    format!("{} requires a boolean", op),
                )),
            },
            Operator::Regex => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| FilterError::invalid(path, "$regex requires a string"))?;
                RegexBuilder::new(pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| FilterError::invalid(path, format!("invalid regex: {}", e)))?;
                Ok(operand.clone())
            }
            Operator::Text => match operand {
                JsonValue::String(s) if !s.trim().is_empty() => Ok(operand.clone()),
                _ => Err(FilterError::invalid(
                    path,
                    "$text requires a non-empty string",
                )),
            },
            Operator::Between => self.validate_between(operand, path),
            Operator::And | Operator::Or | Operator::Not => Err(FilterError::invalid(
                path,
                format!("{} is not a field operator", op),
            )),
        }
    }

    fn validate_between(&self, operand: &JsonValue, path: &str) -> Result<JsonValue, FilterError> {
        let bounds = match operand.as_array() {
            Some(items) if items.len() == 2 => items,
            _ => {
                return Err(FilterError::invalid(
                    path,
                    "$between requires exactly two values [min, max]",
                ))
            }
        };
        let min = comparable(&bounds[0], &index(path, 0), Operator::Between)?;
        let max = comparable(&bounds[1], &index(path, 1), Operator::Between)?;

        let ordered = match (&min, &max) {
            (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a <= b,
                _ => false,
            },
            (JsonValue::String(a), JsonValue::String(b)) => a <= b,
            _ => {
                return Err(FilterError::invalid(
                    path,
                    "$between bounds must both be numbers or both be strings",
                ))
            }
        };
        if !ordered {
            return Err(FilterError::invalid(path, "$between requires min <= max"));
        }
        Ok(JsonValue::Array(vec![min, max]))
    }

    fn check_array_size(&self, items: &[JsonValue], path: &str) -> Result<(), FilterError> {
        if items.len() > self.config.max_array_size {
            return Err(FilterError::invalid(
                path,
                format!(
                    "array has {} values, limit is {}",
                    items.len(),
                    self.config.max_array_size
                ),
            ));
        }
        Ok(())
    }
}

/// Operand of an ordering comparison: a number, or a string. Date strings become epoch
/// seconds so both backends compare one representation.
fn comparable(operand: &JsonValue, path: &str, op: Operator) -> Result<JsonValue, FilterError> {
    match operand {
        JsonValue::Number(_) => Ok(operand.clone()),
        JsonValue::String(s) => Ok(normalize_date(s).unwrap_or_else(|| operand.clone())),
        _ => Err(FilterError::invalid(
            path,
            format!("{} requires a number, string or date", op),
        )),
    }
}

/// Epoch seconds for RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS[.f]` (UTC) and
/// plain `YYYY-MM-DD` dates.
pub fn normalize_date(s: &str) -> Option<JsonValue> {
    let timestamp = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        (dt.timestamp(), dt.timestamp_subsec_nanos())
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        let dt = dt.and_utc();
        (dt.timestamp(), dt.timestamp_subsec_nanos())
    } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        (date.and_hms_opt(0, 0, 0)?.and_utc().timestamp(), 0)
    } else {
        return None;
    };

    match timestamp {
        (secs, 0) => Some(JsonValue::from(secs)),
        (secs, nanos) => {
            Number::from_f64(secs as f64 + f64::from(nanos) / 1e9).map(JsonValue::Number)
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn index(path: &str, idx: usize) -> String {
    format!("{}[{}]", path, idx)
}
