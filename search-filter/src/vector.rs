//! Document/vector backend: compiles expression trees into the must/should/must_not
//! filter objects accepted by payload-indexed vector stores.
//!
//! The target has no general negation, only the `must_not` bucket, so `$not` and the
//! negated operators are redistributed over buckets (De Morgan) at compile time.

use crate::backend::{validate_expression, FilterBackend};
use crate::errors::FilterError;
use crate::operators::Operator;
use crate::path::FieldPath;
use crate::shadow::length_field;
use crate::types::{CompoundExpression, Condition, Expression, FilterValue, LogicalOperator, Scalar};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

mod matching;

pub const DEFAULT_METADATA_PREFIX: &str = "metadata";
pub const DEFAULT_ROOT_FIELDS: [&str; 5] =
    ["id", "channel_id", "content", "timestamp", "processed"];
pub const DEFAULT_TEXT_FIELDS: [&str; 1] = ["content"];

/// One filter node. `must` entries are ANDed, at least one `should` entry has to match
/// when any are present, and no `must_not` entry may match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Clause {
    Field(FieldCondition),
    IsNull { is_null: PayloadField },
    IsEmpty { is_empty: PayloadField },
    Filter(StructuredFilter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadField {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#match: Option<Match>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Match {
    Value { value: JsonValue },
    Any { any: Vec<JsonValue> },
    /// Case-insensitive substring.
    Text { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
}

impl Clause {
    pub fn field(key: impl Into<String>, value: Match) -> Self {
        Clause::Field(FieldCondition {
            key: key.into(),
            r#match: Some(value),
            range: None,
        })
    }

    pub fn range(key: impl Into<String>, range: Range) -> Self {
        Clause::Field(FieldCondition {
            key: key.into(),
            r#match: None,
            range: Some(range),
        })
    }

    pub fn is_null(key: impl Into<String>) -> Self {
        Clause::IsNull {
            is_null: PayloadField { key: key.into() },
        }
    }

    pub fn is_empty(key: impl Into<String>) -> Self {
        Clause::IsEmpty {
            is_empty: PayloadField { key: key.into() },
        }
    }

    /// A sub-filter holding a single `must` entry is that entry.
    fn simplify(self) -> Self {
        match self {
            Clause::Filter(mut filter) if filter.must.len() == 1 && filter.is_conjunction() => {
                match filter.must.pop() {
                    Some(clause) => clause,
                    None => Clause::Filter(filter),
                }
            }
            other => other,
        }
    }
}

impl StructuredFilter {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    /// Only `must` entries.
    fn is_conjunction(&self) -> bool {
        self.should.is_empty() && self.must_not.is_empty()
    }

    /// Matches no record: excludes everything the empty filter matches.
    pub fn match_none() -> Self {
        Self::must_not(Clause::Filter(Self::default()))
    }

    fn must(clause: Clause) -> Self {
        Self {
            must: vec![clause],
            ..Default::default()
        }
    }

    fn must_not(clause: Clause) -> Self {
        Self {
            must_not: vec![clause],
            ..Default::default()
        }
    }

    /// Conjunction. A `should` bucket cannot be merged as-is without changing its
    /// meaning, so it moves into `must` as its own sub-filter.
    fn and_merge(&mut self, other: StructuredFilter) {
        self.must.extend(other.must);
        self.must_not.extend(other.must_not);
        if !other.should.is_empty() {
            self.must.push(Clause::Filter(StructuredFilter {
                should: other.should,
                ..Default::default()
            }));
        }
    }

    fn negate(self) -> Self {
        let StructuredFilter {
            must,
            should,
            must_not,
        } = self;
        match (must.len(), should.len(), must_not.len()) {
            (0, 0, 0) => Self::match_none(),
            // not(A or B) == not A and not B
            (0, _, 0) => Self {
                must_not: should.into_iter().map(Clause::simplify).collect(),
                ..Default::default()
            },
            (1, 0, 0) => Self {
                must_not: must,
                ..Default::default()
            },
            (0, 0, 1) => Self {
                must: must_not,
                ..Default::default()
            },
            _ => Self::must_not(Clause::Filter(Self {
                must,
                should,
                must_not,
            })),
        }
    }
}

/// Where fields live in the payload. Root fields are top-level keys; everything else
/// sits under `metadata_prefix`.
#[derive(Debug, Clone)]
pub struct VectorSchema {
    metadata_prefix: String,
    root_fields: BTreeSet<String>,
    text_fields: BTreeSet<String>,
}

impl Default for VectorSchema {
    fn default() -> Self {
        let schema = DEFAULT_ROOT_FIELDS
            .iter()
            .fold(Self::new(DEFAULT_METADATA_PREFIX), |schema, field| {
                schema.with_root_field(field)
            });
        DEFAULT_TEXT_FIELDS
            .iter()
            .fold(schema, |schema, field| schema.with_text_field(field))
    }
}

impl VectorSchema {
    /// An empty prefix puts every field at the top level.
    pub fn new(metadata_prefix: &str) -> Self {
        Self {
            metadata_prefix: metadata_prefix.to_string(),
            root_fields: BTreeSet::new(),
            text_fields: BTreeSet::new(),
        }
    }

    pub fn with_root_field(mut self, field: &str) -> Self {
        self.root_fields.insert(field.to_string());
        self
    }

    /// `$contains` on a text field is a substring match instead of element equality.
    pub fn with_text_field(mut self, field: &str) -> Self {
        self.text_fields.insert(field.to_string());
        self
    }

    pub fn metadata_prefix(&self) -> &str {
        &self.metadata_prefix
    }

    pub fn is_root_field(&self, field: &str) -> bool {
        self.root_fields.contains(field)
    }

    pub fn is_text_field(&self, field: &str) -> bool {
        self.text_fields.contains(field)
    }

    pub fn payload_key(&self, path: &FieldPath) -> String {
        if self.metadata_prefix.is_empty() || self.is_root_field(path.root()) {
            path.as_str().to_string()
        } else {
            format!("{}.{}", self.metadata_prefix, path)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VectorCompiler {
    schema: VectorSchema,
}

impl VectorCompiler {
    pub fn new(schema: VectorSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &VectorSchema {
        &self.schema
    }

    fn compile_compound(
        &self,
        expression: &CompoundExpression,
    ) -> Result<StructuredFilter, FilterError> {
        match expression.operator {
            LogicalOperator::And => {
                let mut filter = StructuredFilter::default();
                for child in &expression.children {
                    filter.and_merge(self.compile_expression(child)?);
                }
                Ok(filter)
            }
            LogicalOperator::Or => {
                if expression.is_empty() {
                    return Ok(StructuredFilter::match_none());
                }
                let should = expression
                    .children
                    .iter()
                    .map(|child| self.compile_expression(child).map(Clause::Filter))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(StructuredFilter {
                    should,
                    ..Default::default()
                })
            }
            LogicalOperator::Not => {
                let child = expression
                    .children
                    .first()
                    .ok_or_else(|| FilterError::malformed("$not requires exactly one child"))?;
                Ok(self.compile_expression(child)?.negate())
            }
        }
    }

    fn compile_expression(&self, expression: &Expression) -> Result<StructuredFilter, FilterError> {
        match expression {
            Expression::Condition(condition) => self.compile_condition(condition),
            Expression::Compound(compound) => self.compile_compound(compound),
        }
    }

    fn compile_condition(&self, condition: &Condition) -> Result<StructuredFilter, FilterError> {
        let field = condition.field_name()?;
        let path = FieldPath::parse(field).map_err(FilterError::malformed)?;
        let key = self.schema.payload_key(&path);
        let at = format!("{}.{}", field, condition.operator);
        let (operator, negated) = condition.effective();
        let value = &condition.value;

        let positive = match operator {
            Operator::Eq => StructuredFilter::must(eq_clause(&key, &at, value)?),
            Operator::Gt => StructuredFilter::must(Clause::range(
                &key,
                Range {
                    gt: Some(bound(&at, value)?),
                    ..Default::default()
                },
            )),
            Operator::Gte => StructuredFilter::must(Clause::range(
                &key,
                Range {
                    gte: Some(bound(&at, value)?),
                    ..Default::default()
                },
            )),
            Operator::Lt => StructuredFilter::must(Clause::range(
                &key,
                Range {
                    lt: Some(bound(&at, value)?),
                    ..Default::default()
                },
            )),
            Operator::Lte => StructuredFilter::must(Clause::range(
                &key,
                Range {
                    lte: Some(bound(&at, value)?),
                    ..Default::default()
                },
            )),
            Operator::Between => {
                let (low, high) = match value {
                    FilterValue::Sequence(items) if items.len() == 2 => {
                        (bound(&at, &items[0])?, bound(&at, &items[1])?)
                    }
                    _ => return Err(FilterError::invalid(at, "requires exactly two values")),
                };
                StructuredFilter::must(Clause::range(
                    &key,
                    Range {
                        gte: Some(low),
                        lte: Some(high),
                        ..Default::default()
                    },
                ))
            }
            Operator::In => in_filter(&key, &at, value)?,
            Operator::Contains => {
                let scalar = value
                    .as_scalar()
                    .ok_or_else(|| FilterError::invalid(&at, "requires a single value"))?;
                StructuredFilter::must(self.contains_clause(&path, &key, &at, scalar)?)
            }
            Operator::All => {
                let mut filter = StructuredFilter::default();
                for scalar in scalar_list(&at, value)? {
                    filter.and_merge(StructuredFilter::must(
                        self.contains_clause(&path, &key, &at, scalar)?,
                    ));
                }
                filter
            }
            Operator::Size => match value.as_scalar() {
                Some(Scalar::Integer(n)) if *n >= 0 => StructuredFilter::must(Clause::field(
                    length_field(&key),
                    Match::Value {
                        value: JsonValue::from(*n),
                    },
                )),
                _ => return Err(FilterError::invalid(at, "requires a non-negative integer")),
            },
            Operator::Exists => {
                if flag(&at, value)? {
                    StructuredFilter::must_not(Clause::is_null(&key))
                } else {
                    StructuredFilter::must(Clause::is_null(&key))
                }
            }
            Operator::Null => {
                if flag(&at, value)? {
                    StructuredFilter::must(Clause::is_null(&key))
                } else {
                    StructuredFilter::must_not(Clause::is_null(&key))
                }
            }
            Operator::Empty => {
                if flag(&at, value)? {
                    StructuredFilter::must(Clause::is_empty(&key))
                } else {
                    StructuredFilter::must_not(Clause::is_empty(&key))
                }
            }
            Operator::Text => match value.as_scalar() {
                Some(Scalar::String(text)) => {
                    StructuredFilter::must(Clause::field(&key, Match::Text { text: text.clone() }))
                }
                _ => return Err(FilterError::invalid(at, "requires a string")),
            },
            Operator::Regex => {
                return Err(FilterError::UnsupportedOperator {
                    backend: self.name(),
                    operator,
                })
            }
            Operator::Ne
            | Operator::Nin
            | Operator::NotContains
            | Operator::And
            | Operator::Or
            | Operator::Not => {
                return Err(FilterError::malformed(format!(
                    "{} cannot be lowered as a field condition",
                    operator
                )))
            }
        };

        Ok(if negated { positive.negate() } else { positive })
    }

    fn contains_clause(
        &self,
        path: &FieldPath,
        key: &str,
        at: &str,
        scalar: &Scalar,
    ) -> Result<Clause, FilterError> {
        if !self.schema.is_text_field(path.as_str()) {
            return eq_clause(key, at, &FilterValue::Scalar(scalar.clone()));
        }
        match scalar {
            Scalar::String(text) => Ok(Clause::field(key, Match::Text { text: text.clone() })),
            _ => Err(FilterError::invalid(at, "text fields can only be searched for strings")),
        }
    }
}

impl FilterBackend for VectorCompiler {
    type Output = Option<StructuredFilter>;

    fn name(&self) -> &'static str {
        "vector"
    }

    fn supports(&self, operator: Operator) -> bool {
        !matches!(operator, Operator::Regex)
    }

    /// Payload matches are exact scalars and ranges are numeric, so composite equality
    /// and string ordering have no counterpart here.
    fn check_condition(&self, condition: &Condition) -> Result<(), FilterError> {
        let expressible = match condition.effective().0 {
            Operator::Eq => condition.value.as_scalar().is_some(),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => condition
                .value
                .as_scalar()
                .is_some_and(Scalar::is_numeric),
            Operator::Between => condition
                .value
                .scalar_items()
                .is_some_and(|items| items.iter().all(|s| s.is_numeric())),
            _ => true,
        };
        if expressible {
            Ok(())
        } else {
            Err(FilterError::UnsupportedOperator {
                backend: self.name(),
                operator: condition.operator,
            })
        }
    }

    fn convert(&self, expression: &CompoundExpression) -> Result<Self::Output, FilterError> {
        validate_expression(self, expression)?;
        let filter = self.compile_compound(expression)?;
        if filter.is_empty() {
            tracing::debug!("Filter matches every record, no vector filter emitted");
            return Ok(None);
        }
        tracing::debug!(
            "Compiled vector filter: {} must, {} should, {} must_not",
            filter.must.len(),
            filter.should.len(),
            filter.must_not.len()
        );
        Ok(Some(filter))
    }
}

/// Equality on one scalar. Floats become a closed range since match values are exact
/// keywords or integers.
fn eq_clause(key: &str, at: &str, value: &FilterValue) -> Result<Clause, FilterError> {
    match value {
        FilterValue::Scalar(Scalar::Null) => Ok(Clause::is_null(key)),
        FilterValue::Scalar(Scalar::Number(f)) => Ok(Clause::range(
            key,
            Range {
                gte: Some(*f),
                lte: Some(*f),
                ..Default::default()
            },
        )),
        FilterValue::Scalar(scalar) => Ok(Clause::field(
            key,
            Match::Value {
                value: scalar.to_json(),
            },
        )),
        _ => Err(FilterError::invalid(
            at,
            "composite values cannot be matched by the vector backend",
        )),
    }
}

fn in_filter(key: &str, at: &str, value: &FilterValue) -> Result<StructuredFilter, FilterError> {
    let items = scalar_list(at, value)?;
    if items.is_empty() {
        return Ok(StructuredFilter::match_none());
    }
    if items.iter().any(|s| matches!(s, Scalar::Number(_))) {
        let should = items
            .into_iter()
            .map(|scalar| eq_clause(key, at, &FilterValue::Scalar(scalar.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(StructuredFilter {
            should,
            ..Default::default()
        });
    }
    Ok(StructuredFilter::must(Clause::field(
        key,
        Match::Any {
            any: items.iter().map(|s| s.to_json()).collect(),
        },
    )))
}

fn bound(at: &str, value: &FilterValue) -> Result<f64, FilterError> {
    value
        .as_scalar()
        .and_then(Scalar::as_f64)
        .ok_or_else(|| FilterError::invalid(at, "range bounds must be numeric"))
}

fn flag(at: &str, value: &FilterValue) -> Result<bool, FilterError> {
    value
        .as_bool()
        .ok_or_else(|| FilterError::invalid(at, "requires a boolean"))
}

fn scalar_list<'a>(at: &str, value: &'a FilterValue) -> Result<Vec<&'a Scalar>, FilterError> {
    value
        .primitive_items()
        .ok_or_else(|| FilterError::invalid(at, "requires an array of non-null primitives"))
}
