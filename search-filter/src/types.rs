//! Expression tree types for parsed filters

use crate::errors::FilterError;
use crate::operators::Operator;
use serde_json::{Map, Number, Value as JsonValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    Null,
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(f) => Some(*f),
            Scalar::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Number(_) | Scalar::Integer(_))
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Scalar::String(s) => JsonValue::String(s.clone()),
            Scalar::Number(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Scalar::Integer(i) => JsonValue::from(*i),
            Scalar::Boolean(b) => JsonValue::Bool(*b),
            Scalar::Null => JsonValue::Null,
        }
    }
}

/// Operand of a condition. Shape mismatches are caught by matching on this, not by
/// inspecting raw JSON at each call site.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    Sequence(Vec<FilterValue>),
    Nested(Map<String, JsonValue>),
}

impl FilterValue {
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FilterValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FilterValue::Scalar(Scalar::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Elements of a sequence when every one of them is a scalar.
    pub fn scalar_items(&self) -> Option<Vec<&Scalar>> {
        match self {
            FilterValue::Sequence(items) => items.iter().map(FilterValue::as_scalar).collect(),
            _ => None,
        }
    }

    /// Like [`FilterValue::scalar_items`], but also rejects nulls.
    pub fn primitive_items(&self) -> Option<Vec<&Scalar>> {
        self.scalar_items()
            .filter(|items| !items.iter().any(|s| **s == Scalar::Null))
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FilterValue::Scalar(s) => s.to_json(),
            FilterValue::Sequence(items) => {
                JsonValue::Array(items.iter().map(FilterValue::to_json).collect())
            }
            FilterValue::Nested(map) => JsonValue::Object(map.clone()),
        }
    }
}

impl From<&JsonValue> for FilterValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => FilterValue::Scalar(Scalar::Null),
            JsonValue::Bool(b) => FilterValue::Scalar(Scalar::Boolean(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => FilterValue::Scalar(Scalar::Integer(i)),
                None => FilterValue::Scalar(Scalar::Number(n.as_f64().unwrap_or(f64::NAN))),
            },
            JsonValue::String(s) => FilterValue::Scalar(Scalar::String(s.clone())),
            JsonValue::Array(items) => {
                FilterValue::Sequence(items.iter().map(FilterValue::from).collect())
            }
            JsonValue::Object(map) => FilterValue::Nested(map.clone()),
        }
    }
}

impl From<Scalar> for FilterValue {
    fn from(scalar: Scalar) -> Self {
        FilterValue::Scalar(scalar)
    }
}

/// One leaf test against a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: Option<String>,
    pub operator: Operator,
    pub value: FilterValue,
    pub negated: bool,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: FilterValue) -> Self {
        Self {
            field: Some(field.into()),
            operator,
            value,
            negated: false,
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn field_name(&self) -> Result<&str, FilterError> {
        match self.field.as_deref() {
            Some(field) if !field.is_empty() => Ok(field),
            _ => Err(FilterError::malformed(format!(
                "operator {} requires a field",
                self.operator
            ))),
        }
    }

    /// Operator and negation after folding `$ne`/`$nin`/`$not_contains` into their
    /// positive form.
    pub fn effective(&self) -> (Operator, bool) {
        match self.operator.positive_form() {
            Some(positive) => (positive, !self.negated),
            None => (self.operator, self.negated),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl From<LogicalOperator> for Operator {
    fn from(op: LogicalOperator) -> Self {
        match op {
            LogicalOperator::And => Operator::And,
            LogicalOperator::Or => Operator::Or,
            LogicalOperator::Not => Operator::Not,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundExpression {
    pub operator: LogicalOperator,
    pub children: Vec<Expression>,
}

impl CompoundExpression {
    pub fn new(operator: LogicalOperator, children: Vec<Expression>) -> Self {
        Self { operator, children }
    }

    /// The empty conjunction: matches every record.
    pub fn match_all() -> Self {
        Self::new(LogicalOperator::And, Vec::new())
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Self::new(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Self::new(LogicalOperator::Or, children)
    }

    pub fn not(child: Expression) -> Self {
        Self::new(LogicalOperator::Not, vec![child])
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes in the tree, this one included.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| match child {
                Expression::Condition(_) => 1,
                Expression::Compound(c) => c.node_count(),
            })
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Condition(Condition),
    Compound(CompoundExpression),
}

impl From<Condition> for Expression {
    fn from(condition: Condition) -> Self {
        Expression::Condition(condition)
    }
}

impl From<CompoundExpression> for Expression {
    fn from(compound: CompoundExpression) -> Self {
        Expression::Compound(compound)
    }
}
