use crate::errors::FilterError;
use crate::operators::{is_operator_key, Operator};
use crate::path::FieldPath;
use crate::types::{CompoundExpression, Condition, Expression, FilterValue, LogicalOperator};
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Turns a nested query object into an expression tree.
///
/// Holds only immutable settings; depth is threaded through the recursion, so one
/// `Parser` can be shared between threads.
#[derive(Debug, Clone)]
pub struct Parser {
    max_depth: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Parser {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn parse(&self, query: &JsonValue) -> Result<CompoundExpression, FilterError> {
        let map = query
            .as_object()
            .ok_or_else(|| FilterError::malformed("query must be an object"))?;

        let expression = match self.parse_object(map, 1)? {
            Some(Expression::Compound(compound)) => compound,
            Some(Expression::Condition(condition)) => {
                CompoundExpression::and(vec![condition.into()])
            }
            None => CompoundExpression::match_all(),
        };
        tracing::debug!("Parsed filter into {} nodes", expression.node_count());
        Ok(expression)
    }

    fn check_depth(&self, depth: usize) -> Result<(), FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::malformed(format!(
                "nesting depth {} exceeds maximum of {}",
                depth, self.max_depth
            )));
        }
        Ok(())
    }

    /// Parses one object level. Sibling keys combine with implicit AND; `None` means the
    /// object was empty.
    fn parse_object(
        &self,
        map: &Map<String, JsonValue>,
        depth: usize,
    ) -> Result<Option<Expression>, FilterError> {
        self.check_depth(depth)?;

        let mut parts = Vec::new();
        for (key, value) in map {
            if is_operator_key(key) {
                let operator = Operator::from_str(key).map_err(FilterError::malformed)?;
                if !operator.is_logical() {
                    return Err(FilterError::malformed(format!(
                        "operator {} requires a field",
                        operator
                    )));
                }
                parts.push(self.parse_logical(operator, value, None, depth)?);
            } else {
                FieldPath::parse(key).map_err(FilterError::malformed)?;
                self.parse_field(key, value, depth + 1, &mut parts)?;
            }
        }
        Ok(collapse(parts))
    }

    /// `depth` is the depth `value` occupies if it is an operator object.
    fn parse_field(
        &self,
        field: &str,
        value: &JsonValue,
        depth: usize,
        parts: &mut Vec<Expression>,
    ) -> Result<(), FilterError> {
        let operators = match value {
            JsonValue::Object(map) if is_operator_object(map)? => map,
            _ => {
                parts.push(Condition::new(field, Operator::Eq, FilterValue::from(value)).into());
                return Ok(());
            }
        };

        self.check_depth(depth)?;
        for (key, operand) in operators {
            let operator = Operator::from_str(key).map_err(FilterError::malformed)?;
            if operator.is_logical() {
                parts.push(self.parse_logical(operator, operand, Some(field), depth)?);
            } else {
                parts.push(Condition::new(field, operator, FilterValue::from(operand)).into());
            }
        }
        Ok(())
    }

    /// `$and`/`$or`/`$not`. With a `scope`, every clause inside applies to that field.
    fn parse_logical(
        &self,
        operator: Operator,
        value: &JsonValue,
        scope: Option<&str>,
        depth: usize,
    ) -> Result<Expression, FilterError> {
        let logical = match operator {
            Operator::And => LogicalOperator::And,
            Operator::Or => LogicalOperator::Or,
            Operator::Not => LogicalOperator::Not,
            _ => {
                return Err(FilterError::malformed(format!(
                    "{} is not a logical operator",
                    operator
                )))
            }
        };

        if logical == LogicalOperator::Not {
            if !value.is_object() {
                return Err(FilterError::malformed(format!(
                    "{} requires an object",
                    operator
                )));
            }
            let child = self.parse_clause(value, scope, depth + 1)?;
            return Ok(CompoundExpression::not(child).into());
        }

        let clauses = value.as_array().ok_or_else(|| {
            FilterError::malformed(format!("{} requires an array of objects", operator))
        })?;
        if clauses.is_empty() {
            return Err(FilterError::malformed(format!(
                "{} requires at least one clause",
                operator
            )));
        }
        let children = clauses
            .iter()
            .map(|clause| self.parse_clause(clause, scope, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompoundExpression::new(logical, children).into())
    }

    fn parse_clause(
        &self,
        clause: &JsonValue,
        scope: Option<&str>,
        depth: usize,
    ) -> Result<Expression, FilterError> {
        match scope {
            None => {
                let map = clause.as_object().ok_or_else(|| {
                    FilterError::malformed("logical operator clauses must be objects")
                })?;
                Ok(self
                    .parse_object(map, depth)?
                    .unwrap_or_else(|| CompoundExpression::match_all().into()))
            }
            Some(field) => {
                let mut parts = Vec::new();
                self.parse_field(field, clause, depth, &mut parts)?;
                collapse(parts).ok_or_else(|| {
                    FilterError::malformed(format!("empty clause under field {}", field))
                })
            }
        }
    }
}

/// A non-empty object whose keys are all operators. Mixing operators and plain keys is
/// rejected rather than silently read as a literal.
fn is_operator_object(map: &Map<String, JsonValue>) -> Result<bool, FilterError> {
    if map.is_empty() {
        return Ok(false);
    }
    let operator_keys = map.keys().filter(|k| is_operator_key(k)).count();
    if operator_keys == 0 {
        Ok(false)
    } else if operator_keys == map.len() {
        Ok(true)
    } else {
        Err(FilterError::malformed(format!(
            "object mixes operators and field names: {}",
            map.keys().cloned().collect::<Vec<_>>().join(", ")
        )))
    }
}

fn collapse(mut parts: Vec<Expression>) -> Option<Expression> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(CompoundExpression::and(parts).into()),
    }
}

/// Parses `query` with the default depth limit.
pub fn parse_query(query: &JsonValue) -> Result<CompoundExpression, FilterError> {
    Parser::default().parse(query)
}
