use crate::errors::FilterError;
use crate::operators::Operator;
use crate::types::{CompoundExpression, Condition, Expression, LogicalOperator};

/// A compilation target for expression trees.
pub trait FilterBackend {
    type Output;

    /// Short name used in error messages and logs.
    fn name(&self) -> &'static str;

    fn supports(&self, operator: Operator) -> bool;

    /// Rejects operand shapes the backend cannot express for an operator it otherwise
    /// supports. Called for every leaf before any output is produced.
    fn check_condition(&self, _condition: &Condition) -> Result<(), FilterError> {
        Ok(())
    }

    /// Lowers a validated tree into the backend's native query.
    fn convert(&self, expression: &CompoundExpression) -> Result<Self::Output, FilterError>;
}

/// Walks the whole tree before any output is produced, rejecting operators the backend
/// does not support and structurally invalid nodes.
pub fn validate_expression<B: FilterBackend + ?Sized>(
    backend: &B,
    expression: &CompoundExpression,
) -> Result<(), FilterError> {
    if !backend.supports(expression.operator.into()) {
        return Err(FilterError::UnsupportedOperator {
            backend: backend.name(),
            operator: expression.operator.into(),
        });
    }
    if expression.operator == LogicalOperator::Not && expression.children.len() != 1 {
        return Err(FilterError::malformed(format!(
            "$not requires exactly one child, found {}",
            expression.children.len()
        )));
    }

    for child in &expression.children {
        match child {
            Expression::Compound(compound) => validate_expression(backend, compound)?,
            Expression::Condition(condition) => {
                if condition.operator.is_logical() {
                    return Err(FilterError::malformed(format!(
                        "{} cannot be used as a field condition",
                        condition.operator
                    )));
                }
                if !backend.supports(condition.operator) {
                    return Err(FilterError::UnsupportedOperator {
                        backend: backend.name(),
                        operator: condition.operator,
                    });
                }
                condition.field_name()?;
                backend.check_condition(condition)?;
            }
        }
    }
    Ok(())
}
