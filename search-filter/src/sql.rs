//! Relational backend: compiles expression trees into a parameterized SQLite WHERE
//! fragment. Metadata lives in a JSON column and is read through the JSON1 functions.
//!
//! Every emitted predicate is two-valued (never NULL), so `NOT` is an exact complement.

use crate::backend::{validate_expression, FilterBackend};
use crate::errors::FilterError;
use crate::operators::Operator;
use crate::path::FieldPath;
use crate::types::{CompoundExpression, Condition, Expression, FilterValue, LogicalOperator, Scalar};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_TABLE: &str = "documents";
pub const DEFAULT_JSON_COLUMN: &str = "metadata";

/// Record fields stored as real columns in the default schema.
pub const DEFAULT_COLUMNS: [(&str, ColumnType); 5] = [
    ("id", ColumnType::Text),
    ("channel_id", ColumnType::Text),
    ("content", ColumnType::Text),
    ("timestamp", ColumnType::Integer),
    ("processed", ColumnType::Boolean),
];

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Integer(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
}

#[derive(Debug, Clone)]
struct FieldConfig {
    db_column: String,
    column_type: ColumnType,
}

/// Maps field names to real columns; everything else is read from `json_column`.
///
/// Only validated identifiers ever reach the SQL text, so caller input can influence
/// nothing but the JSON path string.
#[derive(Debug, Clone)]
pub struct SqlSchema {
    table: String,
    json_column: String,
    columns: HashMap<String, FieldConfig>,
    regexp: bool,
    fts_table: Option<String>,
}

impl Default for SqlSchema {
    fn default() -> Self {
        let columns = DEFAULT_COLUMNS
            .iter()
            .map(|(name, column_type)| {
                (
                    name.to_string(),
                    FieldConfig {
                        db_column: name.to_string(),
                        column_type: *column_type,
                    },
                )
            })
            .collect();
        Self {
            table: DEFAULT_TABLE.to_string(),
            json_column: DEFAULT_JSON_COLUMN.to_string(),
            columns,
            regexp: false,
            fts_table: None,
        }
    }
}

impl SqlSchema {
    /// A schema with no direct columns.
    pub fn new(table: &str, json_column: &str) -> Result<Self, String> {
        check_identifier(table)?;
        check_identifier(json_column)?;
        Ok(Self {
            table: table.to_string(),
            json_column: json_column.to_string(),
            columns: HashMap::new(),
            regexp: false,
            fts_table: None,
        })
    }

    pub fn with_column(
        mut self,
        field: &str,
        db_column: &str,
        column_type: ColumnType,
    ) -> Result<Self, String> {
        check_identifier(field)?;
        check_identifier(db_column)?;
        self.columns.insert(
            field.to_string(),
            FieldConfig {
                db_column: db_column.to_string(),
                column_type,
            },
        );
        Ok(self)
    }

    /// Enables `$regex`. The connection must provide a `regexp()` function.
    pub fn with_regexp(mut self, enabled: bool) -> Self {
        self.regexp = enabled;
        self
    }

    /// Routes `$text` to an FTS5 table whose rowids match `table`.
    pub fn with_fts_table(mut self, fts_table: &str) -> Result<Self, String> {
        check_identifier(fts_table)?;
        self.fts_table = Some(fts_table.to_string());
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn json_column(&self) -> &str {
        &self.json_column
    }

    pub fn is_direct(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    pub fn regexp(&self) -> bool {
        self.regexp
    }

    pub fn fts_table(&self) -> Option<&str> {
        self.fts_table.as_deref()
    }

    fn resolve(&self, path: &FieldPath) -> Result<Target<'_>, FilterError> {
        let Some(config) = self.columns.get(path.root()) else {
            return Ok(Target::Json {
                table: &self.table,
                column: &self.json_column,
                path: path.to_json_path(),
            });
        };
        match (config.column_type, path.tail()) {
            (ColumnType::Json, tail) => Ok(Target::Json {
                table: &self.table,
                column: &config.db_column,
                path: tail.map_or_else(|| "$".to_string(), |t| t.to_json_path()),
            }),
            (column_type, None) => Ok(Target::Column {
                column: &config.db_column,
                column_type,
            }),
            (_, Some(_)) => Err(FilterError::invalid(
                path.as_str(),
                format!("column {} is not a JSON column", config.db_column),
            )),
        }
    }
}

/// Plain SQL identifier: a letter or underscore followed by letters, digits or underscores.
pub fn check_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(format!("Invalid SQL identifier: '{}'", name))
    }
}

enum Target<'a> {
    Column {
        column: &'a str,
        column_type: ColumnType,
    },
    Json {
        table: &'a str,
        column: &'a str,
        path: String,
    },
}

impl Target<'_> {
    fn value_expr(&self) -> String {
        match self {
            Target::Column { column, .. } => column.to_string(),
            Target::Json { column, path, .. } => format!("json_extract({}, '{}')", column, path),
        }
    }

    fn numeric_expr(&self) -> String {
        match self {
            Target::Column {
                column,
                column_type: ColumnType::Integer | ColumnType::Real | ColumnType::Boolean,
            } => column.to_string(),
            _ => format!("CAST({} AS REAL)", self.value_expr()),
        }
    }

    /// Missing or null.
    fn missing_expr(&self) -> String {
        match self {
            Target::Column { column, .. } => format!("{} IS NULL", column),
            Target::Json { column, path, .. } => {
                format!("COALESCE(json_type({}, '{}'), 'null') = 'null'", column, path)
            }
        }
    }

    fn present_expr(&self) -> String {
        match self {
            Target::Column { column, .. } => format!("{} IS NOT NULL", column),
            Target::Json { column, path, .. } => {
                format!("COALESCE(json_type({}, '{}'), 'null') != 'null'", column, path)
            }
        }
    }

    /// Missing, null, an empty array or an empty string.
    fn empty_expr(&self) -> String {
        match self {
            Target::Column {
                column,
                column_type: ColumnType::Text,
            } => format!("({} IS NULL OR {} = '')", column, column),
            Target::Column { column, .. } => format!("{} IS NULL", column),
            Target::Json { column, path, .. } => format!(
                "({missing} \
                 OR (json_type({c}, '{p}') = 'array' AND json_array_length({c}, '{p}') = 0) \
                 OR (json_type({c}, '{p}') = 'text' AND json_extract({c}, '{p}') = ''))",
                missing = self.missing_expr(),
                c = column,
                p = path
            ),
        }
    }

    fn is_nullable_column(&self) -> bool {
        matches!(self, Target::Column { .. })
    }
}

/// Call-local scratch state. Parameters are appended in placeholder order.
#[derive(Debug, Default)]
struct SqlContext {
    params: Vec<SqlValue>,
}

impl SqlContext {
    fn bind(&mut self, value: SqlValue) -> &'static str {
        self.params.push(value);
        "?"
    }

    fn bind_scalar(&mut self, at: &str, scalar: &Scalar) -> Result<&'static str, FilterError> {
        let value = match scalar {
            Scalar::String(s) => SqlValue::String(s.clone()),
            Scalar::Integer(i) => SqlValue::Integer(*i),
            Scalar::Number(f) => SqlValue::Float(*f),
            Scalar::Boolean(b) => SqlValue::Integer(i64::from(*b)),
            Scalar::Null => return Err(FilterError::invalid(at, "null cannot be bound here")),
        };
        Ok(self.bind(value))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlCompiler {
    schema: SqlSchema,
}

impl SqlCompiler {
    pub fn new(schema: SqlSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SqlSchema {
        &self.schema
    }

    fn build_compound(
        &self,
        expression: &CompoundExpression,
        ctx: &mut SqlContext,
    ) -> Result<String, FilterError> {
        match expression.operator {
            LogicalOperator::And | LogicalOperator::Or => {
                let (joiner, identity) = if expression.operator == LogicalOperator::And {
                    (" AND ", "1=1")
                } else {
                    (" OR ", "1=0")
                };
                if expression.is_empty() {
                    return Ok(identity.to_string());
                }
                let parts = expression
                    .children
                    .iter()
                    .map(|child| self.build_child(child, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(joiner))
            }
            LogicalOperator::Not => {
                let child = expression
                    .children
                    .first()
                    .ok_or_else(|| FilterError::malformed("$not requires exactly one child"))?;
                let inner = match child {
                    Expression::Condition(condition) => self.build_condition(condition, ctx)?,
                    Expression::Compound(compound) => self.build_compound(compound, ctx)?,
                };
                Ok(negate(inner))
            }
        }
    }

    fn build_child(&self, child: &Expression, ctx: &mut SqlContext) -> Result<String, FilterError> {
        match child {
            Expression::Condition(condition) => self.build_condition(condition, ctx),
            Expression::Compound(compound) => {
                let sql = self.build_compound(compound, ctx)?;
                let grouped =
                    compound.operator != LogicalOperator::Not && compound.children.len() > 1;
                Ok(if grouped { format!("({})", sql) } else { sql })
            }
        }
    }

    fn build_condition(
        &self,
        condition: &Condition,
        ctx: &mut SqlContext,
    ) -> Result<String, FilterError> {
        let field = condition.field_name()?;
        let path = FieldPath::parse(field).map_err(FilterError::malformed)?;
        let target = self.schema.resolve(&path)?;
        let at = format!("{}.{}", field, condition.operator);
        let (operator, negated) = condition.effective();
        let value = &condition.value;

        match operator {
            Operator::Eq => build_eq_clause(&target, &at, value, negated, ctx),
            Operator::Gt => build_comparison_clause(&target, &at, ">", value, negated, ctx),
            Operator::Gte => build_comparison_clause(&target, &at, ">=", value, negated, ctx),
            Operator::Lt => build_comparison_clause(&target, &at, "<", value, negated, ctx),
            Operator::Lte => build_comparison_clause(&target, &at, "<=", value, negated, ctx),
            Operator::In => build_in_clause(&target, &at, value, negated, ctx),
            Operator::Contains => {
                let scalar = value
                    .as_scalar()
                    .ok_or_else(|| FilterError::invalid(&at, "requires a single value"))?;
                let clause = build_contains_clause(&target, &at, scalar, ctx)?;
                Ok(negate_if(clause, negated, target.is_nullable_column()))
            }
            Operator::All => build_all_clause(&target, &at, value, negated, ctx),
            Operator::Size => build_size_clause(&target, &at, value, negated, ctx),
            Operator::Exists | Operator::Null => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| FilterError::invalid(&at, "requires a boolean"))?;
                let present = (flag != negated) == (operator == Operator::Exists);
                Ok(if present {
                    target.present_expr()
                } else {
                    target.missing_expr()
                })
            }
            Operator::Empty => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| FilterError::invalid(&at, "requires a boolean"))?;
                let clause = target.empty_expr();
                Ok(if flag != negated {
                    clause
                } else {
                    format!("NOT {}", clause)
                })
            }
            Operator::Between => build_between_clause(&target, &at, value, negated, ctx),
            Operator::Regex => {
                let pattern = string_operand(&at, value)?;
                let clause = format!(
                    "{} REGEXP {}",
                    target.value_expr(),
                    ctx.bind(SqlValue::String(pattern.to_string()))
                );
                Ok(negate_if(clause, negated, true))
            }
            Operator::Text => self.build_text_clause(&target, &at, value, negated, ctx),
            Operator::Ne
            | Operator::Nin
            | Operator::NotContains
            | Operator::And
            | Operator::Or
            | Operator::Not => Err(FilterError::malformed(format!(
                "{} cannot be lowered as a field condition",
                operator
            ))),
        }
    }

    /// With an FTS table the whole indexed document is searched, not just `target`.
    fn build_text_clause(
        &self,
        target: &Target<'_>,
        at: &str,
        value: &FilterValue,
        negated: bool,
        ctx: &mut SqlContext,
    ) -> Result<String, FilterError> {
        let text = string_operand(at, value)?;
        match self.schema.fts_table() {
            Some(fts) => {
                let clause = format!(
                    "{}.rowid IN (SELECT rowid FROM {} WHERE {} MATCH {})",
                    self.schema.table,
                    fts,
                    fts,
                    ctx.bind(SqlValue::String(fts_phrase(text)))
                );
                Ok(negate_if(clause, negated, false))
            }
            None => {
                let clause = format!(
                    "{} LIKE {} ESCAPE '\\'",
                    target.value_expr(),
                    ctx.bind(SqlValue::String(like_pattern(text)))
                );
                Ok(negate_if(clause, negated, true))
            }
        }
    }
}

impl FilterBackend for SqlCompiler {
    type Output = (String, Vec<SqlValue>);

    fn name(&self) -> &'static str {
        "relational"
    }

    fn supports(&self, operator: Operator) -> bool {
        match operator {
            Operator::Regex => self.schema.regexp,
            _ => true,
        }
    }

    fn convert(&self, expression: &CompoundExpression) -> Result<Self::Output, FilterError> {
        validate_expression(self, expression)?;
        let mut ctx = SqlContext::default();
        let sql = self.build_compound(expression, &mut ctx)?;
        tracing::debug!("Compiled filter to SQL with {} parameters", ctx.params.len());
        Ok((sql, ctx.params))
    }
}

fn negate(clause: String) -> String {
    format!("NOT COALESCE({}, 0)", clause)
}

/// `nullable` clauses may evaluate to NULL and are coalesced before inversion.
fn negate_if(clause: String, negated: bool, nullable: bool) -> String {
    match (negated, nullable) {
        (false, _) => clause,
        (true, true) => negate(clause),
        (true, false) => format!("NOT ({})", clause),
    }
}

fn build_eq_clause(
    target: &Target<'_>,
    at: &str,
    value: &FilterValue,
    negated: bool,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    let op = if negated { "IS NOT" } else { "=" };
    match value {
        FilterValue::Scalar(Scalar::Null) => Ok(if negated {
            target.present_expr()
        } else {
            target.missing_expr()
        }),
        FilterValue::Scalar(scalar) if scalar.is_numeric() => {
            let lhs = target.numeric_expr();
            Ok(format!("{} {} {}", lhs, op, ctx.bind_scalar(at, scalar)?))
        }
        FilterValue::Scalar(scalar) => {
            let lhs = target.value_expr();
            Ok(format!("{} {} {}", lhs, op, ctx.bind_scalar(at, scalar)?))
        }
        composite => {
            let lhs = target.value_expr();
            let json = composite.to_json().to_string();
            Ok(format!("{} {} json({})", lhs, op, ctx.bind(SqlValue::String(json))))
        }
    }
}

fn build_comparison_clause(
    target: &Target<'_>,
    at: &str,
    op: &str,
    value: &FilterValue,
    negated: bool,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    let scalar = comparable(at, value)?;
    let lhs = if scalar.is_numeric() {
        target.numeric_expr()
    } else {
        target.value_expr()
    };
    let clause = format!("{} {} {}", lhs, op, ctx.bind_scalar(at, scalar)?);
    Ok(negate_if(clause, negated, true))
}

fn build_in_clause(
    target: &Target<'_>,
    at: &str,
    value: &FilterValue,
    negated: bool,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    let items = scalar_list(at, value)?;
    if items.is_empty() {
        return Ok(if negated { "1=1" } else { "1=0" }.to_string());
    }
    let lhs = if items.iter().all(|s| s.is_numeric()) {
        target.numeric_expr()
    } else {
        target.value_expr()
    };
    let placeholders = items
        .iter()
        .map(|scalar| ctx.bind_scalar(at, scalar))
        .collect::<Result<Vec<_>, _>>()?;
    let clause = format!("{} IN ({})", lhs, placeholders.join(", "));
    Ok(negate_if(clause, negated, true))
}

/// Array membership for JSON values, substring match for text columns.
fn build_contains_clause(
    target: &Target<'_>,
    at: &str,
    scalar: &Scalar,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    match target {
        Target::Json {
            table,
            column,
            path,
        } => Ok(format!(
            "EXISTS (SELECT 1 FROM json_each({}.{}, '{}') AS elem WHERE elem.value = {})",
            table,
            column,
            path,
            ctx.bind_scalar(at, scalar)?
        )),
        Target::Column {
            column,
            column_type: ColumnType::Text,
        } => match scalar {
            Scalar::String(s) => Ok(format!(
                "{} LIKE {} ESCAPE '\\'",
                column,
                ctx.bind(SqlValue::String(like_pattern(s)))
            )),
            _ => Err(FilterError::invalid(
                at,
                format!("column {} can only be searched for strings", column),
            )),
        },
        Target::Column { column, .. } => Err(FilterError::invalid(
            at,
            format!("column {} is neither text nor JSON", column),
        )),
    }
}

fn build_all_clause(
    target: &Target<'_>,
    at: &str,
    value: &FilterValue,
    negated: bool,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    let items = scalar_list(at, value)?;
    if items.is_empty() {
        return Ok(if negated { "1=0" } else { "1=1" }.to_string());
    }
    let parts = items
        .iter()
        .map(|scalar| build_contains_clause(target, at, scalar, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let clause = if parts.len() == 1 {
        parts.concat()
    } else {
        format!("({})", parts.join(" AND "))
    };
    Ok(negate_if(clause, negated, target.is_nullable_column()))
}

fn build_size_clause(
    target: &Target<'_>,
    at: &str,
    value: &FilterValue,
    negated: bool,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    let size = match value.as_scalar() {
        Some(Scalar::Integer(n)) if *n >= 0 => *n,
        _ => return Err(FilterError::invalid(at, "requires a non-negative integer")),
    };
    let Target::Json { column, path, .. } = target else {
        return Err(FilterError::invalid(at, "only JSON values have a size"));
    };
    let clause = format!(
        "(json_type({c}, '{p}') = 'array' AND json_array_length({c}, '{p}') = {})",
        ctx.bind(SqlValue::Integer(size)),
        c = column,
        p = path
    );
    Ok(negate_if(clause, negated, true))
}

fn build_between_clause(
    target: &Target<'_>,
    at: &str,
    value: &FilterValue,
    negated: bool,
    ctx: &mut SqlContext,
) -> Result<String, FilterError> {
    let bounds = match value.scalar_items() {
        Some(items) if items.len() == 2 => items,
        _ => return Err(FilterError::invalid(at, "requires exactly two values")),
    };
    let (low, high) = (bounds[0], bounds[1]);
    for bound in [low, high] {
        if !matches!(bound, Scalar::String(_) | Scalar::Integer(_) | Scalar::Number(_)) {
            return Err(FilterError::invalid(at, "bounds must be strings or numbers"));
        }
    }
    let lhs = if low.is_numeric() && high.is_numeric() {
        target.numeric_expr()
    } else {
        target.value_expr()
    };
    let low = ctx.bind_scalar(at, low)?;
    let high = ctx.bind_scalar(at, high)?;
    let clause = format!("{} BETWEEN {} AND {}", lhs, low, high);
    Ok(negate_if(clause, negated, true))
}

fn comparable<'a>(at: &str, value: &'a FilterValue) -> Result<&'a Scalar, FilterError> {
    match value.as_scalar() {
        Some(scalar @ (Scalar::String(_) | Scalar::Integer(_) | Scalar::Number(_))) => Ok(scalar),
        _ => Err(FilterError::invalid(at, "requires a string or number")),
    }
}

fn scalar_list<'a>(at: &str, value: &'a FilterValue) -> Result<Vec<&'a Scalar>, FilterError> {
    value
        .primitive_items()
        .ok_or_else(|| FilterError::invalid(at, "requires an array of non-null primitives"))
}

fn string_operand<'a>(at: &str, value: &'a FilterValue) -> Result<&'a str, FilterError> {
    match value.as_scalar() {
        Some(Scalar::String(s)) => Ok(s),
        _ => Err(FilterError::invalid(at, "requires a string")),
    }
}

/// The whole text as one FTS5 phrase, so operators, column filters and punctuation in
/// it are searched for literally instead of parsed as query syntax.
fn fts_phrase(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// `%text%` with LIKE wildcards escaped by `\`.
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests;
