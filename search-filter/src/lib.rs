//! MongoDB-style search filters compiled for two stores: SQLite (JSON1) and
//! payload-indexed vector search.
//!
//! Raw predicates go through [`FilterValidator`] and [`Parser`] into an expression tree,
//! which each [`FilterBackend`] lowers to its native query. [`FilterEngine`] wires the
//! whole path together.

mod backend;
mod config;
mod engine;
mod errors;
mod operators;
mod parser;
mod path;
pub mod shadow;
mod sql;
mod types;
mod validator;
mod vector;

pub use backend::{validate_expression, FilterBackend};
pub use config::{ColumnConfig, FilterConfig, RelationalConfig, VectorConfig};
pub use engine::FilterEngine;
pub use errors::FilterError;
pub use operators::{Operator, OperatorKind};
pub use parser::{parse_query, Parser, DEFAULT_MAX_DEPTH};
pub use path::FieldPath;
pub use sql::{check_identifier, ColumnType, SqlCompiler, SqlSchema, SqlValue};
pub use types::{
    CompoundExpression, Condition, Expression, FilterValue, LogicalOperator, Scalar,
};
pub use validator::{
    normalize_date, FilterValidator, SanitizedQuery, ValidatorConfig, DEFAULT_MAX_ARRAY_SIZE,
    DEFAULT_MAX_FILTER_SIZE,
};
pub use vector::{
    Clause, FieldCondition, Match, PayloadField, Range, StructuredFilter, VectorCompiler,
    VectorSchema,
};
