use crate::backend::FilterBackend;
use crate::config::FilterConfig;
use crate::errors::FilterError;
use crate::parser::Parser;
use crate::sql::{SqlCompiler, SqlValue};
use crate::types::CompoundExpression;
use crate::validator::FilterValidator;
use crate::vector::{StructuredFilter, VectorCompiler};
use serde_json::Value as JsonValue;

/// Validate, parse and compile in one place. Holds no per-call state, so a single engine
/// can be shared behind an `Arc` by every request handler.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    validator: FilterValidator,
    parser: Parser,
    sql: SqlCompiler,
    vector: VectorCompiler,
}

impl FilterEngine {
    pub fn new(
        validator: FilterValidator,
        parser: Parser,
        sql: SqlCompiler,
        vector: VectorCompiler,
    ) -> Self {
        Self {
            validator,
            parser,
            sql,
            vector,
        }
    }

    pub fn from_config(config: &FilterConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.validator(),
            config.parser(),
            config.sql_compiler()?,
            config.vector_compiler()?,
        ))
    }

    pub fn validator(&self) -> &FilterValidator {
        &self.validator
    }

    pub fn sql_compiler(&self) -> &SqlCompiler {
        &self.sql
    }

    pub fn vector_compiler(&self) -> &VectorCompiler {
        &self.vector
    }

    /// Raw input is validated first; the parser only ever sees the sanitized copy.
    pub fn prepare(&self, raw: &JsonValue) -> Result<CompoundExpression, FilterError> {
        let sanitized = self.validator.validate(raw)?;
        self.parser.parse(sanitized.as_value())
    }

    pub fn to_sql(&self, raw: &JsonValue) -> Result<(String, Vec<SqlValue>), FilterError> {
        self.sql.convert(&self.prepare(raw)?)
    }

    /// `None` means the filter places no restriction on the vector search.
    pub fn to_vector(&self, raw: &JsonValue) -> Result<Option<StructuredFilter>, FilterError> {
        self.vector.convert(&self.prepare(raw)?)
    }
}
