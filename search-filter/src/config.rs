use crate::parser::Parser;
use crate::path::FieldPath;
use crate::sql::{
    ColumnType, SqlCompiler, SqlSchema, DEFAULT_COLUMNS, DEFAULT_JSON_COLUMN, DEFAULT_TABLE,
};
use crate::validator::{FilterValidator, ValidatorConfig};
use crate::vector::{
    VectorCompiler, VectorSchema, DEFAULT_METADATA_PREFIX, DEFAULT_ROOT_FIELDS,
    DEFAULT_TEXT_FIELDS,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Settings for the whole filter pipeline. Every section may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub limits: ValidatorConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub vector: VectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationalConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_json_column")]
    pub json_column: String,
    #[serde(default = "default_columns")]
    pub columns: Vec<ColumnConfig>,
    /// The connection must register a `regexp()` function.
    #[serde(default)]
    pub regexp: bool,
    pub fts_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// Database column; defaults to `name`.
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
    #[serde(default = "default_root_fields")]
    pub root_fields: Vec<String>,
    #[serde(default = "default_text_fields")]
    pub text_fields: Vec<String>,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            json_column: default_json_column(),
            columns: default_columns(),
            regexp: false,
            fts_table: None,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            metadata_prefix: default_metadata_prefix(),
            root_fields: default_root_fields(),
            text_fields: default_text_fields(),
        }
    }
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parses and checks the configuration, so a bad identifier fails at startup rather
    /// than on the first query.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FilterConfig = toml::from_str(content).context("Failed to parse config")?;
        config.sql_schema()?;
        config.vector_schema()?;
        Ok(config)
    }

    pub fn validator(&self) -> FilterValidator {
        FilterValidator::new(self.limits.clone())
    }

    pub fn parser(&self) -> Parser {
        Parser::new(self.limits.max_depth)
    }

    pub fn sql_schema(&self) -> Result<SqlSchema> {
        let relational = &self.relational;
        let mut schema = SqlSchema::new(&relational.table, &relational.json_column)
            .map_err(anyhow::Error::msg)
            .context("Invalid [relational] table or json_column")?;
        for column in &relational.columns {
            let db_column = column.column.as_deref().unwrap_or(&column.name);
            schema = schema
                .with_column(&column.name, db_column, column.column_type)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid [[relational.columns]] entry: {}", column.name))?;
        }
        schema = schema.with_regexp(relational.regexp);
        if let Some(fts_table) = &relational.fts_table {
            schema = schema
                .with_fts_table(fts_table)
                .map_err(anyhow::Error::msg)
                .context("Invalid [relational] fts_table")?;
        }
        Ok(schema)
    }

    pub fn vector_schema(&self) -> Result<VectorSchema> {
        let vector = &self.vector;
        let mut schema = VectorSchema::new(&vector.metadata_prefix);
        for field in &vector.root_fields {
            let path = FieldPath::parse(field)
                .map_err(anyhow::Error::msg)
                .context("Invalid [vector] root_fields entry")?;
            if path.is_nested() {
                anyhow::bail!(
                    "Invalid [vector] root_fields entry: {} is not a top-level key",
                    field
                );
            }
            schema = schema.with_root_field(field);
        }
        for field in &vector.text_fields {
            FieldPath::parse(field)
                .map_err(anyhow::Error::msg)
                .context("Invalid [vector] text_fields entry")?;
            schema = schema.with_text_field(field);
        }
        Ok(schema)
    }

    pub fn sql_compiler(&self) -> Result<SqlCompiler> {
        Ok(SqlCompiler::new(self.sql_schema()?))
    }

    pub fn vector_compiler(&self) -> Result<VectorCompiler> {
        Ok(VectorCompiler::new(self.vector_schema()?))
    }
}

// Default functions
fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_json_column() -> String {
    DEFAULT_JSON_COLUMN.to_string()
}

fn default_columns() -> Vec<ColumnConfig> {
    DEFAULT_COLUMNS
        .iter()
        .map(|(name, column_type)| ColumnConfig {
            name: name.to_string(),
            column: None,
            column_type: *column_type,
        })
        .collect()
}

fn default_metadata_prefix() -> String {
    DEFAULT_METADATA_PREFIX.to_string()
}

fn default_root_fields() -> Vec<String> {
    DEFAULT_ROOT_FIELDS.iter().map(|f| f.to_string()).collect()
}

fn default_text_fields() -> Vec<String> {
    DEFAULT_TEXT_FIELDS.iter().map(|f| f.to_string()).collect()
}
