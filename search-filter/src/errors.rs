use crate::operators::Operator;

/// Errors raised while validating, parsing or compiling a filter.
///
/// Every variant is fail-closed: no partial query is ever returned alongside one.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Structural or type violation found by the validator.
    InvalidFilter { path: String, reason: String },
    /// Syntax the parser cannot turn into an expression tree.
    MalformedQuery(String),
    /// An operator outside the backend's declared support set.
    UnsupportedOperator {
        backend: &'static str,
        operator: Operator,
    },
}

impl FilterError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FilterError::InvalidFilter {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        FilterError::MalformedQuery(msg.into())
    }
}

impl From<FilterError> for String {
    fn from(error: FilterError) -> Self {
        error.to_string()
    }
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::InvalidFilter { path, reason } if path.is_empty() => {
                write!(f, "Invalid filter: {}", reason)
            }
            FilterError::InvalidFilter { path, reason } => {
                write!(f, "Invalid filter at {}: {}", path, reason)
            }
            FilterError::MalformedQuery(msg) => write!(f, "Malformed query: {}", msg),
            FilterError::UnsupportedOperator { backend, operator } => write!(
                f,
                "Unsupported operator: {} is not supported by the {} backend",
                operator, backend
            ),
        }
    }
}

impl std::error::Error for FilterError {}
