//! Operator registry: the closed set of query operators and their classification.

use std::str::FromStr;
use strsim::jaro_winkler;

/// Every key that starts with this sigil is an operator, never a field.
pub const OPERATOR_SIGIL: char = '$';

const SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Comparison,
    Array,
    Logical,
    Existence,
    Text,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    NotContains,
    All,
    Size,
    And,
    Or,
    Not,
    Exists,
    Null,
    Empty,
    Regex,
    Text,
    Between,
}

impl Operator {
    pub const ALL: [Operator; 21] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Contains,
        Operator::NotContains,
        Operator::All,
        Operator::Size,
        Operator::And,
        Operator::Or,
        Operator::Not,
        Operator::Exists,
        Operator::Null,
        Operator::Empty,
        Operator::Regex,
        Operator::Text,
        Operator::Between,
    ];

    /// Canonical `$`-prefixed spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Contains => "$contains",
            Operator::NotContains => "$not_contains",
            Operator::All => "$all",
            Operator::Size => "$size",
            Operator::And => "$and",
            Operator::Or => "$or",
            Operator::Not => "$not",
            Operator::Exists => "$exists",
            Operator::Null => "$null",
            Operator::Empty => "$empty",
            Operator::Regex => "$regex",
            Operator::Text => "$text",
            Operator::Between => "$between",
        }
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::Eq
            | Operator::Ne
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte => OperatorKind::Comparison,
            Operator::In
            | Operator::Nin
            | Operator::Contains
            | Operator::NotContains
            | Operator::All
            | Operator::Size => OperatorKind::Array,
            Operator::And | Operator::Or | Operator::Not => OperatorKind::Logical,
            Operator::Exists | Operator::Null | Operator::Empty => OperatorKind::Existence,
            Operator::Regex | Operator::Text => OperatorKind::Text,
            Operator::Between => OperatorKind::Range,
        }
    }

    pub fn is_logical(&self) -> bool {
        self.kind() == OperatorKind::Logical
    }

    /// Ordering comparisons whose operand may be a date.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte | Operator::Between
        )
    }

    /// `$ne`, `$nin` and `$not_contains` are stored as themselves in the tree; backends
    /// lower them as the positive operator with negation flipped.
    pub fn positive_form(&self) -> Option<Operator> {
        match self {
            Operator::Ne => Some(Operator::Eq),
            Operator::Nin => Some(Operator::In),
            Operator::NotContains => Some(Operator::Contains),
            _ => None,
        }
    }

    /// Closest known operator to an unrecognised `$`-key, if any is close enough.
    pub fn suggest(unknown: &str) -> Option<Operator> {
        let needle = unknown.to_lowercase();
        Operator::ALL
            .iter()
            .map(|op| (*op, jaro_winkler(&needle, op.as_str())))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(op, _)| op)
    }
}

pub fn is_operator_key(key: &str) -> bool {
    key.starts_with(OPERATOR_SIGIL)
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| match Operator::suggest(s) {
                Some(op) => format!("Unknown operator: {} (did you mean {}?)", s, op),
                None => format!("Unknown operator: {}", s),
            })
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
