//! Dotted field paths such as `metadata.author.name` or `items.0.sku`.
//!
//! Segments are restricted to `[A-Za-z0-9_-]` so a path can be rendered into a quoted
//! SQL literal or a payload key without escaping. The first segment may not start
//! with a digit.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("field path is empty".to_string());
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        for (idx, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(format!("field path '{}' has an empty segment", raw));
            }
            if let Some(ch) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
            {
                return Err(format!(
                    "field path '{}' contains unsupported character '{}'",
                    raw, ch
                ));
            }
            if idx == 0 && segment.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(format!("field path '{}' must start with a name", raw));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// The path below the root segment, if any.
    pub fn tail(&self) -> Option<FieldPath> {
        if !self.is_nested() {
            return None;
        }
        let segments = self.segments[1..].to_vec();
        Some(Self {
            raw: segments.join("."),
            segments,
        })
    }

    /// SQLite JSON1 path: `a.b.0` becomes `$.a.b[0]`, and names that are not plain
    /// identifiers are double-quoted.
    ///
    /// An all-digit segment is always an array index here, so an object key such as the
    /// `123` in `codes.123` cannot be reached on SQLite. Payload lookups index only when
    /// the value is an array and otherwise read the key.
    pub fn to_json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            if segment.chars().all(|c| c.is_ascii_digit()) {
                out.push_str(&format!("[{}]", segment));
            } else if segment.contains('-') {
                out.push_str(&format!(".\"{}\"", segment));
            } else {
                out.push('.');
                out.push_str(segment);
            }
        }
        out
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
