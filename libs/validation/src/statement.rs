//! Statement shape matching.
//!
//! A shallow allow-list over four statement shapes. This is deliberately not
//! a SQL parser: a statement passes if it has the rough outline of one of the
//! shapes, nothing more is checked.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Outline a statement was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementShape {
    /// `SELECT ... FROM ...`
    Select,
    /// `INSERT INTO ... VALUES (...)`
    Insert,
    /// `UPDATE ... SET ... [WHERE ...]`
    Update,
    /// `DELETE FROM ... [WHERE ...]`
    Delete,
}

impl StatementShape {
    /// Whether the statement only reads.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Select)
    }
}

impl fmt::Display for StatementShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

struct ShapePattern {
    shape: StatementShape,
    regex: Regex,
}

fn pattern(shape: StatementShape, regex: &str) -> ShapePattern {
    ShapePattern {
        shape,
        // Patterns are literals below; failing to compile one is a programming error.
        regex: Regex::new(regex).unwrap_or_else(|e| panic!("invalid {shape} pattern: {e}")),
    }
}

static PATTERNS: Lazy<Vec<ShapePattern>> = Lazy::new(|| {
    vec![
        pattern(
            StatementShape::Select,
            r"(?i)^\s*SELECT\s+.+?\s+FROM\s+.+?\s*;?\s*$",
        ),
        pattern(
            StatementShape::Insert,
            r"(?i)^\s*INSERT\s+INTO\s+.+?\s+VALUES\s*\(.+?\)\s*;?\s*$",
        ),
        pattern(
            StatementShape::Update,
            r"(?i)^\s*UPDATE\s+.+?\s+SET\s+.+?(\s+WHERE\s+.+?)?\s*;?\s*$",
        ),
        pattern(
            StatementShape::Delete,
            r"(?i)^\s*DELETE\s+FROM\s+.+?(\s+WHERE\s+.+?)?\s*;?\s*$",
        ),
    ]
});

/// Classify a statement, or `None` if it matches no accepted shape.
pub fn classify(sql: &str) -> Option<StatementShape> {
    PATTERNS
        .iter()
        .find(|p| p.regex.is_match(sql))
        .map(|p| p.shape)
}
