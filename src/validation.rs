//! Statement validation
//!
//! Pure safety and syntax gate that every generated statement passes
//! before it can reach a query engine. Rules run in order and the first
//! failing rule decides the message:
//!
//! 1. the statement must be non-empty
//! 2. no write keyword may appear as a standalone token
//! 3. the statement must start with `SELECT` or `WITH`
//! 4. it must parse as exactly one query

use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::fmt;

/// Keywords that mark a statement as a write or privileged operation.
pub const WRITE_KEYWORDS: [&str; 11] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE",
];

lazy_static::lazy_static! {
    static ref WRITE_PATTERNS: Vec<(&'static str, Regex)> = WRITE_KEYWORDS
        .iter()
        .filter_map(|kw| {
            Regex::new(&format!(r"(?i)\b{}\b", kw)).ok().map(|re| (*kw, re))
        })
        .collect();
}

/// Why a statement was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    WriteKeyword(&'static str),
    NotSelect,
    Unparseable(String),
    NoStatements,
    MultipleStatements,
    NotAQuery,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "No SQL statement generated"),
            Rejection::WriteKeyword(kw) => write!(
                f,
                "Write operation '{}' not allowed. Only SELECT queries are permitted.",
                kw
            ),
            Rejection::NotSelect | Rejection::NotAQuery => {
                write!(f, "Only SELECT queries are permitted.")
            }
            Rejection::Unparseable(msg) => write!(f, "SQL parse error: {}", msg),
            Rejection::NoStatements => write!(f, "Failed to parse SQL query"),
            Rejection::MultipleStatements => {
                write!(f, "Only a single SELECT statement is permitted.")
            }
        }
    }
}

/// First write keyword (in [`WRITE_KEYWORDS`] order) found as a whole word.
pub fn find_write_keyword(statement: &str) -> Option<&'static str> {
    WRITE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(statement))
        .map(|(kw, _)| *kw)
}

pub fn validate_statement(statement: &str) -> Result<(), Rejection> {
    let trimmed = statement.trim();
    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }

    if let Some(kw) = find_write_keyword(trimmed) {
        return Err(Rejection::WriteKeyword(kw));
    }

    let upper = trimmed.to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(Rejection::NotSelect);
    }

    let parsed = Parser::parse_sql(&GenericDialect {}, trimmed)
        .map_err(|e| Rejection::Unparseable(e.to_string()))?;
    match parsed.as_slice() {
        [] => Err(Rejection::NoStatements),
        [Statement::Query(_)] => Ok(()),
        [_] => Err(Rejection::NotAQuery),
        _ => Err(Rejection::MultipleStatements),
    }
}
