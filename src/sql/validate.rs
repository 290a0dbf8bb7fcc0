//! Structural sanity checks for generated SQL.

use super::{leading_keyword, scan, SegmentKind, STATEMENT_KEYWORDS};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("SQL is empty")]
    Empty,

    #[error("statement does not start with an allowed keyword (found {0:?})")]
    DisallowedKeyword(Option<String>),

    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("unterminated string, identifier or comment")]
    Unterminated,
}

/// Non-empty, starts with an allowed statement keyword, parentheses balance
/// outside literals, and every quote and block comment is closed.
pub fn validate_sql(sql: &str) -> Result<(), ValidationIssue> {
    if sql.trim().is_empty() {
        return Err(ValidationIssue::Empty);
    }

    let scanned = scan(sql);
    if !scanned.closed {
        return Err(ValidationIssue::Unterminated);
    }

    match leading_keyword(sql) {
        Some(kw) if STATEMENT_KEYWORDS.contains(&kw.as_str()) => {}
        other => return Err(ValidationIssue::DisallowedKeyword(other)),
    }

    let mut depth: i64 = 0;
    for segment in scanned.segments.iter().filter(|s| s.kind == SegmentKind::Code) {
        for c in segment.text(sql).chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ValidationIssue::UnbalancedParentheses);
                    }
                }
                _ => {}
            }
        }
    }
    if depth != 0 {
        return Err(ValidationIssue::UnbalancedParentheses);
    }

    Ok(())
}

/// Parser dialect for a configured dialect name.
pub fn dialect_for(name: &str) -> Box<dyn Dialect> {
    match name.to_ascii_lowercase().as_str() {
        "postgresql" | "postgres" => Box::new(PostgreSqlDialect {}),
        "sqlite" => Box::new(SQLiteDialect {}),
        "mysql" => Box::new(MySqlDialect {}),
        _ => Box::new(GenericDialect {}),
    }
}

/// Whether the full parser accepts `sql` in `dialect`.
pub fn parses(sql: &str, dialect: &dyn Dialect) -> bool {
    Parser::parse_sql(dialect, sql).is_ok()
}
