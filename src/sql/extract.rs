//! SQL Extractor
//!
//! Recovers the first SQL statement from raw completion text. Handles fenced
//! blocks with or without a language tag, prose around the statement, and
//! bare SQL.
//!
//! Every keyword match is only a candidate. A candidate is accepted when the
//! parser takes it; failing that, when it is structurally valid and has the
//! shape of a statement. Prose that happens to start with "Update:" or to
//! mention SELECT is skipped in favour of the next match.

use super::validate::{dialect_for, parses, validate_sql};
use super::statement_end;
use crate::error::ExtractError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A fenced block; the closing fence may be missing on truncated output.
    static ref FENCE: Regex =
        Regex::new(r"(?s)```[ \t]*(?:[A-Za-z0-9_+-]+[ \t]*\r?\n|\r?\n)?(.*?)(?:```|\z)").unwrap();

    /// Statement keyword at the start of a line.
    static ref LINE_START: Regex = Regex::new(
        r"(?im)^[ \t]*(?:SELECT|INSERT|UPDATE|DELETE|EXPLAIN|VALUES|WITH[ \t]+(?:RECURSIVE[ \t]+)?\w+[ \t]+AS)\b"
    )
    .unwrap();

    /// Upper-case statement keyword anywhere, for SQL embedded mid-sentence.
    static ref INLINE: Regex = Regex::new(r"\b(?:SELECT|INSERT|UPDATE|DELETE|EXPLAIN|WITH)\b").unwrap();

    static ref BLANK_LINE: Regex = Regex::new(r"\r?\n[ \t]*\r?\n").unwrap();

    /// Paragraph openers that carry a statement on across a blank line.
    static ref CONTINUATION: Regex = Regex::new(
        r"(?i)^(?:\)|--|/\*|(?:SELECT|WITH|INSERT|UPDATE|DELETE|VALUES|FROM|JOIN|INNER|LEFT|RIGHT|FULL|CROSS|ON|WHERE|AND|OR|GROUP|HAVING|ORDER|LIMIT|OFFSET|UNION|INTERSECT|EXCEPT|RETURNING|SET)\b)"
    )
    .unwrap();

    /// Minimal statement shape for SQL the parser does not support.
    static ref STATEMENT_SHAPE: Regex = Regex::new(
        r"(?is)^\s*(?:--[^\n]*\n\s*)*(?:SELECT\b.*\bFROM\b|SELECT\s+(?:[0-9'(*]|COUNT\b|NOW\b|CURRENT_)|WITH\s+(?:RECURSIVE\s+)?\w+\s+AS\s*\(|INSERT\s+INTO\b|UPDATE\s+[\w.]+\s+SET\b|DELETE\s+FROM\b|VALUES\s*\(|EXPLAIN\s+(?:ANALYZE\s+)?(?:SELECT|WITH)\b)"
    )
    .unwrap();
}

/// Dialects tried when checking a candidate with the parser.
const PARSE_DIALECTS: &[&str] = &["PostgreSQL", "generic"];

/// Extract one statement, terminator included when present.
///
/// Fails with [`ExtractError::NoSqlFound`] when no candidate holds a usable
/// statement.
pub fn extract_sql(completion: &str) -> Result<String, ExtractError> {
    let text = completion.trim();

    // Prefer the first fenced block that actually holds SQL.
    for caps in FENCE.captures_iter(text) {
        if let Some(body) = caps.get(1) {
            if let Some(sql) = first_statement(body.as_str(), true) {
                return Ok(sql);
            }
        }
    }

    first_statement(text, false).ok_or(ExtractError::NoSqlFound)
}

fn first_statement(text: &str, fenced: bool) -> Option<String> {
    let candidates: Vec<&str> = candidate_starts(text)
        .into_iter()
        .flat_map(|start| statement_candidates(text, start, fenced))
        .filter(|sql| validate_sql(sql).is_ok())
        .collect();

    let accepted = candidates
        .iter()
        .find(|sql| {
            PARSE_DIALECTS
                .iter()
                .any(|name| parses(sql, dialect_for(name).as_ref()))
        })
        .or_else(|| candidates.iter().find(|sql| STATEMENT_SHAPE.is_match(sql)))?;

    Some(accepted.to_string())
}

/// Offsets where a statement may begin: line-leading keywords first, then
/// upper-case keywords inside sentences.
fn candidate_starts(text: &str) -> Vec<usize> {
    let line_matches: Vec<_> = LINE_START.find_iter(text).map(|m| m.range()).collect();
    let mut starts: Vec<usize> = line_matches
        .iter()
        .map(|r| include_leading_comments(text, r.start))
        .collect();
    for m in INLINE.find_iter(text) {
        if !line_matches.iter().any(|r| r.contains(&m.start())) {
            starts.push(m.start());
        }
    }
    starts
}

/// Statements beginning at `start`, longest first.
///
/// Inside a fence the statement runs to its terminator or the end of the
/// block. Outside, it may cross a blank line only when the next paragraph
/// continues the statement; every shorter paragraph cut is offered as well,
/// so trailing prose that looks like a continuation still falls away.
fn statement_candidates(text: &str, start: usize, fenced: bool) -> Vec<&str> {
    let rest = &text[start..];
    let terminated = |slice: &str| statement_end(slice).unwrap_or(slice.len());

    if fenced {
        let sql = rest[..terminated(rest)].trim();
        return if sql.is_empty() { vec![] } else { vec![sql] };
    }

    let mut cuts = Vec::new();
    let mut end = rest.len();
    for blank in BLANK_LINE.find_iter(rest) {
        if statement_end(&rest[..blank.start()]).is_some() {
            break;
        }
        cuts.push(blank.start());
        if !CONTINUATION.is_match(rest[blank.end()..].trim_start()) {
            end = blank.start();
            break;
        }
    }

    let mut lengths = vec![end];
    lengths.extend(cuts.into_iter().rev().filter(|cut| *cut < end));

    let mut candidates: Vec<&str> = Vec::new();
    for len in lengths {
        let slice = &rest[..len];
        let sql = slice[..terminated(slice)].trim();
        if !sql.is_empty() && !candidates.contains(&sql) {
            candidates.push(sql);
        }
    }
    candidates
}

/// Pull `--` comment lines directly above the statement into it.
fn include_leading_comments(text: &str, start: usize) -> usize {
    let mut start = start;
    while start > 0 {
        let before = &text[..start - 1];
        let line_start = before.rfind('\n').map(|p| p + 1).unwrap_or(0);
        if before[line_start..].trim_start().starts_with("--") {
            start = line_start;
        } else {
            break;
        }
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_with_language_tag() {
        assert_eq!(extract_sql("```sql\nSELECT 1;\n```").unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_fenced_block_without_language_tag() {
        let completion = "Here you go:\n```\nSELECT name FROM res_partner;\n```\nHope it helps.";
        assert_eq!(extract_sql(completion).unwrap(), "SELECT name FROM res_partner;");
    }

    #[test]
    fn test_unterminated_fence() {
        assert_eq!(
            extract_sql("```sql\nSELECT id FROM sale_order").unwrap(),
            "SELECT id FROM sale_order"
        );
    }

    #[test]
    fn test_prose_around_bare_sql() {
        let completion = "The following query answers the question.\n\nSELECT COUNT(*) FROM sale_order WHERE state = 'sale';\n\nIt counts confirmed orders.";
        assert_eq!(
            extract_sql(completion).unwrap(),
            "SELECT COUNT(*) FROM sale_order WHERE state = 'sale';"
        );
    }

    #[test]
    fn test_inline_sql_in_sentence() {
        assert_eq!(
            extract_sql("You can run SELECT 1; to check the connection.").unwrap(),
            "SELECT 1;"
        );
    }

    #[test]
    fn test_first_statement_wins() {
        let completion = "SELECT 1;\nSELECT 2;";
        assert_eq!(extract_sql(completion).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_semicolon_inside_literal_or_comment_does_not_split() {
        let completion = "```sql\nSELECT name -- pick; name\nFROM res_partner WHERE ref = 'a;b';\n```";
        assert_eq!(
            extract_sql(completion).unwrap(),
            "SELECT name -- pick; name\nFROM res_partner WHERE ref = 'a;b';"
        );
    }

    #[test]
    fn test_leading_comment_lines_are_kept() {
        let completion = "```sql\n-- Produtos vendidos\nSELECT 1;\n```";
        assert_eq!(extract_sql(completion).unwrap(), "-- Produtos vendidos\nSELECT 1;");
    }

    #[test]
    fn test_cte_is_recognised() {
        let completion = "WITH recent AS (SELECT * FROM sale_order)\nSELECT COUNT(*) FROM recent;";
        assert_eq!(extract_sql(completion).unwrap(), completion);
    }

    #[test]
    fn test_no_keyword_is_an_error() {
        assert_eq!(
            extract_sql("I'm sorry, I cannot answer that with the given tables."),
            Err(ExtractError::NoSqlFound)
        );
        assert_eq!(extract_sql(""), Err(ExtractError::NoSqlFound));
    }

    #[test]
    fn test_bare_cte_across_blank_line_is_kept_whole() {
        let completion = "WITH recent AS (\n    SELECT id FROM sale_order\n)\n\nSELECT COUNT(*) FROM recent";
        assert_eq!(extract_sql(completion).unwrap(), completion);
    }

    #[test]
    fn test_trailing_prose_after_unterminated_sql_is_dropped() {
        let completion = "select name from res_partner where active\n\nAnd that lists every active partner.";
        assert_eq!(
            extract_sql(completion).unwrap(),
            "select name from res_partner where active"
        );
    }

    #[test]
    fn test_prose_line_starting_with_keyword_is_skipped() {
        let completion = "Update: the stock table is not in the context, so this uses sales only.\n\nSELECT id FROM sale_order;";
        assert_eq!(extract_sql(completion).unwrap(), "SELECT id FROM sale_order;");
    }

    #[test]
    fn test_refusal_mentioning_keyword_is_not_sql() {
        assert_eq!(
            extract_sql("I cannot write a SELECT for this because the stock tables are not in the context."),
            Err(ExtractError::NoSqlFound)
        );
        assert_eq!(
            extract_sql("Select a narrower period and ask again."),
            Err(ExtractError::NoSqlFound)
        );
    }
}
