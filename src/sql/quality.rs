//! Heuristic quality score for generated SQL (0..=100).
//!
//! Four buckets: basic syntax (30), best practices (30), performance (20)
//! and security (20). Checks look at code only; string literals and
//! comments are ignored except by the comment check itself.

use super::{scan, validate_sql, SegmentKind, ValidationIssue};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref SELECT_STAR: Regex = Regex::new(r"SELECT\s+\*\s+FROM").unwrap();
    static ref TABLE_ALIAS: Regex = Regex::new(r"(?:FROM|JOIN)\s+\w+\s+(?:AS\s+)?\w+").unwrap();
    static ref JOIN_WITH_ON: Regex = Regex::new(r"JOIN\s+\w+(?:\s+(?:AS\s+)?\w+)?\s+ON\b").unwrap();
    static ref JOIN: Regex = Regex::new(r"\bJOIN\b").unwrap();
    static ref SUBQUERY: Regex = Regex::new(r"\(\s*SELECT\b").unwrap();
    static ref WHERE_FUNCTION: Regex = Regex::new(r"WHERE\s+\w+\s*\(\s*\w+\s*\)").unwrap();
    static ref AGGREGATE: Regex = Regex::new(r"\b(?:COUNT|SUM|AVG|MAX|MIN)\s*\(").unwrap();
    static ref DANGEROUS: Regex = Regex::new(r"\b(DROP|TRUNCATE|DELETE|UPDATE|ALTER|GRANT|REVOKE)\b").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlQualityReport {
    pub score: u32,
    pub max_score: u32,
    pub syntax: u32,
    pub best_practices: u32,
    pub performance: u32,
    pub security: u32,
    /// Passes the structural check used by the literal adapter.
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

pub fn evaluate_sql_quality(sql: &str) -> SqlQualityReport {
    let mut report = SqlQualityReport {
        max_score: 100,
        ..SqlQualityReport::default()
    };

    if sql.trim().is_empty() {
        report.issues.push("query is empty".to_string());
        return report;
    }

    let scanned = scan(sql);
    let code: String = scanned
        .segments
        .iter()
        .filter(|s| s.kind == SegmentKind::Code)
        .map(|s| s.text(sql).to_uppercase())
        .collect::<Vec<_>>()
        .join(" ");
    let has_comments = scanned.segments.iter().any(|s| s.is_comment());

    report.is_valid = validate_sql(sql).is_ok();
    let syntax = check_syntax(sql, &code, &mut report);
    let best_practices = check_best_practices(&code, &mut report);
    let performance = check_performance(&code, &mut report);
    let security = check_security(&code, has_comments, &mut report);
    report.syntax = syntax;
    report.best_practices = best_practices;
    report.performance = performance;
    report.security = security;
    report.score = (report.syntax + report.best_practices + report.performance + report.security).min(100);
    report
}

fn check_syntax(sql: &str, code: &str, report: &mut SqlQualityReport) -> u32 {
    let mut score: i32 = 30;

    match validate_sql(sql) {
        Ok(()) => {}
        Err(ValidationIssue::DisallowedKeyword(_)) => {
            score -= 15;
            report.issues.push("query does not start with a statement keyword".to_string());
        }
        Err(ValidationIssue::UnbalancedParentheses) => {
            score -= 10;
            report.issues.push("unbalanced parentheses".to_string());
        }
        Err(ValidationIssue::Unterminated) => {
            score -= 10;
            report.issues.push("unterminated quote or comment".to_string());
        }
        Err(ValidationIssue::Empty) => score = 0,
    }

    if !sql.trim_end().ends_with(';') {
        score -= 5;
        report.issues.push("query does not end with a semicolon".to_string());
    }

    if code.trim_start().starts_with("SELECT") && !code.contains("FROM") {
        score -= 10;
        report.issues.push("SELECT without FROM clause".to_string());
    }

    score.max(0) as u32
}

fn check_best_practices(code: &str, report: &mut SqlQualityReport) -> u32 {
    let mut score: i32 = 30;

    if SELECT_STAR.is_match(code) {
        score -= 10;
        report.warnings.push("query uses SELECT *".to_string());
        report.suggestions.push("list the needed columns instead of SELECT *".to_string());
    }

    let has_join = JOIN.is_match(code);
    if has_join && !TABLE_ALIAS.is_match(code) {
        score -= 5;
        report.suggestions.push("alias tables in joined queries".to_string());
    }

    if code.contains("GROUP BY") && !AGGREGATE.is_match(code) {
        score -= 5;
        report.warnings.push("GROUP BY without an aggregate function".to_string());
    }

    if code.contains("ORDER BY") && !code.contains("LIMIT") {
        report.suggestions.push("consider a LIMIT on ordered results".to_string());
    }

    if has_join && !JOIN_WITH_ON.is_match(code) {
        score -= 10;
        report.issues.push("JOIN without ON condition".to_string());
    }

    score.max(0) as u32
}

fn check_performance(code: &str, report: &mut SqlQualityReport) -> u32 {
    let mut score: i32 = 20;

    let subqueries = SUBQUERY.find_iter(code).count();
    if subqueries > 2 {
        score -= 5;
        report.warnings.push(format!("{} subqueries", subqueries));
        report.suggestions.push("prefer joins over nested subqueries".to_string());
    }

    if WHERE_FUNCTION.is_match(code) {
        score -= 5;
        report.warnings.push("function applied to a column in WHERE".to_string());
    }

    if code.contains("DISTINCT") && code.contains("GROUP BY") {
        score -= 5;
        report.warnings.push("DISTINCT together with GROUP BY".to_string());
    }

    let joins = JOIN.find_iter(code).count();
    if joins > 5 {
        score -= 5;
        report.warnings.push(format!("{} joins", joins));
    }

    score.max(0) as u32
}

fn check_security(code: &str, has_comments: bool, report: &mut SqlQualityReport) -> u32 {
    let mut score: i32 = 20;

    if has_comments {
        score -= 10;
        report.warnings.push("query contains comments".to_string());
    }

    let mut seen: Vec<&str> = Vec::new();
    for m in DANGEROUS.find_iter(code) {
        if !seen.contains(&m.as_str()) {
            seen.push(m.as_str());
            score -= 10;
            report.issues.push(format!("dangerous command: {}", m.as_str()));
        }
    }

    if code.contains("UNION") {
        score -= 5;
        report.warnings.push("query contains UNION".to_string());
    }

    score.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_query_scores_full_marks() {
        let report = evaluate_sql_quality(
            "SELECT so.name, SUM(so.amount_total) FROM sale_order so \
             JOIN res_partner rp ON rp.id = so.partner_id GROUP BY so.name;",
        );
        assert_eq!(report.score, 100, "{:?}", report);
        assert!(report.is_valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_select_star_and_missing_semicolon_are_penalised() {
        let report = evaluate_sql_quality("SELECT * FROM sale_order");
        assert_eq!(report.syntax, 25);
        assert_eq!(report.best_practices, 20);
        assert_eq!(report.score, 85);
    }

    #[test]
    fn test_dangerous_statement_scores_low() {
        let report = evaluate_sql_quality("DELETE FROM sale_order;");
        assert!(report.security <= 10);
        assert!(report.issues.iter().any(|i| i.contains("DELETE")));
    }

    #[test]
    fn test_empty_sql_scores_zero() {
        let report = evaluate_sql_quality("   ");
        assert_eq!(report.score, 0);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        let report = evaluate_sql_quality("SELECT name FROM res_partner WHERE comment = 'DROP everything';");
        assert_eq!(report.security, 20);
    }
}
