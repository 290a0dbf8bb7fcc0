//! Literal Adapter
//!
//! Deterministic post-pass over generated SQL. When the model copied a
//! similar worked example, the SQL often keeps that example's literals
//! ("last 30 days") even though the live question asks for something else
//! ("last 60 days"). The adapter rewrites those literals and reverts to the
//! input SQL whenever the rewrite fails validation. It never returns an
//! error.
//!
//! Stages: token extraction, best-match selection, divergence check,
//! day-interval rewrite (month intervals and purchase-suggestion projections
//! included), supplier reference, count/year rewrite, validation.

pub mod tokens;

pub use tokens::{extract_tokens, NumericToken, TokenKind};

use crate::prompt::DEFAULT_DIALECT;
use crate::sql::validate::{dialect_for, parses};
use crate::sql::{scan, validate_sql, SegmentKind};
use crate::store::{RetrievedMatch, TrainingExample};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use tokens::distinct_values;
use tracing::{debug, info, warn};

pub const REASON_NO_TOKENS: &str = "no numeric tokens in question";
pub const REASON_NO_EXAMPLE: &str = "no similar example";
pub const REASON_ALREADY_MATCH: &str = "literals already match";
pub const REASON_NOTHING_TO_ADAPT: &str = "no adaptable literals in SQL";
pub const REASON_REVERTED: &str = "validation failed, reverted";

lazy_static! {
    /// Day-interval expressions in code; group 1 is the day count.
    static ref DAY_INTERVAL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bINTERVAL\s*'\s*([0-9]+)\s*days?\s*'").unwrap(),
        Regex::new(r"(?i)\bINTERVAL\s*'\s*([0-9]+)\s*'\s*DAYS?\b").unwrap(),
        Regex::new(r"(?i)\bCURRENT_DATE\s*-\s*([0-9]+)\b").unwrap(),
    ];

    /// "30 dias" / "30 days" echoed inside a comment.
    static ref COMMENT_DAYS: Regex = Regex::new(r"(?i)([0-9]+)\s*(?:dias?|days?)\b").unwrap();

    static ref INTEGER: Regex = Regex::new(r"[0-9]+").unwrap();

    /// `INTERVAL 'N month(s)'` copied from a "last month" example.
    static ref MONTH_INTERVAL: Regex = Regex::new(r"(?i)\bINTERVAL\s*'\s*([0-9]+)\s*months?\s*'").unwrap();

    /// Purchase suggestion questions ("sugestão de compra").
    static ref PURCHASE_SUGGESTION: Regex =
        Regex::new(r"(?i)sugest(?:ão|ao|ões|oes)\s+de\s+compras?|purchase\s+suggestions?").unwrap();

    /// Daily rate projected over N days: `(qty / 365) * N`.
    static ref DAILY_PROJECTION: Regex =
        Regex::new(r"/\s*365(?:\.0+)?\s*\)\s*\*\s*([0-9]+)\b").unwrap();

    /// Day count baked into a column alias such as `consumo_projetado_30dias`.
    static ref DAYS_SUFFIX: Regex = Regex::new(r"(?i)[A-Za-z0-9]_([0-9]+)(?:dias|days)\b").unwrap();

    /// Supplier reference named in the question, tried in order.
    static ref SUPPLIER_REF_QUESTION: Vec<Regex> = vec![
        Regex::new(r#"(?i)fornecedor\s+(?:com\s+)?(?:referência|referencia|ref|código|codigo)\s*['"]?([0-9]+)"#).unwrap(),
        Regex::new(r#"(?i)referência\s*['"]?([0-9]+)"#).unwrap(),
        Regex::new(r"(?i)\brep\.ref\s*=\s*([0-9]+)").unwrap(),
    ];

    /// `ref = '146'`, `rp.ref = "146"`, `fornecedor_ref = 146`; one group holds the digits.
    static ref SUPPLIER_REF_SQL: Regex = Regex::new(
        r#"(?i)\b(?:\w+\.)?(?:\w+_)?ref\s*=\s*(?:'([0-9]+)'|"([0-9]+)"|([0-9]+)\b)"#
    )
    .unwrap();
}

/// Outcome of one adaptation, kept for logging and explainability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationDecision {
    pub original_sql: String,
    pub adapted_sql: String,
    pub changed: bool,
    pub reason: String,
}

impl AdaptationDecision {
    pub fn unchanged(sql: &str, reason: impl Into<String>) -> Self {
        Self {
            original_sql: sql.to_string(),
            adapted_sql: sql.to_string(),
            changed: false,
            reason: reason.into(),
        }
    }
}

/// Failure inside a rewrite stage; always resolved by reverting.
#[derive(Debug)]
struct RewriteError(String);

#[derive(Debug, Clone)]
pub struct LiteralAdapter {
    dialect: String,
}

impl Default for LiteralAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_DIALECT)
    }
}

impl LiteralAdapter {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }

    pub fn adapt(&self, question: &str, examples: &[RetrievedMatch], sql: &str) -> AdaptationDecision {
        let question_tokens = extract_tokens(question);
        if question_tokens.is_empty() {
            return AdaptationDecision::unchanged(sql, REASON_NO_TOKENS);
        }

        let Some(best) = best_example(examples) else {
            return AdaptationDecision::unchanged(sql, REASON_NO_EXAMPLE);
        };
        debug!("Adapting literals against example: {}", best.question);

        let example_tokens = extract_tokens(&best.question);

        let (rewritten, notes) = match rewrite(question, sql, &question_tokens, &example_tokens) {
            Ok(result) => result,
            Err(RewriteError(msg)) => {
                warn!("Literal rewrite aborted: {}", msg);
                return AdaptationDecision::unchanged(sql, REASON_REVERTED);
            }
        };

        if rewritten == sql {
            let reason = if notes.checked { REASON_ALREADY_MATCH } else { REASON_NOTHING_TO_ADAPT };
            return AdaptationDecision::unchanged(sql, reason);
        }

        if let Err(issue) = self.check(sql, &rewritten) {
            warn!("Adapted SQL rejected ({}), keeping generated SQL", issue);
            return AdaptationDecision::unchanged(sql, REASON_REVERTED);
        }

        let reason = notes.changes.join("; ");
        info!("Adapted SQL literals: {}", reason);
        AdaptationDecision {
            original_sql: sql.to_string(),
            adapted_sql: rewritten,
            changed: true,
            reason,
        }
    }

    /// Structural check on the rewrite, plus: if the input parsed, the
    /// rewrite must parse too.
    fn check(&self, before: &str, after: &str) -> Result<(), String> {
        validate_sql(after).map_err(|e| e.to_string())?;
        let dialect = dialect_for(&self.dialect);
        if parses(before, dialect.as_ref()) && !parses(after, dialect.as_ref()) {
            return Err("rewrite no longer parses".to_string());
        }
        Ok(())
    }
}

/// Highest similarity example; the first one wins ties.
fn best_example(examples: &[RetrievedMatch]) -> Option<&TrainingExample> {
    let mut best: Option<(&TrainingExample, f32)> = None;
    for m in examples {
        if let Some(example) = m.as_example() {
            match best {
                Some((_, score)) if score >= m.similarity_score => {}
                _ => best = Some((example, m.similarity_score)),
            }
        }
    }
    best.map(|(example, _)| example)
}

#[derive(Debug, Default)]
struct RewriteNotes {
    /// A rewrite rule applied, even if it produced identical text.
    checked: bool,
    changes: Vec<String>,
}

fn rewrite(
    question: &str,
    sql: &str,
    question_tokens: &[NumericToken],
    example_tokens: &[NumericToken],
) -> Result<(String, RewriteNotes), RewriteError> {
    let mut notes = RewriteNotes::default();
    let mut current = sql.to_string();
    let projection = PURCHASE_SUGGESTION.is_match(question);

    let days = distinct_values(question_tokens, TokenKind::DayInterval);
    match days.as_slice() {
        [target] => {
            let (next, months) = rewrite_month_intervals(&current, *target);
            if !months.is_empty() {
                notes.checked = true;
                notes.changes.push(format!(
                    "rewrote month interval {} -> {} days",
                    months.join(", "),
                    target
                ));
            }
            current = next;

            let (next, replaced) = rewrite_day_intervals(&current, *target, projection)?;
            if !replaced.is_empty() {
                notes.checked = true;
                let stale: Vec<String> = replaced
                    .iter()
                    .filter(|v| **v != *target)
                    .map(|v| v.to_string())
                    .collect();
                if !stale.is_empty() {
                    notes
                        .changes
                        .push(format!("rewrote day interval {} -> {}", stale.join(", "), target));
                }
            }
            current = next;
        }
        [] => {}
        _ => debug!("Question has several day counts {:?}, skipping day rewrite", days),
    }

    if let Some(reference) = supplier_reference(question) {
        let (next, replaced) = rewrite_supplier_refs(&current, &reference);
        if !replaced.is_empty() {
            notes.checked = true;
            let stale: Vec<&str> = replaced.iter().map(String::as_str).filter(|v| *v != reference).collect();
            if !stale.is_empty() {
                notes
                    .changes
                    .push(format!("rewrote supplier ref {} -> {}", stale.join(", "), reference));
            }
        }
        current = next;
    }

    for (kind, label) in [(TokenKind::Count, "count"), (TokenKind::Year, "year")] {
        let Some(mapping) = literal_mapping(question_tokens, example_tokens, kind) else {
            continue;
        };
        notes.checked = true;
        if mapping.is_empty() {
            continue;
        }

        let mut protected = day_numeral_spans(&current, projection);
        protected.extend(supplier_ref_spans(&current));
        let (next, applied) = substitute_literals(&current, &mapping, kind, &protected)?;
        for (from, to) in applied {
            notes.changes.push(format!("rewrote {} {} -> {}", label, from, to));
        }
        current = next;
    }

    Ok((current, notes))
}

/// Example value -> question value for one kind, or `None` when the kind is
/// not comparable (absent from either side, or counts differ).
fn literal_mapping(
    question_tokens: &[NumericToken],
    example_tokens: &[NumericToken],
    kind: TokenKind,
) -> Option<HashMap<i64, i64>> {
    let current: Vec<i64> = question_tokens
        .iter()
        .filter(|t| t.kind == kind)
        .filter_map(NumericToken::as_integer)
        .collect();
    let previous: Vec<i64> = example_tokens
        .iter()
        .filter(|t| t.kind == kind)
        .filter_map(NumericToken::as_integer)
        .collect();

    if current.is_empty() || current.len() != previous.len() {
        return None;
    }

    let mut mapping: HashMap<i64, i64> = HashMap::new();
    let mut ambiguous: BTreeSet<i64> = BTreeSet::new();
    for (from, to) in previous.iter().zip(current.iter()) {
        if from == to {
            // Equal pair: this literal must survive untouched.
            ambiguous.insert(*from);
            continue;
        }
        match mapping.get(from) {
            Some(existing) if existing != to => {
                ambiguous.insert(*from);
            }
            _ => {
                mapping.insert(*from, *to);
            }
        }
    }
    for value in &ambiguous {
        mapping.remove(value);
    }

    // A target that is also a source would be rewritten again next pass.
    let targets: Vec<i64> = mapping.values().copied().collect();
    mapping.retain(|from, _| !targets.contains(from));

    Some(mapping)
}

/// Replace `INTERVAL 'N month(s)'` in code with `INTERVAL '<target> days'`.
/// Returns the month expressions that were replaced.
fn rewrite_month_intervals(sql: &str, target: i64) -> (String, Vec<String>) {
    let code = code_ranges(sql);
    let mut replaced = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for m in MONTH_INTERVAL.find_iter(sql) {
        if !code.iter().any(|r| r.contains(&m.start())) {
            continue;
        }
        out.push_str(&sql[last..m.start()]);
        out.push_str(&format!("INTERVAL '{} days'", target));
        last = m.end();
        let expr = sql[m.start()..m.end()].to_string();
        if !replaced.contains(&expr) {
            replaced.push(expr);
        }
    }
    out.push_str(&sql[last..]);
    (out, replaced)
}

/// Set every day-interval numeral (code patterns plus day counts echoed in
/// comments) to `target`. With `projection`, the purchase-suggestion horizon
/// (`/ 365) * N` and `_Ndias` aliases) follows too. Returns the values that
/// were replaced.
fn rewrite_day_intervals(sql: &str, target: i64, projection: bool) -> Result<(String, Vec<i64>), RewriteError> {
    let mut spans = day_numeral_spans(sql, projection);

    for segment in scan(sql).segments.iter().filter(|s| s.is_comment()) {
        for caps in COMMENT_DAYS.captures_iter(segment.text(sql)) {
            if let Some(num) = caps.get(1) {
                let start = segment.start + num.start();
                let end = segment.start + num.end();
                if is_standalone(sql, start, end) {
                    spans.push(start..end);
                }
            }
        }
    }

    spans.sort_by_key(|r| r.start);
    spans.dedup();

    let mut replaced = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for span in spans {
        if span.start < last {
            return Err(RewriteError(format!("overlapping day spans at {}", span.start)));
        }
        let value: i64 = sql[span.clone()]
            .parse()
            .map_err(|e| RewriteError(format!("bad day numeral '{}': {}", &sql[span.clone()], e)))?;
        if !replaced.contains(&value) {
            replaced.push(value);
        }
        out.push_str(&sql[last..span.start]);
        out.push_str(&target.to_string());
        last = span.end;
    }
    out.push_str(&sql[last..]);

    Ok((out, replaced))
}

fn code_ranges(sql: &str) -> Vec<Range<usize>> {
    scan(sql)
        .segments
        .iter()
        .filter(|s| s.kind == SegmentKind::Code)
        .map(|s| s.start..s.end)
        .collect()
}

/// Numeral spans of day-interval expressions that start in code, plus the
/// projection horizon when `projection` is set.
fn day_numeral_spans(sql: &str, projection: bool) -> Vec<Range<usize>> {
    let code = code_ranges(sql);
    let in_code = |pos: usize| code.iter().any(|r| r.contains(&pos));

    let mut spans = Vec::new();
    let patterns = DAY_INTERVAL_PATTERNS
        .iter()
        .chain(projection.then_some(&*DAILY_PROJECTION));
    for pattern in patterns {
        for caps in pattern.captures_iter(sql) {
            let (Some(whole), Some(num)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if in_code(whole.start()) {
                spans.push(num.start()..num.end());
            }
        }
    }

    if projection {
        // Aliases may be bare or double-quoted identifiers.
        for segment in scan(sql)
            .segments
            .iter()
            .filter(|s| matches!(s.kind, SegmentKind::Code | SegmentKind::Identifier))
        {
            for caps in DAYS_SUFFIX.captures_iter(segment.text(sql)) {
                if let Some(num) = caps.get(1) {
                    spans.push(segment.start + num.start()..segment.start + num.end());
                }
            }
        }
    }
    spans
}

/// Supplier reference the question asks about, if any.
fn supplier_reference(question: &str) -> Option<String> {
    SUPPLIER_REF_QUESTION
        .iter()
        .find_map(|pattern| pattern.captures(question))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Digit spans of `ref = ...` comparisons that start in code.
fn supplier_ref_spans(sql: &str) -> Vec<Range<usize>> {
    let code = code_ranges(sql);
    SUPPLIER_REF_SQL
        .captures_iter(sql)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if !code.iter().any(|r| r.contains(&whole.start())) {
                return None;
            }
            let digits = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            Some(digits.start()..digits.end())
        })
        .collect()
}

/// Point every supplier `ref` comparison at `reference`, keeping its quoting.
/// Returns the references that were replaced.
fn rewrite_supplier_refs(sql: &str, reference: &str) -> (String, Vec<String>) {
    let mut replaced: Vec<String> = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for span in supplier_ref_spans(sql) {
        let value = sql[span.clone()].to_string();
        out.push_str(&sql[last..span.start]);
        out.push_str(reference);
        last = span.end;
        if !replaced.contains(&value) {
            replaced.push(value);
        }
    }
    out.push_str(&sql[last..]);
    (out, replaced)
}

/// Replace whole integer literals found in `mapping`. Counts are replaced in
/// code only; years also inside string literals (dates) and comments.
fn substitute_literals(
    sql: &str,
    mapping: &HashMap<i64, i64>,
    kind: TokenKind,
    protected: &[Range<usize>],
) -> Result<(String, Vec<(i64, i64)>), RewriteError> {
    let allowed = |k: SegmentKind| match kind {
        TokenKind::Year => matches!(
            k,
            SegmentKind::Code | SegmentKind::Quoted | SegmentKind::LineComment | SegmentKind::BlockComment
        ),
        _ => k == SegmentKind::Code,
    };

    let mut applied: Vec<(i64, i64)> = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;

    for segment in scan(sql).segments.iter().filter(|s| allowed(s.kind)) {
        for m in INTEGER.find_iter(segment.text(sql)) {
            let start = segment.start + m.start();
            let end = segment.start + m.end();
            if !is_standalone(sql, start, end) || protected.iter().any(|r| r.start < end && start < r.end) {
                continue;
            }
            // Literals too long for i64 cannot be in the mapping.
            let Ok(value) = m.as_str().parse::<i64>() else {
                continue;
            };
            let Some(target) = mapping.get(&value) else {
                continue;
            };
            if start < last {
                return Err(RewriteError(format!("overlapping literal at {}", start)));
            }
            out.push_str(&sql[last..start]);
            out.push_str(&target.to_string());
            last = end;
            if !applied.contains(&(value, *target)) {
                applied.push((value, *target));
            }
        }
    }
    out.push_str(&sql[last..]);

    Ok((out, applied))
}

/// Whole number: not part of an identifier or a decimal.
fn is_standalone(sql: &str, start: usize, end: usize) -> bool {
    let prev = sql[..start].chars().next_back();
    let mut rest = sql[end..].chars();
    let next = rest.next();

    let prev_ok = !matches!(prev, Some(c) if c.is_alphanumeric() || c == '_' || c == '.');
    let next_ok = match next {
        Some(c) if c.is_alphanumeric() || c == '_' => false,
        Some('.') => !matches!(rest.next(), Some(c) if c.is_ascii_digit()),
        _ => true,
    };
    prev_ok && next_ok
}
