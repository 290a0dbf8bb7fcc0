//! Numeric token extraction from raw question text.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

lazy_static! {
    static ref NUMBER: Regex = Regex::new(r"[0-9]+(?:[.,][0-9]+)?").unwrap();

    static ref DAY_UNIT: Regex = Regex::new(r"(?i)^\s*(?:dias?|days?)\b").unwrap();

    static ref OTHER_UNIT: Regex = Regex::new(
        r"(?i)^\s*(?:%|€|(?:por\s+cento|percent|m[eê]s|meses|months?|anos?|years?|semanas?|weeks?|horas?|hours?|reais|brl|usd|d[oó]lares|dollars?|euros?|eur)\b)"
    )
    .unwrap();

    static ref CURRENCY_PREFIX: Regex = Regex::new(r"(?:R\$|US\$|\$|€)\s*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Year,
    Count,
    DayInterval,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericToken {
    pub raw_text: String,
    pub value: f64,
    pub kind: TokenKind,
    /// Byte span in the source text.
    pub position: Range<usize>,
}

impl NumericToken {
    /// Integer value, for kinds that are always whole numbers.
    pub fn as_integer(&self) -> Option<i64> {
        if self.raw_text.contains(['.', ',']) {
            return None;
        }
        self.raw_text.parse().ok()
    }
}

/// Scan raw (non-normalized) text for numbers and classify each one.
pub fn extract_tokens(text: &str) -> Vec<NumericToken> {
    NUMBER
        .find_iter(text)
        .filter(|m| is_standalone(text, m.start(), m.end()))
        .filter_map(|m| {
            let raw = m.as_str();
            let value: f64 = raw.replace(',', ".").parse().ok()?;
            Some(NumericToken {
                raw_text: raw.to_string(),
                value,
                kind: classify(text, m.start(), m.end(), raw),
                position: m.start()..m.end(),
            })
        })
        .collect()
}

fn classify(text: &str, start: usize, end: usize, raw: &str) -> TokenKind {
    let after = &text[end..];
    let before = &text[..start];

    if raw.contains(['.', ',']) {
        return TokenKind::Generic;
    }
    if DAY_UNIT.is_match(after) {
        return TokenKind::DayInterval;
    }
    if raw.len() == 4 {
        if let Ok(year) = raw.parse::<u32>() {
            if (1900..=2100).contains(&year) {
                return TokenKind::Year;
            }
        }
    }
    if OTHER_UNIT.is_match(after) || CURRENCY_PREFIX.is_match(before) {
        return TokenKind::Generic;
    }
    TokenKind::Count
}

/// Not glued to letters or other digits ("Q3", "v2", "sale_order_2").
fn is_standalone(text: &str, start: usize, end: usize) -> bool {
    let glued = |c: char| c.is_alphanumeric() || c == '_';
    let prev_ok = text[..start].chars().next_back().map_or(true, |c| !glued(c));
    let next_ok = text[end..].chars().next().map_or(true, |c| !glued(c));
    prev_ok && next_ok
}

/// Distinct values of one kind, in order of first appearance.
pub fn distinct_values(tokens: &[NumericToken], kind: TokenKind) -> Vec<i64> {
    let mut values = Vec::new();
    for token in tokens.iter().filter(|t| t.kind == kind) {
        if let Some(v) = token.as_integer() {
            if !values.contains(&v) {
                values.push(v);
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(String, TokenKind)> {
        extract_tokens(text)
            .into_iter()
            .map(|t| (t.raw_text, t.kind))
            .collect()
    }

    #[test]
    fn test_day_interval_in_portuguese_and_english() {
        assert_eq!(
            kinds("Quais produtos foram vendidos nos últimos 60 dias?"),
            vec![("60".to_string(), TokenKind::DayInterval)]
        );
        assert_eq!(
            kinds("sales in the last 1 day"),
            vec![("1".to_string(), TokenKind::DayInterval)]
        );
    }

    #[test]
    fn test_year_count_and_generic() {
        let tokens = kinds("Top 10 clientes em 2024 com desconto de 15% e ticket acima de R$ 500");
        assert_eq!(
            tokens,
            vec![
                ("10".to_string(), TokenKind::Count),
                ("2024".to_string(), TokenKind::Year),
                ("15".to_string(), TokenKind::Generic),
                ("500".to_string(), TokenKind::Generic),
            ]
        );
    }

    #[test]
    fn test_decimals_and_other_units_are_generic() {
        assert_eq!(kinds("crescimento de 2,5 pontos")[0].1, TokenKind::Generic);
        assert_eq!(kinds("últimos 3 meses")[0].1, TokenKind::Generic);
        assert_eq!(extract_tokens("2,5")[0].value, 2.5);
    }

    #[test]
    fn test_glued_numbers_are_ignored() {
        assert!(extract_tokens("vendas do Q3 na loja_2").is_empty());
        assert!(extract_tokens("Quais clientes compraram?").is_empty());
    }

    #[test]
    fn test_positions_point_into_source() {
        let text = "últimos 30 dias";
        let token = &extract_tokens(text)[0];
        assert_eq!(&text[token.position.clone()], "30");
    }

    #[test]
    fn test_distinct_values_keep_first_seen_order() {
        let tokens = extract_tokens("top 5 e top 3 e top 5");
        assert_eq!(distinct_values(&tokens, TokenKind::Count), vec![5, 3]);
    }
}
