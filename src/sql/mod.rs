//! SQL text helpers: extraction from completions, structural validation and
//! quality scoring. The lexical scanner here is shared by all of them and by
//! the literal adapter, so "outside strings and comments" means the same
//! thing everywhere.

pub mod extract;
pub mod quality;
pub mod validate;

pub use extract::extract_sql;
pub use quality::{evaluate_sql_quality, SqlQualityReport};
pub use validate::{validate_sql, ValidationIssue};

/// Statement keywords accepted at the start of a generated statement.
pub const STATEMENT_KEYWORDS: &[&str] = &["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "EXPLAIN", "VALUES"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    /// Single-quoted string literal
    Quoted,
    /// Double-quoted identifier
    Identifier,
    LineComment,
    BlockComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, SegmentKind::LineComment | SegmentKind::BlockComment)
    }

    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub segments: Vec<Segment>,
    /// False when a quote, identifier or block comment runs to end of text.
    pub closed: bool,
}

/// Split SQL into code, literal and comment segments covering the whole
/// input. All delimiters are ASCII, so every boundary is a char boundary.
pub fn scan(sql: &str) -> Scan {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut segments = Vec::new();
    let mut closed = true;
    let mut code_start = 0;
    let mut i = 0;

    while i < len {
        let (kind, end, terminated) = match bytes[i] {
            b'\'' => {
                let (end, ok) = close_quote(bytes, i, b'\'');
                (SegmentKind::Quoted, end, ok)
            }
            b'"' => {
                let (end, ok) = close_quote(bytes, i, b'"');
                (SegmentKind::Identifier, end, ok)
            }
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                let end = sql[i..].find('\n').map(|p| i + p).unwrap_or(len);
                (SegmentKind::LineComment, end, true)
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => match sql[i + 2..].find("*/") {
                Some(p) => (SegmentKind::BlockComment, i + 2 + p + 2, true),
                None => (SegmentKind::BlockComment, len, false),
            },
            _ => {
                i += 1;
                continue;
            }
        };

        if code_start < i {
            segments.push(Segment {
                kind: SegmentKind::Code,
                start: code_start,
                end: i,
            });
        }
        segments.push(Segment { kind, start: i, end });
        closed &= terminated;
        i = end;
        code_start = end;
    }

    if code_start < len {
        segments.push(Segment {
            kind: SegmentKind::Code,
            start: code_start,
            end: len,
        });
    }

    Scan { segments, closed }
}

fn close_quote(bytes: &[u8], start: usize, quote: u8) -> (usize, bool) {
    let mut j = start + 1;
    while j < bytes.len() {
        if bytes[j] == quote {
            // doubled quote is an escape
            if j + 1 < bytes.len() && bytes[j + 1] == quote {
                j += 2;
                continue;
            }
            return (j + 1, true);
        }
        j += 1;
    }
    (bytes.len(), false)
}

/// Byte offset just past the first `;` that sits in code, if any.
pub fn statement_end(sql: &str) -> Option<usize> {
    scan(sql)
        .segments
        .iter()
        .filter(|s| s.kind == SegmentKind::Code)
        .find_map(|s| s.text(sql).find(';').map(|p| s.start + p + 1))
}

/// First word of the statement, skipping leading whitespace and comments.
pub fn leading_keyword(sql: &str) -> Option<String> {
    let scan = scan(sql);
    for segment in &scan.segments {
        match segment.kind {
            SegmentKind::Code => {
                let text = segment.text(sql).trim_start_matches(|c: char| c.is_whitespace() || c == '(');
                if text.is_empty() {
                    continue;
                }
                let word: String = text.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
                return if word.is_empty() { None } else { Some(word.to_uppercase()) };
            }
            SegmentKind::LineComment | SegmentKind::BlockComment => continue,
            _ => return None,
        }
    }
    None
}
