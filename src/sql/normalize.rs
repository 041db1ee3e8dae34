//! Query text normalization and statement classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder that replaces every literal in a normalized query.
pub const PLACEHOLDER: char = '?';

/// Coarse statement shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    /// Classify by leading keyword without parsing. Leading comments,
    /// whitespace and parentheses are skipped; `WITH` counts as a SELECT.
    pub fn classify(sql: &str) -> Self {
        let normalized = normalize(sql);
        let keyword = normalized
            .trim_start_matches(|c: char| c == '(' || c.is_whitespace())
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("");
        match keyword {
            "select" | "with" => StatementKind::Select,
            "update" => StatementKind::Update,
            "delete" => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }

    /// Only these shapes are worth running EXPLAIN or index analysis on.
    pub fn is_analyzable(self) -> bool {
        !matches!(self, StatementKind::Other)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Select => write!(f, "SELECT"),
            StatementKind::Update => write!(f, "UPDATE"),
            StatementKind::Delete => write!(f, "DELETE"),
            StatementKind::Other => write!(f, "OTHER"),
        }
    }
}

/// Normalize SQL so structurally identical queries compare equal.
///
/// Comments are stripped, whitespace collapsed, text lowercased and every
/// string or numeric literal replaced by [`PLACEHOLDER`]. Numbers that are
/// part of an identifier (`t1`, `col_2`) are kept. Idempotent.
pub fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut pending_space = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                // String literal; `''` and `\'` are escapes
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '\'' if chars.peek() == Some(&'\'') => {
                            chars.next();
                        }
                        '\'' => break,
                        _ => {}
                    }
                }
                push_token(&mut out, &mut pending_space, PLACEHOLDER);
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                pending_space = true;
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                pending_space = true;
            }
            c if c.is_whitespace() => pending_space = true,
            c if c.is_ascii_digit() && (pending_space || !ends_with_ident_char(&out)) => {
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                push_token(&mut out, &mut pending_space, PLACEHOLDER);
            }
            c => {
                for lower in c.to_lowercase() {
                    push_token(&mut out, &mut pending_space, lower);
                }
            }
        }
    }
    out
}

fn push_token(out: &mut String, pending_space: &mut bool, c: char) {
    if *pending_space && !out.is_empty() {
        out.push(' ');
    }
    *pending_space = false;
    out.push(c);
}

fn ends_with_ident_char(s: &str) -> bool {
    s.ends_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$' || c == '`')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_replaced() {
        assert_eq!(
            normalize("SELECT name FROM tabUser WHERE email = 'a@b.c' AND age > 30"),
            "select name from tabuser where email = ? and age > ?"
        );
    }

    #[test]
    fn test_different_parameters_collapse() {
        assert_eq!(
            normalize("select * from t where id = 1 and x = 'foo'"),
            normalize("SELECT *  FROM t\n WHERE id = 2.5 AND x = 'it''s'")
        );
    }

    #[test]
    fn test_identifier_digits_kept() {
        assert_eq!(normalize("select t1.col_2 from t1"), "select t1.col_2 from t1");
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(
            normalize("select 1 -- trailing\nfrom t /* block */ where a = 'x' # hash"),
            "select ? from t where a = ?"
        );
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "SELECT * FROM t WHERE a = 'x' AND b IN (1, 2, 3)",
            "update `tabNote` set seen=1 where owner='it\\'s' -- c",
            "select 1e5, -3, x1 from t where y = '' and z = 'unterminated",
            "select a - -1 from t",
            "  WITH c AS (SELECT 1) SELECT * FROM c  ",
            "",
        ];
        for sql in samples {
            let once = normalize(sql);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sql);
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::classify("  SELECT 1"), StatementKind::Select);
        assert_eq!(
            StatementKind::classify("/* hint */ update t set a = 1"),
            StatementKind::Update
        );
        assert_eq!(StatementKind::classify("delete from t"), StatementKind::Delete);
        assert_eq!(StatementKind::classify("(select 1)"), StatementKind::Select);
        assert_eq!(StatementKind::classify("with x as (select 1) select * from x"), StatementKind::Select);
        assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Other);
        assert_eq!(StatementKind::classify("commit"), StatementKind::Other);
        assert!(!StatementKind::Other.is_analyzable());
        assert!(StatementKind::Delete.is_analyzable());
    }
}
