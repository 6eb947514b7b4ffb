// ============================================================================
// Diagnostic SQL Reconstruction
// ============================================================================
//
// Turns a parameterized statement plus its bindings back into a readable
// statement for logs. The result is for humans only and is never executed.
//
// ============================================================================

use crate::core::Value;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaceholderStyle {
    Positional,
    Numbered,
}

/// Substitutes bindings into `?` or `$n` placeholders.
///
/// Returns `None` when the placeholders and bindings do not line up, or when
/// both placeholder styles are mixed in one statement. Placeholders inside
/// quoted literals and identifiers are left alone.
pub fn reconstruct(sql: &str, bindings: &[Value]) -> Option<String> {
    let mut out = String::with_capacity(sql.len() + bindings.len() * 8);
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    let mut style: Option<PlaceholderStyle> = None;
    let mut next_positional = 0usize;

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            out.push(ch);
            if ch == '\\' && open != '`' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if ch == open {
                if chars.peek() == Some(&open) {
                    if let Some(doubled) = chars.next() {
                        out.push(doubled);
                    }
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            '?' => {
                if style == Some(PlaceholderStyle::Numbered) {
                    return None;
                }
                style = Some(PlaceholderStyle::Positional);
                let value = bindings.get(next_positional)?;
                next_positional += 1;
                out.push_str(&value.to_sql_literal());
            }
            '$' if chars.peek().is_some_and(|c| c.is_ascii_digit()) => {
                if style == Some(PlaceholderStyle::Positional) {
                    return None;
                }
                style = Some(PlaceholderStyle::Numbered);
                let mut digits = String::new();
                while let Some(digit) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
                    digits.push(digit);
                    chars.next();
                }
                let index: usize = digits.parse().ok()?;
                let value = bindings.get(index.checked_sub(1)?)?;
                out.push_str(&value.to_sql_literal());
            }
            _ => out.push(ch),
        }
    }

    if style == Some(PlaceholderStyle::Positional) && next_positional != bindings.len() {
        return None;
    }
    if style.is_none() && !bindings.is_empty() {
        return None;
    }

    Some(out)
}

/// Reconstructed statement, or the parameterized text when reconstruction fails.
pub fn reconstruct_or_raw(sql: &str, bindings: &[Value]) -> String {
    reconstruct(sql, bindings).unwrap_or_else(|| sql.to_string())
}

/// Collapses whitespace runs so formatting differences do not split groups.
pub fn normalize_whitespace(sql: &str) -> String {
    WHITESPACE_RUN.replace_all(sql.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_placeholders() {
        let sql = "UPDATE accounts SET balance = ? WHERE id = ? AND owner = ?";
        let bindings = vec![Value::Float(10.5), Value::Integer(7), Value::from("O'Neil")];
        assert_eq!(
            reconstruct(sql, &bindings).unwrap(),
            "UPDATE accounts SET balance = 10.5 WHERE id = 7 AND owner = 'O''Neil'"
        );
    }

    #[test]
    fn test_numbered_placeholders_may_repeat() {
        let sql = "SELECT * FROM t WHERE a = $1 OR b = $1 OR c = $2";
        let bindings = vec![Value::Integer(1), Value::Null];
        assert_eq!(
            reconstruct(sql, &bindings).unwrap(),
            "SELECT * FROM t WHERE a = 1 OR b = 1 OR c = NULL"
        );
    }

    #[test]
    fn test_placeholders_in_literals_are_ignored() {
        let sql = "SELECT '?', \"col?\", 'it''s ?' FROM t WHERE id = ?";
        let bindings = vec![Value::Integer(3)];
        assert_eq!(
            reconstruct(sql, &bindings).unwrap(),
            "SELECT '?', \"col?\", 'it''s ?' FROM t WHERE id = 3"
        );
    }

    #[test]
    fn test_mismatched_bindings_fail() {
        assert!(reconstruct("SELECT ?", &[]).is_none());
        assert!(reconstruct("SELECT ?", &[Value::Integer(1), Value::Integer(2)]).is_none());
        assert!(reconstruct("SELECT 1", &[Value::Integer(1)]).is_none());
        assert!(reconstruct("SELECT $0", &[Value::Integer(1)]).is_none());
        assert!(reconstruct("SELECT ?, $1", &[Value::Integer(1)]).is_none());
    }

    #[test]
    fn test_fallback_to_raw() {
        assert_eq!(reconstruct_or_raw("SELECT ?", &[]), "SELECT ?");
        assert_eq!(reconstruct_or_raw("SELECT 1", &[]), "SELECT 1");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_whitespace("  SELECT *\n   FROM t\tWHERE id = 1 "),
            "SELECT * FROM t WHERE id = 1"
        );
    }
}
