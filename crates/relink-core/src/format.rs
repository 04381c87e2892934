//! Stateless query-string formatting
//!
//! Substitutes `?` placeholders with escaped value literals and `??`
//! placeholders with quoted identifiers, in the style of the MySQL text
//! protocol. This is a plain string transformation with no connection
//! involved; prepared statements through the driver are always preferable
//! when available.

use crate::Value;

/// Format a query string by substituting placeholders.
///
/// - `?` is replaced by the next parameter rendered as an escaped SQL
///   literal.
/// - `??` is replaced by the next parameter rendered as a backtick-quoted
///   identifier.
/// - Placeholders inside quoted string literals are left untouched.
/// - Placeholders beyond the end of the parameter list are left verbatim.
///
/// # Example
///
/// ```
/// use relink_core::{Value, format_query};
///
/// let sql = format_query(
///     "SELECT * FROM ?? WHERE id = ? AND name = ?",
///     &[Value::Text("users".into()), Value::Int64(7), Value::Text("o'brien".into())],
/// );
/// assert_eq!(sql, "SELECT * FROM `users` WHERE id = 7 AND name = 'o\\'brien'");
/// ```
pub fn format_query(sql: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut chars = sql.chars().peekable();
    let mut next_param = params.iter();
    // Quote character we are currently inside, if any
    let mut in_quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match in_quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    // Escaped character inside the literal; copy it through
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    in_quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    let is_identifier = chars.peek() == Some(&'?');
                    match next_param.next() {
                        Some(value) if is_identifier => {
                            chars.next();
                            out.push_str(&escape_identifier(&value.to_string()));
                        }
                        Some(value) => out.push_str(&escape_literal(value)),
                        None => {
                            // Ran out of parameters; leave the placeholder
                            out.push(c);
                        }
                    }
                }
                _ => out.push(c),
            },
        }
    }

    out
}

/// Render a value as an escaped SQL literal
pub fn escape_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float64(v) => v.to_string(),
        Value::Text(s) => quote_string(s),
        Value::Bytes(b) => {
            let mut hex = String::with_capacity(b.len() * 2 + 3);
            hex.push_str("X'");
            for byte in b {
                hex.push_str(&format!("{:02X}", byte));
            }
            hex.push('\'');
            hex
        }
        Value::Uuid(u) => quote_string(&u.to_string()),
        Value::DateTime(dt) => quote_string(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Json(j) => quote_string(&j.to_string()),
    }
}

/// Quote an identifier with backticks, doubling embedded backticks
pub fn escape_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('`');
    for c in name.chars() {
        if c == '`' {
            out.push('`');
        }
        out.push(c);
    }
    out.push('`');
    out
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}
