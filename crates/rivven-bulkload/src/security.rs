//! SQL safety helpers for generated statements.
//!
//! Table, schema and column names end up interpolated into `COPY INTO`,
//! `CREATE TABLE`, `DROP TABLE` and `TRUNCATE` text. Statements go over the
//! wire as plain text, so there are no bind parameters to fall back on.

use crate::error::Error;

/// Validate a SQL identifier (schema, table, column names).
///
/// - Must not be empty
/// - Maximum 255 characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use rivven_bulkload::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("events").is_ok());
/// assert!(validate_sql_identifier("_staging_2024").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE events--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("1st").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Validate a name that is always written double-quoted.
///
/// Quoting lifts the character restrictions of [`validate_sql_identifier`];
/// only emptiness, length and control characters are checked. Embedded
/// `"` are escaped by [`quote_identifier`].
///
/// ```
/// use rivven_bulkload::security::validate_quoted_identifier;
///
/// assert!(validate_quoted_identifier("Order Details").is_ok());
/// assert!(validate_quoted_identifier("a\"b").is_ok());
/// assert!(validate_quoted_identifier("line\nbreak").is_err());
/// ```
pub fn validate_quoted_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.chars().count() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.chars().count()
        )));
    }

    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(Error::config(format!(
            "Invalid SQL identifier {:?}: contains control character {:?}",
            name, c
        )));
    }

    Ok(())
}

/// Validate a name for the way it will be written: any printable name when
/// every identifier is quoted, a plain identifier otherwise.
pub fn validate_identifier(name: &str, quoted: bool) -> crate::Result<()> {
    if quoted {
        validate_quoted_identifier(name)
    } else {
        validate_sql_identifier(name)
    }
}

/// MonetDB keywords that cannot be used as bare names
const RESERVED_WORDS: &[&str] = &[
    "all", "alter", "and", "any", "as", "asc", "between", "by", "case", "cast", "check",
    "column", "commit", "constraint", "copy", "create", "cross", "current_date",
    "current_time", "current_timestamp", "current_user", "default", "delete", "desc",
    "distinct", "drop", "else", "end", "escape", "except", "exists", "false", "fetch", "for",
    "foreign", "from", "full", "grant", "group", "having", "in", "inner", "insert",
    "intersect", "into", "is", "join", "key", "left", "like", "limit", "natural", "not",
    "null", "offset", "on", "or", "order", "outer", "primary", "references", "right",
    "rollback", "select", "set", "some", "table", "then", "to", "true", "union", "unique",
    "update", "user", "using", "values", "when", "where", "with",
];

/// Whether `name` is a MonetDB keyword (case-insensitive)
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(name))
}

/// Render a name for statement text.
///
/// The name is double-quoted, with embedded `"` doubled, when `force` is set
/// or when it is a reserved word; otherwise it is written bare.
///
/// ```
/// use rivven_bulkload::security::quote_identifier;
///
/// assert_eq!(quote_identifier("events", false), "events");
/// assert_eq!(quote_identifier("order", false), "\"order\"");
/// assert_eq!(quote_identifier("Order Details", true), "\"Order Details\"");
/// assert_eq!(quote_identifier("a\"b", true), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(name: &str, force: bool) -> String {
    if force || is_reserved_word(name) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// Escape a byte sequence for use inside a single-quoted `COPY INTO` literal.
///
/// MonetDB string literals understand C-style escapes, so control bytes
/// (newline, carriage return, tab) are written as `\n`, `\r`, `\t`, and
/// backslash and single quote are backslash-escaped.
///
/// ```
/// use rivven_bulkload::security::escape_copy_literal;
///
/// assert_eq!(escape_copy_literal(b"|"), "|");
/// assert_eq!(escape_copy_literal(b"\r\n"), "\\r\\n");
/// assert_eq!(escape_copy_literal(b"'"), "\\'");
/// assert_eq!(escape_copy_literal(b"\""), "\"");
/// ```
pub fn escape_copy_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\{:03o}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_length_limit() {
        let long = "a".repeat(256);
        assert!(validate_sql_identifier(&long).is_err());
        assert!(validate_sql_identifier(&long[..255]).is_ok());
    }

    #[test]
    fn test_reserved_words_case_insensitive() {
        assert!(is_reserved_word("order"));
        assert!(is_reserved_word("ORDER"));
        assert!(is_reserved_word("Table"));
        assert!(!is_reserved_word("orders"));
        assert!(!is_reserved_word("qty"));
    }

    #[test]
    fn test_validate_identifier_by_quoting_mode() {
        assert!(validate_identifier("Order Details", true).is_ok());
        assert!(validate_identifier("Order Details", false).is_err());
        assert!(validate_identifier("tab\there", true).is_err());
        assert!(validate_identifier("", true).is_err());
        assert!(validate_identifier(&"é".repeat(255), true).is_ok());
        assert!(validate_identifier(&"é".repeat(256), true).is_err());
    }

    #[test]
    fn test_copy_literal_non_printable() {
        assert_eq!(escape_copy_literal(&[0x01]), "\\001");
        assert_eq!(escape_copy_literal(b"\\"), "\\\\");
    }
}
