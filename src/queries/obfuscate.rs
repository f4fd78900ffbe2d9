//! SQL text handling: literal obfuscation and statement parsing for segment
//! names.

use once_cell::sync::Lazy;
use regex::Regex;

static SINGLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^'\\]|\\.|'')*'").expect("valid pattern"));
static DOUBLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"\\]|\\.|"")*""#).expect("valid pattern"));
static NUMERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:0x[0-9a-f]+|-?\d+(?:\.\d+)?(?:e[+-]?\d+)?)\b").expect("valid pattern")
});

static OPERATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:/\*.*?\*/\s*)*([A-Za-z]+)").expect("valid pattern"));
static TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*(?:select\b.*?\bfrom|insert\s+(?:ignore\s+)?into|replace\s+into|update|delete\s+from|create\s+(?:temporary\s+)?(?:table|database|schema)(?:\s+if\s+not\s+exists)?|drop\s+(?:table|database|schema)(?:\s+if\s+exists)?|alter\s+table|truncate(?:\s+table)?)\s+[`"\[(]?([\w.$]+)"#,
    )
    .expect("valid pattern")
});
static USE_DATABASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*use\s+`?([\w$]+)`?\s*;?\s*$").expect("valid pattern"));

/// Replace string and numeric literals with `?`.
pub fn obfuscate(sql: &str) -> String {
    let sql = SINGLE_QUOTED.replace_all(sql, "?");
    let sql = DOUBLE_QUOTED.replace_all(&sql, "?");
    NUMERIC.replace_all(&sql, "?").into_owned()
}

/// Operation keyword and target collection of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub operation: String,
    pub collection: Option<String>,
}

impl ParsedStatement {
    /// Metric-style segment name for `product`.
    pub fn segment_name(&self, product: &str) -> String {
        match &self.collection {
            Some(collection) => format!(
                "Datastore/statement/{}/{}/{}",
                product, collection, self.operation
            ),
            None => format!("Datastore/operation/{}/{}", product, self.operation),
        }
    }
}

pub fn parse_statement(sql: &str) -> ParsedStatement {
    let operation = OPERATION
        .captures(sql)
        .map(|cap| cap[1].to_lowercase())
        .unwrap_or_else(|| "other".to_string());

    let collection = TABLE
        .captures(sql)
        .map(|cap| cap[1].trim_end_matches(';').to_string());

    ParsedStatement {
        operation,
        collection,
    }
}

/// Database named by a `USE <db>` statement.
pub fn use_database(sql: &str) -> Option<String> {
    USE_DATABASE.captures(sql).map(|cap| cap[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obfuscate_literals() {
        assert_eq!(
            obfuscate("SELECT * FROM users WHERE name = 'bob' AND age > 42"),
            "SELECT * FROM users WHERE name = ? AND age > ?"
        );
        assert_eq!(
            obfuscate(r#"UPDATE t SET v = "it's" WHERE id = 3.5"#),
            "UPDATE t SET v = ? WHERE id = ?"
        );
        assert_eq!(obfuscate("SELECT 1 + 1 AS solution"), "SELECT ? + ? AS solution");
    }

    #[test]
    fn test_obfuscate_keeps_identifiers_with_digits() {
        assert_eq!(obfuscate("SELECT col1 FROM t2"), "SELECT col1 FROM t2");
    }

    #[test]
    fn test_parse_statement() {
        let parsed = parse_statement("SELECT id FROM `users` WHERE id = 1");
        assert_eq!(parsed.operation, "select");
        assert_eq!(parsed.collection.as_deref(), Some("users"));
        assert_eq!(
            parsed.segment_name("MySQL"),
            "Datastore/statement/MySQL/users/select"
        );

        let parsed = parse_statement("create database if not exists test_db;");
        assert_eq!(parsed.operation, "create");
        assert_eq!(parsed.collection.as_deref(), Some("test_db"));

        let parsed = parse_statement("SELECT 1");
        assert_eq!(parsed.collection, None);
        assert_eq!(parsed.segment_name("MySQL"), "Datastore/operation/MySQL/select");

        let parsed = parse_statement("use test_db;");
        assert_eq!(parsed.operation, "use");
        assert_eq!(parsed.collection, None);
    }

    #[test]
    fn test_use_database() {
        assert_eq!(use_database("use test_db;").as_deref(), Some("test_db"));
        assert_eq!(use_database("  USE `other`").as_deref(), Some("other"));
        assert_eq!(use_database("SELECT use FROM t"), None);
    }
}
