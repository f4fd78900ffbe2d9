use serde::Serialize;
use std::fmt;

use crate::datastore::Query;

/// Key under which executions of "the same query" are aggregated.
///
/// Derived from the SQL text only; bound values never take part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn from_query(query: &Query) -> Self {
        Self(query.text().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::QueryOptions;
    use serde_json::json;

    #[test]
    fn test_values_do_not_change_fingerprint() {
        let plain = Fingerprint::from_query(&Query::sql("SELECT * FROM users WHERE id = ?"));
        let bound = Fingerprint::from_query(
            &Query::sql("SELECT * FROM users WHERE id = ?").with_values(vec![json!(42)]),
        );
        let other = Fingerprint::from_query(
            &Query::sql("SELECT * FROM users WHERE id = ?").with_values(vec![json!(7)]),
        );

        assert_eq!(plain, bound);
        assert_eq!(bound, other);
    }

    #[test]
    fn test_options_use_sql_field() {
        let from_options = Fingerprint::from_query(&Query::options(QueryOptions::new("SELECT 1")));
        let from_options_with_values = Fingerprint::from_query(
            &Query::options(QueryOptions::new("SELECT 1")).with_values(vec![]),
        );

        assert_eq!(from_options.as_str(), "SELECT 1");
        assert_eq!(from_options, from_options_with_values);
        assert_eq!(from_options, Fingerprint::from_query(&Query::sql("SELECT 1")));
    }
}
