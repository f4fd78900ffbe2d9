use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options form of a query: the SQL plus driver settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub sql: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

impl QueryOptions {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    Sql(String),
    Options(QueryOptions),
}

/// A query in any of the accepted shapes: SQL text or options, each with or
/// without bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    request: QueryRequest,
    values: Option<Vec<Value>>,
}

impl Query {
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            request: QueryRequest::Sql(sql.into()),
            values: None,
        }
    }

    pub fn options(options: QueryOptions) -> Self {
        Self {
            request: QueryRequest::Options(options),
            values: None,
        }
    }

    /// Bind positional values. These take precedence over values carried in
    /// the options.
    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// The SQL text, whichever shape carried it.
    pub fn text(&self) -> &str {
        match &self.request {
            QueryRequest::Sql(sql) => sql,
            QueryRequest::Options(options) => &options.sql,
        }
    }

    pub fn values(&self) -> &[Value] {
        match (&self.values, &self.request) {
            (Some(values), _) => values,
            (None, QueryRequest::Options(options)) => &options.values,
            (None, QueryRequest::Sql(_)) => &[],
        }
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::sql(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::sql(sql)
    }
}

impl From<QueryOptions> for Query {
    fn from(options: QueryOptions) -> Self {
        Query::options(options)
    }
}

/// Rows returned by a query, or the write summary for statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub rows: Vec<Value>,

    #[serde(default)]
    pub affected_rows: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<u64>,
}

impl QueryResult {
    pub fn rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }
}
