//! Database client seam and its instrumented wrapper.

use serde::Serialize;

use crate::error::ClientError;
use crate::pool::PoolResource;

mod instrumented;
mod query;

pub use instrumented::{InstrumentedClient, CONNECT_SEGMENT, PRODUCT};
pub use query::{Query, QueryOptions, QueryRequest, QueryResult};

pub type ConnectCallback = Box<dyn FnOnce(Result<(), ClientError>) + Send>;

pub type QueryCallback = Box<dyn FnOnce(Result<QueryResult, ClientError>) + Send>;

/// Where a client is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: Option<u16>,
    pub socket_path: Option<String>,
    pub database: Option<String>,
}

impl ConnectionInfo {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Port, socket path, or `"default"` when neither is known.
    pub fn port_path_or_id(&self) -> String {
        match (self.port, &self.socket_path) {
            (Some(port), _) => port.to_string(),
            (None, Some(path)) => path.clone(),
            (None, None) => "default".to_string(),
        }
    }
}

/// A network database client with callback-style completion.
///
/// Callbacks may fire on any task or thread.
pub trait DatastoreClient: PoolResource {
    fn connect(&self, callback: ConnectCallback);

    fn query(&self, query: Query, callback: QueryCallback);

    fn end(&self);

    fn connection_info(&self) -> ConnectionInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_path_or_id() {
        assert_eq!(ConnectionInfo::tcp("db", 3306).port_path_or_id(), "3306");

        let socket = ConnectionInfo {
            host: "localhost".into(),
            socket_path: Some("/var/run/mysqld/mysqld.sock".into()),
            ..Default::default()
        };
        assert_eq!(socket.port_path_or_id(), "/var/run/mysqld/mysqld.sock");
        assert_eq!(ConnectionInfo::default().port_path_or_id(), "default");
    }
}
