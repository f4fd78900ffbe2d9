use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{ConnectCallback, ConnectionInfo, DatastoreClient, Query, QueryCallback, QueryResult};
use crate::config::{RecordSql, TracerConfig};
use crate::context;
use crate::error::ClientError;
use crate::pool::{ErrorListener, PoolResource};
use crate::queries::obfuscate::{obfuscate, parse_statement, use_database};
use crate::queries::Fingerprint;
use crate::trace::SegmentHandle;
use crate::tracer::Tracer;

pub const PRODUCT: &str = "MySQL";

pub const CONNECT_SEGMENT: &str = "Datastore/MySQL/connect";

const LOCALHOST_NAMES: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0.0.0.0"];

static MACHINE_HOSTNAME: Lazy<Option<String>> = Lazy::new(|| {
    match nix::unistd::gethostname() {
        Ok(name) => name.into_string().ok().filter(|name| !name.is_empty()),
        Err(err) => {
            debug!(error = %err, "Could not read the machine hostname");
            None
        }
    }
});

/// Wraps a [`DatastoreClient`] so that its operations show up as segments of
/// the current transaction.
///
/// Clones share the tracked database name, which follows successful `USE`
/// statements whether or not a transaction is in scope.
pub struct InstrumentedClient<C> {
    inner: C,
    database: Arc<ArcSwapOption<String>>,
    tracer: Tracer,
}

impl<C: Clone> Clone for InstrumentedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            database: Arc::clone(&self.database),
            tracer: self.tracer.clone(),
        }
    }
}

impl<C: DatastoreClient> InstrumentedClient<C> {
    pub fn new(inner: C, tracer: Tracer) -> Self {
        let database = inner.connection_info().database.map(Arc::new);
        Self {
            inner,
            database: Arc::new(ArcSwapOption::new(database)),
            tracer,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Database used for segments created from now on.
    pub fn database(&self) -> Option<String> {
        self.database.load_full().map(|db| db.as_ref().clone())
    }

    /// Open a segment under the current context, with connection parameters
    /// already attached.
    fn start_segment(&self, name: &str) -> Option<SegmentHandle> {
        let Some(ctx) = context::current() else {
            trace!(segment = name, "No transaction in scope; not instrumented");
            return None;
        };
        let segment = ctx
            .transaction()
            .create_segment(name, Some(ctx.segment()))?;

        let config = self.tracer.config();
        if config.datastore.instance_reporting {
            let info = self.inner.connection_info();
            segment.add_parameter("host", reported_host(&info.host, &config));
            segment.add_parameter("port_path_or_id", info.port_path_or_id());
        }
        if config.datastore.database_name_reporting {
            if let Some(database) = self.database() {
                segment.add_parameter("database_name", database);
            }
        }
        Some(segment)
    }
}

impl<C: DatastoreClient> PoolResource for InstrumentedClient<C> {
    fn resource_id(&self) -> u64 {
        self.inner.resource_id()
    }

    fn on_error(&self, listener: ErrorListener<Self>) {
        let database = Arc::clone(&self.database);
        let tracer = self.tracer.clone();
        self.inner.on_error(Arc::new(move |inner: &C, err: &ClientError| {
            let wrapped = InstrumentedClient {
                inner: inner.clone(),
                database: Arc::clone(&database),
                tracer: tracer.clone(),
            };
            listener(&wrapped, err);
        }));
    }
}

impl<C: DatastoreClient> DatastoreClient for InstrumentedClient<C> {
    fn connect(&self, callback: ConnectCallback) {
        let Some(segment) = self.start_segment(CONNECT_SEGMENT) else {
            self.inner.connect(Box::new(context::bind_continuation(callback)));
            return;
        };

        let done = segment.clone();
        let callback = context::run(Some(segment.context()), || {
            context::bind_continuation(move |result: Result<(), ClientError>| {
                done.close(result.as_ref().err().map(|e| e as &dyn Display));
                callback(result)
            })
        });
        self.inner.connect(Box::new(callback));
    }

    fn query(&self, query: Query, callback: QueryCallback) {
        let sql = query.text().to_string();
        let switch_to = use_database(&sql);
        let database = Arc::clone(&self.database);
        let track_use = move |ok: bool| {
            if let (true, Some(db)) = (ok, switch_to) {
                debug!(database = %db, "Switched database");
                database.store(Some(Arc::new(db)));
            }
        };

        let statement = parse_statement(&sql);
        let Some(segment) = self.start_segment(&statement.segment_name(PRODUCT)) else {
            self.inner.query(
                query,
                Box::new(context::bind_continuation(move |result: Result<QueryResult, ClientError>| {
                    track_use(result.is_ok());
                    callback(result)
                })),
            );
            return;
        };

        match self.tracer.config().transaction_tracer.record_sql {
            RecordSql::Raw => segment.add_parameter("sql", sql.as_str()),
            RecordSql::Obfuscated => segment.add_parameter("sql_obfuscated", obfuscate(&sql)),
            RecordSql::Off => {}
        }

        let fingerprint = Fingerprint::from_query(&query);
        let done = segment.clone();
        let callback = context::run(Some(segment.context()), || {
            context::bind_continuation(move |result: Result<QueryResult, ClientError>| {
                done.close(result.as_ref().err().map(|e| e as &dyn Display));
                track_use(result.is_ok());
                done.transaction().record_query(fingerprint, &done);
                callback(result)
            })
        });
        self.inner.query(query, Box::new(callback));
    }

    fn end(&self) {
        self.inner.end();
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.inner.connection_info()
    }
}

fn is_localhost(host: &str) -> bool {
    LOCALHOST_NAMES
        .iter()
        .any(|name| host.eq_ignore_ascii_case(name))
}

/// Host as reported on segments. Loopback addresses say nothing about where
/// the database runs, so they are replaced with this machine's name.
fn reported_host(host: &str, config: &TracerConfig) -> String {
    if !is_localhost(host) {
        return host.to_string();
    }
    config
        .datastore
        .host_display_name
        .clone()
        .or_else(|| MACHINE_HOSTNAME.clone())
        .unwrap_or_else(|| host.to_string())
}
