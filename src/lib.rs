//! Transaction tracing for callback-driven database clients.
//!
//! A [`Tracer`] starts transactions whose segment trees record every pooled
//! acquisition and query, and keeps the current transaction attached to work
//! across pool queues, client callbacks and spawned tasks.

pub mod config;
pub mod context;
pub mod datastore;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod queries;
pub mod trace;
pub mod tracer;

pub use context::Context;
pub use datastore::{DatastoreClient, InstrumentedClient, Query, QueryOptions};
pub use error::{Result, TracerError};
pub use pool::{PoolAdapter, ResourcePool};
pub use trace::{SegmentHandle, SegmentId, Transaction};
pub use tracer::Tracer;
