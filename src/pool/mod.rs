//! Resource pool seam.
//!
//! [`ResourcePool`] is the interface of an external acquire/release pool.
//! [`PoolAdapter`] wraps one so that the transaction context survives the
//! pool's internal queueing, and retries failed acquisitions.

use std::sync::Arc;

use crate::error::{ClientError, PoolError};

pub mod adapter;
pub mod handle;

pub use adapter::{PoolAdapter, RetryPolicy, ACQUIRE_SEGMENT};
pub use handle::{HandleLifecycle, HandleState};

/// Called with the handle that reported the error.
pub type ErrorListener<R> = Arc<dyn Fn(&R, &ClientError) + Send + Sync>;

/// A pooled, stateful resource.
pub trait PoolResource: Clone + Send + Sync + 'static {
    /// Stable identity across clones.
    fn resource_id(&self) -> u64;

    /// Register a listener for runtime errors reported after acquisition.
    fn on_error(&self, listener: ErrorListener<Self>);
}

/// Acquisition failure. Some pools hand back a half-built handle that must be
/// destroyed before retrying.
#[derive(Debug)]
pub struct AcquireFailure<R> {
    pub error: PoolError,
    pub resource: Option<R>,
}

impl<R> AcquireFailure<R> {
    pub fn new(error: PoolError) -> Self {
        Self {
            error,
            resource: None,
        }
    }

    pub fn with_resource(error: PoolError, resource: R) -> Self {
        Self {
            error,
            resource: Some(resource),
        }
    }
}

pub type AcquireResult<R> = std::result::Result<R, AcquireFailure<R>>;

pub type AcquireCallback<R> = Box<dyn FnOnce(AcquireResult<R>) + Send>;

/// Interface of an external resource pool.
///
/// The pool may queue acquisitions and complete them on any task or thread.
pub trait ResourcePool: Send + Sync + 'static {
    type Resource: PoolResource;

    fn acquire(&self, callback: AcquireCallback<Self::Resource>);

    fn release(&self, resource: Self::Resource);

    fn destroy(&self, resource: Self::Resource);

    fn drain(&self, callback: Box<dyn FnOnce() + Send>);

    fn destroy_all_now(&self);
}
