use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{
    AcquireFailure, AcquireResult, HandleLifecycle, HandleState, PoolResource, ResourcePool,
};
use crate::config::PoolConfig;
use crate::context;
use crate::error::{ClientError, PoolError};
use crate::logging::POOL_TARGET;
use crate::metrics::Metrics;
use crate::trace::SegmentHandle;

/// Name of the segment covering a whole `get_client` call, retries included.
pub const ACQUIRE_SEGMENT: &str = "Pool/acquire";

/// How many destroyed ids are remembered to refuse late releases.
const DESTROYED_MEMORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 10 }
    }
}

impl From<&PoolConfig> for RetryPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_attempts: config.max_acquire_attempts.max(1),
        }
    }
}

type ClientCallback<R> = Box<dyn FnOnce(Result<R, PoolError>) + Send>;

/// Handles the adapter has handed out and not yet seen destroyed.
///
/// Destroyed handles leave `live` at once; only their ids linger, in a
/// bounded ring.
#[derive(Default)]
struct HandleRegistry {
    live: DashMap<u64, HandleLifecycle>,
    destroyed: Mutex<VecDeque<u64>>,
}

impl HandleRegistry {
    fn is_destroyed(&self, id: u64) -> bool {
        self.destroyed.lock().contains(&id)
    }

    fn state(&self, id: u64) -> Option<HandleState> {
        if self.is_destroyed(id) {
            return Some(HandleState::Destroyed);
        }
        self.live.get(&id).map(|entry| entry.state())
    }

    /// Forget `id` and remember it as destroyed. Returns `false` if it
    /// already was.
    fn bury(&self, id: u64) -> bool {
        let mut destroyed = self.destroyed.lock();
        if destroyed.contains(&id) {
            return false;
        }
        if destroyed.len() == DESTROYED_MEMORY {
            destroyed.pop_front();
        }
        destroyed.push_back(id);
        self.live.remove(&id);
        true
    }
}

/// Context-preserving, retrying front for a [`ResourcePool`].
pub struct PoolAdapter<P: ResourcePool> {
    pool: Arc<P>,
    policy: RetryPolicy,
    handles: Arc<HandleRegistry>,
    draining: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

impl<P: ResourcePool> Clone for PoolAdapter<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            policy: self.policy,
            handles: Arc::clone(&self.handles),
            draining: Arc::clone(&self.draining),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<P: ResourcePool> PoolAdapter<P> {
    pub fn new(pool: Arc<P>, policy: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            pool,
            policy,
            handles: Arc::new(HandleRegistry::default()),
            draining: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn handle_state(&self, resource_id: u64) -> Option<HandleState> {
        self.handles.state(resource_id)
    }

    /// Handles currently checked out or idle.
    pub fn tracked_handles(&self) -> usize {
        self.handles.live.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Acquire a handle and deliver it to `callback`.
    ///
    /// The callback runs with the caller's transaction context restored, no
    /// matter which task the pool completes on. Failed attempts are retried up
    /// to the policy limit; only then does the callback see an error. Once
    /// [`drain`](Self::drain) has been called every request fails with
    /// [`PoolError::Draining`].
    pub fn get_client<F>(&self, callback: F)
    where
        F: FnOnce(Result<P::Resource, PoolError>) + Send + 'static,
    {
        if self.is_draining() {
            warn!(target: POOL_TARGET, "Acquire requested while draining");
            callback(Err(PoolError::Draining));
            return;
        }

        let callback: ClientCallback<P::Resource> = Box::new(callback);
        let segment = context::current().and_then(|ctx| {
            ctx.transaction()
                .create_segment(ACQUIRE_SEGMENT, Some(ctx.segment()))
        });

        match segment {
            Some(segment) => {
                let ctx = segment.context();
                context::run(Some(ctx), || self.attempt(1, Some(segment), callback));
            }
            None => self.attempt(1, None, callback),
        }
    }

    pub async fn get_client_async(&self) -> Result<P::Resource, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.get_client(move |result| {
            let _ = tx.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(PoolError::AcquireFailed("acquire callback dropped".into())))
    }

    fn attempt(
        &self,
        attempt: u32,
        segment: Option<SegmentHandle>,
        callback: ClientCallback<P::Resource>,
    ) {
        self.metrics.acquire_attempts.inc();
        let adapter = self.clone();
        self.pool
            .acquire(Box::new(context::bind_continuation(move |result| {
                adapter.on_acquire(attempt, segment, callback, result)
            })));
    }

    fn on_acquire(
        &self,
        attempt: u32,
        segment: Option<SegmentHandle>,
        callback: ClientCallback<P::Resource>,
        result: AcquireResult<P::Resource>,
    ) {
        let failure = match result {
            Ok(resource) => match self.check_out(&resource) {
                Ok(()) => {
                    debug!(
                        target: POOL_TARGET,
                        resource = resource.resource_id(),
                        "Acquired after {} attempts",
                        attempt
                    );
                    finish_segment(segment, attempt, None);
                    callback(Ok(resource));
                    return;
                }
                Err(error) => AcquireFailure::new(error),
            },
            Err(failure) => failure,
        };

        error!(
            target: POOL_TARGET,
            attempt,
            "Failed to get connection from the pool: {}",
            failure.error
        );
        if let Some(resource) = failure.resource {
            self.destroy(resource);
        }

        if attempt < self.policy.max_attempts {
            debug!(target: POOL_TARGET, "{} attempts, trying again", attempt);
            self.metrics.acquire_retries.inc();
            self.attempt(attempt + 1, segment, callback);
        } else {
            let error = PoolError::Exhausted { attempts: attempt };
            self.metrics.acquire_exhausted.inc();
            finish_segment(segment, attempt, Some(&error));
            callback(Err(error));
        }
    }

    /// Mark a freshly acquired handle in-use, watching it for errors the first
    /// time it is seen.
    fn check_out(&self, resource: &P::Resource) -> Result<(), PoolError> {
        let id = resource.resource_id();
        if self.handles.is_destroyed(id) {
            return Err(PoolError::Destroyed(id));
        }

        let mut first_seen = false;
        {
            let mut entry = self.handles.live.entry(id).or_insert_with(|| {
                first_seen = true;
                HandleLifecycle::ready(id)
            });
            entry.transition(HandleState::InUse)?;
        }

        if first_seen {
            self.watch(resource);
        }
        Ok(())
    }

    fn watch(&self, resource: &P::Resource) {
        let pool = Arc::downgrade(&self.pool);
        let handles = Arc::clone(&self.handles);
        let metrics = Arc::clone(&self.metrics);

        resource.on_error(Arc::new(
            move |resource: &P::Resource, err: &ClientError| {
                let id = resource.resource_id();
                error!(
                    target: POOL_TARGET,
                    resource = id,
                    error = %err,
                    "Connection errored out, destroying connection"
                );
                if !handles.bury(id) {
                    return;
                }
                metrics.handles_destroyed.inc();
                if let Some(pool) = pool.upgrade() {
                    pool.destroy(resource.clone());
                }
            },
        ));
    }

    /// Return a handle to the pool's idle set. Destroyed handles never go
    /// back.
    pub fn release(&self, resource: P::Resource) {
        let id = resource.resource_id();
        let outcome = if self.handles.is_destroyed(id) {
            Err(PoolError::Destroyed(id))
        } else {
            match self.handles.live.get_mut(&id) {
                Some(mut entry) => entry.transition(HandleState::Idle).map(|_| ()),
                None => Ok(()),
            }
        };

        match outcome {
            Ok(()) => {
                debug!(target: POOL_TARGET, resource = id, "Releasing connection");
                self.pool.release(resource);
            }
            Err(error) => {
                warn!(target: POOL_TARGET, resource = id, "Not releasing connection: {}", error);
            }
        }
    }

    pub fn destroy(&self, resource: P::Resource) {
        let id = resource.resource_id();
        if !self.handles.bury(id) {
            debug!(target: POOL_TARGET, resource = id, "Connection already destroyed");
            return;
        }
        info!(target: POOL_TARGET, resource = id, "Destroying connection");
        self.metrics.handles_destroyed.inc();
        self.pool.destroy(resource);
    }

    /// Stop tracking a handle the pool evicted on its own.
    pub fn evicted(&self, resource_id: u64) {
        if self.handles.live.remove(&resource_id).is_some() {
            debug!(target: POOL_TARGET, resource = resource_id, "Forgetting evicted connection");
        }
    }

    /// Refuse further acquisitions and let the pool wind down. Tracking is
    /// cleared before `callback` runs.
    pub fn drain<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.draining.store(true, Ordering::SeqCst);
        info!(target: POOL_TARGET, "Draining pool");

        let handles = Arc::clone(&self.handles);
        let callback = context::bind(callback);
        self.pool.drain(Box::new(move || {
            handles.live.clear();
            callback()
        }));
    }

    pub fn destroy_all_now(&self) {
        let ids: Vec<u64> = self.handles.live.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.handles.bury(id);
        }
        self.pool.destroy_all_now();
    }
}

fn finish_segment(segment: Option<SegmentHandle>, attempts: u32, error: Option<&PoolError>) {
    if let Some(segment) = segment {
        segment.add_parameter("attempts", attempts);
        segment.close(error.map(|e| e as &dyn Display));
    }
}
