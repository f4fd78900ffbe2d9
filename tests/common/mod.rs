//! Asynchronous pool and client doubles.
//!
//! Both complete their callbacks on freshly spawned tokio tasks, so nothing
//! they call back into inherits the caller's task-local context.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use txn_tracer::datastore::{
    ConnectCallback, ConnectionInfo, DatastoreClient, Query, QueryCallback, QueryResult,
};
use txn_tracer::error::{ClientError, PoolError};
use txn_tracer::pool::{
    AcquireCallback, AcquireFailure, ErrorListener, PoolResource, ResourcePool,
};

/// Pretend MySQL connection.
#[derive(Clone)]
pub struct MockClient {
    id: u64,
    info: ConnectionInfo,
    latency: Duration,
    fail_next: Arc<Mutex<Option<ClientError>>>,
    refuse_connect: Arc<Mutex<Option<String>>>,
    listeners: Arc<Mutex<Vec<ErrorListener<MockClient>>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockClient {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            info: ConnectionInfo::tcp("localhost", 3306),
            latency: Duration::from_millis(2),
            fail_next: Arc::new(Mutex::new(None)),
            refuse_connect: Arc::new(Mutex::new(None)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_info(mut self, info: ConnectionInfo) -> Self {
        self.info = info;
        self
    }

    pub fn fail_next_query(&self, err: ClientError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn refuse_connect(&self, reason: &str) {
        *self.refuse_connect.lock() = Some(reason.to_string());
    }

    /// Simulate a runtime error on the connection, e.g. a dropped socket.
    pub fn emit_error(&self, err: ClientError) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(self, &err);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

impl PoolResource for MockClient {
    fn resource_id(&self) -> u64 {
        self.id
    }

    fn on_error(&self, listener: ErrorListener<Self>) {
        self.listeners.lock().push(listener);
    }
}

impl DatastoreClient for MockClient {
    fn connect(&self, callback: ConnectCallback) {
        let refusal = self.refuse_connect.lock().take();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            match refusal {
                Some(reason) => callback(Err(ClientError::ConnectionFailed(reason))),
                None => callback(Ok(())),
            }
        });
    }

    fn query(&self, query: Query, callback: QueryCallback) {
        self.executed.lock().push(query.text().to_string());
        let failure = self.fail_next.lock().take();
        let latency = self.latency;

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            match failure {
                Some(err) => callback(Err(err)),
                None => callback(Ok(QueryResult::rows(vec![serde_json::json!({
                    "solution": 2
                })]))),
            }
        });
    }

    fn end(&self) {}

    fn connection_info(&self) -> ConnectionInfo {
        self.info.clone()
    }
}

/// Scripted failure for one acquire attempt.
#[derive(Debug, Clone, Copy)]
pub enum Refusal {
    /// Nothing handed back.
    Plain,
    /// A half-built handle comes back with the error.
    WithHandle,
}

type Factory<R> = Box<dyn Fn(u64) -> R + Send + Sync>;

/// Pool that hands out idle resources first, then creates new ones.
pub struct MockPool<R: PoolResource> {
    factory: Factory<R>,
    next_id: AtomicU64,
    attempts: AtomicU32,
    refusals: Mutex<VecDeque<Refusal>>,
    idle: Mutex<Vec<R>>,
    destroyed: Mutex<Vec<u64>>,
    created: Mutex<Vec<R>>,
}

impl<R: PoolResource> MockPool<R> {
    pub fn new(factory: impl Fn(u64) -> R + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            next_id: AtomicU64::new(1),
            attempts: AtomicU32::new(0),
            refusals: Mutex::new(VecDeque::new()),
            idle: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` acquisitions.
    pub fn refuse(&self, count: usize, refusal: Refusal) {
        let mut refusals = self.refusals.lock();
        refusals.extend(std::iter::repeat(refusal).take(count));
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn idle_ids(&self) -> Vec<u64> {
        self.idle.lock().iter().map(PoolResource::resource_id).collect()
    }

    pub fn destroyed_ids(&self) -> Vec<u64> {
        self.destroyed.lock().clone()
    }

    pub fn created(&self) -> Vec<R> {
        self.created.lock().clone()
    }

    fn create(&self) -> R {
        let resource = (self.factory)(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created.lock().push(resource.clone());
        resource
    }
}

impl<R: PoolResource> ResourcePool for MockPool<R> {
    type Resource = R;

    fn acquire(&self, callback: AcquireCallback<R>) {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let result = match self.refusals.lock().pop_front() {
            Some(Refusal::Plain) => Err(AcquireFailure::new(PoolError::AcquireFailed(
                "connection refused".into(),
            ))),
            Some(Refusal::WithHandle) => Err(AcquireFailure::with_resource(
                PoolError::AcquireFailed("handshake failed".into()),
                self.create(),
            )),
            None => {
                let idle = self.idle.lock().pop();
                Ok(idle.unwrap_or_else(|| self.create()))
            }
        };

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            callback(result);
        });
    }

    fn release(&self, resource: R) {
        self.idle.lock().push(resource);
    }

    fn destroy(&self, resource: R) {
        let id = resource.resource_id();
        self.idle.lock().retain(|r| r.resource_id() != id);
        self.destroyed.lock().push(id);
    }

    fn drain(&self, callback: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move { callback() });
    }

    fn destroy_all_now(&self) {
        let drained: Vec<R> = self.idle.lock().drain(..).collect();
        self.destroyed
            .lock()
            .extend(drained.iter().map(PoolResource::resource_id));
    }
}

/// Await a callback-style query.
pub async fn query<C: DatastoreClient>(
    client: &C,
    query: Query,
) -> Result<QueryResult, ClientError> {
    let (tx, rx) = oneshot::channel();
    client.query(
        query,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    rx.await.unwrap_or(Err(ClientError::Closed))
}
