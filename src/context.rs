//! Implicit transaction context.
//!
//! The active [`Context`] is held in a tokio task-local, so it follows the
//! logical task rather than the OS thread. Work that leaves the task (a pool's
//! internal queue, a client callback fired from an I/O task, a spawned future)
//! must be wrapped with [`bind`], [`bind_continuation`] or [`bind_future`] at
//! the moment it is registered. The wrapper restores exactly the captured
//! binding when it runs, whatever happens to be current at that point.

use std::future::Future;
use tokio::task::JoinHandle;

use crate::trace::{SegmentId, Transaction};

tokio::task_local! {
    static CURRENT: Option<Context>;
}

/// The transaction and segment that new work should attach to.
#[derive(Clone)]
pub struct Context {
    transaction: Transaction,
    segment: SegmentId,
}

impl Context {
    pub fn new(transaction: Transaction, segment: SegmentId) -> Self {
        Self {
            transaction,
            segment,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Same transaction, different current segment.
    pub fn with_segment(&self, segment: SegmentId) -> Self {
        Self {
            transaction: self.transaction.clone(),
            segment,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("transaction", &self.transaction.id())
            .field("segment", &self.segment)
            .finish()
    }
}

/// The binding active for the running continuation, if any.
pub fn current() -> Option<Context> {
    CURRENT.try_with(|ctx| ctx.clone()).ok().flatten()
}

pub fn current_transaction() -> Option<Transaction> {
    current().map(|ctx| ctx.transaction)
}

/// Run `f` with `ctx` active. `None` hides any outer binding.
pub fn run<F, R>(ctx: Option<Context>, f: F) -> R
where
    F: FnOnce() -> R,
{
    CURRENT.sync_scope(ctx, f)
}

/// Poll `future` with `ctx` active.
pub async fn scope<F>(ctx: Option<Context>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, future).await
}

/// Capture the current binding now and restore it when the returned closure
/// is called.
pub fn bind<F, R>(f: F) -> impl FnOnce() -> R + Send
where
    F: FnOnce() -> R + Send,
{
    let captured = current();
    move || run(captured, f)
}

/// Single-argument form of [`bind`], for completion callbacks.
pub fn bind_continuation<F, A, R>(f: F) -> impl FnOnce(A) -> R + Send
where
    F: FnOnce(A) -> R + Send,
{
    let captured = current();
    move |arg| run(captured, move || f(arg))
}

/// Capture the current binding now and apply it to every poll of `future`.
pub fn bind_future<F>(future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(current(), future)
}

/// `tokio::spawn` that carries the current binding into the new task.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(bind_future(future))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TracerConfig;
    use crate::tracer::Tracer;

    #[test]
    fn test_no_context_outside_transaction() {
        assert!(current().is_none());
        assert!(run(None, current).is_none());
    }

    #[test]
    fn test_run_scopes_binding() {
        let tracer = Tracer::new(TracerConfig::default());
        let txn = tracer.start_transaction("scoped");

        let inside = run(Some(txn.context()), current_transaction);
        assert_eq!(inside.map(|t| t.id()), Some(txn.id()));
        assert!(current().is_none());
    }

    #[test]
    fn test_bound_callback_ignores_ambient_binding() {
        let tracer = Tracer::new(TracerConfig::default());
        let first = tracer.start_transaction("first");
        let second = tracer.start_transaction("second");

        let callback = run(Some(first.context()), || {
            bind_continuation(|expected: uuid::Uuid| {
                assert_eq!(current_transaction().map(|t| t.id()), Some(expected));
            })
        });

        // Fired while another transaction is current
        run(Some(second.context()), || callback(first.id()));

        // Fired with nothing current
        let unbound = bind(|| current().is_none());
        let still_unbound = run(Some(second.context()), || unbound());
        assert!(still_unbound);
    }

    #[tokio::test]
    async fn test_spawn_carries_binding() {
        let tracer = Tracer::new(TracerConfig::default());
        let txn = tracer.start_transaction("spawned");
        let id = txn.id();

        let seen = scope(Some(txn.context()), async {
            spawn(async { current_transaction().map(|t| t.id()) })
                .await
                .unwrap()
        })
        .await;

        assert_eq!(seen, Some(id));

        let plain = scope(Some(txn.context()), async {
            tokio::spawn(async { current().is_none() }).await.unwrap()
        })
        .await;
        assert!(plain, "plain tokio::spawn does not inherit the binding");
    }
}
