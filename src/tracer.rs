use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{self, TracerConfig};
use crate::context;
use crate::datastore::{DatastoreClient, InstrumentedClient};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::pool::{PoolAdapter, ResourcePool, RetryPolicy};
use crate::queries::QueryAggregator;
use crate::trace::{Transaction, TransactionInner};

/// State shared by the tracer and every transaction it starts.
pub(crate) struct TracerShared {
    pub(crate) config: ArcSwap<TracerConfig>,
    pub(crate) queries: QueryAggregator,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) active: DashMap<Uuid, Weak<TransactionInner>>,
}

/// Entry point: starts transactions and instruments pools and clients.
#[derive(Clone)]
pub struct Tracer {
    shared: Arc<TracerShared>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Self {
        Self {
            shared: Arc::new(TracerShared {
                config: ArcSwap::from_pointee(config),
                queries: QueryAggregator::new(),
                metrics: Arc::new(Metrics::new()),
                active: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> Arc<TracerConfig> {
        self.shared.config.load_full()
    }

    /// Swap in a new configuration. Affects work started afterwards.
    pub fn update_config(&self, config: TracerConfig) -> Result<()> {
        config::validate(&config)?;
        self.shared.config.store(Arc::new(config));
        info!("Tracer configuration updated");
        Ok(())
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    /// Query samples merged from ended transactions.
    pub fn queries(&self) -> &QueryAggregator {
        &self.shared.queries
    }

    pub fn start_transaction(&self, name: impl Into<String>) -> Transaction {
        let txn = Transaction::new(Arc::clone(&self.shared), name.into());
        self.shared.active.insert(txn.id(), txn.downgrade());
        self.shared.metrics.transactions_started.inc();
        self.shared.metrics.active_transactions.inc();
        debug!(transaction = %txn.id(), name = %txn.name(), "Transaction started");
        txn
    }

    /// Start a transaction and run `f` with its root segment current.
    pub fn run_in_transaction<F, R>(&self, name: impl Into<String>, f: F) -> R
    where
        F: FnOnce(Transaction) -> R,
    {
        let txn = self.start_transaction(name);
        context::run(Some(txn.context()), || f(txn))
    }

    /// Async form of [`run_in_transaction`](Self::run_in_transaction). The
    /// root stays current for every poll of the returned future.
    pub async fn run_in_transaction_async<F, Fut>(&self, name: impl Into<String>, f: F) -> Fut::Output
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future,
    {
        let txn = self.start_transaction(name);
        let ctx = txn.context();
        context::scope(Some(ctx), f(txn)).await
    }

    pub fn get_transaction(&self, id: Uuid) -> Option<Transaction> {
        self.shared
            .active
            .get(&id)
            .and_then(|entry| entry.upgrade())
            .map(Transaction::from_inner)
    }

    /// Transactions started and not yet ended.
    pub fn active_transactions(&self) -> Vec<Transaction> {
        self.shared
            .active
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(Transaction::from_inner)
            .collect()
    }

    pub fn instrument<C: DatastoreClient>(&self, client: C) -> InstrumentedClient<C> {
        InstrumentedClient::new(client, self.clone())
    }

    /// Wrap `pool` with the configured retry policy.
    pub fn pool_adapter<P: ResourcePool>(&self, pool: Arc<P>) -> PoolAdapter<P> {
        let policy = RetryPolicy::from(&self.config().pool);
        PoolAdapter::new(pool, policy, Arc::clone(&self.shared.metrics))
    }

    /// End transactions idle for longer than `transaction.idle_timeout_ms`.
    /// Returns how many were ended.
    pub fn reap_idle(&self) -> usize {
        let timeout = self.config().transaction_idle_timeout();
        let now = Instant::now();

        let idle: Vec<Transaction> = self
            .active_transactions()
            .into_iter()
            .filter(|txn| txn.idle_for(now) >= timeout)
            .collect();

        idle.iter().filter(|txn| txn.end_timed_out()).count()
    }

    /// Run [`reap_idle`](Self::reap_idle) every `transaction.reap_interval_ms`
    /// until the tracer is dropped.
    pub fn spawn_idle_reaper(&self) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.config().reap_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    debug!("Tracer dropped; stopping idle reaper");
                    break;
                };
                let reaped = Tracer { shared }.reap_idle();
                if reaped > 0 {
                    info!("Reaped {} idle transactions", reaped);
                }
            }
        })
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("active_transactions", &self.shared.active.len())
            .field("query_samples", &self.shared.queries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_start_registers_and_end_deregisters() {
        let tracer = Tracer::new(TracerConfig::default());
        let txn = tracer.start_transaction("web");

        assert!(tracer.get_transaction(txn.id()).is_some());
        assert_eq!(tracer.metrics().active_transactions.get(), 1);

        txn.end(|_| {});
        assert!(tracer.get_transaction(txn.id()).is_none());
        assert_eq!(tracer.metrics().active_transactions.get(), 0);
        assert_eq!(tracer.metrics().transactions_ended.get(), 1);
    }

    #[test]
    fn test_run_in_transaction_binds_root() {
        let tracer = Tracer::new(TracerConfig::default());
        let id = tracer.run_in_transaction("bound", |txn| {
            let ctx = context::current().unwrap();
            assert_eq!(ctx.segment(), txn.root());
            txn.id()
        });

        assert!(context::current().is_none());
        assert!(tracer.get_transaction(id).is_some());
    }

    #[tokio::test]
    async fn test_run_in_transaction_async_survives_await() {
        let tracer = Tracer::new(TracerConfig::default());
        let same = tracer
            .run_in_transaction_async("async", |txn| async move {
                tokio::task::yield_now().await;
                context::current_transaction().map(|t| t.id()) == Some(txn.id())
            })
            .await;

        assert!(same);
    }

    #[test]
    fn test_update_config_validates() {
        let tracer = Tracer::new(TracerConfig::default());
        let mut bad = TracerConfig::default();
        bad.pool.max = 0;

        assert!(tracer.update_config(bad).is_err());
        assert_eq!(tracer.config().pool.max, 6);

        let mut good = TracerConfig::default();
        good.pool.max_acquire_attempts = 3;
        tracer.update_config(good).unwrap();
        assert_eq!(tracer.config().pool.max_acquire_attempts, 3);
    }

    #[test]
    fn test_reap_idle_ends_only_stale() {
        let mut config = TracerConfig::default();
        config.transaction.idle_timeout_ms = 20;
        let tracer = Tracer::new(config);

        let stale = tracer.start_transaction("stale");
        std::thread::sleep(Duration::from_millis(40));
        let fresh = tracer.start_transaction("fresh");

        assert_eq!(tracer.reap_idle(), 1);
        assert!(stale.is_ended());
        assert!(stale.timed_out());
        assert!(!fresh.is_ended());
        assert_eq!(tracer.metrics().transactions_timed_out.get(), 1);
    }

    #[test]
    fn test_dropped_transaction_is_forgotten() {
        let tracer = Tracer::new(TracerConfig::default());
        let kept = tracer.start_transaction("kept");
        for _ in 0..100 {
            let abandoned = tracer.start_transaction("abandoned");
            let clone = abandoned.clone();
            drop(abandoned);
            assert_eq!(tracer.shared.active.len(), 2);
            drop(clone);
        }

        // No reaper running
        assert_eq!(tracer.shared.active.len(), 1);
        assert_eq!(tracer.metrics().active_transactions.get(), 1);
        assert_eq!(tracer.active_transactions().len(), 1);

        kept.end(|_| {});
        assert!(tracer.shared.active.is_empty());
        assert_eq!(tracer.metrics().active_transactions.get(), 0);
    }
}
