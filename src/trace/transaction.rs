use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::segment::{ParamValue, Segment, SegmentId, SegmentSnapshot, SegmentTree};
use crate::context::{self, Context};
use crate::error::TransactionError;
use crate::queries::{Fingerprint, QuerySample, QuerySamples, SampleTrace};
use crate::tracer::TracerShared;

/// One logical unit of work.
///
/// Cloning is cheap; all clones refer to the same trace. The current segment
/// is not stored here but in the [`Context`] of whichever continuation is
/// running.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

pub(crate) struct TransactionInner {
    id: Uuid,
    name: String,
    started_at: DateTime<Utc>,
    tracer: Arc<TracerShared>,
    state: Mutex<TransactionState>,
}

struct TransactionState {
    tree: SegmentTree,
    samples: QuerySamples,
    ended: bool,
    timed_out: bool,
    last_activity: Instant,
    finalized: Vec<QuerySample>,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        // Abandoned without `end`
        if self.tracer.active.remove(&self.id).is_some() {
            self.tracer.metrics.active_transactions.dec();
            debug!(transaction = %self.id, name = %self.name, "Transaction dropped before end");
        }
    }
}

/// Serializable view of a finished (or in-flight) transaction trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSnapshot {
    pub transaction_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<f64>,
    pub timed_out: bool,
    pub root: SegmentSnapshot,
}

impl Transaction {
    pub(crate) fn new(tracer: Arc<TracerShared>, name: String) -> Self {
        let origin = Instant::now();
        let state = TransactionState {
            tree: SegmentTree::new(name.clone(), origin),
            samples: QuerySamples::new(),
            ended: false,
            timed_out: false,
            last_activity: origin,
            finalized: Vec::new(),
        };

        Self {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4(),
                name,
                started_at: Utc::now(),
                tracer,
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<TransactionInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn root(&self) -> SegmentId {
        SegmentId::ROOT
    }

    /// Context pointing at the root segment.
    pub fn context(&self) -> Context {
        Context::new(self.clone(), SegmentId::ROOT)
    }

    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    /// Whether the idle reaper finalized this transaction.
    pub fn timed_out(&self) -> bool {
        self.inner.state.lock().timed_out
    }

    /// Root duration, available once ended.
    pub fn duration(&self) -> Option<Duration> {
        self.inner
            .state
            .lock()
            .tree
            .get(SegmentId::ROOT)
            .and_then(Segment::duration)
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inner.state.lock().last_activity)
    }

    /// Start a child segment.
    ///
    /// The parent is `parent_override` if given, else the current context's
    /// segment when that context belongs to this transaction, else the root.
    /// Returns `None` once the transaction has ended, or while
    /// `transaction_tracer.enabled` is off.
    pub fn create_segment(
        &self,
        name: impl Into<String>,
        parent_override: Option<SegmentId>,
    ) -> Option<SegmentHandle> {
        let name = name.into();
        if !self.inner.tracer.config.load().transaction_tracer.enabled {
            debug!(transaction = %self.id(), segment = %name, "Segment tracing disabled");
            return None;
        }

        let parent = parent_override
            .or_else(|| {
                context::current()
                    .filter(|ctx| ctx.transaction().id() == self.id())
                    .map(|ctx| ctx.segment())
            })
            .unwrap_or(SegmentId::ROOT);

        let metrics = &self.inner.tracer.metrics;
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        if state.ended {
            warn!(
                transaction = %self.id(),
                segment = %name,
                "{}; dropping segment",
                TransactionError::AlreadyEnded(self.id())
            );
            metrics.segments_dropped.inc();
            return None;
        }

        match state.tree.add_child(parent, name.clone(), now) {
            Some(id) => {
                state.last_activity = now;
                metrics.segments_created.inc();
                Some(SegmentHandle {
                    transaction: self.clone(),
                    id,
                })
            }
            None => {
                warn!(
                    segment = %name,
                    "{}; dropping segment",
                    TransactionError::SegmentNotFound {
                        transaction: self.id(),
                        segment: parent.index(),
                    }
                );
                metrics.segments_dropped.inc();
                None
            }
        }
    }

    pub fn segment(&self, id: SegmentId) -> Option<Segment> {
        self.inner.state.lock().tree.get(id).cloned()
    }

    pub fn children(&self, id: SegmentId) -> Vec<SegmentId> {
        self.inner
            .state
            .lock()
            .tree
            .get(id)
            .map(|segment| segment.children().to_vec())
            .unwrap_or_default()
    }

    pub fn segment_count(&self) -> usize {
        self.inner.state.lock().tree.len()
    }

    pub fn trace(&self) -> TraceSnapshot {
        let state = self.inner.state.lock();
        let root = state
            .tree
            .snapshot(SegmentId::ROOT)
            .expect("root segment always exists");

        TraceSnapshot {
            transaction_id: self.id(),
            name: self.inner.name.clone(),
            started_at: self.inner.started_at,
            duration_ms: root.duration_ms,
            timed_out: state.timed_out,
            root,
        }
    }

    /// Record the timing of a closed query segment under `fingerprint`.
    ///
    /// Returns `false` when sampling is disabled, the segment is still open,
    /// it ran faster than the explain threshold, or the transaction ended.
    pub fn record_query(&self, fingerprint: Fingerprint, segment: &SegmentHandle) -> bool {
        let config = self.inner.tracer.config.load();
        if !config.slow_sql.enabled {
            return false;
        }

        let mut state = self.inner.state.lock();
        if state.ended {
            warn!(
                transaction = %self.id(),
                fingerprint = %fingerprint,
                "Query finished after transaction end; sample dropped"
            );
            return false;
        }

        let Some(recorded) = state.tree.get(segment.id) else {
            return false;
        };
        let Some(duration) = recorded.duration() else {
            debug!(segment = %recorded.name(), "Segment still open; not sampled");
            return false;
        };
        if duration < config.explain_threshold() {
            return false;
        }

        let trace = SampleTrace {
            transaction_id: self.id(),
            segment_name: recorded.name().to_string(),
            parameters: recorded.parameters().clone(),
            duration,
        };
        state.samples.record(fingerprint, trace);
        let metrics = &self.inner.tracer.metrics;
        metrics.query_samples_recorded.inc();
        metrics.query_duration.observe(duration.as_secs_f64());
        true
    }

    /// Samples published by [`end`](Self::end); empty until then.
    pub fn query_samples(&self) -> Vec<QuerySample> {
        self.inner.state.lock().finalized.clone()
    }

    /// Finalize the transaction and invoke `callback` once.
    ///
    /// Closes the root, publishes the sample table to the tracer and removes
    /// the transaction from the active set. A second call is ignored and does
    /// not invoke its callback.
    pub fn end<F>(&self, callback: F) -> bool
    where
        F: FnOnce(&Transaction),
    {
        if !self.finalize(false) {
            return false;
        }
        callback(self);
        true
    }

    pub(crate) fn end_timed_out(&self) -> bool {
        self.finalize(true)
    }

    fn finalize(&self, timed_out: bool) -> bool {
        let tracer = &self.inner.tracer;
        let (samples, duration) = {
            let mut state = self.inner.state.lock();
            if state.ended {
                warn!(transaction = %self.id(), "Transaction already ended; ignoring end");
                return false;
            }
            state.ended = true;
            state.timed_out = timed_out;

            let duration = state
                .tree
                .close(SegmentId::ROOT, Instant::now(), None)
                .unwrap_or_default();
            let samples = std::mem::take(&mut state.samples).finalize();
            state.finalized = samples.clone();
            (samples, duration)
        };

        let capacity = tracer.config.load().slow_sql.max_samples;
        tracer.queries.merge(&samples, capacity);
        if tracer.active.remove(&self.id()).is_some() {
            tracer.metrics.active_transactions.dec();
        }

        if timed_out {
            tracer.metrics.transactions_timed_out.inc();
            warn!(
                transaction = %self.id(),
                name = %self.inner.name,
                "Transaction idle past timeout; finalized by reaper"
            );
        }
        tracer.metrics.transactions_ended.inc();
        info!(
            transaction = %self.id(),
            name = %self.inner.name,
            duration_ms = duration.as_secs_f64() * 1000.0,
            samples = samples.len(),
            "Transaction ended"
        );
        true
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Handle to an open segment.
#[derive(Clone)]
pub struct SegmentHandle {
    transaction: Transaction,
    id: SegmentId,
}

impl SegmentHandle {
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Context that makes this segment the parent of nested work.
    pub fn context(&self) -> Context {
        Context::new(self.transaction.clone(), self.id)
    }

    pub fn add_parameter(&self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let mut state = self.transaction.inner.state.lock();
        state.tree.set_parameter(self.id, key.into(), value.into());
    }

    /// Stop the timer. An error is recorded as the `error` parameter; timing
    /// is kept either way. Closing twice keeps the first duration.
    pub fn close(&self, error: Option<&dyn fmt::Display>) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.transaction.inner.state.lock();
        state.last_activity = now;
        state
            .tree
            .close(self.id, now, error.map(|e| e.to_string()))
    }

    pub fn duration(&self) -> Option<Duration> {
        self.transaction
            .inner
            .state
            .lock()
            .tree
            .get(self.id)
            .and_then(Segment::duration)
    }
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("transaction", &self.transaction.id())
            .field("id", &self.id)
            .finish()
    }
}
