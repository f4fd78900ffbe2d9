use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

use super::Fingerprint;
use crate::trace::ParamValue;

/// One execution kept as the representative of a sample.
#[derive(Debug, Clone, Serialize)]
pub struct SampleTrace {
    pub transaction_id: Uuid,
    pub segment_name: String,
    pub parameters: BTreeMap<String, ParamValue>,
    pub duration: Duration,
}

/// Aggregated timings for one fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySample {
    fingerprint: Fingerprint,
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
    /// Slowest execution seen so far
    trace: SampleTrace,
}

impl QuerySample {
    pub fn new(fingerprint: Fingerprint, trace: SampleTrace) -> Self {
        Self {
            fingerprint,
            count: 1,
            total: trace.duration,
            min: trace.duration,
            max: trace.duration,
            trace,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }

    pub fn trace(&self) -> &SampleTrace {
        &self.trace
    }

    pub(crate) fn aggregate(&mut self, trace: SampleTrace) {
        self.count += 1;
        self.total += trace.duration;
        self.min = self.min.min(trace.duration);
        if trace.duration > self.max {
            self.max = trace.duration;
            self.trace = trace;
        }
    }

    pub(crate) fn merge(&mut self, other: &QuerySample) {
        self.count += other.count;
        self.total += other.total;
        self.min = self.min.min(other.min);
        if other.max > self.max {
            self.max = other.max;
            self.trace = other.trace.clone();
        }
    }
}

/// Per-transaction sample table.
#[derive(Debug, Default)]
pub struct QuerySamples {
    samples: HashMap<Fingerprint, QuerySample>,
}

impl QuerySamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, fingerprint: Fingerprint, trace: SampleTrace) {
        match self.samples.get_mut(&fingerprint) {
            Some(sample) => sample.aggregate(trace),
            None => {
                self.samples
                    .insert(fingerprint.clone(), QuerySample::new(fingerprint, trace));
            }
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&QuerySample> {
        self.samples.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the table into a list ordered by fingerprint.
    pub fn finalize(self) -> Vec<QuerySample> {
        let mut samples: Vec<_> = self.samples.into_values().collect();
        samples.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        samples
    }
}
