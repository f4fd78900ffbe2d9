use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{Fingerprint, QuerySample};

/// Sample window shared by every transaction of a tracer.
///
/// Transactions publish their tables here when they end. The window holds at
/// most `capacity` fingerprints; when full, the sample with the smallest max
/// duration makes room for a slower newcomer.
pub struct QueryAggregator {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    samples: HashMap<Fingerprint, QuerySample>,
    dropped: u64,
}

impl Default for QueryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryAggregator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn merge(&self, samples: &[QuerySample], capacity: usize) {
        let mut inner = self.inner.lock();
        for sample in samples {
            inner.merge_one(sample, capacity);
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<QuerySample> {
        self.inner.lock().samples.get(fingerprint).cloned()
    }

    /// Current window, ordered by fingerprint.
    pub fn samples(&self) -> Vec<QuerySample> {
        let inner = self.inner.lock();
        let mut samples: Vec<_> = inner.samples.values().cloned().collect();
        samples.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));
        samples
    }

    /// Drain the window.
    pub fn harvest(&self) -> Vec<QuerySample> {
        let mut inner = self.inner.lock();
        inner.dropped = 0;
        let mut samples: Vec<_> = inner.samples.drain().map(|(_, s)| s).collect();
        samples.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));
        samples
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    /// Samples rejected because the window was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

impl Inner {
    fn merge_one(&mut self, sample: &QuerySample, capacity: usize) {
        if let Some(existing) = self.samples.get_mut(sample.fingerprint()) {
            existing.merge(sample);
            return;
        }

        if self.samples.len() < capacity {
            self.samples
                .insert(sample.fingerprint().clone(), sample.clone());
            return;
        }

        let fastest = self
            .samples
            .values()
            .min_by_key(|s| s.max())
            .map(|s| (s.fingerprint().clone(), s.max()));

        match fastest {
            Some((fingerprint, max)) if sample.max() > max => {
                debug!(evicted = %fingerprint, "Sample window full; evicting fastest sample");
                self.samples.remove(&fingerprint);
                self.samples
                    .insert(sample.fingerprint().clone(), sample.clone());
                self.dropped += 1;
            }
            _ => self.dropped += 1,
        }
    }
}
