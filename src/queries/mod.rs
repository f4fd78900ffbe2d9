//! Query sample aggregation.
//!
//! Each transaction keeps a [`QuerySamples`] table keyed by [`Fingerprint`].
//! When the transaction ends the table is merged into the tracer-wide
//! [`QueryAggregator`] window.

mod aggregator;
mod fingerprint;
pub mod obfuscate;
mod sample;

pub use aggregator::QueryAggregator;
pub use fingerprint::Fingerprint;
pub use sample::{QuerySample, QuerySamples, SampleTrace};
