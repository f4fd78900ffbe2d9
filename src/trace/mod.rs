//! Transactions and their segment trees.

mod segment;
mod transaction;

pub use segment::{ParamValue, Segment, SegmentId, SegmentSnapshot};
pub use transaction::{SegmentHandle, TraceSnapshot, Transaction};

pub(crate) use transaction::TransactionInner;
