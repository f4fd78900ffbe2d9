//! Segment arena for a single transaction.
//!
//! Segments are only ever appended with a parent that already exists, so the
//! tree stays rooted and acyclic no matter in which order operations finish.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SegmentId(usize);

impl SegmentId {
    pub const ROOT: SegmentId = SegmentId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar parameter attached to a segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// A timed node in a transaction's operation tree.
#[derive(Debug, Clone)]
pub struct Segment {
    id: SegmentId,
    parent: Option<SegmentId>,
    children: Vec<SegmentId>,
    name: String,
    started_at: Instant,
    /// Offset from the transaction start
    start: Duration,
    duration: Option<Duration>,
    parameters: BTreeMap<String, ParamValue>,
}

impl Segment {
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn parent(&self) -> Option<SegmentId> {
        self.parent
    }

    pub fn children(&self) -> &[SegmentId] {
        &self.children
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_closed(&self) -> bool {
        self.duration.is_some()
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&ParamValue> {
        self.parameters.get(key)
    }
}

/// Serializable view of a segment and its descendants.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSnapshot {
    pub name: String,
    pub start_ms: f64,
    pub duration_ms: Option<f64>,
    pub parameters: BTreeMap<String, ParamValue>,
    pub children: Vec<SegmentSnapshot>,
}

#[derive(Debug)]
pub(crate) struct SegmentTree {
    origin: Instant,
    segments: Vec<Segment>,
}

impl SegmentTree {
    pub(crate) fn new(root_name: String, origin: Instant) -> Self {
        let root = Segment {
            id: SegmentId::ROOT,
            parent: None,
            children: Vec::new(),
            name: root_name,
            started_at: origin,
            start: Duration::ZERO,
            duration: None,
            parameters: BTreeMap::new(),
        };

        Self {
            origin,
            segments: vec![root],
        }
    }

    pub(crate) fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn add_child(
        &mut self,
        parent: SegmentId,
        name: String,
        now: Instant,
    ) -> Option<SegmentId> {
        let id = SegmentId(self.segments.len());
        self.segments.get_mut(parent.0)?.children.push(id);
        self.segments.push(Segment {
            id,
            parent: Some(parent),
            children: Vec::new(),
            name,
            started_at: now,
            start: now.saturating_duration_since(self.origin),
            duration: None,
            parameters: BTreeMap::new(),
        });
        Some(id)
    }

    pub(crate) fn set_parameter(&mut self, id: SegmentId, key: String, value: ParamValue) -> bool {
        match self.segments.get_mut(id.0) {
            Some(segment) => {
                segment.parameters.insert(key, value);
                true
            }
            None => false,
        }
    }

    /// Close a segment. Returns `None` for unknown ids; a second close keeps
    /// the first duration.
    pub(crate) fn close(
        &mut self,
        id: SegmentId,
        now: Instant,
        error: Option<String>,
    ) -> Option<Duration> {
        let segment = self.segments.get_mut(id.0)?;
        if let Some(duration) = segment.duration {
            return Some(duration);
        }

        if let Some(error) = error {
            segment
                .parameters
                .insert("error".to_string(), ParamValue::String(error));
        }
        let duration = now.saturating_duration_since(segment.started_at);
        segment.duration = Some(duration);
        Some(duration)
    }

    pub(crate) fn snapshot(&self, id: SegmentId) -> Option<SegmentSnapshot> {
        let segment = self.get(id)?;
        Some(SegmentSnapshot {
            name: segment.name.clone(),
            start_ms: segment.start.as_secs_f64() * 1000.0,
            duration_ms: segment.duration.map(|d| d.as_secs_f64() * 1000.0),
            parameters: segment.parameters.clone(),
            children: segment
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }
}
