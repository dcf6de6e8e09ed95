//! Core metric types for the aggregation pipeline

pub mod parser;

pub use parser::{parse_metric, ParseError};

use serde::Serialize;

/// Type of metric being aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Monotonic event count, corrected for client-side sampling.
    /// Wire tag `c`.
    Counter,

    /// Point-in-time value, last write wins. Wire tag `g`.
    Gauge,

    /// Value distribution summarized as percentiles + count/sum/min/max.
    /// Wire tag `h`.
    Histogram,

    /// Millisecond timing, aggregated exactly like a histogram. Wire tag `ms`.
    Timer,

    /// Approximate count of distinct values. Wire tag `s`.
    Set,
}

impl MetricType {
    /// Parse a statsd wire type tag.
    pub fn from_wire(tag: &[u8]) -> Option<MetricType> {
        match tag {
            b"c" => Some(MetricType::Counter),
            b"g" => Some(MetricType::Gauge),
            b"h" => Some(MetricType::Histogram),
            b"ms" => Some(MetricType::Timer),
            b"s" => Some(MetricType::Set),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Timer => "timer",
            MetricType::Set => "set",
        }
    }
}

/// The observed value of one sample.
///
/// Sets count distinct occurrences of arbitrary values, which need not be
/// numeric, so their value is carried as an opaque identity rather than
/// forced through a float.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Identity(String),
}

/// One observed metric event, decoded from a single framed chunk.
///
/// Immutable after construction. Every field owns its storage; nothing
/// borrows the read buffer the chunk came from, so the buffer can go back
/// to the pool as soon as decoding returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric identity; the aggregation key within a worker.
    pub name: String,
    pub value: MetricValue,
    /// Stable FNV-1a hash of name and tags. Used only for shard routing,
    /// never for aggregation math.
    pub digest: u32,
    pub kind: MetricType,
    /// Client-side sampling correction, in (0, 1]. Counters scale each
    /// contribution by its reciprocal.
    pub sample_rate: f64,
    /// Sorted `key:value` tag strings. Tags are part of the identity.
    pub tags: Vec<String>,
}

/// One aggregated result produced by a flush.
///
/// The name may carry an aggregate suffix (`.p99`, `.count`, ...) on top of
/// the ingested metric name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushedMetric {
    pub name: String,
    pub value: f64,
    pub kind: MetricType,
    /// Unix timestamp (seconds) of the flush that produced this point.
    pub timestamp: u64,
    /// Length in seconds of the aggregation interval the point summarizes.
    pub interval: u64,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_type_tags_round_trip() {
        assert_eq!(MetricType::from_wire(b"c"), Some(MetricType::Counter));
        assert_eq!(MetricType::from_wire(b"g"), Some(MetricType::Gauge));
        assert_eq!(MetricType::from_wire(b"h"), Some(MetricType::Histogram));
        assert_eq!(MetricType::from_wire(b"ms"), Some(MetricType::Timer));
        assert_eq!(MetricType::from_wire(b"s"), Some(MetricType::Set));
        assert_eq!(MetricType::from_wire(b"x"), None);
        assert_eq!(MetricType::from_wire(b""), None);
    }
}
