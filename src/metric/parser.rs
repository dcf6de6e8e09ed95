//! StatsD wire-format decoding
//!
//! One framed chunk is one sample:
//!
//! ```text
//! name:value|type[|@sample_rate][|#tag1:v1,tag2:v2]
//! ```
//!
//! The decoder copies every field out of the chunk into owned storage. That
//! contract is what lets the ingestion loop return its read buffer to the
//! pool immediately after framing a datagram, instead of tracking which
//! samples still alias it.

use std::hash::Hasher;

use fnv::FnvHasher;

use super::{Metric, MetricType, MetricValue};

/// Reasons a chunk fails to decode into a [`Metric`].
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Zero-length chunk. The framer produces one of these when a datagram
    /// ends on the delimiter; it must be rejected here, not turned into a
    /// zero-valued sample.
    Empty,
    /// Structurally malformed sample text.
    Invalid(&'static str),
    /// Numeric field failed to parse.
    BadValue(&'static str),
    /// Sample rate outside (0, 1].
    BadSampleRate,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty sample"),
            ParseError::Invalid(what) => write!(f, "invalid sample: {}", what),
            ParseError::BadValue(what) => write!(f, "invalid value: {}", what),
            ParseError::BadSampleRate => write!(f, "sample rate must be in (0, 1]"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Compute the routing digest: 32-bit FNV-1a over the name and the sorted
/// tag list. Stable across processes and restarts, so a metric always lands
/// on the same shard for a fixed worker count.
fn digest(name: &str, tags: &[String]) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    for tag in tags {
        hasher.write(tag.as_bytes());
    }
    hasher.finish() as u32
}

/// Decode one framed chunk into a [`Metric`].
///
/// Every string in the result is freshly allocated; the returned metric
/// holds no reference into `chunk`.
pub fn parse_metric(chunk: &[u8]) -> Result<Metric, ParseError> {
    if chunk.is_empty() {
        return Err(ParseError::Empty);
    }

    let text = std::str::from_utf8(chunk).map_err(|_| ParseError::Invalid("not utf-8"))?;

    let colon = memchr::memchr(b':', chunk).ok_or(ParseError::Invalid("missing ':'"))?;
    let name = &text[..colon];
    if name.is_empty() {
        return Err(ParseError::Invalid("empty metric name"));
    }

    let mut fields = text[colon + 1..].split('|');
    let value_token = fields.next().ok_or(ParseError::Invalid("missing value"))?;
    if value_token.is_empty() {
        return Err(ParseError::Invalid("empty value"));
    }
    let type_token = fields.next().ok_or(ParseError::Invalid("missing type tag"))?;

    let kind = MetricType::from_wire(type_token.as_bytes())
        .ok_or(ParseError::Invalid("unknown type tag"))?;

    // Sets keep the raw token as an opaque identity; everything else is a float.
    let value = match kind {
        MetricType::Set => MetricValue::Identity(value_token.to_string()),
        _ => {
            let v: f64 = value_token
                .parse()
                .map_err(|_| ParseError::BadValue("not a number"))?;
            if !v.is_finite() {
                return Err(ParseError::BadValue("not finite"));
            }
            MetricValue::Number(v)
        }
    };

    let mut sample_rate = 1.0f64;
    let mut tags: Vec<String> = Vec::new();

    for field in fields {
        if let Some(rate) = field.strip_prefix('@') {
            let r: f64 = rate.parse().map_err(|_| ParseError::BadSampleRate)?;
            if !(r > 0.0 && r <= 1.0) {
                return Err(ParseError::BadSampleRate);
            }
            sample_rate = r;
        } else if let Some(tag_list) = field.strip_prefix('#') {
            tags = tag_list
                .split(',')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            // sorted so that tag order on the wire does not change identity
            tags.sort_unstable();
        } else {
            return Err(ParseError::Invalid("unknown field"));
        }
    }

    let digest = digest(name, &tags);

    Ok(Metric {
        name: name.to_string(),
        value,
        digest,
        kind,
        sample_rate,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        let m = parse_metric(b"a.b.c:1|c").unwrap();
        assert_eq!(m.name, "a.b.c");
        assert_eq!(m.value, MetricValue::Number(1.0));
        assert_eq!(m.kind, MetricType::Counter);
        assert_eq!(m.sample_rate, 1.0);
        assert!(m.tags.is_empty());
    }

    #[test]
    fn test_parse_sample_rate() {
        let m = parse_metric(b"a.b.c:1|c|@0.1").unwrap();
        assert_eq!(m.sample_rate, 0.1);
    }

    #[test]
    fn test_parse_timer_and_histogram() {
        assert_eq!(parse_metric(b"t:3.5|ms").unwrap().kind, MetricType::Timer);
        assert_eq!(parse_metric(b"h:3.5|h").unwrap().kind, MetricType::Histogram);
    }

    #[test]
    fn test_parse_set_keeps_opaque_identity() {
        let m = parse_metric(b"users:alice|s").unwrap();
        assert_eq!(m.value, MetricValue::Identity("alice".to_string()));
    }

    #[test]
    fn test_parse_tags_sorted_and_identity_affecting() {
        let a = parse_metric(b"req:1|c|#zone:us,host:web01").unwrap();
        let b = parse_metric(b"req:1|c|#host:web01,zone:us").unwrap();
        assert_eq!(a.tags, vec!["host:web01".to_string(), "zone:us".to_string()]);
        assert_eq!(a.digest, b.digest);

        let untagged = parse_metric(b"req:1|c").unwrap();
        assert_ne!(a.digest, untagged.digest);
    }

    #[test]
    fn test_rejects_empty_chunk() {
        assert_eq!(parse_metric(b""), Err(ParseError::Empty));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_metric(b"no-colon").is_err());
        assert!(parse_metric(b":1|c").is_err());
        assert!(parse_metric(b"a.b.c:|c").is_err());
        assert!(parse_metric(b"a.b.c:1").is_err());
        assert!(parse_metric(b"a.b.c:1|bogus").is_err());
        assert!(parse_metric(b"a.b.c:nan|c").is_err());
        assert!(parse_metric(b"a.b.c:1|c|@0").is_err());
        assert!(parse_metric(b"a.b.c:1|c|@1.5").is_err());
    }

    #[test]
    fn test_digest_stable_for_same_identity() {
        let a = parse_metric(b"a.b.c:1|c").unwrap();
        let b = parse_metric(b"a.b.c:99|c|@0.5").unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn test_no_aliasing_of_input() {
        let buf = b"a.b.c:1|c|#host:web01".to_vec();
        let m = parse_metric(&buf).unwrap();
        drop(buf);
        assert_eq!(m.name, "a.b.c");
        assert_eq!(m.tags[0], "host:web01");
    }
}
