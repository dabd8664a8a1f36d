//! HTTP `Range` header parsing
//!
//! Turns a `bytes=<start>-<end>` header into one [`ByteRange`] against a known
//! resource length. Only the first range of a multi-range header is honored.

use thiserror::Error;

use crate::models::ByteRange;

/// Errors from range parsing. Every variant maps to HTTP 416.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("range not satisfiable: {0}")]
    NotSatisfiable(String),
}

fn unsatisfiable(msg: impl Into<String>) -> RangeError {
    RangeError::NotSatisfiable(msg.into())
}

/// Parse an optional `Range` header value for a resource of `length` bytes.
///
/// `Ok(None)` means no range was requested and the whole resource should be
/// served. An end offset past the resource is clamped to `length - 1`; the
/// suffix form `bytes=-N` selects the last `N` bytes.
pub fn parse_range(header: Option<&str>, length: u64) -> Result<Option<ByteRange>, RangeError> {
    match header {
        None => Ok(None),
        Some(value) => parse_range_value(value, length).map(Some),
    }
}

/// Parse a present `Range` header value.
pub fn parse_range_value(value: &str, length: u64) -> Result<ByteRange, RangeError> {
    let ranges = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| unsatisfiable(format!("unsupported range unit in {:?}", value)))?;

    let first = ranges.split(',').next().unwrap_or("").trim();
    let (start_str, end_str) = first
        .split_once('-')
        .ok_or_else(|| unsatisfiable(format!("malformed range {:?}", first)))?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if length == 0 {
        return Err(unsatisfiable("resource is empty"));
    }
    let last = length - 1;

    let range = match (start_str.is_empty(), end_str.is_empty()) {
        // bytes=-N
        (true, false) => {
            let suffix = parse_offset(end_str)?;
            if suffix == 0 {
                return Err(unsatisfiable("zero-length suffix range"));
            }
            ByteRange::new(length.saturating_sub(suffix), last)
        }
        // bytes=S-
        (false, true) => ByteRange::new(parse_offset(start_str)?, last),
        // bytes=S-E
        (false, false) => {
            let start = parse_offset(start_str)?;
            let end = parse_offset(end_str)?.min(last);
            ByteRange::new(start, end)
        }
        (true, true) => return Err(unsatisfiable("empty range")),
    };

    if range.start > last {
        return Err(unsatisfiable(format!(
            "start {} beyond length {}",
            range.start, length
        )));
    }
    if range.end < range.start {
        return Err(unsatisfiable(format!(
            "end {} before start {}",
            range.end, range.start
        )));
    }

    Ok(range)
}

fn parse_offset(s: &str) -> Result<u64, RangeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unsatisfiable(format!("invalid offset {:?}", s)));
    }
    s.parse::<u64>()
        .map_err(|_| unsatisfiable(format!("offset {:?} out of range", s)))
}
