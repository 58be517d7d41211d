//! Byte-range header parsing
//!
//! One strict parser serves both the read and the metadata endpoints:
//! `bytes=start-end`, the suffix form `bytes=-n` (last n bytes) and the
//! open-ended form `bytes=n-`. The inclusive end is clamped to the last
//! byte of the object.

use crate::error::{Error, Result};

#[derive(Debug, PartialEq, Eq)]
pub enum RangeSpec {
    /// No effective restriction; serve the whole body
    Full,
    /// An inclusive byte window
    Window { start: i64, end: i64 },
}

impl RangeSpec {
    pub fn length(&self, size: i64) -> i64 {
        match self {
            RangeSpec::Full => size,
            RangeSpec::Window { start, end } => end - start + 1,
        }
    }
}

fn parse_bound(raw: &str) -> Result<Option<i64>> {
    if raw.is_empty() {
        return Ok(None);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::RangeFormat);
    }
    raw.parse::<i64>().map(Some).map_err(|_| Error::RangeFormat)
}

/// Parse a `Range` header against an object of `size` bytes
pub fn parse_range(header: &str, size: i64) -> Result<RangeSpec> {
    let spec = header.strip_prefix("bytes=").ok_or(Error::RangeFormat)?;
    let (raw_start, raw_end) = spec.split_once('-').ok_or(Error::RangeFormat)?;

    let start = parse_bound(raw_start)?;
    let end = parse_bound(raw_end)?;

    let (start, end) = match (start, end) {
        (None, None) => return Ok(RangeSpec::Full),
        // Suffix form: the last n bytes.
        (None, Some(n)) => {
            if n == 0 {
                return Err(Error::RangeBounds);
            }
            ((size - n).max(0), size - 1)
        }
        // Open-ended form: from an offset to the last byte.
        (Some(start), None) => (start, size - 1),
        (Some(start), Some(end)) => (start, end.min(size - 1)),
    };

    if start > end {
        return Err(Error::RangeBounds);
    }
    Ok(RangeSpec::Window { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_form() {
        let spec = parse_range("bytes=1048575-1048577", 3_145_728).unwrap();
        assert_eq!(
            spec,
            RangeSpec::Window {
                start: 1_048_575,
                end: 1_048_577
            }
        );
        assert_eq!(spec.length(3_145_728), 3);
    }

    #[test]
    fn test_end_clamped_to_size() {
        let spec = parse_range("bytes=10-99999", 100).unwrap();
        assert_eq!(spec, RangeSpec::Window { start: 10, end: 99 });
    }

    #[test]
    fn test_suffix_form_is_last_n_bytes() {
        let spec = parse_range("bytes=-10", 100).unwrap();
        assert_eq!(spec, RangeSpec::Window { start: 90, end: 99 });

        // A suffix longer than the object starts at zero.
        let spec = parse_range("bytes=-500", 100).unwrap();
        assert_eq!(spec, RangeSpec::Window { start: 0, end: 99 });
    }

    #[test]
    fn test_open_ended_form() {
        let spec = parse_range("bytes=40-", 100).unwrap();
        assert_eq!(spec, RangeSpec::Window { start: 40, end: 99 });
    }

    #[test]
    fn test_bare_dash_serves_everything() {
        assert_eq!(parse_range("bytes=-", 100).unwrap(), RangeSpec::Full);
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["bytes", "bytes=", "bytes=a-b", "bytes=1-2-3", "octets=1-2", "bytes=1.5-2"] {
            assert!(matches!(parse_range(header, 100), Err(Error::RangeFormat)), "{}", header);
        }
    }

    #[test]
    fn test_inverted_and_unsatisfiable_bounds() {
        assert!(matches!(parse_range("bytes=50-10", 100), Err(Error::RangeBounds)));
        assert!(matches!(parse_range("bytes=-0", 100), Err(Error::RangeBounds)));
        // Start beyond the last byte cannot be satisfied.
        assert!(matches!(parse_range("bytes=100-", 100), Err(Error::RangeBounds)));
    }
}
