//! Byte-range requests and range responses.
//!
//! Ranges are inclusive on both ends, like HTTP `Range` headers. A range
//! whose end runs past the object is clamped; a range that starts at or past
//! the end of the object, or whose start exceeds its end, is rejected.

use crate::error::{ContentError, ContentResult};
use std::fmt;

const REQUEST_UNIT: &str = "bytes=";
const RESPONSE_UNIT: &str = "bytes ";

/// An inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset, inclusive. `u64::MAX` means "to the end".
    pub end: u64,
}

impl ByteRange {
    /// Creates a range covering `start..=end`.
    ///
    /// The range is not validated here; stores reject inverted ranges
    /// when they [`resolve`](Self::resolve) them.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Creates a range from `start` to the end of the object.
    #[must_use]
    pub const fn from_start(start: u64) -> Self {
        Self {
            start,
            end: u64::MAX,
        }
    }

    /// Parses a request header value such as `bytes=0-99` or `bytes=100-`.
    ///
    /// Suffix ranges (`bytes=-100`) and multi-range requests are not
    /// supported.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::MalformedRange`] if the value cannot be parsed,
    /// or [`ContentError::RangeNotSatisfiable`] if start exceeds end.
    pub fn parse(header: &str) -> ContentResult<Self> {
        let body = header
            .trim()
            .strip_prefix(REQUEST_UNIT)
            .ok_or_else(|| ContentError::malformed_range(header))?;
        if body.contains(',') {
            return Err(ContentError::malformed_range(header));
        }
        let (start, end) = body
            .split_once('-')
            .ok_or_else(|| ContentError::malformed_range(header))?;
        let start: u64 = start
            .trim()
            .parse()
            .map_err(|_| ContentError::malformed_range(header))?;
        let range = match end.trim() {
            "" => Self::from_start(start),
            end => Self::new(
                start,
                end.parse()
                    .map_err(|_| ContentError::malformed_range(header))?,
            ),
        };
        range.validate()?;
        Ok(range)
    }

    /// Checks that the range is not inverted.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::RangeNotSatisfiable`] if `start > end`.
    pub fn validate(&self) -> ContentResult<()> {
        if self.start > self.end {
            return Err(ContentError::range_not_satisfiable(*self, None));
        }
        Ok(())
    }

    /// Returns true if the range runs to the end of the object.
    #[must_use]
    pub const fn is_open_ended(&self) -> bool {
        self.end == u64::MAX
    }

    /// Number of bytes covered, saturating at `u64::MAX`.
    #[must_use]
    pub const fn size(&self) -> u64 {
        if self.start > self.end {
            return 0;
        }
        (self.end - self.start).saturating_add(1)
    }

    /// Resolves the range against an object of `length` bytes.
    ///
    /// The end is clamped to the last byte of the object.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::RangeNotSatisfiable`] if the range is inverted
    /// or starts at or beyond `length`.
    pub fn resolve(&self, length: u64) -> ContentResult<Self> {
        self.validate()?;
        if self.start >= length {
            return Err(ContentError::range_not_satisfiable(*self, Some(length)));
        }
        Ok(Self::new(self.start, self.end.min(length - 1)))
    }

    /// Renders the range as a request header value.
    #[must_use]
    pub fn to_header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "{REQUEST_UNIT}{}-", self.start)
        } else {
            write!(f, "{REQUEST_UNIT}{}-{}", self.start, self.end)
        }
    }
}

/// A backend's answer to a range request, e.g. `bytes 0-99/1000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// The served range, or `None` for the unsatisfied form `bytes */1000`.
    pub range: Option<ByteRange>,
    /// Total object length, if the backend reported it.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Creates a response describing `range` within an object of `total` bytes.
    #[must_use]
    pub const fn new(range: ByteRange, total: Option<u64>) -> Self {
        Self {
            range: Some(range),
            total,
        }
    }

    /// Parses a response header value.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::MalformedRange`] if the value cannot be parsed.
    pub fn parse(header: &str) -> ContentResult<Self> {
        let malformed = || ContentError::malformed_range(header);
        let body = header
            .trim()
            .strip_prefix(RESPONSE_UNIT)
            .ok_or_else(malformed)?;
        let (range, total) = body.split_once('/').ok_or_else(malformed)?;

        let total = match total.trim() {
            "*" => None,
            total => Some(total.parse::<u64>().map_err(|_| malformed())?),
        };
        let range = match range.trim() {
            "*" => None,
            range => {
                let (start, end) = range.split_once('-').ok_or_else(malformed)?;
                let start = start.parse::<u64>().map_err(|_| malformed())?;
                let end = end.parse::<u64>().map_err(|_| malformed())?;
                if start > end || total.is_some_and(|t| end >= t) {
                    return Err(malformed());
                }
                Some(ByteRange::new(start, end))
            }
        };
        if range.is_none() && total.is_none() {
            return Err(malformed());
        }
        Ok(Self { range, total })
    }

    /// Number of bytes the response body carries, if a range was served.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.range.map(|r| r.size())
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(RESPONSE_UNIT)?;
        match self.range {
            Some(range) => write!(f, "{}-{}", range.start, range.end)?,
            None => f.write_str("*")?,
        }
        match self.total {
            Some(total) => write!(f, "/{total}"),
            None => f.write_str("/*"),
        }
    }
}

/// Computes how many bytes a backend response will deliver.
///
/// The served range wins when present; otherwise the total-length
/// indicator is used.
#[must_use]
pub fn declared_size(content_range: Option<&ContentRange>, content_length: Option<u64>) -> Option<u64> {
    content_range
        .and_then(ContentRange::size)
        .or(content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_closed_range() {
        let range = ByteRange::parse("bytes=0-4").unwrap();
        assert_eq!(range, ByteRange::new(0, 4));
        assert_eq!(range.size(), 5);
        assert_eq!(range.to_header(), "bytes=0-4");
    }

    #[test]
    fn parse_open_range() {
        let range = ByteRange::parse("bytes=6-").unwrap();
        assert!(range.is_open_ended());
        assert_eq!(range.to_header(), "bytes=6-");
    }

    #[test]
    fn parse_rejects_suffix_and_multi() {
        assert!(matches!(
            ByteRange::parse("bytes=-5"),
            Err(ContentError::MalformedRange { .. })
        ));
        assert!(matches!(
            ByteRange::parse("bytes=0-1,4-5"),
            Err(ContentError::MalformedRange { .. })
        ));
        assert!(matches!(
            ByteRange::parse("items=0-1"),
            Err(ContentError::MalformedRange { .. })
        ));
    }

    #[test]
    fn parse_rejects_inverted() {
        let err = ByteRange::parse("bytes=9-3").unwrap_err();
        assert!(err.is_range_not_satisfiable());
    }

    #[test]
    fn resolve_clamps_end() {
        let range = ByteRange::new(6, 100).resolve(11).unwrap();
        assert_eq!(range, ByteRange::new(6, 10));
        assert_eq!(ByteRange::from_start(0).resolve(11).unwrap().size(), 11);
    }

    #[test]
    fn resolve_rejects_start_at_length() {
        let err = ByteRange::new(11, 12).resolve(11).unwrap_err();
        assert!(matches!(
            err,
            ContentError::RangeNotSatisfiable {
                length: Some(11),
                ..
            }
        ));
    }

    #[test]
    fn resolve_rejects_empty_object() {
        assert!(ByteRange::new(0, 0).resolve(0).is_err());
    }

    #[test]
    fn content_range_with_total() {
        let parsed = ContentRange::parse("bytes 6-10/11").unwrap();
        assert_eq!(parsed.range, Some(ByteRange::new(6, 10)));
        assert_eq!(parsed.total, Some(11));
        assert_eq!(parsed.size(), Some(5));
        assert_eq!(parsed.to_string(), "bytes 6-10/11");
    }

    #[test]
    fn content_range_unknown_total() {
        let parsed = ContentRange::parse("bytes 0-4/*").unwrap();
        assert_eq!(parsed.total, None);
        assert_eq!(parsed.size(), Some(5));
    }

    #[test]
    fn content_range_unsatisfied_form() {
        let parsed = ContentRange::parse("bytes */11").unwrap();
        assert_eq!(parsed.range, None);
        assert_eq!(parsed.size(), None);
    }

    #[test]
    fn content_range_rejects_garbage() {
        assert!(ContentRange::parse("bytes */*").is_err());
        assert!(ContentRange::parse("bytes 5-2/11").is_err());
        assert!(ContentRange::parse("bytes 0-11/11").is_err());
        assert!(ContentRange::parse("0-4/11").is_err());
    }

    #[test]
    fn declared_size_prefers_range() {
        let range = ContentRange::parse("bytes 2-5/100").unwrap();
        assert_eq!(declared_size(Some(&range), Some(100)), Some(4));
        assert_eq!(declared_size(None, Some(100)), Some(100));
        assert_eq!(declared_size(None, None), None);
    }
}
