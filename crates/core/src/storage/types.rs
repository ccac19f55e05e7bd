//! Value types passed across the storage boundary.

use std::ops::Range;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Stream of file bytes returned by `get_file_stream`.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Inclusive byte range, as in an HTTP `Range: bytes=start-end` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset. `None` means 0.
    pub start: Option<u64>,
    /// Last byte offset (inclusive). `None` means end of file.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range from `start` to the end of the file.
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Inclusive range `start..=end`.
    #[must_use]
    pub const fn inclusive(start: u64, end: u64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Value of an HTTP `Range` header for this range.
    #[must_use]
    pub fn header_value(&self) -> String {
        let start = self.start.unwrap_or(0);
        match self.end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        }
    }

    /// Whether `end` comes before `start`.
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start > end)
    }

    /// Half-open byte span of a `size`-byte file covered by this range.
    ///
    /// An `end` past the last byte is clamped to it. Returns `None` for an
    /// inverted range or one that starts at or after `size`.
    #[must_use]
    pub fn resolve(&self, size: u64) -> Option<Range<u64>> {
        if self.is_inverted() {
            return None;
        }
        let start = self.start.unwrap_or(0);
        let end = self.end.map_or(size, |end| end.saturating_add(1).min(size));
        (start < end).then_some(start..end)
    }

    /// Parse a single-range `Range` header (`bytes=a-b`, `bytes=a-`, `bytes=-n`).
    ///
    /// Suffix ranges (`bytes=-n`) need the file size to resolve.
    #[must_use]
    pub fn parse_header(value: &str, size: u64) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            let suffix: u64 = end.parse().ok()?;
            if suffix == 0 || size == 0 {
                return None;
            }
            return Some(Self::inclusive(size.saturating_sub(suffix), size - 1));
        }

        let start: u64 = start.parse().ok()?;
        if start >= size {
            return None;
        }
        let end = if end.is_empty() {
            size - 1
        } else {
            end.parse::<u64>().ok()?.min(size - 1)
        };
        (start <= end).then_some(Self::inclusive(start, end))
    }
}

/// One finished part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// ETag returned by `upload_part`.
    pub etag: String,
    /// 1-based part number.
    pub part_number: u32,
}

impl CompletedPart {
    /// Create a completed part.
    #[must_use]
    pub fn new(etag: impl Into<String>, part_number: u32) -> Self {
        Self {
            etag: etag.into(),
            part_number,
        }
    }
}
