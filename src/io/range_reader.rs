use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::error::IoError;

/// Trait for reading byte ranges from a raster source.
///
/// This abstraction lets the format parser and the tile pipeline work with
/// local files, HTTP servers and object stores alike without downloading
/// whole files. Implementations must be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    /// A reader that receives fewer bytes than requested before the end of
    /// the resource must report [`IoError::Truncated`].
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and cache keys).
    ///
    /// For S3, this would typically be `s3://bucket/key`.
    fn identifier(&self) -> &str;

    /// Read several ranges, returning one buffer per range in input order.
    ///
    /// The default coalesces overlapping and adjacent ranges and reads the
    /// merged spans concurrently; readers with a native multi-range request
    /// can override it.
    async fn read_ranges(&self, ranges: &[ByteRange]) -> Result<Vec<Bytes>, IoError> {
        fetch_ranges(self, ranges, 0, ranges.len()).await
    }
}

#[async_trait]
impl<R: RangeReader + ?Sized> RangeReader for Box<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_exact_at(offset, len).await
    }

    async fn read_ranges(&self, ranges: &[ByteRange]) -> Result<Vec<Bytes>, IoError> {
        (**self).read_ranges(ranges).await
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }
}

#[async_trait]
impl<R: RangeReader + ?Sized> RangeReader for Arc<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_exact_at(offset, len).await
    }

    async fn read_ranges(&self, ranges: &[ByteRange]) -> Result<Vec<Bytes>, IoError> {
        (**self).read_ranges(ranges).await
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }
}

/// Check that `offset..offset+len` lies inside a resource of `size` bytes.
pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

// =============================================================================
// Range batching
// =============================================================================

/// A half-open byte range `offset..offset + length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Merge overlapping or adjacent ranges into sorted, disjoint spans.
///
/// Ranges separated by at most `max_gap` bytes are also merged; the gap
/// bytes are fetched and discarded. Empty ranges are dropped.
pub fn coalesce_ranges(ranges: &[ByteRange], max_gap: u64) -> Vec<ByteRange> {
    let mut sorted: Vec<ByteRange> = ranges.iter().copied().filter(|r| r.length > 0).collect();
    sorted.sort_by_key(|r| (r.offset, r.length));

    let mut merged: Vec<ByteRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.offset <= last.end().saturating_add(max_gap) => {
                let end = last.end().max(range.end());
                last.length = end - last.offset;
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Fetch several ranges with as few reads as possible.
///
/// Ranges are coalesced first, the merged spans are read with at most
/// `max_concurrent` reads in flight, and the results are sliced back out in
/// the order the ranges were given. Empty ranges yield empty buffers.
pub async fn fetch_ranges<R: RangeReader + ?Sized>(
    reader: &R,
    ranges: &[ByteRange],
    max_gap: u64,
    max_concurrent: usize,
) -> Result<Vec<Bytes>, IoError> {
    let spans = coalesce_ranges(ranges, max_gap);

    let fetched: Vec<Bytes> = stream::iter(spans.iter().copied())
        .map(|span| reader.read_exact_at(span.offset, span.length as usize))
        .buffered(max_concurrent.max(1))
        .try_collect()
        .await?;

    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        if range.length == 0 {
            out.push(Bytes::new());
            continue;
        }
        // spans are sorted and disjoint: find the one that contains this range
        let idx = spans.partition_point(|s| s.end() <= range.offset);
        let span = spans[idx];
        let start = (range.offset - span.offset) as usize;
        out.push(fetched[idx].slice(start..start + range.length as usize));
    }
    Ok(out)
}

// =============================================================================
// In-memory reader
// =============================================================================

/// A reader over bytes already held in memory.
#[derive(Clone)]
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
