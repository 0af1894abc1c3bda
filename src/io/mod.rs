//! Byte-range access to raster sources.
//!
//! Everything above this module sees a source only through [`RangeReader`].
//! Readers compose: a backend reader (local file, HTTP, S3) is wrapped in a
//! [`RetryingReader`] and then a [`CachedRangeReader`] sharing one
//! process-wide [`RangeCache`].

mod http_reader;
mod local_reader;
mod range_cache;
mod range_reader;
mod retry;
mod s3_reader;
mod singleflight;

pub use http_reader::HttpRangeReader;
pub use local_reader::LocalRangeReader;
pub use range_cache::{CachedRangeReader, RangeCache, RangeKey, DEFAULT_RANGE_CACHE_BYTES};
pub use range_reader::{coalesce_ranges, fetch_ranges, ByteRange, MemoryRangeReader, RangeReader};
pub use retry::{RetryPolicy, RetryingReader, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY};
pub use s3_reader::{create_s3_client, parse_s3_uri, S3RangeReader};
