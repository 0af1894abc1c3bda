//! Raster sources and the metadata registry.
//!
//! ```text
//! RasterSource ──▶ SourceResolver ──▶ Arc<dyn RangeReader>
//!                                           │
//!                       MetadataRegistry ◀──┘ (parse once, LRU + TTL)
//! ```

mod raster;
mod registry;
mod resolver;

pub use raster::{Credentials, RasterSource, SourceLocation};
pub use registry::{MetadataRegistry, OpenedSource, DEFAULT_METADATA_CAPACITY, DEFAULT_METADATA_TTL};
pub use resolver::{S3Settings, SourceResolver, UriResolver, DEFAULT_HTTP_TIMEOUT};
