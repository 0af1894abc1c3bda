//! Metadata registry.
//!
//! Parsed [`RasterMetadata`] is the only state the pipeline keeps between
//! requests. The registry holds it in a moka cache keyed by source URI, with
//! LRU eviction and an optional time-to-live, and guarantees at most one
//! parse in flight per source: concurrent first requests wait for the leader
//! instead of issuing their own header reads.
//!
//! Every parse starts by dropping the byte ranges cached for the source, so
//! metadata reloaded after expiry or eviction reflects the current object.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tracing::debug;

use crate::error::TileError;
use crate::format::RasterMetadata;
use crate::io::RangeReader;

use super::raster::RasterSource;
use super::resolver::SourceResolver;

/// Default number of sources whose metadata is kept.
pub const DEFAULT_METADATA_CAPACITY: usize = 128;

/// Default metadata lifetime.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(300);

/// A source that has been opened and parsed.
pub struct OpenedSource {
    pub reader: Arc<dyn RangeReader>,
    pub metadata: Arc<RasterMetadata>,
}

pub struct MetadataRegistry {
    resolver: Arc<dyn SourceResolver>,
    entries: Cache<String, Arc<OpenedSource>>,
}

impl MetadataRegistry {
    pub fn new(resolver: Arc<dyn SourceResolver>) -> Self {
        Self::with_capacity(resolver, DEFAULT_METADATA_CAPACITY, Some(DEFAULT_METADATA_TTL))
    }

    /// `ttl = None` keeps entries until evicted or invalidated.
    pub fn with_capacity(
        resolver: Arc<dyn SourceResolver>,
        capacity: usize,
        ttl: Option<Duration>,
    ) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(capacity.max(1) as u64)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            resolver,
            entries: builder.build(),
        }
    }

    /// Return the opened source, parsing its metadata on first use.
    pub async fn get(&self, source: &RasterSource) -> Result<Arc<OpenedSource>, TileError> {
        self.entries
            .try_get_with(source.key().to_string(), self.load(source))
            .await
            .map_err(|err| (*err).clone())
    }

    async fn load(&self, source: &RasterSource) -> Result<Arc<OpenedSource>, TileError> {
        debug!(source = %source, "metadata cache miss");
        let reader = self.resolver.open(source).await?;
        self.resolver.forget(reader.identifier());
        let metadata = RasterMetadata::parse(reader.as_ref()).await?;
        Ok(Arc::new(OpenedSource {
            reader,
            metadata: Arc::new(metadata),
        }))
    }

    /// Drop the cached metadata of a source and the byte ranges read from it.
    ///
    /// Returns whether anything was cached.
    pub async fn invalidate(&self, source: &RasterSource) -> bool {
        match self.entries.remove(source.key()).await {
            Some(opened) => {
                self.resolver.forget(opened.reader.identifier());
                true
            }
            None => false,
        }
    }

    /// Number of cached sources, after pending evictions are applied.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}
