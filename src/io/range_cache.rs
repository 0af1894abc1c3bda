use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::range_reader::check_bounds;
use super::singleflight::SingleFlight;
use super::RangeReader;
use crate::error::IoError;

/// Default byte budget for the range cache: 64MB.
pub const DEFAULT_RANGE_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Default number of shards.
const DEFAULT_SHARDS: usize = 16;

/// Cache key: (source identity, offset, length).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeKey {
    pub source: Arc<str>,
    pub offset: u64,
    pub length: u64,
}

struct Entry {
    data: Bytes,
    /// Cache-wide access order, taken under the shard lock
    tick: u64,
}

struct Shard {
    entries: LruCache<RangeKey, Entry>,
}

impl Shard {
    fn oldest_tick(&self) -> Option<u64> {
        self.entries.peek_lru().map(|(_, entry)| entry.tick)
    }
}

/// Byte-bounded LRU cache of fetched ranges, shared by all sources.
///
/// Entries are sharded by source identity so lookups for one source never
/// contend with another; locks are held only for map operations, never across
/// a fetch. The byte budget is global: any source may use all of it, and
/// eviction removes the least recently used range across every shard.
///
/// Concurrent misses for the same key share one fetch.
pub struct RangeCache {
    shards: Vec<Mutex<Shard>>,
    capacity: usize,
    bytes: AtomicUsize,
    clock: AtomicU64,
    in_flight: SingleFlight<RangeKey>,
}

impl RangeCache {
    /// Create a cache with the given total byte budget.
    pub fn new(capacity_bytes: usize) -> Self {
        Self::with_shards(capacity_bytes, DEFAULT_SHARDS)
    }

    pub fn with_shards(capacity_bytes: usize, shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| {
                    Mutex::new(Shard {
                        entries: LruCache::unbounded(),
                    })
                })
                .collect(),
            capacity: capacity_bytes,
            bytes: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            in_flight: SingleFlight::new(),
        }
    }

    fn shard(&self, source: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &RangeKey) -> Option<Bytes> {
        let mut shard = self.shard(&key.source).lock();
        let tick = self.tick();
        shard.entries.get_mut(key).map(|entry| {
            entry.tick = tick;
            entry.data.clone()
        })
    }

    pub fn insert(&self, key: RangeKey, data: Bytes) {
        let len = data.len();
        if len > self.capacity {
            return;
        }
        {
            let mut shard = self.shard(&key.source).lock();
            let tick = self.tick();
            if let Some(old) = shard.entries.put(key, Entry { data, tick }) {
                self.bytes.fetch_sub(old.data.len(), Ordering::AcqRel);
            }
            self.bytes.fetch_add(len, Ordering::AcqRel);
        }
        self.evict_to_capacity();
    }

    /// Evict least recently used ranges until the budget holds.
    ///
    /// Each shard's LRU head is its oldest entry, so the global LRU entry is
    /// the head with the smallest tick. Only one shard lock is held at a time.
    fn evict_to_capacity(&self) {
        while self.bytes.load(Ordering::Acquire) > self.capacity {
            let oldest = self
                .shards
                .iter()
                .enumerate()
                .filter_map(|(index, shard)| shard.lock().oldest_tick().map(|tick| (tick, index)))
                .min();
            let Some((tick, index)) = oldest else {
                break;
            };
            let mut shard = self.shards[index].lock();
            // another task may have touched or evicted it meanwhile
            if shard.oldest_tick() != Some(tick) {
                continue;
            }
            if let Some((_, evicted)) = shard.entries.pop_lru() {
                self.bytes.fetch_sub(evicted.data.len(), Ordering::AcqRel);
            }
        }
    }

    /// Drop every cached range of one source.
    pub fn invalidate_source(&self, source: &str) {
        let mut shard = self.shard(source).lock();
        let stale: Vec<RangeKey> = shard
            .entries
            .iter()
            .filter(|(k, _)| &*k.source == source)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(old) = shard.entries.pop(&key) {
                self.bytes.fetch_sub(old.data.len(), Ordering::AcqRel);
            }
        }
    }

    /// Configured byte budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes currently cached.
    pub fn cached_bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Number of cached ranges.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a range through the cache.
    pub async fn get_or_fetch<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        source: &Arc<str>,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, IoError> {
        let key = RangeKey {
            source: Arc::clone(source),
            offset,
            length: len as u64,
        };

        self.in_flight
            .run(
                &key,
                || self.get(&key),
                || async {
                    debug!(source = %key.source, offset, len, "range cache miss");
                    let data = reader.read_exact_at(offset, len).await?;
                    self.insert(key.clone(), data.clone());
                    Ok(data)
                },
            )
            .await
    }
}

impl Default for RangeCache {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE_CACHE_BYTES)
    }
}

/// A reader whose reads go through a shared [`RangeCache`].
pub struct CachedRangeReader<R> {
    inner: R,
    cache: Arc<RangeCache>,
    source: Arc<str>,
}

impl<R: RangeReader> CachedRangeReader<R> {
    pub fn new(inner: R, cache: Arc<RangeCache>) -> Self {
        let source: Arc<str> = Arc::from(inner.identifier());
        Self {
            inner,
            cache,
            source,
        }
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for CachedRangeReader<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        self.cache
            .get_or_fetch(&self.inner, &self.source, offset, len)
            .await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        &self.source
    }
}
