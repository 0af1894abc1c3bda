use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TileError;
use crate::io::{
    create_s3_client, CachedRangeReader, HttpRangeReader, LocalRangeReader, RangeCache,
    RangeReader, RetryPolicy, RetryingReader, S3RangeReader,
};

use super::raster::{Credentials, RasterSource, SourceLocation};

/// Default timeout for one HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns a [`RasterSource`] into a reader over its bytes.
///
/// This is the seam between the pipeline and the storage backends: tests
/// plug in in-memory readers, deployments plug in filesystem or object-store
/// access.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn open(&self, source: &RasterSource) -> Result<Arc<dyn RangeReader>, TileError>;

    /// Drop anything cached for a reader identity.
    fn forget(&self, _identifier: &str) {}
}

/// S3 connection settings.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    pub endpoint: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

/// Resolves local paths, `http(s)://` and `s3://` URIs.
///
/// Every reader it hands out retries transient failures and reads through
/// the shared [`RangeCache`].
pub struct UriResolver {
    http: reqwest::Client,
    s3: S3Settings,
    /// One client per AWS profile; `None` is the default credential chain
    s3_clients: Mutex<HashMap<Option<String>, aws_sdk_s3::Client>>,
    retry: RetryPolicy,
    cache: Arc<RangeCache>,
}

impl UriResolver {
    pub fn new(
        cache: Arc<RangeCache>,
        retry: RetryPolicy,
        http_timeout: Duration,
        s3: S3Settings,
    ) -> Result<Self, TileError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| TileError::SourceUnavailable {
                reason: format!("failed to build HTTP client: {}", e),
                timed_out: false,
            })?;
        Ok(Self {
            http,
            s3,
            s3_clients: Mutex::new(HashMap::new()),
            retry,
            cache,
        })
    }

    pub fn range_cache(&self) -> &Arc<RangeCache> {
        &self.cache
    }

    fn wrap<R: RangeReader + 'static>(&self, reader: R) -> Arc<dyn RangeReader> {
        Arc::new(CachedRangeReader::new(
            RetryingReader::new(reader, self.retry),
            Arc::clone(&self.cache),
        ))
    }

    async fn s3_client(&self, profile: Option<&str>) -> aws_sdk_s3::Client {
        let key = profile.map(str::to_string);
        let mut clients = self.s3_clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return client.clone();
        }
        let client = create_s3_client(self.s3.endpoint.as_deref(), &self.s3.region, profile).await;
        clients.insert(key, client.clone());
        client
    }
}

#[async_trait]
impl SourceResolver for UriResolver {
    async fn open(&self, source: &RasterSource) -> Result<Arc<dyn RangeReader>, TileError> {
        let location = source.location()?;
        debug!(source = %source, ?location, "opening source");

        let reader = match location {
            SourceLocation::Local(path) => self.wrap(LocalRangeReader::open(path).await?),
            SourceLocation::Http(url) => {
                let token = match &source.credentials {
                    Some(Credentials::BearerToken(token)) => Some(token.clone()),
                    _ => None,
                };
                self.wrap(HttpRangeReader::new(self.http.clone(), url, source.size, token).await?)
            }
            SourceLocation::S3 { bucket, key } => {
                let profile = match &source.credentials {
                    Some(Credentials::AwsProfile(profile)) => Some(profile.as_str()),
                    _ => None,
                };
                let client = self.s3_client(profile).await;
                self.wrap(S3RangeReader::new(client, bucket, key, source.size).await?)
            }
        };
        Ok(reader)
    }

    fn forget(&self, identifier: &str) {
        self.cache.invalidate_source(identifier);
    }
}
