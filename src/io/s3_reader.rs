use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_reader::check_bounds;
use super::RangeReader;
use crate::error::IoError;

/// S3-backed implementation of RangeReader.
///
/// Reads byte ranges from objects in S3 or S3-compatible storage (MinIO etc.)
/// with ranged GetObject calls. The object size is taken from the caller
/// when known, otherwise fetched once on creation via HEAD.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// Create a new S3RangeReader for the given bucket and key.
    ///
    /// Returns an error if the object does not exist or is inaccessible.
    pub async fn new(
        client: Client,
        bucket: String,
        key: String,
        size: Option<u64>,
    ) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let size = match size {
            Some(size) => size,
            None => {
                let head = client
                    .head_object()
                    .bucket(&bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| {
                        let not_found = e
                            .as_service_error()
                            .map(|se| se.is_not_found())
                            .unwrap_or(false);
                        if not_found {
                            IoError::NotFound(identifier.clone())
                        } else {
                            map_sdk_error(e, &identifier)
                        }
                    })?;
                head.content_length().unwrap_or(0).max(0) as u64
            }
        };

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }
}

/// Classify an SDK error by HTTP status and error code.
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, identifier: &str) -> IoError
where
    E: ProvideErrorMetadata,
    SdkError<E, HttpResponse>: std::fmt::Display,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = match &err {
        SdkError::ServiceError(se) => se.err().code().map(str::to_string),
        _ => None,
    };

    match (&err, status, code.as_deref()) {
        (SdkError::TimeoutError(_), _, _) => IoError::Timeout(format!("{}: {}", identifier, err)),
        (SdkError::DispatchFailure(_), _, _) => {
            IoError::Connection(format!("{}: {}", identifier, err))
        }
        (_, Some(404), _) | (_, _, Some("NoSuchKey" | "NotFound" | "NoSuchBucket")) => {
            IoError::NotFound(identifier.to_string())
        }
        (_, Some(401 | 403), _) | (_, _, Some("AccessDenied" | "InvalidAccessKeyId")) => {
            IoError::AccessDenied(identifier.to_string())
        }
        _ => IoError::S3(format!("{}: {}", identifier, err)),
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // "bytes=start-end", inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.identifier))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(format!("{}: {}", self.identifier, e)))?
            .into_bytes();

        if data.len() < len {
            return Err(IoError::Truncated {
                offset,
                requested: len as u64,
                received: data.len() as u64,
            });
        }
        Ok(data.slice(..len))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint, region and profile.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1", None).await;
/// ```
pub async fn create_s3_client(
    endpoint_url: Option<&str>,
    region: &str,
    profile: Option<&str>,
) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }
    if let Some(profile) = profile {
        config_loader = config_loader.profile_name(profile);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}

/// Split `s3://bucket/key` into bucket and key.
pub fn parse_s3_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}
