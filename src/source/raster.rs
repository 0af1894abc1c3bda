use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::TileError;
use crate::io::parse_s3_uri;

/// Credentials attached to a source.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Credentials {
    /// Sent as `Authorization: Bearer ...` on HTTP(S) sources
    BearerToken(String),
    /// Named profile from the AWS shared config, for `s3://` sources
    AwsProfile(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::BearerToken(_) => f.write_str("BearerToken(***)"),
            Credentials::AwsProfile(profile) => f.debug_tuple("AwsProfile").field(profile).finish(),
        }
    }
}

/// Identifies one raster asset.
///
/// Two sources with the same URI share cached metadata; the size and
/// credentials only affect how the bytes are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RasterSource {
    pub uri: String,

    /// Object size in bytes, when known up front
    pub size: Option<u64>,

    pub credentials: Option<Credentials>,
}

/// Where the bytes of a source live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Http(String),
    S3 { bucket: String, key: String },
}

impl RasterSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            size: None,
            credentials: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Cache key for this source's metadata.
    pub fn key(&self) -> &str {
        &self.uri
    }

    /// Classify the URI.
    ///
    /// Anything that does not parse as an absolute URL (or carries a
    /// one-letter scheme, i.e. a Windows drive) is a local path.
    pub fn location(&self) -> Result<SourceLocation, TileError> {
        let url = match Url::parse(&self.uri) {
            Ok(url) if url.scheme().len() > 1 => url,
            _ => return Ok(SourceLocation::Local(PathBuf::from(&self.uri))),
        };

        match url.scheme() {
            "http" | "https" => Ok(SourceLocation::Http(self.uri.clone())),
            "s3" => parse_s3_uri(&self.uri)
                .map(|(bucket, key)| SourceLocation::S3 { bucket, key })
                .ok_or_else(|| {
                    TileError::invalid_request(format!("malformed S3 URI: {}", self.uri))
                }),
            "file" => url.to_file_path().map(SourceLocation::Local).map_err(|_| {
                TileError::invalid_request(format!("malformed file URI: {}", self.uri))
            }),
            scheme => Err(TileError::invalid_request(format!(
                "unsupported source scheme '{}'",
                scheme
            ))),
        }
    }

    /// File name without extension, used to label the dataset.
    pub fn name(&self) -> String {
        let path = match Url::parse(&self.uri) {
            Ok(url) if url.scheme().len() > 1 => url.path().to_string(),
            _ => self.uri.clone(),
        };
        Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.uri.clone())
    }
}

impl From<&str> for RasterSource {
    fn from(uri: &str) -> Self {
        RasterSource::new(uri)
    }
}

impl fmt::Display for RasterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}
