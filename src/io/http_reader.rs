use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};

use super::range_reader::check_bounds;
use super::RangeReader;
use crate::error::IoError;

/// Range reader over HTTP(S) using `Range: bytes=a-b` requests.
///
/// The resource size is taken from the caller when known, otherwise from a
/// HEAD request at construction time.
#[derive(Clone)]
pub struct HttpRangeReader {
    client: Client,
    url: String,
    bearer_token: Option<String>,
    size: u64,
}

impl HttpRangeReader {
    /// Create a reader, issuing a HEAD request if `size` is not given.
    pub async fn new(
        client: Client,
        url: impl Into<String>,
        size: Option<u64>,
        bearer_token: Option<String>,
    ) -> Result<Self, IoError> {
        let mut reader = Self {
            client,
            url: url.into(),
            bearer_token,
            size: 0,
        };
        reader.size = match size {
            Some(size) => size,
            None => reader.head_size().await?,
        };
        Ok(reader)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn head_size(&self) -> Result<u64, IoError> {
        let resp = self
            .request(self.client.head(&self.url))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &self.url))?;
        check_status(resp.status(), &self.url)?;

        resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| IoError::Http {
                status: resp.status().as_u16(),
                message: format!("{}: no Content-Length in HEAD response", self.url),
            })
    }
}

fn map_reqwest_error(err: reqwest::Error, url: &str) -> IoError {
    if err.is_timeout() {
        IoError::Timeout(format!("{}: {}", url, err))
    } else {
        IoError::Connection(format!("{}: {}", url, err))
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<(), IoError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(IoError::NotFound(url.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(IoError::AccessDenied(url.to_string()))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Err(IoError::Timeout(format!("{}: HTTP {}", url, status.as_u16())))
        }
        s => Err(IoError::Http {
            status: s.as_u16(),
            message: url.to_string(),
        }),
    }
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        let resp = self
            .request(self.client.get(&self.url))
            .header(reqwest::header::RANGE, range)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &self.url))?;

        let status = resp.status();
        check_status(status, &self.url)?;

        let body = resp
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, &self.url))?;

        // A server that ignores Range answers 200 with the whole body.
        let data = if status == StatusCode::OK && body.len() as u64 == self.size {
            body.slice(offset as usize..offset as usize + len)
        } else {
            body
        };

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
        &self.url
    }
}
