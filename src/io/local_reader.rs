use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::range_reader::check_bounds;
use super::RangeReader;
use crate::error::IoError;

/// Range reader over a file on the local filesystem.
///
/// The file is reopened for every read, so a reader can be shared freely
/// between tasks without a file-handle lock.
#[derive(Debug, Clone)]
pub struct LocalRangeReader {
    path: PathBuf,
    size: u64,
    identifier: String,
}

impl LocalRangeReader {
    /// Open a file and record its size.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = format!("file://{}", path.display());
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io_error(e, &identifier))?;
        if !meta.is_file() {
            return Err(IoError::NotFound(identifier));
        }
        Ok(Self {
            path,
            size: meta.len(),
            identifier,
        })
    }
}

fn map_io_error(err: std::io::Error, identifier: &str) -> IoError {
    match err.kind() {
        ErrorKind::NotFound => IoError::NotFound(identifier.to_string()),
        ErrorKind::PermissionDenied => IoError::AccessDenied(identifier.to_string()),
        ErrorKind::TimedOut => IoError::Timeout(format!("{}: {}", identifier, err)),
        _ => IoError::Connection(format!("{}: {}", identifier, err)),
    }
}

#[async_trait]
impl RangeReader for LocalRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| map_io_error(e, &self.identifier))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| map_io_error(e, &self.identifier))?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| map_io_error(e, &self.identifier))?;
            if n == 0 {
                return Err(IoError::Truncated {
                    offset,
                    requested: len as u64,
                    received: filled as u64,
                });
            }
            filled += n;
        }
        Ok(buf.freeze())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
