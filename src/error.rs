use thiserror::Error;

/// I/O errors that can occur when reading byte ranges from a raster source.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Non-success HTTP status that is neither 404 nor an auth failure
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The source returned fewer bytes than requested before reaching EOF
    #[error("Short read: requested {requested} bytes at offset {offset}, got {received}")]
    Truncated {
        offset: u64,
        requested: u64,
        received: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Credentials were rejected or missing
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

impl IoError {
    /// Whether retrying the same read could succeed.
    ///
    /// Missing objects, rejected credentials and out-of-range reads are
    /// permanent and must not be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            IoError::Connection(_) | IoError::Timeout(_) | IoError::Truncated { .. } => true,
            IoError::S3(_) => true,
            IoError::Http { status, .. } => *status == 429 || *status >= 500,
            IoError::NotFound(_) | IoError::AccessDenied(_) | IoError::RangeOutOfBounds { .. } => {
                false
            }
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// The IFD chain points back at an IFD that was already read
    #[error("IFD chain loops back to offset {0}")]
    IfdLoop(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// The tile directory does not match the declared image dimensions
    #[error("Level {level}: expected {expected} tiles, directory lists {actual}")]
    TileCountMismatch {
        level: usize,
        expected: u64,
        actual: u64,
    },

    /// A tile points outside the file
    #[error("Level {level}: tile {index} spans {offset}+{length}, file size is {file_size}")]
    TileOutOfFile {
        level: usize,
        index: usize,
        offset: u64,
        length: u64,
        file_size: u64,
    },

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Structurally valid TIFF using a layout this reader does not handle
    #[error("Unsupported layout: {0}")]
    Unsupported(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors surfaced by the tile pipeline.
///
/// Every failure of [`crate::TilePipeline::produce_tile`] is one of these
/// kinds. The serving layer maps them to HTTP responses with
/// [`TileError::http_status`].
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The source is not a TIFF/BigTIFF container, or uses a layout we cannot read
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Directory structures are inconsistent
    #[error("Corrupt metadata: {reason}")]
    CorruptMetadata { reason: String },

    /// Network failure, timeout, missing object or denied access
    #[error("Source unavailable: {reason}")]
    SourceUnavailable { reason: String, timed_out: bool },

    /// The source returned fewer bytes than its directory promised
    #[error("Source truncated: {reason}")]
    SourceTruncated { reason: String },

    /// The requested tile does not intersect the raster
    #[error("Tile {z}/{x}/{y} is outside the raster extent")]
    OutOfBounds { z: u8, x: u32, y: u32 },

    /// Internal tiles use a compression scheme without a decoder
    #[error("Unsupported codec: compression {compression}")]
    UnsupportedCodec { compression: u16 },

    /// Compressed tile data could not be decoded
    #[error("Decode error: {message}")]
    DecodeError { message: String },

    /// Band indexes, rescale ranges or colormap are invalid
    #[error("Invalid render options: {reason}")]
    InvalidRenderOptions { reason: String },

    /// The output format cannot express the requested mode
    #[error("Unsupported output mode: {reason}")]
    UnsupportedOutputMode { reason: String },

    /// Tile coordinates or sizes outside the grid definition
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl TileError {
    /// HTTP status code a serving layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            TileError::InvalidRequest { .. } | TileError::InvalidRenderOptions { .. } => 400,
            TileError::UnsupportedOutputMode { .. } => 400,
            TileError::OutOfBounds { .. } => 404,
            TileError::UnsupportedFormat { .. } | TileError::UnsupportedCodec { .. } => 415,
            TileError::CorruptMetadata { .. } | TileError::DecodeError { .. } => 422,
            TileError::SourceUnavailable { timed_out: true, .. } => 504,
            TileError::SourceUnavailable { .. } | TileError::SourceTruncated { .. } => 502,
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        TileError::DecodeError {
            message: message.into(),
        }
    }

    pub(crate) fn render_options(reason: impl Into<String>) -> Self {
        TileError::InvalidRenderOptions {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        TileError::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported_format(reason: impl Into<String>) -> Self {
        TileError::UnsupportedFormat {
            reason: reason.into(),
        }
    }
}

impl From<IoError> for TileError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Truncated { .. } | IoError::RangeOutOfBounds { .. } => {
                TileError::SourceTruncated {
                    reason: err.to_string(),
                }
            }
            IoError::Timeout(_) => TileError::SourceUnavailable {
                reason: err.to_string(),
                timed_out: true,
            },
            _ => TileError::SourceUnavailable {
                reason: err.to_string(),
                timed_out: false,
            },
        }
    }
}

impl From<TiffError> for TileError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::Io(io) => io.into(),
            TiffError::InvalidMagic(_)
            | TiffError::InvalidVersion(_)
            | TiffError::StripOrganization
            | TiffError::Unsupported(_) => TileError::UnsupportedFormat {
                reason: err.to_string(),
            },
            _ => TileError::CorruptMetadata {
                reason: err.to_string(),
            },
        }
    }
}
