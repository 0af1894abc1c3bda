//! Container detection from the first bytes of a source.
//!
//! Only TIFF and BigTIFF containers are read. Other well-known raster and
//! archive signatures are named in the error so callers can tell a wrong
//! file from a damaged one.

use crate::error::TiffError;

/// Container flavour of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Classic TIFF, 32-bit offsets
    Tiff,
    /// BigTIFF, 64-bit offsets
    BigTiff,
}

impl ContainerFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            ContainerFormat::Tiff => "TIFF",
            ContainerFormat::BigTiff => "BigTIFF",
        }
    }
}

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "PNG"),
    (b"\xFF\xD8\xFF", "JPEG"),
    (b"\x00\x00\x00\x0CjP  ", "JPEG 2000"),
    (b"\x89HDF\r\n\x1a\n", "HDF5/netCDF-4"),
    (b"CDF\x01", "netCDF"),
    (b"CDF\x02", "netCDF"),
    (b"PK\x03\x04", "ZIP archive"),
    (b"\x1F\x8B", "gzip stream"),
    (b"RIFF", "RIFF (WebP)"),
    (b"GIF8", "GIF"),
];

/// Identify the container from its leading bytes.
///
/// Returns [`TiffError::Unsupported`] for anything that is not TIFF or
/// BigTIFF, which surfaces as `UnsupportedFormat`.
pub fn detect_container(prefix: &[u8]) -> Result<ContainerFormat, TiffError> {
    match prefix {
        [b'I', b'I', 42, 0, ..] | [b'M', b'M', 0, 42, ..] => Ok(ContainerFormat::Tiff),
        [b'I', b'I', 43, 0, ..] | [b'M', b'M', 0, 43, ..] => Ok(ContainerFormat::BigTiff),
        _ => {
            let known = SIGNATURES
                .iter()
                .find(|(magic, _)| prefix.starts_with(magic))
                .map(|(_, name)| *name);
            Err(TiffError::Unsupported(match known {
                Some(name) => format!("{} file is not a TIFF container", name),
                None if prefix.len() < 4 => {
                    format!("{} bytes are too few for a TIFF header", prefix.len())
                }
                None => "unrecognized file signature".to_string(),
            }))
        }
    }
}
