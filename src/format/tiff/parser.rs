//! TIFF header and IFD structure parsing.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved (must be 0)
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```
//!
//! ## IFD
//! ```text
//! entry count (u16 | u64)
//! entries     (12 | 20 bytes each): tag u16, type u16, count (u32 | u64), value/offset (4 | 8)
//! next IFD    (u32 | u64), 0 terminates the chain
//! ```

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

const VERSION_TIFF: u16 = 42;

const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries in one IFD. Real files have a few dozen.
const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

macro_rules! byte_order_reader {
    ($name:ident, $ty:ty, $n:expr) => {
        /// Read a value from the start of `bytes` using this byte order.
        ///
        /// Panics if `bytes` is shorter than the value; callers slice
        /// with checked lengths.
        #[inline]
        pub fn $name(self, bytes: &[u8]) -> $ty {
            let mut buf = [0u8; $n];
            buf.copy_from_slice(&bytes[..$n]);
            match self {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(buf),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(buf),
            }
        }
    };
}

impl ByteOrder {
    byte_order_reader!(read_u16, u16, 2);
    byte_order_reader!(read_i16, i16, 2);
    byte_order_reader!(read_u32, u32, 4);
    byte_order_reader!(read_i32, i32, 4);
    byte_order_reader!(read_u64, u64, 8);
    byte_order_reader!(read_i64, i64, 8);
    byte_order_reader!(read_f32, f32, 4);
    byte_order_reader!(read_f64, f64, 8);
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Size of an IFD entry: 12 bytes (TIFF) or 20 bytes (BigTIFF).
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next IFD offset field at the end of an IFD.
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an IFD entry.
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Decode the entry count at the start of an IFD.
    pub fn read_entry_count(&self, bytes: &[u8]) -> Result<u64, TiffError> {
        if bytes.len() < self.ifd_count_size() {
            return Err(TiffError::FileTooSmall {
                required: self.ifd_count_size() as u64,
                actual: bytes.len() as u64,
            });
        }
        let count = if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        };
        if count == 0 || count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("implausible entry count {}", count),
            });
        }
        Ok(count)
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One 12- or 20-byte directory entry.
///
/// Values no larger than the value/offset field are stored inline; the raw
/// field is kept so inline values can be decoded later without another read.
#[derive(Debug, Clone, PartialEq)]
pub struct IfdEntry {
    pub tag_id: u16,

    /// `None` for type codes this parser does not know
    pub field_type: Option<FieldType>,

    pub field_type_raw: u16,

    /// Number of values (not bytes)
    pub count: u64,

    /// Raw value/offset field, zero padded to 8 bytes
    pub value_offset_bytes: [u8; 8],

    /// Whether the value lives in `value_offset_bytes`
    pub is_inline: bool,

    /// Value/offset field decoded as a file offset
    pub offset: u64,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let bo = header.byte_order;
        let tag_id = bo.read_u16(&bytes[0..2]);
        let field_type_raw = bo.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_field) = if header.is_bigtiff {
            (bo.read_u64(&bytes[4..12]), &bytes[12..20])
        } else {
            (bo.read_u32(&bytes[4..8]) as u64, &bytes[8..12])
        };

        let mut value_offset_bytes = [0u8; 8];
        value_offset_bytes[..value_field.len()].copy_from_slice(value_field);

        let offset = if header.is_bigtiff {
            bo.read_u64(value_field)
        } else {
            bo.read_u32(value_field) as u64
        };

        let is_inline = field_type.is_some_and(|ft| ft.fits_inline(count, header.is_bigtiff));

        IfdEntry {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
            offset,
        }
    }

    /// The tag, if it is one the parser knows.
    pub fn tag(&self) -> Option<TiffTag> {
        TiffTag::from_u16(self.tag_id)
    }

    /// Total size of the value in bytes, `None` for unknown types or overflow.
    pub fn value_byte_size(&self) -> Option<u64> {
        let size = self.field_type?.size_in_bytes() as u64;
        size.checked_mul(self.count)
    }

    /// Decode a single inline Short/Long/Long8 value.
    ///
    /// Returns `None` when the value is not inline, not scalar or not an
    /// unsigned integer type.
    pub fn inline_u64(&self, bo: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        let raw = &self.value_offset_bytes;
        match self.field_type? {
            FieldType::Byte => Some(raw[0] as u64),
            FieldType::Short => Some(bo.read_u16(raw) as u64),
            FieldType::Long | FieldType::Ifd => Some(bo.read_u32(raw) as u64),
            FieldType::Long8 | FieldType::Ifd8 => Some(bo.read_u64(raw)),
            _ => None,
        }
    }

    /// Decode a single inline value that fits in 32 bits.
    pub fn inline_u32(&self, bo: ByteOrder) -> Option<u32> {
        self.inline_u64(bo).and_then(|v| u32::try_from(v).ok())
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    /// File offset this IFD was read from
    pub offset: u64,

    /// Entries in file order
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Bytes occupied by an IFD with `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.ifd_next_offset_size()
    }

    /// Parse an IFD from bytes that start at its entry count.
    pub fn parse(bytes: &[u8], offset: u64, header: &TiffHeader) -> Result<Self, TiffError> {
        let count = header.read_entry_count(bytes)?;
        let size = Self::calculate_size(count, header);
        if bytes.len() < size {
            return Err(TiffError::FileTooSmall {
                required: size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let start = header.ifd_count_size();
        let entries = (0..count as usize)
            .map(|i| {
                let at = start + i * entry_size;
                IfdEntry::parse(&bytes[at..at + entry_size], header)
            })
            .collect();

        let next_at = start + count as usize * entry_size;
        let next_ifd_offset = if header.is_bigtiff {
            header.byte_order.read_u64(&bytes[next_at..])
        } else {
            header.byte_order.read_u32(&bytes[next_at..]) as u64
        };

        Ok(Ifd {
            offset,
            entries,
            next_ifd_offset,
        })
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        let id = tag.as_u16();
        self.entries.iter().find(|e| e.tag_id == id)
    }

    pub fn has_tag(&self, tag: TiffTag) -> bool {
        self.get_entry_by_tag(tag).is_some()
    }

    /// Inline scalar value of a tag.
    pub fn inline_u32(&self, tag: TiffTag, bo: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(bo)
    }

    /// Read a required inline scalar, failing with `MissingTag`.
    pub fn require_u32(&self, tag: TiffTag, bo: ByteOrder) -> Result<u32, TiffError> {
        let entry = self
            .get_entry_by_tag(tag)
            .ok_or(TiffError::MissingTag(tag.name()))?;
        entry.inline_u32(bo).ok_or_else(|| TiffError::InvalidTagValue {
            tag: tag.name(),
            message: format!(
                "expected one inline integer, got type {} count {}",
                entry.field_type_raw, entry.count
            ),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
