//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry or at an offset in the
//! file. Arrays (tile offsets, byte counts, GeoTIFF doubles) are fetched in a
//! single range request each.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Upper bound for a single out-of-line tag value. Tile offset arrays of
/// very large rasters stay far below this.
const MAX_TAG_VALUE_BYTES: u64 = 256 * 1024 * 1024;

fn tag_name(entry: &IfdEntry) -> &'static str {
    entry.tag().map(|t| t.name()).unwrap_or("unknown")
}

fn invalid(entry: &IfdEntry, message: impl Into<String>) -> TiffError {
    TiffError::InvalidTagValue {
        tag: tag_name(entry),
        message: message.into(),
    }
}

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values through a [`RangeReader`] respecting the file's layout.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw bytes of an entry's value, inline or fetched.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        if size > MAX_TAG_VALUE_BYTES {
            return Err(invalid(entry, format!("value of {} bytes is too large", size)));
        }
        let in_file = entry
            .offset
            .checked_add(size)
            .is_some_and(|end| end <= self.reader.size());
        if !in_file {
            return Err(invalid(
                entry,
                format!(
                    "value at {}+{} lies outside the file ({} bytes)",
                    entry.offset,
                    size,
                    self.reader.size()
                ),
            ));
        }

        Ok(self.reader.read_exact_at(entry.offset, size as usize).await?)
    }

    /// A single unsigned integer value.
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.byte_order()) {
            return Ok(value);
        }
        let values = self.read_u64_array(entry).await?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(invalid(entry, format!("expected count 1, got {}", entry.count))),
        }
    }

    /// An array of unsigned integers (Byte, Short, Long, Long8).
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        if entry.count == 0 {
            return Ok(Vec::new());
        }
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry).await?;
        decode_u64_values(&bytes, field_type, entry.count as usize, self.byte_order())
            .map_err(|msg| invalid(entry, msg))
    }

    /// An array of 16-bit unsigned values such as BitsPerSample or ColorMap.
    pub async fn read_u16_array(&self, entry: &IfdEntry) -> Result<Vec<u16>, TiffError> {
        self.read_u64_array(entry)
            .await?
            .into_iter()
            .map(|v| u16::try_from(v).map_err(|_| invalid(entry, format!("{} exceeds u16", v))))
            .collect()
    }

    /// An array of numbers of any numeric type, widened to f64.
    pub async fn read_f64_array(&self, entry: &IfdEntry) -> Result<Vec<f64>, TiffError> {
        if entry.count == 0 {
            return Ok(Vec::new());
        }
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry).await?;
        decode_f64_values(&bytes, field_type, entry.count as usize, self.byte_order())
            .map_err(|msg| invalid(entry, msg))
    }

    /// An ASCII value, cut at the first NUL.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        match entry.field_type {
            Some(FieldType::Ascii) | Some(FieldType::Byte) | Some(FieldType::Undefined) => {}
            _ => {
                return Err(invalid(
                    entry,
                    format!("expected ASCII, got type {}", entry.field_type_raw),
                ))
            }
        }
        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

// =============================================================================
// Decoding from bytes
// =============================================================================

fn check_len(bytes: &[u8], count: usize, size: usize) -> Result<(), String> {
    let needed = count.checked_mul(size).ok_or("value size overflows")?;
    if bytes.len() < needed {
        return Err(format!("need {} bytes, have {}", needed, bytes.len()));
    }
    Ok(())
}

/// Decode `count` unsigned integers of `field_type` from raw bytes.
pub fn decode_u64_values(
    bytes: &[u8],
    field_type: FieldType,
    count: usize,
    bo: ByteOrder,
) -> Result<Vec<u64>, String> {
    let size = field_type.size_in_bytes();
    check_len(bytes, count, size)?;
    let chunks = bytes.chunks_exact(size).take(count);
    let values = match field_type {
        FieldType::Byte | FieldType::Undefined => chunks.map(|c| c[0] as u64).collect(),
        FieldType::Short => chunks.map(|c| bo.read_u16(c) as u64).collect(),
        FieldType::Long | FieldType::Ifd => chunks.map(|c| bo.read_u32(c) as u64).collect(),
        FieldType::Long8 | FieldType::Ifd8 => chunks.map(|c| bo.read_u64(c)).collect(),
        other => return Err(format!("expected an unsigned integer type, got {:?}", other)),
    };
    Ok(values)
}

/// Decode `count` numbers of any numeric `field_type`, widened to f64.
pub fn decode_f64_values(
    bytes: &[u8],
    field_type: FieldType,
    count: usize,
    bo: ByteOrder,
) -> Result<Vec<f64>, String> {
    let size = field_type.size_in_bytes();
    check_len(bytes, count, size)?;
    let chunks = bytes.chunks_exact(size).take(count);
    let values = match field_type {
        FieldType::Byte | FieldType::Undefined => chunks.map(|c| c[0] as f64).collect(),
        FieldType::SByte => chunks.map(|c| c[0] as i8 as f64).collect(),
        FieldType::Short => chunks.map(|c| bo.read_u16(c) as f64).collect(),
        FieldType::SShort => chunks.map(|c| bo.read_i16(c) as f64).collect(),
        FieldType::Long | FieldType::Ifd => chunks.map(|c| bo.read_u32(c) as f64).collect(),
        FieldType::SLong => chunks.map(|c| bo.read_i32(c) as f64).collect(),
        FieldType::Long8 | FieldType::Ifd8 => chunks.map(|c| bo.read_u64(c) as f64).collect(),
        FieldType::SLong8 => chunks.map(|c| bo.read_i64(c) as f64).collect(),
        FieldType::Float => chunks.map(|c| bo.read_f32(c) as f64).collect(),
        FieldType::Double => chunks.map(|c| bo.read_f64(c)).collect(),
        FieldType::Rational => chunks
            .map(|c| bo.read_u32(&c[0..4]) as f64 / bo.read_u32(&c[4..8]) as f64)
            .collect(),
        FieldType::SRational => chunks
            .map(|c| bo.read_i32(&c[0..4]) as f64 / bo.read_i32(&c[4..8]) as f64)
            .collect(),
        FieldType::Ascii => return Err("expected a numeric type, got ASCII".to_string()),
    };
    Ok(values)
}
