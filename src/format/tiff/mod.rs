//! TIFF and BigTIFF structure parsing.
//!
//! - **Byte order**: declared in the header (`II` little-endian, `MM`
//!   big-endian); every multi-byte value honours it.
//! - **Classic TIFF vs BigTIFF**: 32-bit or 64-bit offsets, handled
//!   transparently.
//! - **IFDs**: one per image; a COG chains the full-resolution image, its
//!   overviews and optional masks.
//! - **Inline vs offset values**: values that fit in the entry's value
//!   field are stored there, larger ones are fetched on demand.

mod overview;
mod parser;
mod tags;
mod values;

pub use overview::{read_ifd_chain, IfdRole, OverviewLevel, MAX_IFDS};
pub(crate) use overview::order_levels;
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{compression_name, Compression, FieldType, TiffTag};
pub use values::{decode_f64_values, decode_u64_values, ValueReader};
