//! JPEG stream handling for TIFF JPEG compression (code 7).
//!
//! TIFF writers usually store quantization and Huffman tables once, in the
//! `JPEGTables` tag, and write each tile as an abbreviated stream without
//! them. Such a tile must be merged with the tables before a standard JPEG
//! decoder can read it:
//!
//! ```text
//! tables: SOI DQT.. DHT.. EOI
//! tile:   SOI SOF SOS <scan> EOI
//! merged: SOI DQT.. DHT.. SOF SOS <scan> EOI
//! ```

use bytes::{Bytes, BytesMut};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// Whether the stream defines its own quantization tables.
///
/// Walks marker segments from SOI up to the first SOS; entropy-coded data
/// after SOS is never scanned, so table-like byte pairs inside it are not
/// mistaken for markers.
pub fn has_tables(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 3 < data.len() {
        if data[pos] != 0xFF {
            return false;
        }
        let marker = data[pos + 1];
        match marker {
            DQT | DHT => return true,
            SOS => return false,
            // fill bytes
            0xFF => {
                pos += 1;
                continue;
            }
            // standalone markers without a length field
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + length;
    }
    false
}

/// Splice `tables` in front of an abbreviated `tile` stream.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    if tile.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = BytesMut::with_capacity(tables_end + tile.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile[tile_start..]);
    merged.freeze()
}

/// Produce a self-contained JPEG stream for one tile.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: &[u8]) -> Bytes {
    match tables {
        Some(tables) if !has_tables(tile) => merge_jpeg_tables(tables, tile),
        _ => Bytes::copy_from_slice(tile),
    }
}
