//! TIFF tag and field type definitions.
//!
//! The vocabulary needed to read a Cloud-Optimized GeoTIFF: baseline TIFF
//! structure tags, tiling tags, the GeoTIFF georeferencing tags and the two
//! GDAL private tags (nodata and band metadata).

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// Each field type has a fixed element size, which decides whether a value
/// fits inline in the IFD entry and how arrays are sliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,

    /// 8-bit ASCII character, NUL terminated
    Ascii = 2,

    /// Unsigned 16-bit integer
    Short = 3,

    /// Unsigned 32-bit integer
    Long = 4,

    /// Two Longs: numerator and denominator
    Rational = 5,

    /// Signed 8-bit integer
    SByte = 6,

    /// Opaque byte data
    Undefined = 7,

    /// Signed 16-bit integer
    SShort = 8,

    /// Signed 32-bit integer
    SLong = 9,

    /// Two SLongs: numerator and denominator
    SRational = 10,

    /// IEEE single precision float
    Float = 11,

    /// IEEE double precision float
    Double = 12,

    /// 32-bit IFD offset
    Ifd = 13,

    /// Unsigned 64-bit integer (BigTIFF)
    Long8 = 16,

    /// Signed 64-bit integer (BigTIFF)
    SLong8 = 17,

    /// 64-bit IFD offset (BigTIFF)
    Ifd8 = 18,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Create a FieldType from its numeric value.
    ///
    /// Returns `None` for unknown type values.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            6 => Some(FieldType::SByte),
            7 => Some(FieldType::Undefined),
            8 => Some(FieldType::SShort),
            9 => Some(FieldType::SLong),
            10 => Some(FieldType::SRational),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            13 => Some(FieldType::Ifd),
            16 => Some(FieldType::Long8),
            17 => Some(FieldType::SLong8),
            18 => Some(FieldType::Ifd8),
            _ => None,
        }
    }

    /// Check if `count` values of this type fit in the entry's value field.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        (self.size_in_bytes() as u64)
            .checked_mul(count)
            .is_some_and(|total| total <= threshold)
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// TIFF tag IDs read by the COG parser.
///
/// Tags not listed here are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    // -------------------------------------------------------------------------
    // Baseline structure
    // -------------------------------------------------------------------------
    /// Subfile kind bits: 1 = reduced resolution, 4 = transparency mask
    NewSubfileType = 254,

    ImageWidth = 256,

    ImageLength = 257,

    /// Bits per sample, one value per band
    BitsPerSample = 258,

    Compression = 259,

    PhotometricInterpretation = 262,

    ImageDescription = 270,

    SamplesPerPixel = 277,

    /// 1 = chunky (pixel interleaved), 2 = separate planes
    PlanarConfiguration = 284,

    /// 1 = none, 2 = horizontal differencing, 3 = floating point
    Predictor = 317,

    /// Palette: 3 × 2^BitsPerSample u16 values, all reds then greens then blues
    ColorMap = 320,

    /// Meaning of samples beyond the photometric ones (2 = unassociated alpha)
    ExtraSamples = 338,

    /// 1 = unsigned int, 2 = signed int, 3 = IEEE float
    SampleFormat = 339,

    // -------------------------------------------------------------------------
    // Strip organization (rejected)
    // -------------------------------------------------------------------------
    StripOffsets = 273,

    RowsPerStrip = 278,

    StripByteCounts = 279,

    // -------------------------------------------------------------------------
    // Tile organization
    // -------------------------------------------------------------------------
    TileWidth = 322,

    TileLength = 323,

    TileOffsets = 324,

    TileByteCounts = 325,

    /// Shared quantization and Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,

    // -------------------------------------------------------------------------
    // GeoTIFF
    // -------------------------------------------------------------------------
    ModelPixelScale = 33550,

    ModelTiepoint = 33922,

    ModelTransformation = 34264,

    GeoKeyDirectory = 34735,

    GeoDoubleParams = 34736,

    GeoAsciiParams = 34737,

    // -------------------------------------------------------------------------
    // GDAL private tags
    // -------------------------------------------------------------------------
    /// XML band metadata (descriptions, scales, offsets)
    GdalMetadata = 42112,

    /// Nodata value as an ASCII number
    GdalNodata = 42113,
}

impl TiffTag {
    /// Create a TiffTag from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            254 => Some(TiffTag::NewSubfileType),
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            270 => Some(TiffTag::ImageDescription),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            278 => Some(TiffTag::RowsPerStrip),
            279 => Some(TiffTag::StripByteCounts),
            284 => Some(TiffTag::PlanarConfiguration),
            317 => Some(TiffTag::Predictor),
            320 => Some(TiffTag::ColorMap),
            322 => Some(TiffTag::TileWidth),
            323 => Some(TiffTag::TileLength),
            324 => Some(TiffTag::TileOffsets),
            325 => Some(TiffTag::TileByteCounts),
            338 => Some(TiffTag::ExtraSamples),
            339 => Some(TiffTag::SampleFormat),
            347 => Some(TiffTag::JpegTables),
            33550 => Some(TiffTag::ModelPixelScale),
            33922 => Some(TiffTag::ModelTiepoint),
            34264 => Some(TiffTag::ModelTransformation),
            34735 => Some(TiffTag::GeoKeyDirectory),
            34736 => Some(TiffTag::GeoDoubleParams),
            34737 => Some(TiffTag::GeoAsciiParams),
            42112 => Some(TiffTag::GdalMetadata),
            42113 => Some(TiffTag::GdalNodata),
            _ => None,
        }
    }

    /// Get the numeric tag ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::Predictor => "Predictor",
            TiffTag::ColorMap => "ColorMap",
            TiffTag::ExtraSamples => "ExtraSamples",
            TiffTag::SampleFormat => "SampleFormat",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::JpegTables => "JPEGTables",
            TiffTag::ModelPixelScale => "ModelPixelScale",
            TiffTag::ModelTiepoint => "ModelTiepoint",
            TiffTag::ModelTransformation => "ModelTransformation",
            TiffTag::GeoKeyDirectory => "GeoKeyDirectory",
            TiffTag::GeoDoubleParams => "GeoDoubleParams",
            TiffTag::GeoAsciiParams => "GeoAsciiParams",
            TiffTag::GdalMetadata => "GDAL_METADATA",
            TiffTag::GdalNodata => "GDAL_NODATA",
        }
    }
}

// =============================================================================
// Compression Values
// =============================================================================

/// TIFF compression scheme identifiers with a tile decoder.
///
/// Any other value is reported as an unsupported codec when a tile using it
/// is decoded; metadata parsing itself accepts every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    Jpeg = 7,
    Deflate = 8,
    PackBits = 32773,
    AdobeDeflate = 32946,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            32773 => Some(Compression::PackBits),
            32946 => Some(Compression::AdobeDeflate),
            _ => None,
        }
    }

    /// Name as GDAL reports it in the COMPRESSION image structure item.
    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Lzw => "LZW",
            Compression::Jpeg => "JPEG",
            Compression::Deflate | Compression::AdobeDeflate => "DEFLATE",
            Compression::PackBits => "PACKBITS",
        }
    }
}

/// Human-readable name of any compression code.
pub fn compression_name(code: u16) -> String {
    match Compression::from_u16(code) {
        Some(c) => c.name().to_string(),
        None => match code {
            6 => "OJPEG".to_string(),
            34712 => "JPEG2000".to_string(),
            34887 => "LERC".to_string(),
            50000 => "ZSTD".to_string(),
            50001 => "WEBP".to_string(),
            other => format!("UNKNOWN({})", other),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
