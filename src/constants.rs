pub const MARKER_START_BYTE: u8 = 0xFF;

// The size in bytes of the segment length field.
pub const SEGMENT_LENGTH_SIZE: usize = 2;

// The maximum size of the data bytes that fit in a segment.
pub const SEGMENT_MAX_DATA_SIZE: usize = u16::MAX as usize - SEGMENT_LENGTH_SIZE;

/// Coarsest discard level any image is reduced to.
pub const MAX_DISCARD_LEVEL: u8 = 5;

/// Compressed bytes per raw sample assumed when no rate is given (one bit per sample).
pub const DEFAULT_RATE: f32 = 1.0 / 8.0;

/// Literal prefix marking comments written by this library.
pub const VIEWER_COMMENT_PREFIX: &str = "LL_";

// Sanity limits applied when validating a SIZ segment.
pub const MAX_IMAGE_DIMENSION: u32 = 16384;
pub const MIN_COMPONENT_COUNT: u16 = 1;
pub const MAX_COMPONENT_COUNT: u16 = 4;
pub const MAX_BITS_PER_SAMPLE: u8 = 16;

// Segment sizes (marker code excluded) from ISO/IEC 15444-1, annex A.
pub const SIZ_FIXED_LENGTH: u16 = 38;
pub const SIZ_COMPONENT_LENGTH: u16 = 3;
pub const COD_MIN_LENGTH: u16 = 12;
pub const QCD_MIN_LENGTH: u16 = 4;
pub const SOT_LENGTH: u16 = 10;
pub const COM_HEADER_LENGTH: u16 = 4;

/// Rcom value for a Latin-1 text comment.
pub const COMMENT_REGISTRATION_LATIN: u16 = 1;

/// SOC + SIZ (one component) + COD + QCD + SOT + SOD, markers included.
pub const MIN_HEADER_SIZE: usize = 2
    + (2 + SIZ_FIXED_LENGTH as usize + SIZ_COMPONENT_LENGTH as usize)
    + (2 + COD_MIN_LENGTH as usize)
    + (2 + QCD_MIN_LENGTH as usize)
    + (2 + SOT_LENGTH as usize)
    + 2;

// Guard bits written to QCD.
pub const GUARD_BITS: u8 = 2;

// Largest quantization shift the lossy rate control tries.
pub const MAX_QUANTIZATION_SHIFT: u8 = 8;

// The header segments stop being scanned after this many markers.
pub const MAX_HEADER_SEGMENTS: usize = 256;
