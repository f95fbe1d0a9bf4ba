//! Byte-budget calculator.
//!
//! Pure functions relating image geometry, discard level and compression
//! rate to byte counts. They decide how many bytes to ask the network for
//! and which discard level a received prefix can support.

use crate::constants::{DEFAULT_RATE, MAX_DISCARD_LEVEL, MIN_HEADER_SIZE};

/// Bytes taken by the mandatory markers in front of the first tile data.
pub fn header_size() -> usize {
    MIN_HEADER_SIZE
}

/// Number of times the image can be halved while both sides stay at least 2.
pub fn max_discard_level(width: u32, height: u32) -> u8 {
    let (mut w, mut h) = (width, height);
    let mut level = 0;
    while level < MAX_DISCARD_LEVEL && w >= 2 && h >= 2 {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
        level += 1;
    }
    level
}

/// `ceil(dimension / 2^level)`, never below 1.
pub fn discarded_dimension(dimension: u32, level: u8) -> u32 {
    let divisor = 1u64 << level.min(31);
    (dimension as u64).div_ceil(divisor).max(1) as u32
}

fn effective_rate(rate: f32) -> f32 {
    if rate > 0.0 && rate.is_finite() {
        rate
    } else {
        DEFAULT_RATE
    }
}

/// Estimated bytes needed to decode at `discard_level`.
///
/// `rate` is compressed bytes per raw sample; zero or negative selects
/// [`DEFAULT_RATE`].
pub fn data_size(width: u32, height: u32, components: u8, discard_level: u8, rate: f32) -> usize {
    let samples = discarded_dimension(width, discard_level) as f64
        * discarded_dimension(height, discard_level) as f64
        * components as f64;
    let bytes = (samples * effective_rate(rate) as f64).ceil() as usize;
    bytes.max(header_size())
}

/// Finest discard level a prefix of `bytes` supports, or `None` if even the
/// coarsest level needs more.
pub fn discard_level_for_byte_count(
    width: u32,
    height: u32,
    components: u8,
    bytes: usize,
    rate: f32,
) -> Option<u8> {
    discard_level_within(width, height, components, bytes, rate, max_discard_level(width, height))
}

/// Like [`discard_level_for_byte_count`], searching only `0..=max_level`.
pub fn discard_level_within(
    width: u32,
    height: u32,
    components: u8,
    bytes: usize,
    rate: f32,
    max_level: u8,
) -> Option<u8> {
    (0..=max_level).find(|&level| data_size(width, height, components, level, rate) <= bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_covers_mandatory_markers() {
        assert_eq!(header_size(), 79);
    }

    #[test]
    fn test_max_discard_level() {
        assert_eq!(max_discard_level(256, 256), 5);
        assert_eq!(max_discard_level(8, 1024), 3);
        assert_eq!(max_discard_level(1, 1024), 0);
        assert_eq!(max_discard_level(3, 3), 2);
    }

    #[test]
    fn test_discarded_dimension_rounds_up() {
        assert_eq!(discarded_dimension(256, 0), 256);
        assert_eq!(discarded_dimension(257, 1), 129);
        assert_eq!(discarded_dimension(5, 3), 1);
        assert_eq!(discarded_dimension(0, 2), 1);
    }

    #[test]
    fn test_data_size() {
        assert_eq!(data_size(256, 256, 3, 0, DEFAULT_RATE), 24576);
        assert_eq!(data_size(256, 256, 3, 1, 0.0), 6144);
        assert_eq!(data_size(256, 256, 3, 0, 1.0), 196608);
        // Coarse levels bottom out at the header size.
        assert_eq!(data_size(256, 256, 3, 5, DEFAULT_RATE), 79);
    }

    #[test]
    fn test_discard_level_prefers_finer_level() {
        let full = data_size(256, 256, 3, 0, DEFAULT_RATE);
        assert_eq!(discard_level_for_byte_count(256, 256, 3, full, DEFAULT_RATE), Some(0));
        assert_eq!(discard_level_for_byte_count(256, 256, 3, full - 1, DEFAULT_RATE), Some(1));
        assert_eq!(discard_level_for_byte_count(256, 256, 3, 6144, DEFAULT_RATE), Some(1));
        assert_eq!(discard_level_for_byte_count(256, 256, 3, 100, DEFAULT_RATE), Some(4));
    }

    #[test]
    fn test_insufficient_data() {
        assert_eq!(discard_level_for_byte_count(256, 256, 3, 78, DEFAULT_RATE), None);
        assert_eq!(discard_level_within(256, 256, 3, 2000, DEFAULT_RATE, 1), None);
    }
}
