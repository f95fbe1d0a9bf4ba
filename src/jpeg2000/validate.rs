//! Header-only format check, cheap enough to run before any decode.
//!
//! The scan stops at the first SOT marker and never allocates.

use crate::constants::{
    MAX_BITS_PER_SAMPLE, MAX_COMPONENT_COUNT, MAX_HEADER_SEGMENTS, MAX_IMAGE_DIMENSION,
    MIN_COMPONENT_COUNT, MIN_HEADER_SIZE, SIZ_COMPONENT_LENGTH, SIZ_FIXED_LENGTH,
};
use crate::error::J2cError;
use crate::marker_code::J2kMarkerCode;
use crate::stream_reader::CodestreamReader;
use tracing::debug;

/// Returns true when the first `claimed_size` bytes of `data` start a plausible codestream.
pub fn validate_codestream(data: &[u8], claimed_size: usize) -> bool {
    let limit = claimed_size.min(data.len());
    if limit < MIN_HEADER_SIZE {
        debug!(limit, "codestream shorter than the minimal header");
        return false;
    }
    match scan_header(&data[..limit]) {
        Ok(()) => true,
        Err(err) => {
            debug!(%err, "codestream failed validation");
            false
        }
    }
}

fn scan_header(data: &[u8]) -> Result<(), J2cError> {
    let mut reader = CodestreamReader::new(data);
    if reader.read_marker()? != J2kMarkerCode::StartOfCodestream {
        return Err(J2cError::MalformedStream("expected SOC marker"));
    }
    if reader.read_marker()? != J2kMarkerCode::ImageAndTileSize {
        return Err(J2cError::MalformedStream("expected SIZ marker after SOC"));
    }
    check_siz(&mut reader)?;

    let mut seen_cod = false;
    let mut seen_qcd = false;
    for _ in 0..MAX_HEADER_SEGMENTS {
        match reader.read_marker()? {
            J2kMarkerCode::StartOfTile => {
                return if seen_cod && seen_qcd {
                    Ok(())
                } else {
                    Err(J2cError::MalformedStream("main header lacks COD or QCD"))
                };
            }
            J2kMarkerCode::CodingStyleDefault => seen_cod = true,
            J2kMarkerCode::QuantizationDefault => seen_qcd = true,
            J2kMarkerCode::ImageAndTileSize => {
                return Err(J2cError::MalformedStream("duplicate SIZ marker"));
            }
            marker if !marker.has_segment() => {
                return Err(J2cError::MalformedStream("unexpected delimiting marker"));
            }
            _ => {}
        }
        reader.skip_segment()?;
    }
    Err(J2cError::MalformedStream("too many main header segments"))
}

fn check_siz(reader: &mut CodestreamReader) -> Result<(), J2cError> {
    let length = reader.read_u16()?;
    reader.advance(2)?; // Rsiz
    let grid_width = reader.read_u32()?;
    let grid_height = reader.read_u32()?;
    let x_origin = reader.read_u32()?;
    let y_origin = reader.read_u32()?;
    reader.advance(16)?; // tile geometry

    let width = grid_width.saturating_sub(x_origin);
    let height = grid_height.saturating_sub(y_origin);
    if !(1..=MAX_IMAGE_DIMENSION).contains(&width) || !(1..=MAX_IMAGE_DIMENSION).contains(&height)
    {
        return Err(J2cError::MalformedStream("image dimensions out of range"));
    }

    let components = reader.read_u16()?;
    if !(MIN_COMPONENT_COUNT..=MAX_COMPONENT_COUNT).contains(&components) {
        return Err(J2cError::MalformedStream("component count out of range"));
    }
    if length != SIZ_FIXED_LENGTH + SIZ_COMPONENT_LENGTH * components {
        return Err(J2cError::MalformedStream("SIZ length does not match component count"));
    }
    for _ in 0..components {
        let depth = (reader.read_u8()? & 0x7F) + 1;
        let dx = reader.read_u8()?;
        let dy = reader.read_u8()?;
        if depth > MAX_BITS_PER_SAMPLE {
            return Err(J2cError::MalformedStream("bit depth out of range"));
        }
        if dx == 0 || dy == 0 {
            return Err(J2cError::MalformedStream("zero subsampling factor"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::image::{J2kCod, J2kQcd};
    use crate::jpeg2000::writer::J2kWriter;

    fn header(width: u32, components: u16, with_qcd: bool) -> Vec<u8> {
        let mut writer = J2kWriter::new();
        writer.write_soc();
        writer.write_siz(width, 32, components, 8).unwrap();
        writer.write_cod(&J2kCod::default()).unwrap();
        if with_qcd {
            writer
                .write_qcd(&J2kQcd {
                    quant_style: 0x40,
                    step_sizes: vec![0x4000],
                })
                .unwrap();
        }
        writer.write_com("LL_validated").unwrap();
        let sot = writer.write_sot(0, 0, 1);
        writer.write_sod();
        writer.patch_psot(sot).unwrap();
        writer.write_eoc();
        writer.finish()
    }

    #[test]
    fn test_accepts_written_header() {
        let data = header(64, 3, true);
        assert!(validate_codestream(&data, data.len()));
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        let data = header(MAX_IMAGE_DIMENSION + 1, 1, true);
        assert!(!validate_codestream(&data, data.len()));
        let data = header(64, 5, true);
        assert!(!validate_codestream(&data, data.len()));
    }

    #[test]
    fn test_requires_qcd() {
        let data = header(64, 1, false);
        assert!(!validate_codestream(&data, data.len()));
    }

    #[test]
    fn test_claimed_size_bounds_scan() {
        let data = header(64, 1, true);
        assert!(!validate_codestream(&data, MIN_HEADER_SIZE - 1));
        // Cut right before the SOT marker.
        assert!(!validate_codestream(&data, data.len() - 16));
        assert!(validate_codestream(&data, usize::MAX));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(!validate_codestream(&[0u8; 200], 200));
        assert!(!validate_codestream(&[], 0));
    }
}
