use super::image::{J2kCod, J2kQcd, QuantizationStyle};
use crate::constants::{
    COD_MIN_LENGTH, COM_HEADER_LENGTH, COMMENT_REGISTRATION_LATIN, SEGMENT_MAX_DATA_SIZE,
    SIZ_COMPONENT_LENGTH, SIZ_FIXED_LENGTH, SOT_LENGTH,
};
use crate::error::J2cError;
use crate::marker_code::J2kMarkerCode;
use crate::stream_writer::CodestreamWriter;

/// Emits JPEG 2000 marker segments in codestream order.
#[derive(Default)]
pub struct J2kWriter {
    writer: CodestreamWriter,
}

impl J2kWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: CodestreamWriter::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.writer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    pub fn write_soc(&mut self) {
        self.writer.write_marker(J2kMarkerCode::StartOfCodestream);
    }

    pub fn write_eoc(&mut self) {
        self.writer.write_marker(J2kMarkerCode::EndOfCodestream);
    }

    /// Single-tile SIZ with unsigned components and no subsampling.
    pub fn write_siz(
        &mut self,
        width: u32,
        height: u32,
        component_count: u16,
        bit_depth: u8,
    ) -> Result<(), J2cError> {
        if width == 0 || height == 0 {
            return Err(J2cError::InvalidArgument("image dimensions must be non-zero"));
        }
        if component_count == 0 || !(1..=38).contains(&bit_depth) {
            return Err(J2cError::InvalidArgument("invalid component layout"));
        }
        self.writer.write_marker(J2kMarkerCode::ImageAndTileSize);

        let length = SIZ_FIXED_LENGTH as u32 + SIZ_COMPONENT_LENGTH as u32 * component_count as u32;
        let length = u16::try_from(length)
            .map_err(|_| J2cError::InvalidArgument("too many components for SIZ"))?;
        self.writer.write_u16(length);
        self.writer.write_u16(0); // Rsiz
        self.writer.write_u32(width);
        self.writer.write_u32(height);
        self.writer.write_u32(0); // OffX
        self.writer.write_u32(0); // OffY
        self.writer.write_u32(width); // single tile
        self.writer.write_u32(height);
        self.writer.write_u32(0); // TileOffX
        self.writer.write_u32(0); // TileOffY
        self.writer.write_u16(component_count);

        for _ in 0..component_count {
            self.writer.write_byte(bit_depth - 1);
            self.writer.write_byte(1);
            self.writer.write_byte(1);
        }
        Ok(())
    }

    pub fn write_cod(&mut self, cod: &J2kCod) -> Result<(), J2cError> {
        let has_precincts = (cod.coding_style & 0x01) != 0;
        if has_precincts && cod.precinct_sizes.len() != cod.decomposition_levels as usize + 1 {
            return Err(J2cError::InvalidArgument("precinct sizes must cover every resolution"));
        }
        self.writer.write_marker(J2kMarkerCode::CodingStyleDefault);

        let precincts = if has_precincts { cod.precinct_sizes.len() } else { 0 };
        self.writer.write_u16(COD_MIN_LENGTH + precincts as u16);
        self.writer.write_byte(cod.coding_style);

        // SGcod
        self.writer.write_byte(cod.progression_order);
        self.writer.write_u16(cod.number_of_layers);
        self.writer.write_byte(cod.mct);

        // SPcod
        self.writer.write_byte(cod.decomposition_levels);
        self.writer.write_byte(cod.codeblock_width_exp);
        self.writer.write_byte(cod.codeblock_height_exp);
        self.writer.write_byte(cod.codeblock_style);
        self.writer.write_byte(cod.transformation);
        if has_precincts {
            self.writer.write_bytes(&cod.precinct_sizes);
        }
        Ok(())
    }

    pub fn write_qcd(&mut self, qcd: &J2kQcd) -> Result<(), J2cError> {
        if qcd.step_sizes.is_empty() {
            return Err(J2cError::InvalidArgument("QCD needs at least one step size"));
        }
        let is_8bit = qcd.style() == QuantizationStyle::None;
        let step_len = if is_8bit { 1 } else { 2 };
        let length = 3 + qcd.step_sizes.len() * step_len;
        let length = u16::try_from(length)
            .map_err(|_| J2cError::InvalidArgument("too many QCD step sizes"))?;

        self.writer.write_marker(J2kMarkerCode::QuantizationDefault);
        self.writer.write_u16(length);
        self.writer.write_byte(qcd.quant_style);
        for &step in &qcd.step_sizes {
            if is_8bit {
                self.writer.write_byte((step >> 8) as u8);
            } else {
                self.writer.write_u16(step);
            }
        }
        Ok(())
    }

    pub fn write_com(&mut self, text: &str) -> Result<(), J2cError> {
        let data = text.as_bytes();
        if data.len() > SEGMENT_MAX_DATA_SIZE - 2 {
            return Err(J2cError::InvalidArgument("comment does not fit in a COM segment"));
        }
        self.writer.write_marker(J2kMarkerCode::Comment);
        self.writer.write_u16(COM_HEADER_LENGTH + data.len() as u16);
        self.writer.write_u16(COMMENT_REGISTRATION_LATIN);
        self.writer.write_bytes(data);
        Ok(())
    }

    /// Writes SOT with a zero Psot and returns the SOT offset for `patch_psot`.
    pub fn write_sot(&mut self, tile_index: u16, tile_part_index: u8, num_tile_parts: u8) -> usize {
        let sot_offset = self.writer.len();
        self.writer.write_marker(J2kMarkerCode::StartOfTile);
        self.writer.write_u16(SOT_LENGTH);
        self.writer.write_u16(tile_index);
        self.writer.write_u32(0); // Psot, patched once the tile-part is complete
        self.writer.write_byte(tile_part_index);
        self.writer.write_byte(num_tile_parts);
        sot_offset
    }

    /// Sets Psot to cover everything written since `sot_offset`.
    pub fn patch_psot(&mut self, sot_offset: usize) -> Result<(), J2cError> {
        let length = u32::try_from(self.writer.len() - sot_offset)
            .map_err(|_| J2cError::EncodeFailed("tile-part exceeds 4 GiB"))?;
        self.writer.patch_u32(sot_offset + 6, length)
    }

    pub fn write_sod(&mut self) {
        self.writer.write_marker(J2kMarkerCode::StartOfData);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.writer.write_bytes(data);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.writer.write_u32(value);
    }

    pub fn write_byte(&mut self, value: u8) {
        self.writer.write_byte(value);
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}
