//! JPEG 2000 Codestream Parser.
//!
//! Handles the parsing of Main Headers (SOC, SIZ, COD, QCD, COM) and
//! Tile-Part Headers (SOT up to SOD).

use super::image::{J2kCod, J2kComment, J2kComponentInfo, J2kHeader, J2kQcd, J2kTilePart};
use crate::constants::{
    COD_MIN_LENGTH, COM_HEADER_LENGTH, MAX_HEADER_SEGMENTS, QCD_MIN_LENGTH,
    SIZ_COMPONENT_LENGTH, SIZ_FIXED_LENGTH, SOT_LENGTH,
};
use crate::error::J2cError;
use crate::marker_code::J2kMarkerCode;
use crate::stream_reader::CodestreamReader;

/// A parser that transforms raw J2K marker segments into structured metadata.
pub struct J2kParser<'a, 'b> {
    pub reader: &'b mut CodestreamReader<'a>,
    pub header: J2kHeader,
}

impl<'a, 'b> J2kParser<'a, 'b> {
    pub fn new(reader: &'b mut CodestreamReader<'a>) -> Self {
        Self {
            reader,
            header: J2kHeader::default(),
        }
    }

    /// Parses from SOC up to and including the first SOT marker code.
    pub fn parse_main_header(&mut self) -> Result<(), J2cError> {
        if self.reader.read_marker()? != J2kMarkerCode::StartOfCodestream {
            return Err(J2cError::MalformedStream("expected SOC marker"));
        }
        // SIZ must immediately follow SOC.
        if self.reader.read_marker()? != J2kMarkerCode::ImageAndTileSize {
            return Err(J2cError::MalformedStream("expected SIZ marker after SOC"));
        }
        self.parse_siz()?;

        for _ in 0..MAX_HEADER_SEGMENTS {
            let marker_offset = self.reader.position();
            let marker = self.reader.read_marker()?;
            match marker {
                J2kMarkerCode::CodingStyleDefault => self.parse_cod()?,
                J2kMarkerCode::QuantizationDefault => self.parse_qcd()?,
                J2kMarkerCode::Comment => self.parse_com()?,
                J2kMarkerCode::StartOfTile => {
                    if self.header.cod.is_none() || self.header.qcd.is_none() {
                        return Err(J2cError::MalformedStream("main header lacks COD or QCD"));
                    }
                    self.header.first_tile_offset = marker_offset;
                    return Ok(());
                }
                J2kMarkerCode::ImageAndTileSize => {
                    return Err(J2cError::MalformedStream("duplicate SIZ marker"));
                }
                marker if marker.has_segment() => self.reader.skip_segment()?,
                _ => return Err(J2cError::MalformedStream("unexpected delimiting marker")),
            }
        }
        Err(J2cError::MalformedStream("too many main header segments"))
    }

    pub fn parse_siz(&mut self) -> Result<(), J2cError> {
        let length = self.reader.read_u16()?;
        let _caps = self.reader.read_u16()?; // Rsiz
        self.header.grid_width = self.reader.read_u32()?;
        self.header.grid_height = self.reader.read_u32()?;
        self.header.x_origin = self.reader.read_u32()?;
        self.header.y_origin = self.reader.read_u32()?;
        self.header.tile_width = self.reader.read_u32()?;
        self.header.tile_height = self.reader.read_u32()?;
        self.header.tile_x_origin = self.reader.read_u32()?;
        self.header.tile_y_origin = self.reader.read_u32()?;

        let comps = self.reader.read_u16()?;
        if comps == 0 {
            return Err(J2cError::MalformedStream("SIZ declares no components"));
        }
        if length as u32 != SIZ_FIXED_LENGTH as u32 + SIZ_COMPONENT_LENGTH as u32 * comps as u32 {
            return Err(J2cError::MalformedStream("SIZ length does not match component count"));
        }

        self.header.components.clear();
        for _ in 0..comps {
            let depth_byte = self.reader.read_u8()?;
            let dx = self.reader.read_u8()?;
            let dy = self.reader.read_u8()?;
            self.header.components.push(J2kComponentInfo {
                depth: (depth_byte & 0x7F) + 1,
                is_signed: (depth_byte & 0x80) != 0,
                dx,
                dy,
            });
        }
        Ok(())
    }

    pub fn parse_cod(&mut self) -> Result<(), J2cError> {
        let length = self.reader.read_u16()?;
        if length < COD_MIN_LENGTH {
            return Err(J2cError::MalformedStream("COD segment too short"));
        }
        let coding_style = self.reader.read_u8()?;
        let progression_order = self.reader.read_u8()?;
        let number_of_layers = self.reader.read_u16()?;
        let mct = self.reader.read_u8()?;
        let decomposition_levels = self.reader.read_u8()?;
        let codeblock_width_exp = self.reader.read_u8()?;
        let codeblock_height_exp = self.reader.read_u8()?;
        let codeblock_style = self.reader.read_u8()?;
        let transformation = self.reader.read_u8()?;

        if decomposition_levels > 32 {
            return Err(J2cError::MalformedStream("too many decomposition levels"));
        }

        let mut precinct_sizes = Vec::new();
        if (coding_style & 0x01) != 0 {
            for _ in 0..=decomposition_levels {
                precinct_sizes.push(self.reader.read_u8()?);
            }
        }

        let parsed = COD_MIN_LENGTH as usize + precinct_sizes.len();
        let remaining = (length as usize)
            .checked_sub(parsed)
            .ok_or(J2cError::MalformedStream("COD length shorter than its precincts"))?;
        self.reader.advance(remaining)?;

        self.header.cod = Some(J2kCod {
            coding_style,
            progression_order,
            number_of_layers,
            mct,
            decomposition_levels,
            codeblock_width_exp,
            codeblock_height_exp,
            codeblock_style,
            transformation,
            precinct_sizes,
        });
        Ok(())
    }

    pub fn parse_qcd(&mut self) -> Result<(), J2cError> {
        let length = self.reader.read_u16()?;
        if length < QCD_MIN_LENGTH {
            return Err(J2cError::MalformedStream("QCD segment too short"));
        }
        let sqcd = self.reader.read_u8()?;
        let mut bytes_left = (length as usize) - 3;

        // Without quantization only 8-bit exponents are stored.
        let is_8bit = (sqcd & 0x1F) == 0;
        let step_size_len = if is_8bit { 1 } else { 2 };

        let mut step_sizes = Vec::with_capacity(bytes_left / step_size_len);
        while bytes_left >= step_size_len {
            let step = if is_8bit {
                // Align 8-bit steps (Exp << 3) to the 16-bit layout (Exp << 11).
                (self.reader.read_u8()? as u16) << 8
            } else {
                self.reader.read_u16()?
            };
            step_sizes.push(step);
            bytes_left -= step_size_len;
        }
        self.reader.advance(bytes_left)?;

        self.header.qcd = Some(J2kQcd {
            quant_style: sqcd,
            step_sizes,
        });
        Ok(())
    }

    pub fn parse_com(&mut self) -> Result<(), J2cError> {
        let length = self.reader.read_u16()?;
        if length < COM_HEADER_LENGTH {
            return Err(J2cError::MalformedStream("COM segment too short"));
        }
        let registration = self.reader.read_u16()?;
        let data = self.reader.read_bytes((length - COM_HEADER_LENGTH) as usize)?;
        self.header.comments.push(J2kComment {
            registration,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Parses a tile-part header. The SOT marker code must already be consumed.
    pub fn parse_tile_part_header(&mut self, sot_offset: usize) -> Result<J2kTilePart, J2cError> {
        let lsot = self.reader.read_u16()?;
        if lsot != SOT_LENGTH {
            return Err(J2cError::MalformedStream("invalid SOT segment length"));
        }
        let tile_index = self.reader.read_u16()?;
        let length = self.reader.read_u32()?;
        let _tpsot = self.reader.read_u8()?;
        let _tnsot = self.reader.read_u8()?;

        for _ in 0..MAX_HEADER_SEGMENTS {
            let marker = self.reader.read_marker()?;
            match marker {
                J2kMarkerCode::StartOfData => {
                    let data_offset = self.reader.position();
                    if length != 0 && (length as usize) < data_offset - sot_offset {
                        return Err(J2cError::MalformedStream("Psot shorter than tile-part header"));
                    }
                    return Ok(J2kTilePart {
                        tile_index,
                        sot_offset,
                        length,
                        data_offset,
                    });
                }
                J2kMarkerCode::CodingStyleDefault => self.parse_cod()?,
                J2kMarkerCode::QuantizationDefault => self.parse_qcd()?,
                J2kMarkerCode::Comment => self.parse_com()?,
                marker if marker.has_segment() => self.reader.skip_segment()?,
                _ => return Err(J2cError::MalformedStream("unexpected marker in tile-part header")),
            }
        }
        Err(J2cError::MalformedStream("too many tile-part header segments"))
    }

    /// Parses the main header and the first tile-part header.
    pub fn parse_headers(mut self) -> Result<(J2kHeader, J2kTilePart), J2cError> {
        self.parse_main_header()?;
        let sot_offset = self.header.first_tile_offset;
        let tile_part = self.parse_tile_part_header(sot_offset)?;
        Ok((self.header, tile_part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn siz_one_component() -> Vec<u8> {
        vec![
            0xFF, 0x4F, // SOC
            0xFF, 0x51, // SIZ
            0x00, 0x29, // Len = 41
            0x00, 0x00, // Caps
            0x00, 0x00, 0x01, 0x00, // W = 256
            0x00, 0x00, 0x01, 0x00, // H = 256
            0x00, 0x00, 0x00, 0x00, // offX
            0x00, 0x00, 0x00, 0x00, // offY
            0x00, 0x00, 0x01, 0x00, // tileW = 256
            0x00, 0x00, 0x01, 0x00, // tileH = 256
            0x00, 0x00, 0x00, 0x00, // tileOffX
            0x00, 0x00, 0x00, 0x00, // tileOffY
            0x00, 0x01, // 1 Component
            0x07, 0x01, 0x01, // Depth 8 (unsigned), 1x1 sub
        ]
    }

    fn cod_qcd_com_sot() -> Vec<u8> {
        vec![
            0xFF, 0x52, // COD
            0x00, 0x0C, // length 12
            0x00, // scod
            0x01, // sprog (RLCP)
            0x00, 0x01, // nlayers = 1
            0x00, // mct
            0x03, // decomposition levels
            0x04, // codeblock width exponent
            0x04, // codeblock height exponent
            0x00, // codeblock style
            0x01, // 5-3
            0xFF, 0x5C, // QCD
            0x00, 0x07, // length 7
            0x40, // no quantization, 2 guard bits
            0x40, 0x48, 0x48, 0x50, // exponents for LL, HL, LH, HH
            0xFF, 0x64, // COM
            0x00, 0x07, // length 7
            0x00, 0x01, // Latin text
            b'L', b'L', b'_',
            0xFF, 0x90, // SOT
            0x00, 0x0A, // Lsot
            0x00, 0x00, // Isot
            0x00, 0x00, 0x00, 0x10, // Psot = 16
            0x00, 0x01, // TPsot, TNsot
            0xFF, 0x93, // SOD
            0xAA, 0xBB, // data
            0xFF, 0xD9, // EOC
        ]
    }

    #[test]
    fn test_parse_siz() {
        let mut data = siz_one_component();
        data.extend(cod_qcd_com_sot());

        let mut reader = CodestreamReader::new(&data);
        let mut parser = J2kParser::new(&mut reader);
        parser.parse_main_header().unwrap();

        assert_eq!(parser.header.width(), 256);
        assert_eq!(parser.header.height(), 256);
        assert_eq!(parser.header.component_count(), 1);
        assert_eq!(parser.header.components[0].depth, 8);
        assert!(!parser.header.components[0].is_signed);
    }

    #[test]
    fn test_parse_cod_qcd_com() {
        let mut data = siz_one_component();
        data.extend(cod_qcd_com_sot());

        let mut reader = CodestreamReader::new(&data);
        let mut parser = J2kParser::new(&mut reader);
        parser.parse_main_header().unwrap();

        let cod = parser.header.cod.as_ref().expect("COD should be parsed");
        assert_eq!(cod.progression_order, 0x01);
        assert_eq!(cod.decomposition_levels, 3);
        assert_eq!(cod.transformation, 1);
        let qcd = parser.header.qcd.as_ref().expect("QCD should be parsed");
        assert_eq!(qcd.step_sizes, vec![0x4000, 0x4800, 0x4800, 0x5000]);
        assert_eq!(qcd.exponent(3), Some(10));
        assert_eq!(qcd.guard_bits(), 2);
        assert_eq!(parser.header.comments.len(), 1);
        assert!(parser.header.comments[0].is_viewer_authored());
        assert!(parser.header.is_reversible());
    }

    #[test]
    fn test_parse_headers_locates_tile_data() {
        let mut data = siz_one_component();
        let main_len = data.len() + 14 + 9 + 9;
        data.extend(cod_qcd_com_sot());

        let reader = &mut CodestreamReader::new(&data);
        let (header, tile_part) = J2kParser::new(reader).parse_headers().unwrap();
        assert_eq!(header.first_tile_offset, main_len);
        assert_eq!(tile_part.sot_offset, main_len);
        assert_eq!(tile_part.data_offset, main_len + 14);
        assert_eq!(tile_part.end(), Some(main_len + 16));
        assert_eq!(&data[tile_part.data_offset..tile_part.data_offset + 2], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_missing_qcd_is_malformed() {
        let mut data = siz_one_component();
        data.extend_from_slice(&[
            0xFF, 0x52, 0x00, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x03, 0x04, 0x04, 0x00, 0x01,
            0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
        ]);
        let mut reader = CodestreamReader::new(&data);
        let mut parser = J2kParser::new(&mut reader);
        assert!(matches!(
            parser.parse_main_header(),
            Err(J2cError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_siz_length_mismatch() {
        let mut data = siz_one_component();
        data[5] = 0x2C; // claims two components
        let mut reader = CodestreamReader::new(&data);
        let mut parser = J2kParser::new(&mut reader);
        assert!(parser.parse_main_header().is_err());
    }

    #[test]
    fn test_truncated_header() {
        let data = siz_one_component();
        let mut reader = CodestreamReader::new(&data[..20]);
        let mut parser = J2kParser::new(&mut reader);
        assert!(parser.parse_main_header().is_err());
    }
}
