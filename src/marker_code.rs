use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::J2cError;

/// Marker codes (second byte after 0xFF) defined in ISO/IEC 15444-1, table A.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum J2kMarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0x4F,
    /// CAP: Extended capabilities (Part 15).
    Capability = 0x50,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0x51,
    /// COD: Coding style default.
    CodingStyleDefault = 0x52,
    /// COC: Coding style component.
    CodingStyleComponent = 0x53,
    /// TLM: Tile-part lengths.
    TilePartLengths = 0x55,
    /// PLM: Packet length, main header.
    PacketLengthMain = 0x57,
    /// PLT: Packet length, tile-part header.
    PacketLengthTile = 0x58,
    /// QCD: Quantization default.
    QuantizationDefault = 0x5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0x5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0x5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0x5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0x60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTile = 0x61,
    /// CRG: Component registration.
    ComponentRegistration = 0x63,
    /// COM: Comment.
    Comment = 0x64,
    /// SOT: Start of tile-part.
    StartOfTile = 0x90,
    /// SOP: Start of packet.
    StartOfPacket = 0x91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0x92,
    /// SOD: Start of data.
    StartOfData = 0x93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xD9,
}

impl J2kMarkerCode {
    /// Delimiting markers carry no length field.
    pub fn has_segment(self) -> bool {
        !matches!(
            self,
            Self::StartOfCodestream
                | Self::StartOfData
                | Self::EndOfCodestream
                | Self::EndOfPacketHeader
        )
    }

    pub fn from_byte(value: u8) -> Result<Self, J2cError> {
        Self::try_from(value).map_err(|_| J2cError::MalformedStream("unknown marker code"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_round_trip() {
        assert_eq!(
            J2kMarkerCode::from_byte(0x51).unwrap(),
            J2kMarkerCode::ImageAndTileSize
        );
        assert_eq!(u8::from(J2kMarkerCode::Comment), 0x64);
    }

    #[test]
    fn test_unknown_marker_rejected() {
        assert!(matches!(
            J2kMarkerCode::from_byte(0xD8),
            Err(J2cError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_delimiters_have_no_segment() {
        assert!(!J2kMarkerCode::StartOfCodestream.has_segment());
        assert!(!J2kMarkerCode::StartOfData.has_segment());
        assert!(J2kMarkerCode::ImageAndTileSize.has_segment());
        assert!(J2kMarkerCode::StartOfTile.has_segment());
    }
}
