use crate::constants::{COMMENT_REGISTRATION_LATIN, VIEWER_COMMENT_PREFIX};
use std::borrow::Cow;

/// Main-header view of a JPEG 2000 codestream.
#[derive(Debug, Clone, Default)]
pub struct J2kHeader {
    /// Xsiz: width of the reference grid.
    pub grid_width: u32,
    /// Ysiz: height of the reference grid.
    pub grid_height: u32,
    /// Horizontal offset of the image area on the reference grid.
    pub x_origin: u32,
    /// Vertical offset of the image area on the reference grid.
    pub y_origin: u32,
    /// Width of an individual tile. If it covers the image, there is only one tile.
    pub tile_width: u32,
    /// Height of an individual tile.
    pub tile_height: u32,
    /// Horizontal offset of the first tile on the reference grid.
    pub tile_x_origin: u32,
    /// Vertical offset of the first tile on the reference grid.
    pub tile_y_origin: u32,
    /// Component information (depth, signedness, subsampling) from SIZ.
    pub components: Vec<J2kComponentInfo>,
    /// Coding Style Default (COD) parameters.
    pub cod: Option<J2kCod>,
    /// Quantization Default (QCD) parameters.
    pub qcd: Option<J2kQcd>,
    /// COM segments in stream order.
    pub comments: Vec<J2kComment>,
    /// Byte offset of the first SOT marker.
    pub first_tile_offset: usize,
}

impl J2kHeader {
    pub fn width(&self) -> u32 {
        self.grid_width.saturating_sub(self.x_origin)
    }

    pub fn height(&self) -> u32 {
        self.grid_height.saturating_sub(self.y_origin)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn decomposition_levels(&self) -> u8 {
        self.cod.as_ref().map_or(0, |cod| cod.decomposition_levels)
    }

    pub fn is_single_tile(&self) -> bool {
        self.tile_x_origin <= self.x_origin
            && self.tile_y_origin <= self.y_origin
            && self.tile_x_origin as u64 + self.tile_width as u64 >= self.grid_width as u64
            && self.tile_y_origin as u64 + self.tile_height as u64 >= self.grid_height as u64
    }

    /// Lossless streams use the 5/3 filter without quantization.
    pub fn is_reversible(&self) -> bool {
        let filter_53 = self
            .cod
            .as_ref()
            .is_some_and(|cod| cod.transformation == WAVELET_53);
        let unquantized = self
            .qcd
            .as_ref()
            .is_some_and(|qcd| qcd.style() == QuantizationStyle::None);
        filter_53 && unquantized
    }
}

/// Metadata for a single component from the SIZ marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct J2kComponentInfo {
    /// bit depth (e.g. 8, 12, 16)
    pub depth: u8,
    pub is_signed: bool,
    /// Horizontal subsampling factor
    pub dx: u8,
    /// Vertical subsampling factor
    pub dy: u8,
}

pub const WAVELET_97: u8 = 0;
pub const WAVELET_53: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    Lrcp = 0,
    Rlcp = 1,
    Rpcl = 2,
    Pcrl = 3,
    Cprl = 4,
}

impl ProgressionOrder {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lrcp),
            1 => Some(Self::Rlcp),
            2 => Some(Self::Rpcl),
            3 => Some(Self::Pcrl),
            4 => Some(Self::Cprl),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Lrcp => "LRCP",
            Self::Rlcp => "RLCP",
            Self::Rpcl => "RPCL",
            Self::Pcrl => "PCRL",
            Self::Cprl => "CPRL",
        }
    }
}

/// Coding Style Default (COD) marker information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kCod {
    pub coding_style: u8,
    pub progression_order: u8,
    pub number_of_layers: u16,
    pub mct: u8,
    pub decomposition_levels: u8,
    pub codeblock_width_exp: u8,
    pub codeblock_height_exp: u8,
    pub codeblock_style: u8,
    pub transformation: u8,
    /// One byte per resolution level (PPx + PPy<<4) when Scod bit 0 is set.
    pub precinct_sizes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    None,
    ScalarDerived,
    ScalarExpounded,
}

/// Quantization Default (QCD) marker information.
///
/// Step sizes are normalised to the 16-bit layout (exponent << 11 | mantissa)
/// whatever their width in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kQcd {
    pub quant_style: u8,
    pub step_sizes: Vec<u16>,
}

impl J2kQcd {
    pub fn style(&self) -> QuantizationStyle {
        match self.quant_style & 0x1F {
            0 => QuantizationStyle::None,
            1 => QuantizationStyle::ScalarDerived,
            _ => QuantizationStyle::ScalarExpounded,
        }
    }

    pub fn guard_bits(&self) -> u8 {
        self.quant_style >> 5
    }

    pub fn exponent(&self, subband: usize) -> Option<u8> {
        self.step_sizes.get(subband).map(|step| (step >> 11) as u8)
    }
}

/// COM segment contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct J2kComment {
    pub registration: u16,
    pub data: Vec<u8>,
}

impl J2kComment {
    /// Comment text decoded as Latin-1, `None` for binary comments.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        if self.registration != COMMENT_REGISTRATION_LATIN {
            return None;
        }
        match std::str::from_utf8(&self.data) {
            Ok(text) if text.is_ascii() => Some(Cow::Borrowed(text)),
            _ => Some(Cow::Owned(self.data.iter().map(|&byte| byte as char).collect())),
        }
    }

    pub fn is_viewer_authored(&self) -> bool {
        self.text()
            .is_some_and(|text| text.starts_with(VIEWER_COMMENT_PREFIX))
    }
}

/// Location of a tile-part inside the codestream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct J2kTilePart {
    pub tile_index: u16,
    /// Offset of the SOT marker.
    pub sot_offset: usize,
    /// Psot: tile-part length from the SOT marker, 0 when it runs to EOC.
    pub length: u32,
    /// Offset of the first byte after SOD.
    pub data_offset: usize,
}

impl J2kTilePart {
    pub fn end(&self) -> Option<usize> {
        (self.length != 0).then(|| self.sot_offset + self.length as usize)
    }
}
