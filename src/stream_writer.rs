//! Codestream writer utilities.
//!
//! `CodestreamWriter` handles marker emission and big-endian integers on a
//! growable buffer, with back-patching for length fields that are only known
//! once the data behind them has been written.

use crate::constants::MARKER_START_BYTE;
use crate::error::J2cError;
use crate::marker_code::J2kMarkerCode;

#[derive(Default)]
pub struct CodestreamWriter {
    destination: Vec<u8>,
}

impl CodestreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            destination: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.destination.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destination.is_empty()
    }

    pub fn write_byte(&mut self, value: u8) {
        self.destination.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.destination.extend_from_slice(data);
    }

    pub fn write_marker(&mut self, marker: J2kMarkerCode) {
        self.write_byte(MARKER_START_BYTE);
        self.write_byte(marker.into());
    }

    /// Overwrites a previously written u32 at `offset`.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<(), J2cError> {
        let slot = self
            .destination
            .get_mut(offset..offset + 4)
            .ok_or(J2cError::InvalidArgument("patch offset outside written data"))?;
        slot.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_patch() {
        let mut writer = CodestreamWriter::new();
        writer.write_marker(J2kMarkerCode::StartOfTile);
        writer.write_u32(0);
        writer.write_u16(0xBEEF);
        writer.patch_u32(2, 0x0102_0304).unwrap();
        assert_eq!(
            writer.into_inner(),
            vec![0xFF, 0x90, 0x01, 0x02, 0x03, 0x04, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_patch_out_of_range() {
        let mut writer = CodestreamWriter::new();
        writer.write_u16(1);
        assert!(writer.patch_u32(0, 7).is_err());
    }
}
