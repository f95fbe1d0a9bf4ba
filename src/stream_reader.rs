//! Bounded big-endian reader over a codestream byte slice.
//!
//! Every read is checked against the end of the slice, so a reader built on
//! the available prefix of a stream can never look past the byte budget.

use crate::constants::MARKER_START_BYTE;
use crate::error::J2cError;
use crate::marker_code::J2kMarkerCode;

const TRUNCATED: J2cError = J2cError::MalformedStream("unexpected end of codestream");

pub struct CodestreamReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> CodestreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn remaining_data(&self) -> &'a [u8] {
        &self.source[self.position..]
    }

    pub fn read_u8(&mut self) -> Result<u8, J2cError> {
        let value = *self.source.get(self.position).ok_or(TRUNCATED)?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, J2cError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, J2cError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], J2cError> {
        let end = self.position.checked_add(count).ok_or(TRUNCATED)?;
        let bytes = self.source.get(self.position..end).ok_or(TRUNCATED)?;
        self.position = end;
        Ok(bytes)
    }

    pub fn peek_u16(&self) -> Option<u16> {
        let bytes = self.source.get(self.position..self.position + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_marker(&mut self) -> Result<J2kMarkerCode, J2cError> {
        if self.read_u8()? != MARKER_START_BYTE {
            return Err(J2cError::MalformedStream("expected marker start byte"));
        }
        J2kMarkerCode::from_byte(self.read_u8()?)
    }

    /// Skips a marker segment whose length field is the next value in the stream.
    pub fn skip_segment(&mut self) -> Result<(), J2cError> {
        let length = self.read_u16()?;
        if length < 2 {
            return Err(J2cError::MalformedStream("invalid marker segment size"));
        }
        self.advance((length - 2) as usize)
    }

    pub fn advance(&mut self, count: usize) -> Result<(), J2cError> {
        self.read_bytes(count).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let data = [0x12, 0x34, 0x00, 0x00, 0x01, 0x00, 0xAB];
        let mut reader = CodestreamReader::new(&data);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 256);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert!(reader.remaining_data().is_empty());
    }

    #[test]
    fn test_read_past_end_fails_without_moving() {
        let data = [0xFF, 0x4F, 0x00];
        let mut reader = CodestreamReader::new(&data);
        assert_eq!(reader.read_marker().unwrap(), J2kMarkerCode::StartOfCodestream);
        assert!(reader.read_u16().is_err());
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_skip_segment() {
        let data = [0x00, 0x04, 0xAA, 0xBB, 0xFF, 0x90];
        let mut reader = CodestreamReader::new(&data);
        reader.skip_segment().unwrap();
        assert_eq!(reader.read_marker().unwrap(), J2kMarkerCode::StartOfTile);
    }

    #[test]
    fn test_skip_segment_rejects_short_length() {
        let data = [0x00, 0x01];
        let mut reader = CodestreamReader::new(&data);
        assert!(reader.skip_segment().is_err());
    }
}
