//! Packet coders for the tile body.
//!
//! A packet holds the wavelet coefficients of one component at one
//! resolution. The coder id is stored once at the start of the tile body so
//! any backend can read packets written by any other.

use crate::error::J2cError;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

pub const CODER_ZERO_RUN: u8 = 0;
pub const CODER_LZ4: u8 = 1;

const MALFORMED_PACKET: J2cError = J2cError::MalformedStream("corrupt packet data");

/// Entropy coding of one packet's coefficients.
///
/// Each packet is coded independently; no state is carried between calls.
pub trait PacketCoder: Send + Sync {
    /// Stable id written to the tile body.
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    fn pack(&self, coefficients: &[i32]) -> Vec<u8>;

    /// Decodes exactly `count` coefficients.
    fn unpack(&self, packet: &[u8], count: usize) -> Result<Vec<i32>, J2cError>;
}

/// Zigzag values as LEB128 varints, with runs of zeros collapsed to a
/// `0` token followed by the run length minus one.
pub struct ZeroRunCoder;

/// The zero-run stream compressed again with LZ4.
pub struct Lz4Coder;

static ZERO_RUN: ZeroRunCoder = ZeroRunCoder;
static LZ4: Lz4Coder = Lz4Coder;

pub fn coder_by_id(id: u8) -> Result<&'static dyn PacketCoder, J2cError> {
    match id {
        CODER_ZERO_RUN => Ok(&ZERO_RUN),
        CODER_LZ4 => Ok(&LZ4),
        _ => Err(J2cError::MalformedStream("unknown packet coder")),
    }
}

fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

fn unzigzag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(data: &[u8], position: &mut usize) -> Result<u32, J2cError> {
    let mut value = 0u32;
    for shift in (0..35).step_by(7) {
        let byte = *data.get(*position).ok_or(MALFORMED_PACKET)?;
        *position += 1;
        value |= ((byte & 0x7F) as u32)
            .checked_shl(shift)
            .ok_or(MALFORMED_PACKET)?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(MALFORMED_PACKET)
}

impl PacketCoder for ZeroRunCoder {
    fn id(&self) -> u8 {
        CODER_ZERO_RUN
    }

    fn name(&self) -> &'static str {
        "zero-run"
    }

    fn pack(&self, coefficients: &[i32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(coefficients.len() / 4 + 8);
        let mut index = 0;
        while index < coefficients.len() {
            if coefficients[index] == 0 {
                let run = coefficients[index..]
                    .iter()
                    .take_while(|&&value| value == 0)
                    .count();
                out.push(0);
                write_varint(&mut out, (run - 1) as u32);
                index += run;
            } else {
                write_varint(&mut out, zigzag(coefficients[index]));
                index += 1;
            }
        }
        out
    }

    fn unpack(&self, packet: &[u8], count: usize) -> Result<Vec<i32>, J2cError> {
        let mut coefficients = Vec::with_capacity(count);
        let mut position = 0;
        while coefficients.len() < count {
            let token = read_varint(packet, &mut position)?;
            if token == 0 {
                let run = read_varint(packet, &mut position)? as usize + 1;
                if coefficients.len() + run > count {
                    return Err(MALFORMED_PACKET);
                }
                coefficients.resize(coefficients.len() + run, 0);
            } else {
                coefficients.push(unzigzag(token));
            }
        }
        if position != packet.len() {
            return Err(MALFORMED_PACKET);
        }
        Ok(coefficients)
    }
}

impl PacketCoder for Lz4Coder {
    fn id(&self) -> u8 {
        CODER_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn pack(&self, coefficients: &[i32]) -> Vec<u8> {
        compress_prepend_size(&ZERO_RUN.pack(coefficients))
    }

    fn unpack(&self, packet: &[u8], count: usize) -> Result<Vec<i32>, J2cError> {
        // A varint is at most 5 bytes, so reject size prefixes no valid packet has.
        let prefix = packet.get(..4).ok_or(MALFORMED_PACKET)?;
        let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if declared > count.saturating_mul(5) {
            return Err(MALFORMED_PACKET);
        }
        let inner = decompress_size_prepended(packet).map_err(|_| MALFORMED_PACKET)?;
        ZERO_RUN.unpack(&inner, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<i32> {
        let mut values = vec![0; 300];
        values[0] = 512;
        values[1] = -3;
        values[150] = 1;
        values[299] = i32::MIN;
        values.extend([7, 0, -7, 0, 0, i32::MAX]);
        values
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(unzigzag(zigzag(i32::MIN)), i32::MIN);
    }

    #[test]
    fn test_zero_runs_collapse() {
        let packed = ZeroRunCoder.pack(&[0; 1000]);
        assert_eq!(packed, vec![0x00, 0xE7, 0x07]);
        assert_eq!(ZeroRunCoder.unpack(&packed, 1000).unwrap(), vec![0; 1000]);
    }

    #[test]
    fn test_both_coders_restore_coefficients() {
        let values = sample();
        for id in [CODER_ZERO_RUN, CODER_LZ4] {
            let coder = coder_by_id(id).unwrap();
            assert_eq!(coder.id(), id);
            let packed = coder.pack(&values);
            assert_eq!(coder.unpack(&packed, values.len()).unwrap(), values, "{}", coder.name());
        }
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let packed = ZeroRunCoder.pack(&[1, 2, 3]);
        assert!(ZeroRunCoder.unpack(&packed, 2).is_err());
        assert!(ZeroRunCoder.unpack(&packed, 4).is_err());
        assert!(ZeroRunCoder.unpack(&ZeroRunCoder.pack(&[0; 10]), 5).is_err());
    }

    #[test]
    fn test_corrupt_lz4_is_rejected() {
        assert!(Lz4Coder.unpack(&[0xFF, 0xFF, 0xFF, 0x7F, 0x00], 10).is_err());
        assert!(Lz4Coder.unpack(&[1, 2], 10).is_err());
        assert!(coder_by_id(9).is_err());
    }
}
