//! JPEG 2000 codestream layer (Part 1, ISO/IEC 15444-1)
//!
//! - `parser` / `writer`: codestream syntax (markers, main and tile-part headers).
//! - `image`: structures describing the parsed header.
//! - `dwt`: the reversible 5-3 wavelet.
//! - `packet`: coders for the per-resolution packets in the tile body.
//! - `validate`: header-only format check.

pub mod dwt;
pub mod image;
pub mod packet;
pub mod parser;
pub mod validate;
pub mod writer;

pub use image::J2kHeader;
pub use parser::J2kParser;
pub use validate::validate_codestream;
pub use writer::J2kWriter;
