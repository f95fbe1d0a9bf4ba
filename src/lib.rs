//! Progressive JPEG 2000 codestream container.
//!
//! [`CompressedImage`] decodes a usable, lower-resolution image from any
//! sufficiently long prefix of a `.j2c` codestream, and spreads decode work
//! over as many calls as a caller's time budget requires. The coding itself
//! is done by a [`J2cBackend`] selected once per process with
//! [`open_backend`].
//!
//! ```no_run
//! use j2cstream::{BackendKind, CompressedImage, RawImage, open_backend};
//! use std::time::Duration;
//!
//! open_backend(BackendKind::Reference)?;
//! let mut image = CompressedImage::new();
//! image.load_and_validate("texture.j2c")?;
//! image.set_max_bytes(image.data().len() / 4);
//!
//! let mut raw = RawImage::default();
//! while !image.decode(&mut raw, Duration::from_millis(5))? {}
//! println!("decoded {}x{}", raw.width(), raw.height());
//! # Ok::<(), j2cstream::J2cError>(())
//! ```

pub mod backend;
pub mod budget;
pub mod compressed_image;
pub mod config;
pub mod constants;
pub mod error;
pub mod jpeg2000;
pub mod marker_code;
pub mod raw_image;
pub mod stream_reader;
pub mod stream_writer;

pub use backend::{
    BackendKind, DecodeRequest, EncodeParams, ImageMetadata, J2cBackend, ParallelBackend,
    ReferenceBackend, active_backend, close_backend, create_backend, open_backend,
    open_from_config,
};
pub use compressed_image::{CompressedImage, ContainerState};
pub use config::J2cConfig;
pub use error::J2cError;
pub use raw_image::RawImage;
