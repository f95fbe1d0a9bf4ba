//! The progressive codestream container.
//!
//! `CompressedImage` owns the compressed bytes and one backend instance. It
//! tracks how much of the stream may be used (`max_bytes`), which discard
//! level that budget supports, and drives the backend through decode calls
//! that may each stop early and resume on the next call.

use crate::backend::{self, DecodeRequest, EncodeParams, ImageMetadata, J2cBackend};
use crate::budget;
use crate::config::J2cConfig;
use crate::constants::{DEFAULT_RATE, MAX_COMPONENT_COUNT, VIEWER_COMMENT_PREFIX};
use crate::error::J2cError;
use crate::jpeg2000::validate_codestream;
use crate::raw_image::RawImage;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Empty,
    HeaderParsed,
    Decoding,
    DecodeComplete,
    DecodeFailed,
    Encoding,
    EncodeComplete,
    EncodeFailed,
}

/// Inputs that determine what a decode produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecodeKey {
    available: usize,
    discard_level: u8,
    first_channel: u8,
    max_channel_count: u8,
}

pub struct CompressedImage {
    data: Vec<u8>,
    metadata: Option<ImageMetadata>,
    max_bytes: Option<usize>,
    rate: f32,
    reversible: bool,
    discard_level: u8,
    raw_discard_level: Option<u8>,
    decoding_complete: bool,
    state: ContainerState,
    backend: Option<Box<dyn J2cBackend>>,
    // Decode currently handed to the backend, and the last one that finished.
    active_decode: Option<DecodeKey>,
    completed_decode: Option<DecodeKey>,
}

impl Default for CompressedImage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompressedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedImage")
            .field("bytes", &self.data.len())
            .field("metadata", &self.metadata)
            .field("max_bytes", &self.max_bytes)
            .field("raw_discard_level", &self.raw_discard_level)
            .field("state", &self.state)
            .field("backend", &self.backend.as_ref().map(|backend| backend.name()))
            .finish()
    }
}

impl CompressedImage {
    /// An empty container using the process-wide backend.
    ///
    /// When no backend is open yet, one is looked up again on first use.
    pub fn new() -> Self {
        Self::build(backend::create_backend().ok())
    }

    pub fn with_backend(backend: Box<dyn J2cBackend>) -> Self {
        Self::build(Some(backend))
    }

    pub fn from_data(data: Vec<u8>) -> Self {
        let mut image = Self::new();
        image.set_data(data);
        image
    }

    fn build(backend: Option<Box<dyn J2cBackend>>) -> Self {
        Self {
            data: Vec::new(),
            metadata: None,
            max_bytes: None,
            rate: 0.0,
            reversible: false,
            discard_level: 0,
            raw_discard_level: None,
            decoding_complete: false,
            state: ContainerState::Empty,
            backend,
            active_decode: None,
            completed_decode: None,
        }
    }

    fn ensure_backend(&mut self) -> Result<(), J2cError> {
        if self.backend.is_none() {
            self.backend = Some(backend::create_backend()?);
        }
        Ok(())
    }

    /// Drops everything derived from the previous bytes.
    fn forget_stream(&mut self) {
        self.metadata = None;
        self.max_bytes = None;
        self.raw_discard_level = None;
        self.decoding_complete = false;
        self.active_decode = None;
        self.completed_decode = None;
        self.state = ContainerState::Empty;
        if let Some(backend) = self.backend.as_mut() {
            backend.reset();
        }
    }

    /// Replaces the codestream bytes.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.forget_stream();
        self.data = data;
    }

    /// Appends bytes that arrived after the ones already held.
    pub fn append_data(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.metadata.is_some() && self.max_bytes.is_none() {
            self.update_raw_discard_level();
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Parses the header through the backend and derives the discard levels.
    pub fn update_data(&mut self) -> Result<(), J2cError> {
        if self.data.is_empty() {
            return Err(J2cError::MalformedStream("no codestream data"));
        }
        if self.data.len() < budget::header_size() {
            return Err(J2cError::MalformedStream("codestream shorter than its header"));
        }
        self.ensure_backend()?;
        let Some(backend) = self.backend.as_mut() else {
            return Err(J2cError::BackendUnavailable);
        };
        let metadata = backend.extract_metadata(&self.data)?;
        debug!(
            width = metadata.width,
            height = metadata.height,
            components = metadata.components,
            max_discard_level = metadata.max_discard_level,
            "header parsed"
        );
        self.discard_level = self.discard_level.min(metadata.max_discard_level);
        self.metadata = Some(metadata);
        if self.state == ContainerState::Empty {
            self.state = ContainerState::HeaderParsed;
        }
        self.update_raw_discard_level();
        Ok(())
    }

    fn available_bytes(&self) -> usize {
        self.max_bytes.unwrap_or(self.data.len()).min(self.data.len())
    }

    /// Discard level the current byte budget decodes to.
    fn target_discard_level(&self) -> Result<u8, J2cError> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or(J2cError::InvalidOperation("codestream header not parsed"))?;
        let available = self.available_bytes();
        let requested = self.discard_level.min(metadata.max_discard_level);
        let whole = metadata.codestream_length.unwrap_or(self.data.len());
        if available >= whole {
            return Ok(requested);
        }
        let (width, height, components) = (metadata.width, metadata.height, metadata.components);
        budget::discard_level_within(
            width,
            height,
            components,
            available,
            DEFAULT_RATE,
            metadata.max_discard_level,
        )
        .map(|level| level.max(requested))
        .ok_or_else(|| J2cError::InsufficientBudget {
            available,
            required: budget::data_size(
                width,
                height,
                components,
                metadata.max_discard_level,
                DEFAULT_RATE,
            ),
        })
    }

    /// Recomputes the discard level the next decode will produce.
    ///
    /// Cleared when the byte budget cannot hold even the coarsest level.
    pub fn update_raw_discard_level(&mut self) {
        if self.metadata.is_none() {
            return;
        }
        self.raw_discard_level = self.target_discard_level().ok();
    }

    pub(crate) fn set_decoding_done(&mut self, complete: bool) {
        self.decoding_complete = complete;
        self.state = if complete {
            ContainerState::DecodeComplete
        } else {
            ContainerState::Decoding
        };
    }

    /// Decodes every channel. See [`CompressedImage::decode_channels`].
    pub fn decode(&mut self, raw: &mut RawImage, time_budget: Duration) -> Result<bool, J2cError> {
        self.decode_channels(raw, time_budget, 0, MAX_COMPONENT_COUNT as u8)
    }

    /// Advances the decode of `max_channel_count` channels starting at `first_channel`.
    ///
    /// Returns `Ok(false)` while the time budget keeps running out or the
    /// available bytes do not yet hold the coarsest resolution; call again to
    /// resume. `raw` is only written once the decode completes, resized to
    /// the dimensions of the achieved discard level.
    pub fn decode_channels(
        &mut self,
        raw: &mut RawImage,
        time_budget: Duration,
        first_channel: u8,
        max_channel_count: u8,
    ) -> Result<bool, J2cError> {
        if self.metadata.is_none() {
            self.update_data()?;
        }
        self.ensure_backend()?;
        let level = self.target_discard_level()?;
        let key = DecodeKey {
            available: self.available_bytes(),
            discard_level: level,
            first_channel,
            max_channel_count,
        };

        if self.state == ContainerState::DecodeComplete && self.completed_decode == Some(key) {
            return Ok(true);
        }
        let restart = self.active_decode != Some(key);
        if restart {
            if self.active_decode.is_some() {
                debug!(?key, "decode inputs changed, restarting");
            }
            self.active_decode = Some(key);
        }
        self.raw_discard_level = Some(level);
        self.set_decoding_done(false);

        let total_len = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.codestream_length)
            .map_or(self.data.len(), |length| length.max(self.data.len()));
        let Some(backend) = self.backend.as_mut() else {
            return Err(J2cError::BackendUnavailable);
        };
        if restart {
            backend.reset();
        }
        let request = DecodeRequest {
            data: &self.data[..key.available],
            total_len,
            discard_level: level,
            first_channel,
            max_channel_count,
            time_budget,
        };
        match backend.decode(&request, raw) {
            Ok(true) => {
                debug!(
                    discard_level = level,
                    bytes = key.available,
                    backend = backend.name(),
                    "decode complete"
                );
                self.active_decode = None;
                self.completed_decode = Some(key);
                self.set_decoding_done(true);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                warn!(%err, "decode failed");
                backend.reset();
                self.active_decode = None;
                self.completed_decode = None;
                self.decoding_complete = false;
                self.state = ContainerState::DecodeFailed;
                Err(err)
            }
        }
    }

    pub fn encode(&mut self, raw: &RawImage, time_budget: Duration) -> Result<(), J2cError> {
        self.encode_with_comment(raw, "", time_budget)
    }

    /// Encodes `raw`, replacing the held bytes. A non-empty comment is stored
    /// in a COM segment behind the `LL_` prefix.
    pub fn encode_with_comment(
        &mut self,
        raw: &RawImage,
        comment: &str,
        time_budget: Duration,
    ) -> Result<(), J2cError> {
        self.ensure_backend()?;
        let Some(backend) = self.backend.as_mut() else {
            return Err(J2cError::BackendUnavailable);
        };
        backend.reset();
        self.state = ContainerState::Encoding;

        let params = EncodeParams {
            rate: self.rate,
            reversible: self.reversible,
            comment: (!comment.is_empty()).then(|| comment.to_owned()),
            time_budget,
        };
        let stream = match backend.encode(raw, &params) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "encode failed");
                self.state = ContainerState::EncodeFailed;
                return Err(err);
            }
        };
        info!(
            width = raw.width(),
            height = raw.height(),
            bytes = stream.len(),
            reversible = self.reversible,
            "image encoded"
        );

        self.set_data(stream);
        self.state = ContainerState::Encoding;
        if let Err(err) = self.update_data() {
            self.state = ContainerState::EncodeFailed;
            return Err(err);
        }
        self.state = ContainerState::EncodeComplete;
        Ok(())
    }

    /// Takes `data` after a header-only format check and parses its metadata.
    pub fn validate(&mut self, data: Vec<u8>) -> Result<(), J2cError> {
        let valid = match self.backend.as_ref() {
            Some(backend) => backend.validate(&data),
            None => validate_codestream(&data, data.len()),
        };
        if !valid {
            return Err(J2cError::MalformedStream("codestream failed validation"));
        }
        self.set_data(data);
        self.update_data()
    }

    pub fn load_and_validate(&mut self, path: impl AsRef<Path>) -> Result<(), J2cError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = data.len(), "codestream loaded");
        if data.is_empty() {
            return Err(J2cError::MalformedStream("codestream file is empty"));
        }
        self.validate(data)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), J2cError> {
        if self.data.is_empty() {
            return Err(J2cError::InvalidOperation("no codestream to save"));
        }
        std::fs::write(path, &self.data)?;
        Ok(())
    }

    /// Caps the bytes a decode may use, clamped to the buffer.
    ///
    /// While a decode is running or complete, decreases are ignored. An
    /// increase makes the next decode restart at the finer level it allows.
    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        let clamped = max_bytes.min(self.data.len());
        if matches!(
            self.state,
            ContainerState::Decoding | ContainerState::DecodeComplete
        ) {
            let current = self.available_bytes();
            if clamped < current {
                warn!(requested = max_bytes, current, "max_bytes cannot shrink during a decode");
                return;
            }
        }
        self.max_bytes = Some(clamped);
        self.update_raw_discard_level();
    }

    pub fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.rate = if rate.is_finite() { rate } else { 0.0 };
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn set_reversible(&mut self, reversible: bool) {
        self.reversible = reversible;
    }

    pub fn reversible(&self) -> bool {
        self.reversible
    }

    /// Minimum discard level for the next decode, capped at the stream's maximum.
    pub fn set_discard_level(&mut self, level: u8) {
        self.discard_level = match self.metadata.as_ref() {
            Some(metadata) => level.min(metadata.max_discard_level),
            None => level,
        };
        self.update_raw_discard_level();
    }

    pub fn discard_level(&self) -> u8 {
        self.discard_level
    }

    pub fn apply_config(&mut self, config: &J2cConfig) {
        self.set_rate(config.rate);
        self.set_reversible(config.reversible);
    }

    /// Discard level of the last or next decode.
    ///
    /// `None` before the header is parsed, and while `max_bytes` is too small
    /// for any level (the next decode reports `InsufficientBudget`).
    pub fn raw_discard_level(&self) -> Option<u8> {
        self.raw_discard_level
    }

    pub fn is_decoding_complete(&self) -> bool {
        self.decoding_complete
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn metadata(&self) -> Option<&ImageMetadata> {
        self.metadata.as_ref()
    }

    /// Full-resolution width and height, zero until the header is parsed.
    pub fn dimensions(&self) -> (u32, u32) {
        self.metadata
            .as_ref()
            .map_or((0, 0), |metadata| (metadata.width, metadata.height))
    }

    pub fn components(&self) -> u8 {
        self.metadata.as_ref().map_or(0, |metadata| metadata.components)
    }

    pub fn max_discard_level(&self) -> u8 {
        self.metadata
            .as_ref()
            .map_or(0, |metadata| metadata.max_discard_level)
    }

    pub fn comments(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map_or(&[], |metadata| metadata.comments.as_slice())
    }

    /// Text of the first comment written by this library, prefix removed.
    pub fn viewer_comment(&self) -> Option<&str> {
        self.comments()
            .iter()
            .find_map(|comment| comment.strip_prefix(VIEWER_COMMENT_PREFIX))
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|backend| backend.name())
    }

    pub fn calc_header_size(&self) -> usize {
        budget::header_size()
    }

    /// Bytes needed for `discard_level` at the container's encode rate.
    pub fn calc_data_size(&self, discard_level: u8) -> usize {
        let (width, height) = self.dimensions();
        budget::data_size(width, height, self.components(), discard_level, self.rate)
    }

    /// Finest discard level a prefix of `bytes` supports at the default rate.
    pub fn calc_discard_level_bytes(&self, bytes: usize) -> Option<u8> {
        let (width, height) = self.dimensions();
        budget::discard_level_within(
            width,
            height,
            self.components(),
            bytes,
            DEFAULT_RATE,
            self.max_discard_level(),
        )
    }

    pub fn calc_header_size_j2c() -> usize {
        budget::header_size()
    }

    pub fn calc_data_size_j2c(
        width: u32,
        height: u32,
        components: u8,
        discard_level: u8,
        rate: f32,
    ) -> usize {
        budget::data_size(width, height, components, discard_level, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ReferenceBackend;

    fn container() -> CompressedImage {
        CompressedImage::with_backend(Box::new(ReferenceBackend::new()))
    }

    fn checker(width: u32, height: u32, components: u8) -> RawImage {
        let data = (0..width * height * components as u32)
            .map(|i| if (i / components as u32) % 7 < 3 { 200 } else { 30 })
            .collect();
        RawImage::from_data(width, height, components, data).unwrap()
    }

    fn encoded(width: u32, height: u32, components: u8) -> CompressedImage {
        let mut image = container();
        image.set_reversible(true);
        image
            .encode(&checker(width, height, components), Duration::ZERO)
            .unwrap();
        image
    }

    #[test]
    fn test_new_container_is_empty() {
        let image = container();
        assert_eq!(image.state(), ContainerState::Empty);
        assert_eq!(image.dimensions(), (0, 0));
        assert_eq!(image.raw_discard_level(), None);
        assert_eq!(image.max_bytes(), None);
        assert!(!image.is_decoding_complete());
    }

    #[test]
    fn test_update_data_rejects_short_buffers() {
        let mut image = container();
        assert!(matches!(image.update_data(), Err(J2cError::MalformedStream(_))));
        image.set_data(vec![0xFF, 0x4F, 0xFF, 0x51]);
        assert!(matches!(image.update_data(), Err(J2cError::MalformedStream(_))));
        assert_eq!(image.state(), ContainerState::Empty);
    }

    #[test]
    fn test_encode_parses_own_stream() {
        let image = encoded(48, 32, 3);
        assert_eq!(image.state(), ContainerState::EncodeComplete);
        assert_eq!(image.dimensions(), (48, 32));
        assert_eq!(image.components(), 3);
        assert_eq!(image.max_discard_level(), 5);
        assert_eq!(image.raw_discard_level(), Some(0));
    }

    #[test]
    fn test_max_bytes_is_clamped_to_buffer() {
        let mut image = encoded(16, 16, 1);
        let len = image.data().len();
        image.set_max_bytes(len + 1000);
        assert_eq!(image.max_bytes(), Some(len));
    }

    #[test]
    fn test_max_bytes_only_grows_once_decoding() {
        let mut image = encoded(64, 64, 3);
        let len = image.data().len();
        image.set_max_bytes(len);
        let mut raw = RawImage::default();
        assert!(image.decode(&mut raw, Duration::ZERO).unwrap());
        image.set_max_bytes(len / 2);
        assert_eq!(image.max_bytes(), Some(len));
    }

    #[test]
    fn test_decode_without_backend() {
        let mut image = CompressedImage::build(None);
        image.set_data(vec![0; 100]);
        // The registry is process-wide; only assert when nothing is open.
        if backend::active_backend().is_none() {
            assert!(matches!(
                image.decode(&mut RawImage::default(), Duration::ZERO),
                Err(J2cError::BackendUnavailable)
            ));
        }
    }

    #[test]
    fn test_insufficient_budget_leaves_state() {
        let mut image = encoded(64, 64, 1);
        image.set_max_bytes(40);
        let state = image.state();
        let mut raw = RawImage::default();
        let err = image.decode(&mut raw, Duration::ZERO).unwrap_err();
        assert!(matches!(err, J2cError::InsufficientBudget { available: 40, .. }));
        assert_eq!(image.raw_discard_level(), None);
        assert_eq!(image.state(), state);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_calc_helpers() {
        let mut image = encoded(64, 64, 1);
        assert_eq!(image.calc_header_size(), CompressedImage::calc_header_size_j2c());
        image.set_rate(1.0);
        assert_eq!(image.calc_data_size(0), 4096);
        assert_eq!(image.calc_data_size(1), 1024);
        assert_eq!(image.calc_discard_level_bytes(512), Some(0));
        assert_eq!(image.calc_discard_level_bytes(128), Some(1));
        assert_eq!(image.calc_discard_level_bytes(10), None);
        assert_eq!(CompressedImage::calc_data_size_j2c(64, 64, 1, 0, 0.0), 512);
    }

    #[test]
    fn test_discard_level_is_capped() {
        let mut image = encoded(16, 16, 1);
        image.set_discard_level(9);
        assert_eq!(image.discard_level(), 4);
        assert_eq!(image.raw_discard_level(), Some(4));
    }
}
