//! Codec backends.
//!
//! A backend owns the wavelet and entropy coding. The container drives it
//! through [`J2cBackend`] and never sees its internals. One backend kind is
//! opened per process; every container created afterwards instantiates it.

mod engine;
pub mod parallel;
pub mod reference;

use crate::config::J2cConfig;
use crate::error::J2cError;
use crate::jpeg2000::validate_codestream;
use crate::raw_image::RawImage;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub use parallel::ParallelBackend;
pub use reference::ReferenceBackend;

/// Header facts a backend reports for a codestream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub max_discard_level: u8,
    pub reversible: bool,
    /// Text of every Latin-1 COM segment, in stream order.
    pub comments: Vec<String>,
    /// Total codestream length (through EOC) when the tile-part declares it.
    pub codestream_length: Option<usize>,
}

/// One decode call.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    /// The bytes the decode may use; everything past the byte budget is cut off.
    pub data: &'a [u8],
    /// Length of the whole buffer, so a backend can tell a short prefix from a corrupt stream.
    pub total_len: usize,
    pub discard_level: u8,
    pub first_channel: u8,
    pub max_channel_count: u8,
    /// `Duration::ZERO` runs to completion.
    pub time_budget: Duration,
}

impl DecodeRequest<'_> {
    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.total_len
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncodeParams {
    /// Compressed bytes per raw sample; zero selects the default rate.
    pub rate: f32,
    pub reversible: bool,
    pub comment: Option<String>,
    pub time_budget: Duration,
}

pub trait J2cBackend: Send {
    fn name(&self) -> &'static str;

    fn extract_metadata(&mut self, data: &[u8]) -> Result<ImageMetadata, J2cError>;

    /// Advances the decode. Returns `Ok(false)` when the time budget ran out
    /// or the bytes do not yet hold the coarsest resolution; calling again
    /// resumes where the previous call stopped.
    fn decode(&mut self, request: &DecodeRequest, raw: &mut RawImage) -> Result<bool, J2cError>;

    fn encode(&mut self, raw: &RawImage, params: &EncodeParams) -> Result<Vec<u8>, J2cError>;

    /// Drops any in-flight decode state.
    fn reset(&mut self);

    fn validate(&self, data: &[u8]) -> bool {
        validate_codestream(data, data.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Reference,
    Parallel,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Reference, BackendKind::Parallel];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Reference => "reference",
            BackendKind::Parallel => "parallel",
        }
    }

    pub fn instantiate(self) -> Box<dyn J2cBackend> {
        match self {
            BackendKind::Reference => Box::new(ReferenceBackend::new()),
            BackendKind::Parallel => Box::new(ParallelBackend::new()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = J2cError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" => Ok(BackendKind::Reference),
            "parallel" => Ok(BackendKind::Parallel),
            other => Err(J2cError::InvalidConfig(format!("unknown backend '{other}'"))),
        }
    }
}

static ACTIVE_BACKEND: Lazy<RwLock<Option<BackendKind>>> = Lazy::new(|| RwLock::new(None));

/// Selects the backend for the process. Re-opening the same kind is a no-op.
pub fn open_backend(kind: BackendKind) -> Result<(), J2cError> {
    let mut active = ACTIVE_BACKEND.write();
    match *active {
        Some(current) if current == kind => Ok(()),
        Some(_) => Err(J2cError::InvalidOperation(
            "a different backend is already open",
        )),
        None => {
            info!(backend = %kind, "backend opened");
            *active = Some(kind);
            Ok(())
        }
    }
}

pub fn close_backend() {
    if let Some(kind) = ACTIVE_BACKEND.write().take() {
        info!(backend = %kind, "backend closed");
    }
}

pub fn active_backend() -> Option<BackendKind> {
    *ACTIVE_BACKEND.read()
}

/// A fresh instance of the open backend.
pub fn create_backend() -> Result<Box<dyn J2cBackend>, J2cError> {
    active_backend()
        .map(BackendKind::instantiate)
        .ok_or(J2cError::BackendUnavailable)
}

/// Opens the backend named by `config`.
pub fn open_from_config(config: &J2cConfig) -> Result<(), J2cError> {
    open_backend(config.backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("Parallel".parse::<BackendKind>().unwrap(), BackendKind::Parallel);
        assert_eq!(" reference ".parse::<BackendKind>().unwrap(), BackendKind::Reference);
        assert!("kakadu".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default().to_string(), "reference");
    }

    #[test]
    fn test_instances_report_their_kind() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.instantiate().name(), kind.name());
        }
    }
}
