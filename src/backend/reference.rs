//! Single-threaded backend.
//!
//! Decode work is sliced one component and one resolution at a time, which
//! keeps each resumable step short under a tight time budget.

use super::engine::{self, DecodeJob, EncodeGeometry, Schedule};
use super::{DecodeRequest, EncodeParams, ImageMetadata, J2cBackend};
use crate::error::J2cError;
use crate::jpeg2000::packet::ZeroRunCoder;
use crate::raw_image::RawImage;
use tracing::debug;

#[derive(Default)]
pub struct ReferenceBackend {
    job: Option<DecodeJob>,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl J2cBackend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn extract_metadata(&mut self, data: &[u8]) -> Result<ImageMetadata, J2cError> {
        engine::read_stream(data).map(|(metadata, _)| metadata)
    }

    fn decode(&mut self, request: &DecodeRequest, raw: &mut RawImage) -> Result<bool, J2cError> {
        engine::drive(&mut self.job, request, raw, Schedule::PerComponent)
    }

    fn encode(&mut self, raw: &RawImage, params: &EncodeParams) -> Result<Vec<u8>, J2cError> {
        let geometry = EncodeGeometry::of(raw)?;
        let resolutions: Vec<Vec<Vec<i32>>> = engine::prepare_planes(raw, &geometry)
            .into_iter()
            .map(|plane| engine::analyze(plane, &geometry))
            .collect();
        debug!(
            width = geometry.width,
            height = geometry.height,
            levels = geometry.levels,
            "wavelet analysis done"
        );

        engine::rate_controlled(&geometry, params, |shift| {
            let packed: Vec<Vec<Vec<u8>>> = resolutions
                .iter()
                .map(|component| {
                    engine::pack_component(&ZeroRunCoder, component, geometry.levels, shift)
                })
                .collect();
            engine::write_codestream(&geometry, &ZeroRunCoder, &packed, shift, params)
        })
    }

    fn reset(&mut self) {
        self.job = None;
    }
}
