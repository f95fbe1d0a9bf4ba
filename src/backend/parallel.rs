//! Multi-threaded backend on the rayon pool.
//!
//! Components are transformed and packed in parallel, packets are
//! LZ4-compressed, and each resumable decode step covers one resolution of
//! every component.

use super::engine::{self, DecodeJob, EncodeGeometry, Schedule};
use super::{DecodeRequest, EncodeParams, ImageMetadata, J2cBackend};
use crate::error::J2cError;
use crate::jpeg2000::packet::Lz4Coder;
use crate::raw_image::RawImage;
use rayon::prelude::*;
use tracing::debug;

#[derive(Default)]
pub struct ParallelBackend {
    job: Option<DecodeJob>,
}

impl ParallelBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl J2cBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn extract_metadata(&mut self, data: &[u8]) -> Result<ImageMetadata, J2cError> {
        engine::read_stream(data).map(|(metadata, _)| metadata)
    }

    fn decode(&mut self, request: &DecodeRequest, raw: &mut RawImage) -> Result<bool, J2cError> {
        engine::drive(&mut self.job, request, raw, Schedule::PerResolution)
    }

    fn encode(&mut self, raw: &RawImage, params: &EncodeParams) -> Result<Vec<u8>, J2cError> {
        let geometry = EncodeGeometry::of(raw)?;
        let resolutions: Vec<Vec<Vec<i32>>> = engine::prepare_planes(raw, &geometry)
            .into_par_iter()
            .map(|plane| engine::analyze(plane, &geometry))
            .collect();
        debug!(
            components = resolutions.len(),
            threads = rayon::current_num_threads(),
            "parallel wavelet analysis done"
        );

        engine::rate_controlled(&geometry, params, |shift| {
            let packed: Vec<Vec<Vec<u8>>> = resolutions
                .par_iter()
                .map(|component| {
                    engine::pack_component(&Lz4Coder, component, geometry.levels, shift)
                })
                .collect();
            engine::write_codestream(&geometry, &Lz4Coder, &packed, shift, params)
        })
    }

    fn reset(&mut self) {
        self.job = None;
    }
}
