//! Coding pipeline shared by the bundled backends.
//!
//! Tile body layout, after SOD:
//!
//! ```text
//! coder id (1 byte)
//! for resolution r in 0..=L, for component c:
//!     packet length (u32, big endian) + packet bytes
//! ```
//!
//! Resolution 0 carries the LL band of the coarsest level. Resolution r >= 1
//! carries the HL, LH and HH bands of decomposition level L - r + 1, each in
//! row-major order. A prefix of the stream therefore holds every packet up to
//! some resolution, and missing packets decode as zero coefficients.

use super::{DecodeRequest, EncodeParams, ImageMetadata};
use crate::budget;
use crate::constants::{
    GUARD_BITS, MAX_COMPONENT_COUNT, MAX_IMAGE_DIMENSION, MAX_QUANTIZATION_SHIFT,
    MIN_HEADER_SIZE, VIEWER_COMMENT_PREFIX,
};
use crate::error::J2cError;
use crate::jpeg2000::dwt::{Dwt53, SubbandDims, Subbands, level_dims};
use crate::jpeg2000::image::{J2kCod, J2kQcd, ProgressionOrder, QuantizationStyle, WAVELET_53};
use crate::jpeg2000::packet::{PacketCoder, coder_by_id};
use crate::jpeg2000::{J2kParser, J2kWriter};
use crate::raw_image::RawImage;
use crate::stream_reader::CodestreamReader;
use rayon::prelude::*;
use std::borrow::Cow;
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Sample precision handled by the bundled backends.
pub(crate) const SAMPLE_DEPTH: u8 = 8;
const LEVEL_SHIFT: i32 = 1 << (SAMPLE_DEPTH - 1);
const CODEBLOCK_EXPONENT: u8 = 4;
// Bound on dequantized coefficients. 8-bit samples through the colour and
// 5-3 transforms stay well below it, and inverse lifting from it fits i32.
const MAX_COEFFICIENT: u32 = 1 << 17;

/// Analysis gain exponent of a subband, indexed in QCD order (LL, then HL/LH/HH per level).
fn subband_gain(subband: usize) -> u8 {
    match subband {
        0 => 0,
        i if (i - 1) % 3 == 2 => 2,
        _ => 1,
    }
}

/// Quantization shift applied to the packet of `resolution` for a global shift `s`.
///
/// The finest level takes the full shift, each coarser level one bit less,
/// and the LL band is never quantized.
pub(crate) fn resolution_shift(shift: u8, levels: u8, resolution: u8) -> u8 {
    if resolution == 0 {
        0
    } else {
        shift.saturating_sub(levels - resolution)
    }
}

/// Everything the decoder needs from the headers.
#[derive(Debug, Clone)]
pub(crate) struct StreamLayout {
    pub width: u32,
    pub height: u32,
    pub components: usize,
    pub levels: u8,
    pub mct: bool,
    /// Dequantization shift per subband, in QCD order.
    pub shifts: Vec<u8>,
    pub body_offset: usize,
    pub body_end: Option<usize>,
}

impl StreamLayout {
    /// Coefficient count of the packet at `resolution`.
    fn packet_len(&self, resolution: u8) -> usize {
        if resolution == 0 {
            let (w, h) = level_dims(self.width, self.height, self.levels);
            w as usize * h as usize
        } else {
            let (w, h) = level_dims(self.width, self.height, self.levels - resolution);
            SubbandDims::of(w, h).detail_len()
        }
    }
}

fn subband_shifts(qcd: &J2kQcd, levels: u8) -> Result<Vec<u8>, J2cError> {
    let count = 3 * levels as usize + 1;
    if qcd.step_sizes.len() < count {
        return Err(J2cError::MalformedStream("QCD lacks a step size for every subband"));
    }
    match qcd.style() {
        QuantizationStyle::None => Ok(vec![0; count]),
        QuantizationStyle::ScalarDerived => Err(J2cError::MalformedStream(
            "derived quantization is not supported",
        )),
        QuantizationStyle::ScalarExpounded => (0..count)
            .map(|subband| {
                let exponent = qcd.exponent(subband).unwrap_or_default();
                (SAMPLE_DEPTH + subband_gain(subband))
                    .checked_sub(exponent)
                    .filter(|&shift| shift < 31)
                    .ok_or(J2cError::MalformedStream(
                        "quantization step finer than the sample precision",
                    ))
            })
            .collect(),
    }
}

/// Parses the headers and checks the stream is one the bundled backends can decode.
pub(crate) fn read_stream(data: &[u8]) -> Result<(ImageMetadata, StreamLayout), J2cError> {
    let reader = &mut CodestreamReader::new(data);
    let (header, tile_part) = J2kParser::new(reader).parse_headers()?;

    let (width, height) = (header.width(), header.height());
    if !(1..=MAX_IMAGE_DIMENSION).contains(&width) || !(1..=MAX_IMAGE_DIMENSION).contains(&height)
    {
        return Err(J2cError::MalformedStream("image dimensions out of range"));
    }
    if header.component_count() > MAX_COMPONENT_COUNT as usize {
        return Err(J2cError::MalformedStream("too many components"));
    }
    let supported = header.components.iter().all(|component| {
        component.depth == SAMPLE_DEPTH
            && !component.is_signed
            && component.dx == 1
            && component.dy == 1
    });
    if !supported {
        return Err(J2cError::MalformedStream(
            "only 8-bit unsigned components without subsampling are supported",
        ));
    }
    if !header.is_single_tile() {
        return Err(J2cError::MalformedStream("multi-tile codestreams are not supported"));
    }

    let (cod, qcd) = match (&header.cod, &header.qcd) {
        (Some(cod), Some(qcd)) => (cod, qcd),
        _ => return Err(J2cError::MalformedStream("main header lacks COD or QCD")),
    };
    if cod.transformation != WAVELET_53 {
        return Err(J2cError::MalformedStream("only the 5-3 wavelet is supported"));
    }
    let levels = cod.decomposition_levels;
    let shifts = subband_shifts(qcd, levels)?;
    let components = header.component_count();

    let metadata = ImageMetadata {
        width,
        height,
        components: components as u8,
        max_discard_level: levels.min(budget::max_discard_level(width, height)),
        reversible: header.is_reversible(),
        comments: header
            .comments
            .iter()
            .filter_map(|comment| comment.text().map(Cow::into_owned))
            .collect(),
        codestream_length: tile_part.end().map(|end| end + 2),
    };
    let layout = StreamLayout {
        width,
        height,
        components,
        levels,
        mct: cod.mct != 0 && components >= 3,
        shifts,
        body_offset: tile_part.data_offset,
        body_end: tile_part.end(),
    };
    Ok((metadata, layout))
}

/// Byte ranges of the packets present in the available prefix.
struct PacketIndex {
    coder: &'static dyn PacketCoder,
    components: usize,
    packets: Vec<Option<Range<usize>>>,
}

impl PacketIndex {
    /// `None` until the coder id byte has arrived.
    fn build(data: &[u8], layout: &StreamLayout) -> Result<Option<Self>, J2cError> {
        let limit = layout.body_end.map_or(data.len(), |end| end.min(data.len()));
        let Some(&coder_id) = data.get(layout.body_offset).filter(|_| layout.body_offset < limit)
        else {
            return Ok(None);
        };
        let coder = coder_by_id(coder_id)?;

        let total = (layout.levels as usize + 1) * layout.components;
        let mut packets = vec![None; total];
        let mut position = layout.body_offset + 1;
        for slot in packets.iter_mut() {
            let Some(prefix) = data.get(position..position + 4).filter(|_| position + 4 <= limit)
            else {
                break;
            };
            let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            let start = position + 4;
            let end = start.saturating_add(length);
            if end > limit {
                break;
            }
            *slot = Some(start..end);
            position = end;
        }
        Ok(Some(Self {
            coder,
            components: layout.components,
            packets,
        }))
    }

    fn get(&self, resolution: u8, component: usize) -> Option<Range<usize>> {
        self.packets
            .get(resolution as usize * self.components + component)
            .cloned()
            .flatten()
    }

    fn available(&self) -> usize {
        self.packets.iter().filter(|packet| packet.is_some()).count()
    }
}

/// Rebuilds coefficients from quantization indices, rejecting indices no
/// valid 8-bit stream produces.
fn dequantize(coefficients: &mut [i32], shift: u8) -> Result<(), J2cError> {
    let limit = MAX_COEFFICIENT >> shift.min(31);
    if coefficients.iter().any(|value| value.unsigned_abs() > limit) {
        return Err(J2cError::MalformedStream("coefficient out of range"));
    }
    if shift == 0 {
        return Ok(());
    }
    let half = 1i32 << (shift - 1);
    for value in coefficients.iter_mut().filter(|value| **value != 0) {
        let magnitude = (value.unsigned_abs() << shift) as i32 + half;
        *value = if *value < 0 { -magnitude } else { magnitude };
    }
    Ok(())
}

fn quantize(coefficients: &mut [i32], shift: u8) {
    if shift == 0 {
        return;
    }
    for value in coefficients.iter_mut() {
        let magnitude = (value.unsigned_abs() >> shift) as i32;
        *value = if *value < 0 { -magnitude } else { magnitude };
    }
}

// Encode

/// Geometry of an image about to be encoded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EncodeGeometry {
    pub width: u32,
    pub height: u32,
    pub components: usize,
    pub levels: u8,
    pub mct: bool,
}

impl EncodeGeometry {
    pub fn of(raw: &RawImage) -> Result<Self, J2cError> {
        let (width, height) = (raw.width(), raw.height());
        if !(1..=MAX_IMAGE_DIMENSION).contains(&width) || !(1..=MAX_IMAGE_DIMENSION).contains(&height)
        {
            return Err(J2cError::InvalidArgument("image dimensions out of range"));
        }
        let components = raw.components() as usize;
        if !(1..=MAX_COMPONENT_COUNT as usize).contains(&components) {
            return Err(J2cError::InvalidArgument("component count out of range"));
        }
        Ok(Self {
            width,
            height,
            components,
            levels: budget::max_discard_level(width, height),
            mct: components >= 3,
        })
    }
}

/// Splits the interleaved samples into DC-shifted planes, decorrelating
/// the first three with the reversible colour transform.
pub(crate) fn prepare_planes(raw: &RawImage, geometry: &EncodeGeometry) -> Vec<Vec<i32>> {
    let stride = geometry.components;
    let mut planes: Vec<Vec<i32>> = (0..stride)
        .map(|component| {
            raw.data()
                .iter()
                .skip(component)
                .step_by(stride)
                .map(|&sample| sample as i32 - LEVEL_SHIFT)
                .collect()
        })
        .collect();

    if geometry.mct {
        let (rg, rest) = planes.split_at_mut(2);
        let (red, green) = rg.split_at_mut(1);
        for ((r, g), b) in red[0].iter_mut().zip(green[0].iter_mut()).zip(rest[0].iter_mut()) {
            let (red, green, blue) = (*r, *g, *b);
            *r = (red + 2 * green + blue) >> 2;
            *g = blue - green;
            *b = red - green;
        }
    }
    planes
}

/// Multi-level forward transform of one plane, returned as packets by resolution.
pub(crate) fn analyze(plane: Vec<i32>, geometry: &EncodeGeometry) -> Vec<Vec<i32>> {
    let levels = geometry.levels as usize;
    let mut details = Vec::with_capacity(levels);
    let mut current = plane;
    let (mut width, mut height) = (geometry.width, geometry.height);
    for _ in 0..levels {
        let bands = Dwt53::forward_2d(&current, width, height);
        let mut detail = bands.hl;
        detail.extend_from_slice(&bands.lh);
        detail.extend_from_slice(&bands.hh);
        details.push(detail);
        current = bands.ll;
        width = width.div_ceil(2);
        height = height.div_ceil(2);
    }
    // details[0] is the finest level; resolution 1 wants the coarsest.
    std::iter::once(current).chain(details.into_iter().rev()).collect()
}

/// Quantizes and packs the resolutions of one component.
pub(crate) fn pack_component(
    coder: &dyn PacketCoder,
    resolutions: &[Vec<i32>],
    levels: u8,
    shift: u8,
) -> Vec<Vec<u8>> {
    resolutions
        .iter()
        .enumerate()
        .map(|(resolution, coefficients)| {
            let shift = resolution_shift(shift, levels, resolution as u8);
            if shift == 0 {
                return coder.pack(coefficients);
            }
            let mut quantized = coefficients.clone();
            quantize(&mut quantized, shift);
            coder.pack(&quantized)
        })
        .collect()
}

fn quantization_segment(levels: u8, shift: u8, reversible: bool) -> J2kQcd {
    let style = if reversible { 0 } else { 2 };
    let step_sizes = (0..3 * levels as usize + 1)
        .map(|subband| {
            let resolution = if subband == 0 {
                0
            } else {
                ((subband - 1) / 3 + 1) as u8
            };
            let exponent = SAMPLE_DEPTH + subband_gain(subband)
                - resolution_shift(shift, levels, resolution);
            (exponent as u16) << 11
        })
        .collect();
    J2kQcd {
        quant_style: (GUARD_BITS << 5) | style,
        step_sizes,
    }
}

/// Assembles a complete codestream from packed resolutions (`packed[component][resolution]`).
pub(crate) fn write_codestream(
    geometry: &EncodeGeometry,
    coder: &dyn PacketCoder,
    packed: &[Vec<Vec<u8>>],
    shift: u8,
    params: &EncodeParams,
) -> Result<Vec<u8>, J2cError> {
    let body_len: usize = packed.iter().flatten().map(|packet| packet.len() + 4).sum();
    let mut writer = J2kWriter::with_capacity(MIN_HEADER_SIZE + body_len + 64);
    writer.write_soc();
    writer.write_siz(
        geometry.width,
        geometry.height,
        geometry.components as u16,
        SAMPLE_DEPTH,
    )?;
    writer.write_cod(&J2kCod {
        progression_order: ProgressionOrder::Rlcp as u8,
        number_of_layers: 1,
        mct: geometry.mct as u8,
        decomposition_levels: geometry.levels,
        codeblock_width_exp: CODEBLOCK_EXPONENT,
        codeblock_height_exp: CODEBLOCK_EXPONENT,
        transformation: WAVELET_53,
        ..Default::default()
    })?;
    writer.write_qcd(&quantization_segment(geometry.levels, shift, params.reversible))?;
    if let Some(comment) = params.comment.as_deref().filter(|text| !text.is_empty()) {
        // COM text is registered as Latin-1; only its ASCII range is written.
        if !comment.is_ascii() || comment.contains('\0') {
            return Err(J2cError::InvalidArgument(
                "comment must be ASCII text without NUL",
            ));
        }
        writer.write_com(&format!("{VIEWER_COMMENT_PREFIX}{comment}"))?;
    }

    let sot = writer.write_sot(0, 0, 1);
    writer.write_sod();
    writer.write_byte(coder.id());
    for resolution in 0..=geometry.levels as usize {
        for component in packed {
            let packet = &component[resolution];
            let length = u32::try_from(packet.len())
                .map_err(|_| J2cError::EncodeFailed("packet exceeds 4 GiB"))?;
            writer.write_u32(length);
            writer.write_bytes(packet);
        }
    }
    writer.patch_psot(sot)?;
    writer.write_eoc();
    Ok(writer.finish())
}

/// Runs `build` with increasing quantization shifts until the stream fits the rate.
///
/// Reversible encodes are built once, unquantized.
pub(crate) fn rate_controlled<F>(
    geometry: &EncodeGeometry,
    params: &EncodeParams,
    mut build: F,
) -> Result<Vec<u8>, J2cError>
where
    F: FnMut(u8) -> Result<Vec<u8>, J2cError>,
{
    if params.reversible {
        return build(0);
    }
    let start = Instant::now();
    let target = budget::data_size(
        geometry.width,
        geometry.height,
        geometry.components as u8,
        0,
        params.rate,
    );
    let mut shift = 0;
    let mut stream = build(shift)?;
    while stream.len() > target && shift < MAX_QUANTIZATION_SHIFT {
        if !params.time_budget.is_zero() && start.elapsed() >= params.time_budget {
            warn!(shift, "time budget ran out during rate control");
            break;
        }
        shift += 1;
        stream = build(shift)?;
    }
    if stream.len() > target {
        warn!(bytes = stream.len(), target, "encoded stream exceeds the target rate");
    }
    debug!(shift, bytes = stream.len(), target, "rate control finished");
    Ok(stream)
}

// Decode

/// One resumable unit of decode work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeStep {
    /// Reads the packet of `resolution` for one plane (`Some(slot)`) or all planes.
    Unpack { slot: Option<usize>, resolution: u8 },
    /// Runs the inverse wavelet that brings the plane up to `resolution`.
    Synthesize { slot: Option<usize>, resolution: u8 },
    /// Undoes the colour transform and writes the requested channels.
    Interleave,
}

/// How a backend slices decode work into steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    /// One component and one resolution per step.
    PerComponent,
    /// All components of one resolution per step, spread over the rayon pool.
    PerResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JobKey {
    available: usize,
    discard_level: u8,
    first_channel: u8,
    max_channel_count: u8,
}

impl JobKey {
    fn of(request: &DecodeRequest) -> Self {
        Self {
            available: request.data.len(),
            discard_level: request.discard_level,
            first_channel: request.first_channel,
            max_channel_count: request.max_channel_count,
        }
    }
}

/// Reconstruction state of one component.
struct ComponentPlane {
    component: usize,
    samples: Vec<i32>,
    detail: Vec<i32>,
}

pub(crate) struct DecodeJob {
    key: JobKey,
    layout: StreamLayout,
    index: PacketIndex,
    target: u8,
    channels: Range<usize>,
    planes: Vec<ComponentPlane>,
    plan: Vec<DecodeStep>,
    cursor: usize,
}

impl DecodeJob {
    /// `Ok(None)` when the prefix does not yet hold the coarsest resolution.
    fn start(request: &DecodeRequest, schedule: Schedule) -> Result<Option<Self>, J2cError> {
        let layout = match read_stream(request.data) {
            Ok((_, layout)) => layout,
            Err(err) if request.is_truncated() => {
                debug!(%err, available = request.data.len(), "header not yet complete");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let first = request.first_channel as usize;
        if first >= layout.components {
            return Err(J2cError::InvalidArgument("first channel beyond the component count"));
        }
        if request.max_channel_count == 0 {
            return Err(J2cError::InvalidArgument("at least one channel must be requested"));
        }
        let count = (request.max_channel_count as usize).min(layout.components - first);
        let channels = first..first + count;

        // Colour components are only meaningful together.
        let mut decoded: Vec<usize> = channels.clone().collect();
        if layout.mct && first < 3 {
            decoded.extend(0..3);
            decoded.sort_unstable();
            decoded.dedup();
        }

        let Some(index) = PacketIndex::build(request.data, &layout)? else {
            debug!("tile body not yet started");
            return Ok(None);
        };
        if decoded.iter().any(|&component| index.get(0, component).is_none()) {
            debug!(available = request.data.len(), "coarsest resolution incomplete");
            return Ok(None);
        }

        let target = request.discard_level.min(layout.levels);
        let planes: Vec<ComponentPlane> = decoded
            .into_iter()
            .map(|component| ComponentPlane {
                component,
                samples: Vec::new(),
                detail: Vec::new(),
            })
            .collect();

        let mut plan = Vec::new();
        for resolution in 0..=layout.levels - target {
            match schedule {
                Schedule::PerComponent => {
                    for slot in 0..planes.len() {
                        plan.push(DecodeStep::Unpack {
                            slot: Some(slot),
                            resolution,
                        });
                        if resolution > 0 {
                            plan.push(DecodeStep::Synthesize {
                                slot: Some(slot),
                                resolution,
                            });
                        }
                    }
                }
                Schedule::PerResolution => {
                    plan.push(DecodeStep::Unpack {
                        slot: None,
                        resolution,
                    });
                    if resolution > 0 {
                        plan.push(DecodeStep::Synthesize {
                            slot: None,
                            resolution,
                        });
                    }
                }
            }
        }
        plan.push(DecodeStep::Interleave);

        debug!(
            target,
            steps = plan.len(),
            packets = index.available(),
            components = planes.len(),
            "decode job planned"
        );
        Ok(Some(Self {
            key: JobKey::of(request),
            layout,
            index,
            target,
            channels,
            planes,
            plan,
            cursor: 0,
        }))
    }

    /// Executes steps until the plan is done or the time budget is spent.
    /// At least one step runs per call.
    fn run(
        &mut self,
        data: &[u8],
        raw: &mut RawImage,
        time_budget: Duration,
    ) -> Result<bool, J2cError> {
        let start = Instant::now();
        while self.cursor < self.plan.len() {
            let step = self.plan[self.cursor];
            trace!(?step, cursor = self.cursor, "decode step");
            self.execute(step, data, raw)?;
            self.cursor += 1;
            if self.cursor < self.plan.len()
                && !time_budget.is_zero()
                && start.elapsed() >= time_budget
            {
                debug!(
                    done = self.cursor,
                    total = self.plan.len(),
                    "time budget spent, decode suspended"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn execute(&mut self, step: DecodeStep, data: &[u8], raw: &mut RawImage) -> Result<(), J2cError> {
        let layout = &self.layout;
        let index = &self.index;
        match step {
            DecodeStep::Unpack { slot, resolution } => {
                let read_packet =
                    |plane: &mut ComponentPlane| unpack(plane, layout, index, data, resolution);
                for_planes(&mut self.planes, slot, read_packet)
            }
            DecodeStep::Synthesize { slot, resolution } => {
                let inverse_wavelet = |plane: &mut ComponentPlane| {
                    synthesize(plane, layout, resolution);
                    Ok(())
                };
                for_planes(&mut self.planes, slot, inverse_wavelet)
            }
            DecodeStep::Interleave => {
                self.interleave(raw);
                Ok(())
            }
        }
    }

    fn interleave(&self, raw: &mut RawImage) {
        let (width, height) = level_dims(self.layout.width, self.layout.height, self.target);
        let count = self.channels.len();
        raw.resize(width, height, count as u8);

        let plane_of = |component: usize| {
            self.planes
                .iter()
                .find(|plane| plane.component == component)
                .map(|plane| plane.samples.as_slice())
        };
        let colour = if self.layout.mct {
            match (plane_of(0), plane_of(1), plane_of(2)) {
                (Some(y), Some(cb), Some(cr)) => Some((y, cb, cr)),
                _ => None,
            }
        } else {
            None
        };
        let sources: Vec<Option<&[i32]>> = self.channels.clone().map(plane_of).collect();

        let out = raw.data_mut();
        for pixel in 0..width as usize * height as usize {
            let rgb = colour.map(|(y, cb, cr)| {
                let green = y[pixel] - ((cb[pixel] + cr[pixel]) >> 2);
                [cr[pixel] + green, green, cb[pixel] + green]
            });
            for (slot, component) in self.channels.clone().enumerate() {
                let value = match rgb {
                    Some(rgb) if component < 3 => rgb[component],
                    _ => sources[slot].map_or(0, |samples| samples[pixel]),
                };
                out[pixel * count + slot] = (value + LEVEL_SHIFT).clamp(0, 255) as u8;
            }
        }
    }
}

fn for_planes<F>(planes: &mut [ComponentPlane], slot: Option<usize>, f: F) -> Result<(), J2cError>
where
    F: Fn(&mut ComponentPlane) -> Result<(), J2cError> + Sync + Send,
{
    match slot {
        Some(slot) => {
            let plane = planes
                .get_mut(slot)
                .ok_or(J2cError::InvalidOperation("decode step for an unknown plane"))?;
            f(plane)
        }
        None => planes.par_iter_mut().try_for_each(f),
    }
}

fn unpack(
    plane: &mut ComponentPlane,
    layout: &StreamLayout,
    index: &PacketIndex,
    data: &[u8],
    resolution: u8,
) -> Result<(), J2cError> {
    let count = layout.packet_len(resolution);
    let mut coefficients = match index.get(resolution, plane.component) {
        Some(range) => index.coder.unpack(&data[range], count)?,
        None => {
            trace!(resolution, component = plane.component, "packet missing, zero filled");
            vec![0; count]
        }
    };

    if resolution == 0 {
        dequantize(&mut coefficients, layout.shifts[0])?;
        plane.samples = coefficients;
        return Ok(());
    }
    let (width, height) = level_dims(layout.width, layout.height, layout.levels - resolution);
    let dims = SubbandDims::of(width, height);
    let first_subband = 1 + 3 * (resolution as usize - 1);
    let (hl, rest) = coefficients.split_at_mut(dims.hl_len());
    let (lh, hh) = rest.split_at_mut(dims.lh_len());
    dequantize(hl, layout.shifts[first_subband])?;
    dequantize(lh, layout.shifts[first_subband + 1])?;
    dequantize(hh, layout.shifts[first_subband + 2])?;
    plane.detail = coefficients;
    Ok(())
}

fn synthesize(plane: &mut ComponentPlane, layout: &StreamLayout, resolution: u8) {
    let (width, height) = level_dims(layout.width, layout.height, layout.levels - resolution);
    let dims = SubbandDims::of(width, height);
    let mut detail = std::mem::take(&mut plane.detail);
    let hh = detail.split_off(dims.hl_len() + dims.lh_len());
    let lh = detail.split_off(dims.hl_len());
    let bands = Subbands {
        ll: std::mem::take(&mut plane.samples),
        hl: detail,
        lh,
        hh,
    };
    let mut samples = vec![0; width as usize * height as usize];
    Dwt53::inverse_2d(&bands, width, height, &mut samples);
    plane.samples = samples;
}

/// Advances the job in `slot`, starting or restarting it when the request changed.
pub(crate) fn drive(
    slot: &mut Option<DecodeJob>,
    request: &DecodeRequest,
    raw: &mut RawImage,
    schedule: Schedule,
) -> Result<bool, J2cError> {
    let key = JobKey::of(request);
    if slot.as_ref().is_some_and(|job| job.key != key) {
        debug!("decode request changed, restarting job");
        *slot = None;
    }
    if slot.is_none() {
        match DecodeJob::start(request, schedule)? {
            Some(job) => *slot = Some(job),
            None => return Ok(false),
        }
    }
    let Some(job) = slot.as_mut() else {
        return Ok(false);
    };
    match job.run(request.data, raw, request.time_budget) {
        Ok(true) => {
            *slot = None;
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(err) => {
            *slot = None;
            Err(err)
        }
    }
}
