use j2cstream::constants::DEFAULT_RATE;
use j2cstream::jpeg2000::J2kParser;
use j2cstream::jpeg2000::packet::{PacketCoder, ZeroRunCoder};
use j2cstream::stream_reader::CodestreamReader;
use j2cstream::{
    BackendKind, CompressedImage, ContainerState, J2cError, ParallelBackend, RawImage,
    ReferenceBackend, budget,
};
use std::time::Duration;

fn container(kind: BackendKind) -> CompressedImage {
    CompressedImage::with_backend(kind.instantiate())
}

/// Smooth colour ramp with a small repeating texture on top.
fn textured(width: u32, height: u32, components: u8) -> RawImage {
    let mut data = Vec::with_capacity((width * height * components as u32) as usize);
    for y in 0..height {
        for x in 0..width {
            for c in 0..components as u32 {
                let ramp = (x + y) / 2 + c * 20;
                let texture = (x * 7 + y * 13) % 8;
                data.push((ramp + texture).min(255) as u8);
            }
        }
    }
    RawImage::from_data(width, height, components, data).unwrap()
}

fn encode(kind: BackendKind, raw: &RawImage, reversible: bool) -> Vec<u8> {
    let mut image = container(kind);
    image.set_reversible(reversible);
    image.encode(raw, Duration::ZERO).unwrap();
    image.data().to_vec()
}

/// Replaces the tile body of a single-component stream with zero-run packets
/// built by `packet(resolution, coefficient_count)`.
fn with_tile_body<F>(stream: &[u8], packet: F) -> Vec<u8>
where
    F: Fn(usize, usize) -> Vec<i32>,
{
    let reader = &mut CodestreamReader::new(stream);
    let (header, tile_part) = J2kParser::new(reader).parse_headers().unwrap();
    let levels = header.decomposition_levels();
    let (width, height) = (header.width(), header.height());

    let mut out = stream[..tile_part.data_offset].to_vec();
    out.push(ZeroRunCoder.id());
    for resolution in 0..=levels {
        let area = |level: u8| {
            budget::discarded_dimension(width, level) * budget::discarded_dimension(height, level)
        };
        let count = if resolution == 0 {
            area(levels)
        } else {
            let level = levels - resolution;
            area(level) - area(level + 1)
        };
        let bytes = ZeroRunCoder.pack(&packet(resolution as usize, count as usize));
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&bytes);
    }
    let psot = (out.len() - tile_part.sot_offset) as u32;
    out[tile_part.sot_offset + 6..tile_part.sot_offset + 10].copy_from_slice(&psot.to_be_bytes());
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

fn decode_all(kind: BackendKind, data: &[u8]) -> RawImage {
    let mut image = container(kind);
    image.set_data(data.to_vec());
    let mut raw = RawImage::default();
    assert!(image.decode(&mut raw, Duration::ZERO).unwrap());
    raw
}

fn decode_all_result(
    kind: BackendKind,
    data: &[u8],
    raw: &mut RawImage,
) -> Result<bool, J2cError> {
    let mut image = container(kind);
    image.set_data(data.to_vec());
    image.decode(raw, Duration::ZERO)
}

/// Mean of the source samples covered by each reduced pixel.
fn box_average(source: &RawImage, level: u8) -> Vec<f64> {
    let scale = 1u32 << level;
    let width = budget::discarded_dimension(source.width(), level);
    let height = budget::discarded_dimension(source.height(), level);
    let mut out = Vec::new();
    for y in 0..height {
        for x in 0..width {
            for c in 0..source.components() {
                let mut sum = 0.0;
                let mut count = 0.0;
                for sy in y * scale..((y + 1) * scale).min(source.height()) {
                    for sx in x * scale..((x + 1) * scale).min(source.width()) {
                        sum += source.pixel(sx, sy, c).unwrap() as f64;
                        count += 1.0;
                    }
                }
                out.push(sum / count);
            }
        }
    }
    out
}

#[test]
fn test_lossless_roundtrip_across_backends() {
    for components in [1u8, 3, 4] {
        let raw = textured(97, 61, components);
        for writer in BackendKind::ALL {
            let stream = encode(writer, &raw, true);
            for reader in BackendKind::ALL {
                assert_eq!(
                    decode_all(reader, &stream),
                    raw,
                    "{components} components, {writer} -> {reader}"
                );
            }
        }
    }
}

#[test]
fn test_lossy_encode_meets_default_rate() {
    let raw = textured(256, 256, 3);
    for kind in BackendKind::ALL {
        let stream = encode(kind, &raw, false);
        assert!(stream.len() <= budget::data_size(256, 256, 3, 0, DEFAULT_RATE));

        let decoded = decode_all(kind, &stream);
        assert_eq!((decoded.width(), decoded.height()), (256, 256));
        let error: f64 = raw
            .data()
            .iter()
            .zip(decoded.data())
            .map(|(&a, &b)| (a as f64 - b as f64).abs())
            .sum::<f64>()
            / raw.data().len() as f64;
        assert!(error < 12.0, "{kind}: mean absolute error {error}");
    }
}

#[test]
fn test_quarter_budget_decodes_reduced_level() {
    let raw = textured(256, 256, 3);
    for kind in BackendKind::ALL {
        let stream = encode(kind, &raw, false);
        let quarter = stream.len() / 4;
        let expected = budget::discard_level_for_byte_count(256, 256, 3, quarter, DEFAULT_RATE)
            .expect("a quarter of the stream holds the coarsest level");

        let mut image = container(kind);
        image.set_data(stream);
        image.update_data().unwrap();
        image.set_max_bytes(quarter);
        assert_eq!(image.raw_discard_level(), Some(expected));

        let mut decoded = RawImage::default();
        assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
        assert!(image.is_decoding_complete());
        assert_eq!(image.state(), ContainerState::DecodeComplete);
        assert_eq!(image.raw_discard_level(), Some(expected));
        assert!(expected > 0);
        assert_eq!(decoded.width(), budget::discarded_dimension(256, expected));
        assert_eq!(decoded.height(), budget::discarded_dimension(256, expected));
        assert_eq!(decoded.components(), 3);

        let reference = box_average(&raw, expected);
        let error: f64 = reference
            .iter()
            .zip(decoded.data())
            .map(|(&a, &b)| (a - b as f64).abs())
            .sum::<f64>()
            / reference.len() as f64;
        assert!(error < 16.0, "{kind}: mean absolute error {error}");
    }
}

#[test]
fn test_time_budget_resumes_decode() {
    let raw = textured(128, 128, 3);
    let stream = encode(BackendKind::Reference, &raw, true);

    let mut image = CompressedImage::with_backend(Box::new(ReferenceBackend::new()));
    image.set_data(stream.clone());
    let mut decoded = RawImage::default();
    for _ in 0..3 {
        assert!(!image.decode(&mut decoded, Duration::from_nanos(1)).unwrap());
        assert_eq!(image.state(), ContainerState::Decoding);
        assert!(decoded.is_empty());
    }
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    assert_eq!(decoded, decode_all(BackendKind::Reference, &stream));
    assert_eq!(decoded, raw);
}

#[test]
fn test_parallel_backend_resumes_per_resolution() {
    let raw = textured(64, 64, 4);
    let stream = encode(BackendKind::Parallel, &raw, true);

    let mut image = CompressedImage::with_backend(Box::new(ParallelBackend::new()));
    image.set_data(stream);
    let mut decoded = RawImage::default();
    let mut calls = 1;
    while !image.decode(&mut decoded, Duration::from_nanos(1)).unwrap() {
        calls += 1;
    }
    // Five levels: six unpacks, five syntheses and the interleave.
    assert_eq!(calls, 12);
    assert_eq!(decoded, raw);
}

#[test]
fn test_completed_decode_is_idempotent() {
    let raw = textured(40, 40, 3);
    let mut image = container(BackendKind::Reference);
    image.set_data(encode(BackendKind::Reference, &raw, true));

    let mut decoded = RawImage::default();
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    decoded.data_mut().fill(7);
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    assert!(decoded.data().iter().all(|&sample| sample == 7));
}

#[test]
fn test_budget_increase_refines_decode() {
    let raw = textured(256, 256, 3);
    let stream = encode(BackendKind::Reference, &raw, false);
    let full = stream.len();

    let mut image = container(BackendKind::Reference);
    image.set_data(stream);
    image.update_data().unwrap();
    image.set_max_bytes(full / 4);
    let mut decoded = RawImage::default();
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    let coarse = image.raw_discard_level().unwrap();
    assert!(coarse > 0);

    image.set_max_bytes(full);
    assert_eq!(image.max_bytes(), Some(full));
    assert_eq!(image.raw_discard_level(), Some(0));
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    assert_eq!((decoded.width(), decoded.height()), (256, 256));
}

#[test]
fn test_budget_decrease_ignored_while_decoding() {
    let raw = textured(128, 128, 3);
    let stream = encode(BackendKind::Reference, &raw, true);
    let full = stream.len();

    let mut image = container(BackendKind::Reference);
    image.set_data(stream);
    image.update_data().unwrap();
    image.set_max_bytes(full);
    let mut decoded = RawImage::default();
    assert!(!image.decode(&mut decoded, Duration::from_nanos(1)).unwrap());

    image.set_max_bytes(full / 2);
    assert_eq!(image.max_bytes(), Some(full));
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    assert_eq!(decoded, raw);
}

#[test]
fn test_validate_rejects_truncated_header() {
    let stream = encode(BackendKind::Reference, &textured(32, 32, 1), true);
    let mut image = container(BackendKind::Reference);

    let short = stream[..budget::header_size() - 1].to_vec();
    assert!(matches!(image.validate(short), Err(J2cError::MalformedStream(_))));
    assert!(image.validate(stream[..50].to_vec()).is_err());
    assert_eq!(image.state(), ContainerState::Empty);

    image.validate(stream).unwrap();
    assert_eq!(image.state(), ContainerState::HeaderParsed);
    assert_eq!(image.dimensions(), (32, 32));
}

#[test]
fn test_channel_subsets() {
    let raw = textured(33, 17, 4);
    let stream = encode(BackendKind::Reference, &raw, true);
    let mut image = container(BackendKind::Reference);
    image.set_data(stream);

    let mut alpha = RawImage::default();
    assert!(image.decode_channels(&mut alpha, Duration::ZERO, 3, 1).unwrap());
    assert_eq!(alpha.components(), 1);
    let expected: Vec<u8> = raw.data().iter().skip(3).step_by(4).copied().collect();
    assert_eq!(alpha.data(), expected.as_slice());

    let mut green = RawImage::default();
    assert!(image.decode_channels(&mut green, Duration::ZERO, 1, 1).unwrap());
    let expected: Vec<u8> = raw.data().iter().skip(1).step_by(4).copied().collect();
    assert_eq!(green.data(), expected.as_slice());

    let mut outside = RawImage::default();
    assert!(matches!(
        image.decode_channels(&mut outside, Duration::ZERO, 4, 1),
        Err(J2cError::InvalidArgument(_))
    ));
    assert_eq!(image.state(), ContainerState::DecodeFailed);
}

#[test]
fn test_comment_roundtrip() {
    let mut image = container(BackendKind::Parallel);
    image
        .encode_with_comment(&textured(16, 16, 3), "a1b2c3", Duration::ZERO)
        .unwrap();
    assert_eq!(image.comments(), ["LL_a1b2c3".to_string()]);
    assert_eq!(image.viewer_comment(), Some("a1b2c3"));

    let mut plain = container(BackendKind::Parallel);
    plain.encode(&textured(16, 16, 3), Duration::ZERO).unwrap();
    assert!(plain.comments().is_empty());
    assert_eq!(plain.viewer_comment(), None);

    let err = plain.encode_with_comment(&textured(16, 16, 3), "bad\0text", Duration::ZERO);
    assert!(err.is_err());
    assert_eq!(plain.state(), ContainerState::EncodeFailed);
}

#[test]
fn test_comment_must_be_ascii() {
    let mut image = container(BackendKind::Reference);
    let err = image.encode_with_comment(&textured(16, 16, 1), "café", Duration::ZERO);
    assert!(matches!(err, Err(J2cError::InvalidArgument(_))));
    assert_eq!(image.state(), ContainerState::EncodeFailed);
    assert!(image.data().is_empty());
}

#[test]
fn test_out_of_range_coefficients_fail_the_decode() {
    let stream = encode(BackendKind::Reference, &textured(8, 8, 1), true);

    // Zeros everywhere still decode, which keeps the rebuilt layout honest.
    let zeros = with_tile_body(&stream, |_, count| vec![0; count]);
    let mut decoded = RawImage::default();
    assert!(decode_all_result(BackendKind::Reference, &zeros, &mut decoded).unwrap());
    assert!(decoded.data().iter().all(|&sample| sample == 128));

    let corrupt = with_tile_body(&stream, |resolution, count| {
        let value = if resolution == 0 { 1 } else { i32::MAX };
        vec![value; count]
    });
    for kind in BackendKind::ALL {
        let mut image = container(kind);
        image.set_data(corrupt.clone());
        let mut decoded = RawImage::default();
        let err = image.decode(&mut decoded, Duration::ZERO).unwrap_err();
        assert!(matches!(err, J2cError::MalformedStream(_)), "{kind}: {err}");
        assert_eq!(image.state(), ContainerState::DecodeFailed);
        assert!(!image.is_decoding_complete());
        assert!(decoded.is_empty());
    }
}

#[test]
fn test_save_then_load_and_validate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.j2c");

    let mut image = container(BackendKind::Reference);
    image.set_reversible(true);
    image.encode(&textured(24, 20, 3), Duration::ZERO).unwrap();
    image.save(&path).unwrap();

    let mut loaded = container(BackendKind::Reference);
    loaded.load_and_validate(&path).unwrap();
    assert_eq!(loaded.data(), image.data());
    assert_eq!(loaded.dimensions(), (24, 20));

    let missing = loaded.load_and_validate(dir.path().join("missing.j2c"));
    assert!(matches!(missing, Err(J2cError::Io(_))));
}

#[test]
fn test_streamed_bytes_complete_the_decode() {
    let raw = textured(128, 128, 3);
    let stream = encode(BackendKind::Reference, &raw, true);

    // Header and coder id, but not a single complete packet.
    let mut image = container(BackendKind::Reference);
    image.set_data(stream[..104].to_vec());
    image.update_data().unwrap();
    let mut decoded = RawImage::default();
    assert!(!image.decode(&mut decoded, Duration::ZERO).unwrap());
    assert!(decoded.is_empty());

    image.append_data(&stream[104..]);
    assert!(image.decode(&mut decoded, Duration::ZERO).unwrap());
    assert_eq!(decoded, raw);
}

#[test]
fn test_insufficient_budget_is_reported() {
    let stream = encode(BackendKind::Reference, &textured(64, 64, 3), true);
    let mut image = container(BackendKind::Reference);
    image.set_data(stream);
    image.update_data().unwrap();
    image.set_max_bytes(50);
    assert_eq!(image.raw_discard_level(), None);

    let mut decoded = RawImage::default();
    let err = image.decode(&mut decoded, Duration::ZERO).unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(
        err,
        J2cError::InsufficientBudget {
            available: 50,
            required: 79
        }
    ));
    assert_eq!(image.state(), ContainerState::HeaderParsed);
    assert!(decoded.is_empty());
}
