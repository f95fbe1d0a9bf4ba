//! The backend registry is process-wide, so its whole lifecycle lives in one test.

use j2cstream::{
    BackendKind, CompressedImage, J2cConfig, J2cError, RawImage, active_backend, close_backend,
    create_backend, open_backend, open_from_config,
};
use std::time::Duration;

fn stream() -> Vec<u8> {
    let raw = RawImage::from_data(8, 8, 1, (0..64).map(|i| (i * 4) as u8).collect()).unwrap();
    let mut image = CompressedImage::with_backend(BackendKind::Reference.instantiate());
    image.set_reversible(true);
    image.encode(&raw, Duration::ZERO).unwrap();
    image.data().to_vec()
}

#[test]
fn test_backend_lifecycle() {
    close_backend();
    assert_eq!(active_backend(), None);
    assert!(matches!(create_backend(), Err(J2cError::BackendUnavailable)));

    let mut orphan = CompressedImage::new();
    assert_eq!(orphan.backend_name(), None);
    orphan.set_data(stream());
    assert!(matches!(orphan.update_data(), Err(J2cError::BackendUnavailable)));

    open_backend(BackendKind::Reference).unwrap();
    open_backend(BackendKind::Reference).unwrap();
    assert!(matches!(
        open_backend(BackendKind::Parallel),
        Err(J2cError::InvalidOperation(_))
    ));
    assert_eq!(create_backend().unwrap().name(), "reference");

    // Containers created before the open pick the backend up on first use.
    let mut raw = RawImage::default();
    assert!(orphan.decode(&mut raw, Duration::ZERO).unwrap());
    assert_eq!(orphan.backend_name(), Some("reference"));
    assert_eq!((raw.width(), raw.height()), (8, 8));

    let image = CompressedImage::from_data(stream());
    assert_eq!(image.backend_name(), Some("reference"));

    close_backend();
    let config = J2cConfig::from_toml_str("backend = \"parallel\"").unwrap();
    open_from_config(&config).unwrap();
    assert_eq!(active_backend(), Some(BackendKind::Parallel));
    assert_eq!(CompressedImage::new().backend_name(), Some("parallel"));
    close_backend();
    assert_eq!(active_backend(), None);
}
