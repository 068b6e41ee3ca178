use super::testing::{device_config, file_config, jpeg_quality, small_thresholds, CountingBackend};
use super::*;
use crate::error::FlowcastError;
use crate::frame::EncodedFrame;
use crate::quality::QualityLevel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn file_source(backend: &Arc<CountingBackend>, level: QualityLevel) -> FileSource {
    FileSource::open(
        file_config(),
        small_thresholds(),
        jpeg_quality(),
        backend.clone(),
        level,
    )
    .unwrap()
}

fn device_source(backend: &Arc<CountingBackend>, level: QualityLevel) -> DeviceSource {
    DeviceSource::open(
        device_config(),
        small_thresholds(),
        jpeg_quality(),
        backend.clone(),
        level,
    )
    .unwrap()
}

/// Poll until a frame is due
fn next_frame(read: impl Fn() -> Option<EncodedFrame>) -> EncodedFrame {
    for _ in 0..2000 {
        if let Some(frame) = read() {
            return frame;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("no frame produced");
}

#[test]
fn test_set_quality_is_idempotent() {
    let backend = CountingBackend::new(30);
    let source = file_source(&backend, QualityLevel::Medium);
    assert_eq!(backend.file_opens(), 1);

    assert_eq!(source.set_quality(QualityLevel::Medium), Reconfigure::Unchanged);
    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Reopened);
    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Unchanged);

    assert_eq!(backend.file_opens(), 2);
    assert_eq!(backend.releases(), 1);
    assert_eq!(backend.open_handles(), 1);

    let info = source.info();
    assert_eq!(info.quality(), QualityLevel::High);
    assert_eq!(info.resolution(), (48, 27));
    assert!(matches!(info, SourceInfo::File { ref path, .. } if path == "clip_720.mp4"));
}

#[test]
fn test_same_resolution_only_relabels() {
    let backend = CountingBackend::new(30);
    let mut thresholds = small_thresholds();
    thresholds.high.resolution = thresholds.medium.resolution;

    let source = DeviceSource::open(
        device_config(),
        thresholds,
        jpeg_quality(),
        backend.clone(),
        QualityLevel::Medium,
    )
    .unwrap();

    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Relabelled);
    assert_eq!(backend.device_opens(), 1);

    let frame = next_frame(|| source.read_frame());
    assert_eq!(frame.quality, QualityLevel::High);
    assert_eq!((frame.width, frame.height), (32, 18));
}

#[test]
fn test_end_of_stream_loops_back() {
    let backend = CountingBackend::new(3);
    let source = file_source(&backend, QualityLevel::Low);

    let indices: Vec<u64> = (0..5)
        .map(|_| next_frame(|| source.read_frame()).frame_index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    assert_eq!(backend.file_opens(), 1);
}

#[test]
fn test_seek_bounds() {
    let backend = CountingBackend::new(300);
    let source = file_source(&backend, QualityLevel::Medium);

    assert_eq!(source.seek(0.5).unwrap(), 150);
    assert_eq!(source.current_frame_index(), 150);
    assert_eq!(next_frame(|| source.read_frame()).frame_index, 150);

    assert_eq!(source.seek(-0.25).unwrap(), 0);
    assert_eq!(source.seek(1.0).unwrap(), 299);
    assert_eq!(source.seek(7.0).unwrap(), 299);

    let err = source.seek(f64::NAN).unwrap_err();
    assert!(err.is_validation());
    assert!(source.seek(f64::INFINITY).is_err());
    assert_eq!(source.current_frame_index(), 299);
}

#[test]
fn test_seek_survives_quality_change() {
    let backend = CountingBackend::new(300);
    let source = file_source(&backend, QualityLevel::Medium);

    source.seek(0.5).unwrap();
    assert_eq!(source.set_quality(QualityLevel::Low), Reconfigure::Reopened);
    assert_eq!(next_frame(|| source.read_frame()).frame_index, 150);
}

#[test]
fn test_paused_source_produces_nothing() {
    let backend = CountingBackend::new(30);
    let source = file_source(&backend, QualityLevel::Medium);

    source.set_playing(false);
    for _ in 0..20 {
        assert!(source.read_frame().is_none());
        thread::sleep(Duration::from_millis(1));
    }
    assert!(matches!(source.info(), SourceInfo::File { is_playing: false, .. }));

    source.set_playing(true);
    assert_eq!(next_frame(|| source.read_frame()).frame_index, 0);
}

#[test]
fn test_speed_validation_and_skipping() {
    let backend = CountingBackend::new(100);
    let source = file_source(&backend, QualityLevel::Medium);

    for invalid in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            source.set_speed(invalid),
            Err(FlowcastError::InvalidInput { .. })
        ));
    }

    source.set_speed(2.0).unwrap();
    let first = next_frame(|| source.read_frame()).frame_index;
    let second = next_frame(|| source.read_frame()).frame_index;
    assert_eq!(first, 2);
    assert_eq!(second, 5);
    assert!(matches!(source.info(), SourceInfo::File { playback_speed, .. } if playback_speed == 2.0));
}

#[test]
fn test_failed_reopen_restores_previous_file() {
    let backend = CountingBackend::new(30);
    let source = file_source(&backend, QualityLevel::Medium);
    backend.fail_path("clip_720.mp4");

    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Retained);
    assert!(source.is_open());
    assert_eq!(source.info().quality(), QualityLevel::Medium);
    assert_eq!(backend.open_handles(), 1);
    assert!(next_frame(|| source.read_frame()).quality == QualityLevel::Medium);
}

#[test]
fn test_unrecoverable_reopen_enters_no_frame_state() {
    let backend = CountingBackend::new(30);
    let source = file_source(&backend, QualityLevel::Medium);
    backend.fail_path("clip_720.mp4");
    backend.fail_path("clip_360.mp4");

    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Unavailable);
    assert!(!source.is_open());
    assert!(source.read_frame().is_none());
    assert_eq!(backend.open_handles(), 0);
    assert!(matches!(source.info(), SourceInfo::File { available: false, .. }));

    // A later change to a working tier recovers
    assert_eq!(source.set_quality(QualityLevel::Low), Reconfigure::Reopened);
    assert!(source.is_open());
}

#[test]
fn test_open_failure_at_construction_is_fatal() {
    let backend = CountingBackend::new(30);
    backend.fail_path("clip_360.mp4");

    let result = FileSource::open(
        file_config(),
        small_thresholds(),
        jpeg_quality(),
        backend.clone(),
        QualityLevel::Medium,
    );
    assert!(matches!(result, Err(FlowcastError::Capture(_))));

    backend.fail_devices(true);
    let result = DeviceSource::open(
        device_config(),
        small_thresholds(),
        jpeg_quality(),
        backend.clone(),
        QualityLevel::Medium,
    );
    assert!(result.is_err());
}

#[test]
fn test_release_is_idempotent_and_reopen_restores_position() {
    let backend = CountingBackend::new(300);
    let source = file_source(&backend, QualityLevel::Medium);
    source.seek(0.25).unwrap();

    assert!(source.release());
    assert!(!source.release());
    assert_eq!(backend.releases(), 1);
    assert!(source.read_frame().is_none());

    source.reopen(QualityLevel::High).unwrap();
    assert_eq!(backend.open_handles(), 1);
    let frame = next_frame(|| source.read_frame());
    assert_eq!(frame.frame_index, 75);
    assert_eq!(frame.quality, QualityLevel::High);
}

#[test]
fn test_device_reopens_on_resolution_change() {
    let backend = CountingBackend::new(30);
    let source = device_source(&backend, QualityLevel::Low);

    for level in [QualityLevel::High, QualityLevel::Medium, QualityLevel::Low] {
        assert_eq!(source.set_quality(level), Reconfigure::Reopened);
        let frame = next_frame(|| source.read_frame());
        assert_eq!(frame.quality, level);
    }

    assert_eq!(backend.device_opens(), 4);
    assert_eq!(backend.max_open_devices(), 1);
    assert!(source.release());
    assert_eq!(backend.open_devices(), 0);
}

#[test]
fn test_device_reopen_failure() {
    let backend = CountingBackend::new(30);
    let source = device_source(&backend, QualityLevel::Low);
    backend.fail_devices(true);

    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Unavailable);
    assert!(source.read_frame().is_none());
    assert!(matches!(source.info(), SourceInfo::Device { available: false, .. }));

    backend.fail_devices(false);
    assert_eq!(source.set_quality(QualityLevel::High), Reconfigure::Reopened);
    assert_eq!(backend.max_open_devices(), 1);
}

#[test]
fn test_device_rejects_playback_operations() {
    let backend = CountingBackend::new(30);
    let source = StreamSource::Device(device_source(&backend, QualityLevel::Medium));

    assert_eq!(source.kind(), SourceKind::Device);
    for operation in ["seek", "set_playing", "set_speed"] {
        assert!(matches!(
            source.playback(operation),
            Err(FlowcastError::Unsupported { .. })
        ));
    }

    let file = StreamSource::File(file_source(&backend, QualityLevel::Medium));
    assert!(file.playback("seek").is_ok());
}

#[test]
fn test_frames_match_their_quality_under_concurrent_changes() {
    let backend = CountingBackend::new(50);
    let source = Arc::new(StreamSource::File(file_source(&backend, QualityLevel::Medium)));
    let thresholds = small_thresholds();

    let switcher = {
        let source = Arc::clone(&source);
        thread::spawn(move || {
            for i in 0..60 {
                source.set_quality(QualityLevel::ALL[i % 3]);
                thread::sleep(Duration::from_micros(300));
            }
        })
    };

    let mut frames = 0;
    while !switcher.is_finished() || frames < 20 {
        if let Some(frame) = source.read_frame() {
            let expected = thresholds.get(frame.quality).resolution;
            assert_eq!((frame.width, frame.height), expected);

            let decoded = image::load_from_memory(&frame.data).unwrap();
            assert_eq!((decoded.width(), decoded.height()), expected);
            frames += 1;
        }
        thread::sleep(Duration::from_micros(200));
    }

    switcher.join().unwrap();
    assert_eq!(backend.open_handles(), 1);
}

#[test]
fn test_source_info_serialization() {
    let backend = CountingBackend::new(300);
    let source = StreamSource::File(file_source(&backend, QualityLevel::Low));

    let value = serde_json::to_value(source.info()).unwrap();
    assert_eq!(value["source"], "file");
    assert_eq!(value["quality"], "low");
    assert_eq!(value["total_frames"], 300);
    assert_eq!(value["buffer_size"], 0);
    assert_eq!(value["width"], 16);

    let device = StreamSource::Device(device_source(&backend, QualityLevel::High));
    let value = serde_json::to_value(device.info()).unwrap();
    assert_eq!(value["source"], "device");
    assert_eq!(value["device_id"], 0);
    assert_eq!(value["height"], 27);
}

#[test]
fn test_source_kind_parsing() {
    assert_eq!("video".parse::<SourceKind>().unwrap(), SourceKind::File);
    assert_eq!(" Camera ".parse::<SourceKind>().unwrap(), SourceKind::Device);
    assert_eq!("device".parse::<SourceKind>().unwrap(), SourceKind::Device);
    assert!("webcam".parse::<SourceKind>().is_err());

    let kind: SourceKind = serde_json::from_str("\"camera\"").unwrap();
    assert_eq!(kind, SourceKind::Device);
}
