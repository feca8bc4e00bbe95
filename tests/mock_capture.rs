//! End-to-end capture runs on the mock backend.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use simple_cam::configuration::{ConfigStatus, StreamRole};
use simple_cam::event_loop::TIMEOUT_EXIT_STATUS;
use simple_cam::mock::{MockBackend, TestPattern};
use simple_cam::settings::{BackendKind, Settings};
use simple_cam::{run, CameraError, CameraManager, FrameBufferAllocator, SimpleCam};

fn output_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "simple-cam-{name}-{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn settings(output: PathBuf) -> Settings {
    Settings {
        backend: BackendKind::Mock,
        width: 640,
        height: 480,
        timeout_secs: 10,
        output,
        ..Settings::default()
    }
}

#[test]
#[serial]
fn test_capture_writes_images() {
    let output = output_dir("images");
    let settings = Settings {
        frames: Some(8),
        ..settings(output.clone())
    };
    let backend = MockBackend::new(1)
        .with_pattern(TestPattern::Gradient)
        .with_frame_interval(Duration::from_millis(5));

    let summary = run(backend, settings).expect("capture failed");

    assert_eq!(summary.exit_status, 0);
    assert_eq!(summary.frames, 8);
    assert_eq!(summary.images, 8);

    let pngs: Vec<PathBuf> = fs::read_dir(&output)
        .expect("output directory missing")
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();
    assert!(!pngs.is_empty());

    let first = pngs.first().expect("no png written");
    let name = first
        .file_name()
        .and_then(|name| name.to_str())
        .expect("invalid file name");
    assert!(name.starts_with("img"));

    let image = image::open(first).expect("png unreadable").to_luma8();
    assert_eq!(image.dimensions(), (640, 480));
    // Gradient runs dark to light from left to right.
    let left = image.get_pixel(0, 240).0;
    let right = image.get_pixel(639, 240).0;
    assert!(left < right);

    let _ = fs::remove_dir_all(&output);
}

#[test]
#[serial]
fn test_timeout_exit_status() {
    let output = output_dir("timeout");
    let settings = Settings {
        timeout_secs: 1,
        save_images: false,
        ..settings(output)
    };
    let backend = MockBackend::new(1).with_frame_interval(Duration::from_millis(20));

    let summary = run(backend, settings).expect("capture failed");

    assert_eq!(summary.exit_status, TIMEOUT_EXIT_STATUS);
    assert!(summary.frames > 0);
    assert_eq!(summary.images, 0);
}

#[test]
#[serial]
fn test_unsupported_size_is_adjusted() {
    let output = output_dir("adjusted");
    let settings = Settings {
        width: 1000,
        height: 700,
        frames: Some(2),
        save_images: false,
        ..settings(output)
    };
    let summary = run(MockBackend::new(1), settings).expect("capture failed");
    assert_eq!(summary.frames, 2);
}

#[test]
#[serial]
fn test_missing_camera() {
    let output = output_dir("missing");
    let settings = Settings {
        camera: Some("mock:5".to_owned()),
        ..settings(output)
    };
    assert!(matches!(
        run(MockBackend::new(2), settings),
        Err(CameraError::CameraNotFound(_))
    ));

    // The manager slot is free again after a failed run.
    CameraManager::new(MockBackend::new(1)).expect("manager still held");
}

#[test]
#[serial]
fn test_second_manager_rejected_while_capturing() {
    let output = output_dir("busy");
    let mut app = SimpleCam::new(
        MockBackend::new(1),
        Settings {
            save_images: false,
            ..settings(output)
        },
    )
    .expect("app creation failed");
    app.start().expect("start failed");
    assert!(matches!(
        CameraManager::new(MockBackend::new(1)),
        Err(CameraError::ManagerAlreadyRunning)
    ));
    app.finish().expect("finish failed");
}

#[test]
#[serial]
fn test_allocator_follows_configuration() {
    let mut manager = CameraManager::new(MockBackend::new(1)).expect("manager failed");
    manager.start().expect("start failed");
    let mut camera = manager.acquire("mock:0").expect("acquire failed");

    assert!(FrameBufferAllocator::new(&camera).is_err());

    let mut config = camera
        .generate_configuration(&[StreamRole::StillCapture])
        .expect("generate failed");
    let still = config.get(0).expect("no stream");
    assert_eq!(still.buffer_count, 1);

    assert_eq!(config.validate(), ConfigStatus::Valid);
    camera.configure(&mut config).expect("configure failed");
    let stream = config
        .get(0)
        .and_then(|config| config.stream())
        .expect("no stream");

    let mut allocator = FrameBufferAllocator::new(&camera).expect("allocator failed");
    assert_eq!(allocator.allocate(stream).expect("allocate failed"), 1);
    let buffer = allocator.buffers(stream).first().expect("no buffer");
    let length: usize = buffer.plane_lengths().iter().sum();
    let frame_size = config.get(0).map(|c| c.frame_size).expect("no stream");
    assert_eq!(length, frame_size as usize);
}
