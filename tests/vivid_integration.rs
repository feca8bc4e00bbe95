//! Integration tests using the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded: `sudo modprobe vivid n_devs=1`
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! Tests will fail if vivid is not available.

#![cfg(feature = "integration")]

use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use serial_test::serial;
use simple_cam::allocator::{FrameBufferAllocator, FrameStatus};
use simple_cam::configuration::{ConfigStatus, StreamRole};
use simple_cam::controls::{ControlId, ControlValue};
use simple_cam::device::{V4L2Backend, V4L2Device};
use simple_cam::manager::{camera_name, CameraManager};
use simple_cam::request::RequestStatus;
use simple_cam::settings::{BackendKind, Settings};
use simple_cam::traits::{CameraDevice, FourCC, Size};
use simple_cam::run;

/// Find the node paths of every vivid capture device.
///
/// Uses sysfs to check the device name before opening, avoiding
/// unnecessary opens of real cameras.
fn find_vivid_devices() -> Vec<String> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    for index in 0..10 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };

        if !name.to_lowercase().contains("vivid") {
            continue;
        }

        let Ok(device) = V4L2Device::open(index) else {
            continue;
        };
        if device.capabilities().can_capture {
            devices.push(format!("/dev/video{index}"));
        }
    }
    devices
}

/// Integration tests MUST have vivid loaded: they fail instead of skipping.
macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first() {
            Some(path) => path.clone(),
            None => {
                panic!(
                    "vivid virtual camera not available.\n\
                     Load vivid with: sudo modprobe vivid n_devs=1\n\
                     Or run unit tests only: cargo test --lib"
                );
            }
        }
    };
}

#[test]
#[serial]
fn test_vivid_enumerated() {
    let path = require_vivid!();

    let mut manager = CameraManager::new(V4L2Backend).expect("Failed to create manager");
    manager.start().expect("Failed to start manager");

    let info = manager.get(&path).expect("vivid node not enumerated");
    let name = camera_name(info);
    println!("Found: {name}");

    assert!(name.ends_with(&format!("({path})")));
    assert_eq!(
        info.properties.extra.get("Driver").map(String::as_str),
        Some("vivid")
    );
}

#[test]
#[serial]
fn test_vivid_controls() {
    let path = require_vivid!();

    let device = V4L2Device::with_path(Path::new(&path)).expect("Failed to open vivid device");
    let controls = device.controls().expect("Failed to query controls");
    for (id, info) in &controls {
        println!("{id}: {info} = {}", info.default);
    }

    assert!(controls.iter().any(|(id, _)| *id == ControlId::Brightness));
    assert!(controls.iter().any(|(id, _)| *id == ControlId::Contrast));
}

#[test]
#[serial]
fn test_vivid_configure_and_capture() {
    let path = require_vivid!();

    let mut manager = CameraManager::new(V4L2Backend).expect("Failed to create manager");
    manager.start().expect("Failed to start manager");
    let mut camera = manager.acquire(&path).expect("Failed to acquire vivid");

    let mut config = camera
        .generate_configuration(&[StreamRole::Viewfinder])
        .expect("Failed to generate configuration");
    let stream_config = config.get_mut(0).expect("No stream configuration");
    stream_config.size = Size::new(640, 480);
    stream_config.pixel_format = FourCC::YUYV;
    assert_ne!(config.validate(), ConfigStatus::Invalid);
    camera.configure(&mut config).expect("Failed to configure");

    let stream_config = config.get(0).expect("No stream configuration");
    assert_eq!(stream_config.size, Size::new(640, 480));
    assert!(stream_config.stride >= 1280);
    let stream = stream_config.stream().expect("No stream assigned");

    let mut allocator = FrameBufferAllocator::new(&camera).expect("Failed to create allocator");
    let allocated = allocator.allocate(stream).expect("Failed to allocate");
    assert_eq!(allocated, 4);

    let (tx, rx) = mpsc::channel();
    camera.request_completed(move |request| {
        let _ = tx.send(request);
    });
    camera.start().expect("Failed to start");

    for (cookie, buffer) in (0u64..).zip(allocator.buffers(stream)) {
        let mut request = camera.create_request(cookie).expect("Failed to create request");
        request
            .add_buffer(stream, Arc::clone(buffer))
            .expect("Failed to add buffer");
        request
            .controls_mut()
            .set(ControlId::Brightness, ControlValue::Int(128));
        camera.queue_request(request).expect("Failed to queue");
    }

    let mut sequences = Vec::new();
    for _ in 0..allocated {
        let request = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("No completion from vivid");
        assert_eq!(request.status(), RequestStatus::Complete);

        let buffer = request.find_buffer(stream).expect("No buffer in request");
        let metadata = buffer.metadata();
        assert_eq!(metadata.status, FrameStatus::Success);
        assert!(metadata.planes.first().is_some_and(|p| p.bytes_used >= 640 * 480 * 2));
        sequences.push(metadata.sequence);
    }
    assert!(sequences.windows(2).all(|w| w.first() < w.get(1)));

    camera.stop().expect("Failed to stop");
    allocator.free(stream).expect("Failed to free");
    camera.release().expect("Failed to release");
}

#[test]
#[serial]
fn test_vivid_simple_cam_run() {
    let path = require_vivid!();
    let output = std::env::temp_dir().join("simple-cam-vivid");
    let _ = fs::remove_dir_all(&output);

    let settings = Settings {
        backend: BackendKind::V4l2,
        camera: Some(path),
        width: 640,
        height: 480,
        pixel_format: Some("YUYV".to_owned()),
        frames: Some(5),
        timeout_secs: 10,
        output: output.clone(),
        ..Settings::default()
    };
    let summary = run(V4L2Backend, settings).expect("Capture failed");

    assert_eq!(summary.exit_status, 0);
    assert_eq!(summary.frames, 5);
    assert_eq!(summary.images, 5);
    let written = fs::read_dir(&output).expect("No output directory").count();
    assert!(written >= 1, "no images written");

    let _ = fs::remove_dir_all(&output);
}
