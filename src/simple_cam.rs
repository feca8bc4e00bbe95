//! The capture application: acquire a camera, stream into a fixed set of
//! requests for a while, dump every frame and tear everything down.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::allocator::{BufferMetadata, FrameBufferAllocator};
use crate::camera::{Camera, RequestQueue};
use crate::configuration::{ConfigStatus, StreamConfiguration, StreamId, StreamRole};
use crate::controls::ControlList;
use crate::error::{CameraError, Result};
use crate::event_loop::{EventLoop, LoopHandle};
use crate::manager::{camera_name, CameraManager};
use crate::request::{Request, RequestStatus, ReuseFlag};
use crate::settings::Settings;
use crate::traits::{Backend, CameraDevice, CameraInfo};
use crate::writer::FrameWriter;

/// Outcome of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Event loop exit status.
    pub exit_status: i32,
    /// Completed requests processed.
    pub frames: u32,
    /// Images written.
    pub images: u32,
    /// Time spent in the event loop.
    pub elapsed: Duration,
}

/// Handles completed requests on the event loop thread.
struct RequestProcessor {
    queue: RequestQueue,
    stream: StreamConfiguration,
    writer: Option<FrameWriter>,
    started: Instant,
    frame_limit: Option<u32>,
    frames: AtomicU32,
    images: AtomicU32,
    handle: LoopHandle,
}

impl RequestProcessor {
    fn process(&self, mut request: Request) {
        if self.limit_reached(self.frames.load(Ordering::Relaxed)) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f64();
        for buffer in request.buffers().values() {
            let metadata = buffer.metadata();
            println!("{}", report_line(&metadata, &self.stream, secs));

            if let Some(writer) = &self.writer {
                match writer.write(buffer, &self.stream, secs) {
                    Ok(_) => {
                        self.images.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => log::warn!("frame {} not written: {err}", metadata.sequence),
                }
            }
        }

        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if self.limit_reached(frames) {
            log::info!("captured {frames} frames, stopping");
            self.handle.exit(0);
            return;
        }

        request.reuse(ReuseFlag::ReuseBuffers);
        if let Err(err) = self.queue.queue(request) {
            log::warn!("request not requeued: {err}");
        }
    }

    fn limit_reached(&self, frames: u32) -> bool {
        self.frame_limit.is_some_and(|limit| frames >= limit)
    }
}

/// One line per completed buffer. Multi-plane `bytesused` values are joined with `/`.
fn report_line(metadata: &BufferMetadata, stream: &StreamConfiguration, secs: f64) -> String {
    let bytes_used: Vec<String> = metadata
        .planes
        .iter()
        .map(|plane| plane.bytes_used.to_string())
        .collect();
    format!(
        " seq: {:06} bytesused: {} size {} stride {} format {} sec {secs:.6}",
        metadata.sequence,
        bytes_used.join("/"),
        stream.size,
        stream.stride,
        stream.pixel_format,
    )
}

/// Capture application driving one camera of a backend.
pub struct SimpleCam<B: Backend> {
    manager: CameraManager<B>,
    settings: Settings,
    camera: Option<Camera<B::Device>>,
    allocator: Option<FrameBufferAllocator>,
    stream: Option<StreamId>,
    requests: Vec<Request>,
    event_loop: EventLoop,
    processor: Option<Arc<RequestProcessor>>,
}

impl<B: Backend> SimpleCam<B> {
    /// Create the application and its camera manager.
    pub fn new(backend: B, settings: Settings) -> Result<Self> {
        Ok(Self {
            manager: CameraManager::new(backend)?,
            settings,
            camera: None,
            allocator: None,
            stream: None,
            requests: Vec::new(),
            event_loop: EventLoop::new(),
            processor: None,
        })
    }

    /// Acquire and configure the camera, allocate buffers, prepare one
    /// request per buffer and start capturing.
    pub fn start(&mut self) -> Result<()> {
        self.manager.start()?;
        for info in self.manager.cameras() {
            println!(" - {}", camera_name(info));
        }

        if self.manager.cameras().is_empty() {
            println!("No cameras were identified on the system.");
            self.manager.stop();
            return Err(CameraError::NoCameras);
        }
        let info = self.select_camera().ok_or_else(|| {
            CameraError::CameraNotFound(self.settings.camera.clone().unwrap_or_default())
        })?;
        let id = info.id.clone();
        let mut camera = self.manager.acquire(&id)?;
        log::info!("using camera {}", camera_name(info));

        let mut config = camera.generate_configuration(&[StreamRole::Viewfinder])?;
        let pixel_format = self.settings.pixel_format()?;
        if let Some(stream_config) = config.get_mut(0) {
            println!("Default viewfinder configuration is: {stream_config}");
            stream_config.size = self.settings.size();
            if let Some(pixel_format) = pixel_format {
                stream_config.pixel_format = pixel_format;
            }
            if let Some(buffers) = self.settings.buffers {
                stream_config.buffer_count = buffers;
            }
        }

        match config.validate() {
            ConfigStatus::Invalid => {
                println!("CONFIGURATION FAILED!");
                return Err(CameraError::InvalidConfiguration(
                    "no usable stream configuration".to_owned(),
                ));
            }
            ConfigStatus::Adjusted => log::info!("configuration adjusted to the camera"),
            ConfigStatus::Valid => {}
        }
        if let Err(err) = camera.configure(&mut config) {
            println!("CONFIGURATION FAILED!");
            return Err(err);
        }

        let stream_config = config
            .get(0)
            .cloned()
            .ok_or_else(|| CameraError::InvalidConfiguration("no stream".to_owned()))?;
        println!("Validated viewfinder configuration is: {stream_config}");

        println!("controls:");
        for (id, range) in camera.controls() {
            println!("{id}: {range} = {}", range.default);
        }
        println!("properties:");
        for (key, value) in camera.properties().entries() {
            println!("{key}: {value}");
        }

        let stream = stream_config.stream().ok_or(CameraError::UnknownStream)?;
        let mut allocator = FrameBufferAllocator::new(&camera)?;
        let allocated = allocator.allocate(stream)?;
        println!("Allocated {allocated} buffers for stream");

        let controls = self.settings.control_list()?;
        self.requests = build_requests(&camera, &allocator, stream, &controls)?;

        let processor = Arc::new(RequestProcessor {
            queue: camera.request_queue(),
            stream: stream_config,
            writer: self
                .settings
                .save_images
                .then(|| FrameWriter::new(&self.settings.output))
                .transpose()?,
            started: Instant::now(),
            frame_limit: self.settings.frames,
            frames: AtomicU32::new(0),
            images: AtomicU32::new(0),
            handle: self.event_loop.handle(),
        });

        let slot_processor = Arc::clone(&processor);
        let handle = self.event_loop.handle();
        camera.request_completed(move |request| {
            if request.status() == RequestStatus::Cancelled {
                return;
            }
            let processor = Arc::clone(&slot_processor);
            handle.call_later(move || processor.process(request));
        });

        camera.start()?;

        self.processor = Some(processor);
        self.allocator = Some(allocator);
        self.stream = Some(stream);
        self.camera = Some(camera);
        Ok(())
    }

    /// Queue every request and run the event loop until the timeout or the
    /// frame limit.
    pub fn go(&mut self) -> Result<CaptureSummary> {
        let camera = self.camera.as_ref().ok_or(CameraError::NotRunning)?;
        for request in self.requests.drain(..) {
            camera.queue_request(request)?;
        }

        self.event_loop.timeout(self.settings.timeout());
        let started = Instant::now();
        let exit_status = self.event_loop.exec();
        let elapsed = started.elapsed();
        println!(
            "Capture ran for {:.3} seconds and stopped with exit status: {exit_status}",
            elapsed.as_secs_f64()
        );

        let (frames, images) = self.processor.as_ref().map_or((0, 0), |processor| {
            (
                processor.frames.load(Ordering::Relaxed),
                processor.images.load(Ordering::Relaxed),
            )
        });
        Ok(CaptureSummary {
            exit_status,
            frames,
            images,
            elapsed,
        })
    }

    /// Stop the camera, free the buffers, release the camera and stop the
    /// manager.
    pub fn finish(&mut self) -> Result<()> {
        let mut outcome = Ok(());
        if let Some(mut camera) = self.camera.take() {
            if camera.is_running() {
                outcome = camera.stop();
            }
            let dropped = self.event_loop.clear();
            if dropped > 0 {
                log::debug!("dropped {dropped} completions after the loop exited");
            }
            if let Some(mut allocator) = self.allocator.take() {
                if let Some(stream) = self.stream.take() {
                    allocator.free(stream)?;
                }
            }
            self.requests.clear();
            camera.release()?;
        }
        self.processor = None;
        self.manager.stop();
        outcome
    }

    fn select_camera(&self) -> Option<&CameraInfo> {
        let cameras = self.manager.cameras();
        match self.settings.camera.as_deref() {
            None => cameras.first(),
            Some(wanted) => self.manager.get(wanted).or_else(|| {
                wanted
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| cameras.get(index))
            }),
        }
    }
}

fn build_requests<D: CameraDevice>(
    camera: &Camera<D>,
    allocator: &FrameBufferAllocator,
    stream: StreamId,
    controls: &ControlList,
) -> Result<Vec<Request>> {
    let mut requests = Vec::new();
    for (cookie, buffer) in (0u64..).zip(allocator.buffers(stream)) {
        let mut request = camera.create_request(cookie)?;
        request.add_buffer(stream, Arc::clone(buffer))?;
        request.controls_mut().extend(controls);
        requests.push(request);
    }
    Ok(requests)
}

/// Print the cameras of a backend, one per line. Returns their names.
pub fn list_cameras<B: Backend>(backend: B) -> Result<Vec<String>> {
    let mut manager = CameraManager::new(backend)?;
    manager.start()?;
    let names: Vec<String> = manager.cameras().iter().map(camera_name).collect();
    if names.is_empty() {
        println!("No cameras were identified on the system.");
    }
    for name in &names {
        println!(" - {name}");
    }
    manager.stop();
    Ok(names)
}

/// Run the whole start, capture, finish sequence.
pub fn run<B: Backend>(backend: B, settings: Settings) -> Result<CaptureSummary> {
    let mut app = SimpleCam::new(backend, settings)?;
    if let Err(err) = app.start() {
        if let Err(teardown) = app.finish() {
            log::warn!("teardown after failed start: {teardown}");
        }
        return Err(err);
    }
    let summary = app.go();
    app.finish()?;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PlaneMetadata;
    use crate::controls::ControlId;
    use crate::mock::MockBackend;
    use crate::traits::{FourCC, Size};
    use crate::settings::BackendKind;
    use serial_test::serial;

    fn mock_settings() -> Settings {
        Settings {
            backend: BackendKind::Mock,
            width: 640,
            height: 480,
            timeout_secs: 5,
            save_images: false,
            ..Settings::default()
        }
    }

    #[test]
    fn test_report_line_single_plane() {
        let stream = StreamConfiguration::new(
            Size::new(640, 480),
            FourCC::YUYV,
            StreamRole::Viewfinder,
        );
        let metadata = BufferMetadata {
            sequence: 42,
            planes: vec![PlaneMetadata { bytes_used: 614_400 }],
            ..BufferMetadata::default()
        };

        assert_eq!(
            report_line(&metadata, &stream, 1.234_567),
            " seq: 000042 bytesused: 614400 size 640x480 stride 1280 format YUYV sec 1.234567"
        );
    }

    #[test]
    fn test_report_line_joins_planes() {
        let stream = StreamConfiguration::new(
            Size::new(640, 480),
            FourCC::NV12,
            StreamRole::Viewfinder,
        );
        let metadata = BufferMetadata {
            sequence: 7,
            planes: vec![
                PlaneMetadata { bytes_used: 307_200 },
                PlaneMetadata { bytes_used: 153_600 },
            ],
            ..BufferMetadata::default()
        };

        assert_eq!(
            report_line(&metadata, &stream, 0.5),
            " seq: 000007 bytesused: 307200/153600 size 640x480 stride 640 format NV12 sec 0.500000"
        );
    }

    #[test]
    #[serial]
    fn test_frame_limit_exits_loop() {
        let settings = Settings {
            frames: Some(6),
            ..mock_settings()
        };
        let backend = MockBackend::new(1).with_frame_interval(Duration::from_millis(2));
        let summary = run(backend, settings).expect("run failed");

        assert_eq!(summary.exit_status, 0);
        assert_eq!(summary.frames, 6);
        assert_eq!(summary.images, 0);
        // The frame limit ends the loop long before the 5 s timeout.
        assert!(summary.elapsed < Duration::from_secs(4));
    }

    #[test]
    #[serial]
    fn test_no_cameras() {
        let result = run(MockBackend::new(0), mock_settings());
        assert!(matches!(result, Err(CameraError::NoCameras)));
    }

    #[test]
    #[serial]
    fn test_select_camera_by_index_and_id() {
        let settings = Settings {
            camera: Some("1".to_owned()),
            ..mock_settings()
        };
        let mut app = SimpleCam::new(MockBackend::new(3), settings).expect("new failed");
        app.manager.start().expect("start failed");
        assert_eq!(app.select_camera().map(|c| c.id.as_str()), Some("mock:1"));

        app.settings.camera = Some("mock:2".to_owned());
        assert_eq!(app.select_camera().map(|c| c.id.as_str()), Some("mock:2"));

        app.settings.camera = Some("mock:9".to_owned());
        assert!(app.select_camera().is_none());
    }

    #[test]
    #[serial]
    fn test_controls_reach_first_requests() {
        let settings = Settings {
            frames: Some(4),
            controls: vec!["Brightness=10".to_owned()],
            ..mock_settings()
        };
        let backend = MockBackend::new(1).with_frame_interval(Duration::from_millis(2));
        let applied = backend.clone();
        run(backend, settings).expect("run failed");

        let applied = applied.applied_controls();
        assert!(!applied.is_empty());
        assert!(applied
            .iter()
            .all(|list| list.contains(ControlId::Brightness)));
    }

    #[test]
    #[serial]
    fn test_list_cameras() {
        let names = list_cameras(MockBackend::new(2)).expect("list failed");
        assert_eq!(
            names,
            vec![
                "Internal front camera (mock:0)".to_owned(),
                "Internal back camera (mock:1)".to_owned()
            ]
        );
    }
}
