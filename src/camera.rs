//! Camera state machine and capture thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::configuration::{
    CameraConfiguration, ConfigStatus, StreamConfiguration, StreamId, StreamRole,
};
use crate::controls::{ControlId, ControlInfo, Properties};
use crate::error::{CameraError, Result};
use crate::manager::AcquireRegistry;
use crate::request::{Request, RequestStatus};
use crate::traits::{CameraDevice, CameraInfo, CaptureStream, Format, Frame};

/// Streams a single camera can produce at once.
pub const MAX_STREAMS: usize = 1;

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of an acquired camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// Acquired, no configuration applied yet.
    Acquired,
    /// Configuration applied.
    Configured,
    /// Capturing.
    Running,
    /// Released; the camera can no longer be used.
    Released,
}

impl CameraState {
    /// Lowercase state name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Released => "released",
        }
    }
}

type Slot = Arc<dyn Fn(Request) + Send + Sync>;

#[derive(Default)]
struct QueueShared {
    sender: Mutex<Option<Sender<Request>>>,
    streams: RwLock<Vec<StreamId>>,
    next_sequence: AtomicU32,
}

/// Sendable handle for queueing requests to a running camera.
#[derive(Clone, Default)]
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    /// Queue a request for capture.
    ///
    /// The request must be pending, hold at least one buffer and only
    /// reference configured streams.
    pub fn queue(&self, mut request: Request) -> Result<()> {
        if request.status() != RequestStatus::Pending {
            return Err(CameraError::RequestNotReusable);
        }
        if request.buffers().is_empty() {
            return Err(CameraError::EmptyRequest);
        }
        {
            let streams = self
                .shared
                .streams
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if request.buffers().keys().any(|id| !streams.contains(id)) {
                return Err(CameraError::UnknownStream);
            }
        }

        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let sender = sender.as_ref().ok_or(CameraError::NotRunning)?;
        request.set_sequence(self.shared.next_sequence.fetch_add(1, Ordering::Relaxed));
        sender.send(request).map_err(|_| CameraError::NotRunning)
    }

    /// Whether the camera accepts requests.
    pub fn is_running(&self) -> bool {
        self.shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn open(&self) -> Receiver<Request> {
        let (sender, receiver) = mpsc::channel();
        *self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
        self.shared.next_sequence.store(0, Ordering::Relaxed);
        receiver
    }

    fn close(&self) {
        self.shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_streams(&self, streams: Vec<StreamId>) {
        *self
            .shared
            .streams
            .write()
            .unwrap_or_else(PoisonError::into_inner) = streams;
    }
}

struct Worker<D> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(D, Result<()>)>,
}

/// An acquired camera.
pub struct Camera<D: CameraDevice> {
    info: CameraInfo,
    device: Option<D>,
    state: CameraState,
    controls: Vec<(ControlId, ControlInfo)>,
    streams: Vec<StreamConfiguration>,
    queue: RequestQueue,
    slot: Option<Slot>,
    worker: Option<Worker<D>>,
    registry: AcquireRegistry,
}

impl<D: CameraDevice> Camera<D> {
    pub(crate) fn new(info: CameraInfo, device: D, registry: AcquireRegistry) -> Result<Self> {
        let controls = match device.controls() {
            Ok(controls) => controls,
            Err(err) => {
                log::warn!("{}: cannot query controls: {err}", info.id);
                Vec::new()
            }
        };
        log::info!("acquired camera {}", info.id);
        Ok(Self {
            info,
            device: Some(device),
            state: CameraState::Acquired,
            controls,
            streams: Vec::new(),
            queue: RequestQueue::default(),
            slot: None,
            worker: None,
            registry,
        })
    }

    /// Unique camera id.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Static camera properties.
    pub const fn properties(&self) -> &Properties {
        &self.info.properties
    }

    /// Controls supported by the camera.
    pub fn controls(&self) -> &[(ControlId, ControlInfo)] {
        &self.controls
    }

    /// Current state.
    pub const fn state(&self) -> CameraState {
        self.state
    }

    /// Whether the camera is capturing.
    pub fn is_running(&self) -> bool {
        self.state == CameraState::Running
    }

    /// Stream configurations applied by `configure`.
    pub fn streams(&self) -> &[StreamConfiguration] {
        &self.streams
    }

    /// Default configuration for the given stream roles.
    pub fn generate_configuration(&self, roles: &[StreamRole]) -> Result<CameraConfiguration> {
        self.require("generate configuration", &[CameraState::Acquired, CameraState::Configured])?;
        if roles.is_empty() || roles.len() > MAX_STREAMS {
            return Err(CameraError::InvalidConfiguration(format!(
                "{} stream role(s) requested, camera supports {MAX_STREAMS}",
                roles.len()
            )));
        }

        let device = self.device()?;
        let formats = device.supported_formats()?;
        let current = device.format()?;

        let streams = roles
            .iter()
            .map(|&role| {
                let mut config = StreamConfiguration::new(current.size(), current.fourcc, role);
                if current.stride >= config.stride {
                    config.stride = current.stride;
                    config.frame_size = config.frame_size.max(current.size);
                }
                config
            })
            .collect();
        Ok(CameraConfiguration::new(streams, formats, MAX_STREAMS))
    }

    /// Apply a configuration. It must validate without adjustment.
    pub fn configure(&mut self, config: &mut CameraConfiguration) -> Result<()> {
        self.require("configure", &[CameraState::Acquired, CameraState::Configured])?;
        match config.validate() {
            ConfigStatus::Valid => {}
            ConfigStatus::Adjusted => return Err(CameraError::ConfigurationAdjusted),
            ConfigStatus::Invalid => {
                return Err(CameraError::InvalidConfiguration(
                    "no supported stream configuration".to_owned(),
                ))
            }
        }

        let device = self.device.as_mut().ok_or(CameraError::InvalidState {
            operation: "configure",
            state: "disconnected",
        })?;
        for (index, stream) in config.streams_mut().iter_mut().enumerate() {
            let requested = Format {
                width: stream.size.width,
                height: stream.size.height,
                fourcc: stream.pixel_format,
                stride: stream.stride,
                size: stream.frame_size,
            };
            let applied = device.set_format(&requested)?;
            if applied.size() != requested.size() || applied.fourcc != requested.fourcc {
                return Err(CameraError::InvalidConfiguration(format!(
                    "device applied {applied} instead of {requested}"
                )));
            }
            stream.stride = applied.stride;
            stream.frame_size = applied.size;
            stream.stream = Some(StreamId(index));
        }

        self.streams = config.iter().cloned().collect();
        self.queue
            .set_streams(self.streams.iter().filter_map(StreamConfiguration::stream).collect());
        self.state = CameraState::Configured;
        for stream in &self.streams {
            log::info!(
                "{}: configured {stream} stride {} frame size {}",
                self.info.id,
                stream.stride,
                stream.frame_size
            );
        }
        Ok(())
    }

    /// Create an empty request tagged with `cookie`.
    pub fn create_request(&self, cookie: u64) -> Result<Request> {
        self.require("create request", &[CameraState::Configured, CameraState::Running])?;
        Ok(Request::new(cookie))
    }

    /// Connect the slot invoked from the capture thread for every completed
    /// or cancelled request. Takes effect at the next `start`.
    pub fn request_completed<F>(&mut self, slot: F)
    where
        F: Fn(Request) + Send + Sync + 'static,
    {
        self.slot = Some(Arc::new(slot));
    }

    /// Start capturing. Queued requests complete in queueing order.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", &[CameraState::Configured])?;
        let mut device = self.device.take().ok_or(CameraError::InvalidState {
            operation: "start",
            state: "disconnected",
        })?;

        let buffer_count = self
            .streams
            .iter()
            .map(|stream| stream.buffer_count)
            .max()
            .unwrap_or(1);
        let stop = Arc::new(AtomicBool::new(false));
        let context = CaptureContext {
            requests: self.queue.open(),
            stop: Arc::clone(&stop),
            slot: self.slot.clone(),
        };
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.info.id))
            .spawn(move || {
                let outcome = capture_loop(&mut device, buffer_count, &context, &ready_tx);
                (device, outcome)
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker { stop, handle });
                self.state = CameraState::Running;
                log::info!("{}: capture started", self.info.id);
                Ok(())
            }
            Ok(Err(err)) => {
                self.queue.close();
                self.device = handle.join().ok().map(|(device, _)| device);
                Err(err)
            }
            Err(_) => {
                self.queue.close();
                self.device = handle.join().ok().map(|(device, _)| device);
                Err(CameraError::StreamError("capture thread exited during start".to_owned()))
            }
        }
    }

    /// Queue a request. See [`RequestQueue::queue`].
    pub fn queue_request(&self, request: Request) -> Result<()> {
        self.require("queue request", &[CameraState::Running])?;
        self.queue.queue(request)
    }

    /// Handle for queueing requests from other threads.
    pub fn request_queue(&self) -> RequestQueue {
        self.queue.clone()
    }

    /// Stop capturing. Pending requests complete as cancelled.
    pub fn stop(&mut self) -> Result<()> {
        self.require("stop", &[CameraState::Running])?;
        self.queue.close();
        self.state = CameraState::Configured;

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.stop.store(true, Ordering::Release);
        let (device, outcome) = worker
            .handle
            .join()
            .map_err(|_| CameraError::StreamError("capture thread panicked".to_owned()))?;
        self.device = Some(device);
        log::info!("{}: capture stopped", self.info.id);
        outcome
    }

    /// Give up exclusive access to the camera.
    pub fn release(&mut self) -> Result<()> {
        if self.state == CameraState::Released {
            return Ok(());
        }
        self.require("release", &[CameraState::Acquired, CameraState::Configured])?;
        self.device = None;
        self.streams.clear();
        self.queue.set_streams(Vec::new());
        self.state = CameraState::Released;
        self.registry.release(&self.info.id);
        log::info!("released camera {}", self.info.id);
        Ok(())
    }

    fn device(&self) -> Result<&D> {
        self.device.as_ref().ok_or(CameraError::InvalidState {
            operation: "access device",
            state: "disconnected",
        })
    }

    fn require(&self, operation: &'static str, allowed: &[CameraState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }
}

impl<D: CameraDevice> Drop for Camera<D> {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                log::warn!("{}: stop on drop failed: {err}", self.info.id);
            }
        }
        if self.state != CameraState::Released {
            self.registry.release(&self.info.id);
        }
    }
}

struct CaptureContext {
    requests: Receiver<Request>,
    stop: Arc<AtomicBool>,
    slot: Option<Slot>,
}

impl CaptureContext {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn emit(&self, request: Request) {
        match &self.slot {
            Some(slot) => slot(request),
            None => log::debug!("request {} completed with no slot connected", request.cookie()),
        }
    }
}

fn capture_loop<D: CameraDevice>(
    device: &mut D,
    buffer_count: u32,
    context: &CaptureContext,
    ready: &Sender<Result<()>>,
) -> Result<()> {
    let mut stream = match device.create_stream(buffer_count) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return Ok(());
        }
    };
    let _ = ready.send(Ok(()));

    let mut outcome = Ok(());
    while !context.stopping() {
        let request = match context.requests.recv_timeout(QUEUE_POLL_INTERVAL) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if !request.controls().is_empty() {
            if let Err(err) = stream.apply_controls(request.controls()) {
                log::warn!("failed to apply request controls: {err}");
            }
        }

        match next_frame(&mut stream, &context.stop) {
            Ok(Some(frame)) => {
                log::trace!(
                    "request {} completed with frame {}",
                    request.sequence(),
                    frame.metadata.sequence
                );
                context.emit(request.complete(&frame));
            }
            Ok(None) => {
                context.emit(request.cancel());
                break;
            }
            Err(err) => {
                log::error!("capture failed: {err}");
                context.emit(request.cancel());
                outcome = Err(err);
                break;
            }
        }
    }

    let cancelled: Vec<Request> = context.requests.try_iter().collect();
    if !cancelled.is_empty() {
        log::debug!("cancelling {} queued request(s)", cancelled.len());
    }
    for request in cancelled {
        context.emit(request.cancel());
    }
    outcome
}

fn next_frame<S: CaptureStream>(stream: &mut S, stop: &AtomicBool) -> Result<Option<Frame>> {
    loop {
        match stream.next_frame() {
            Ok(frame) => return Ok(Some(frame)),
            Err(CameraError::Timeout) => {
                if stop.load(Ordering::Acquire) {
                    return Ok(None);
                }
            }
            Err(err) => return Err(err),
        }
    }
}
