//! simple-cam: a small camera capture application and the camera object
//! model it drives.
//!
//! A [`CameraManager`] enumerates the cameras of a capture backend and hands
//! out exclusive [`Camera`]s. A camera is configured from a
//! [`CameraConfiguration`], frame buffers come from a
//! [`FrameBufferAllocator`] and capture happens by queueing [`Request`]s,
//! which complete on a capture thread and are delivered to a slot. The
//! production backend is V4L2; the mock backend produces test patterns so
//! the whole pipeline runs without hardware.

pub mod allocator;
pub mod camera;
pub mod configuration;
pub mod controls;
pub mod device;
pub mod error;
pub mod event_loop;
pub mod manager;
pub mod mock;
pub mod request;
pub mod settings;
pub mod simple_cam;
pub mod traits;
pub mod writer;

pub use allocator::{FrameBuffer, FrameBufferAllocator};
pub use camera::Camera;
pub use configuration::{CameraConfiguration, StreamConfiguration, StreamRole};
pub use device::{V4L2Backend, V4L2Device};
pub use error::{CameraError, Result};
pub use event_loop::EventLoop;
pub use manager::CameraManager;
pub use mock::MockBackend;
pub use request::Request;
pub use simple_cam::{list_cameras, run, CaptureSummary, SimpleCam};
pub use traits::{Backend, CameraDevice, CaptureStream, Format, FourCC};
