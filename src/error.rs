//! Error type shared by every layer of the capture pipeline.

use thiserror::Error;

use crate::traits::{Format, FourCC};

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0}")]
    FormatNotSupported(Format),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A camera manager already exists in this process.
    #[error("A camera manager is already running")]
    ManagerAlreadyRunning,
    /// The camera manager has not been started.
    #[error("Camera manager not started")]
    ManagerNotStarted,
    /// No camera is available at all.
    #[error("No cameras were identified on the system")]
    NoCameras,
    /// No camera with the given id or index.
    #[error("Camera {0} not found")]
    CameraNotFound(String),
    /// The camera is already acquired.
    #[error("Camera {0} is busy")]
    CameraBusy(String),
    /// Operation not permitted in the camera's current state.
    #[error("Cannot {operation} while camera is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State the camera was in.
        state: &'static str,
    },
    /// Configuration cannot be applied.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Configuration had to be adjusted and must be reviewed before applying.
    #[error("Configuration was adjusted during validation")]
    ConfigurationAdjusted,
    /// No buffers are allocated for the stream.
    #[error("No buffers allocated for stream")]
    BuffersNotAllocated,
    /// Buffers are already allocated for the stream.
    #[error("Buffers already allocated for stream")]
    BuffersAlreadyAllocated,
    /// A buffer is too small for the frame it should hold.
    #[error("Buffer too small: need {required} bytes, have {actual}")]
    BufferTooSmall {
        /// Bytes needed.
        required: usize,
        /// Bytes available.
        actual: usize,
    },
    /// Request already holds a buffer for the stream.
    #[error("Request already has a buffer for this stream")]
    BufferAlreadySet,
    /// Stream does not belong to the active configuration.
    #[error("Stream is not part of the active configuration")]
    UnknownStream,
    /// Request carries no buffer.
    #[error("Request has no buffers")]
    EmptyRequest,
    /// Request was queued without being reused first.
    #[error("Request is not pending; reuse it before queueing")]
    RequestNotReusable,
    /// Camera is not capturing.
    #[error("Camera is not running")]
    NotRunning,
    /// Frames in this pixel format cannot be written as images.
    #[error("Cannot write images in pixel format {0}")]
    UnsupportedImageFormat(FourCC),
    /// Image encoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// Settings could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
