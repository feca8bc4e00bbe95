//! Core traits and types for the camera backend abstraction.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::controls::{ControlId, ControlInfo, ControlList, Properties};
use crate::error::{CameraError, Result};

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit luminance).
    pub const GREY: Self = Self::new(b"GREY");
    /// NV12 pixel format (Y plane followed by interleaved UV at half resolution).
    pub const NV12: Self = Self::new(b"NV12");

    /// Whether the format carries compressed data of variable size.
    pub const fn is_compressed(self) -> bool {
        matches!(self.0, [b'M', b'J', b'P', b'G'] | [b'J', b'P', b'E', b'G'])
    }

    /// Minimum bytes per line of the first plane for a given width.
    pub const fn bytes_per_line(self, width: u32) -> u32 {
        match self.0 {
            [b'Y', b'U', b'Y', b'V'] | [b'U', b'Y', b'V', b'Y'] => width * 2,
            [b'R', b'G', b'B', b'3'] | [b'B', b'G', b'R', b'3'] => width * 3,
            [b'G', b'R', b'E', b'Y'] | [b'N', b'V', b'1', b'2'] => width,
            _ => 0,
        }
    }

    /// Size of each plane for a given stride and height.
    ///
    /// Compressed formats have a single plane of `fallback` bytes.
    pub fn plane_sizes(self, stride: u32, height: u32, fallback: u32) -> Vec<u32> {
        if self == Self::NV12 {
            let luma = stride * height;
            return vec![luma, luma / 2];
        }
        if self.is_compressed() || stride == 0 {
            return vec![fallback];
        }
        vec![stride * height]
    }

    /// Total frame size for a given stride and height.
    pub fn frame_size(self, stride: u32, height: u32, fallback: u32) -> u32 {
        self.plane_sizes(stride, height, fallback).iter().sum()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() { char::from(byte) } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for FourCC {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| CameraError::Config(format!("pixel format '{s}' is not four characters")))?;
        Ok(Self(bytes))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame sizes a device supports for one pixel format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeRange {
    /// An explicit list of sizes.
    Discrete(Vec<Size>),
    /// Any size between `min` and `max` in multiples of `step`.
    Stepwise {
        /// Smallest size.
        min: Size,
        /// Largest size.
        max: Size,
        /// Increment in each dimension.
        step: Size,
    },
}

impl SizeRange {
    /// Whether the size is supported exactly.
    pub fn contains(&self, size: Size) -> bool {
        self.nearest(size) == Some(size)
    }

    /// The supported size closest to the requested one.
    ///
    /// Discrete lists pick the smallest area difference, ties broken by the
    /// smallest width difference. Stepwise ranges clamp then round down to
    /// the step grid.
    pub fn nearest(&self, size: Size) -> Option<Size> {
        match self {
            Self::Discrete(sizes) => sizes.iter().copied().min_by_key(|candidate| {
                (
                    candidate.area().abs_diff(size.area()),
                    candidate.width.abs_diff(size.width),
                )
            }),
            Self::Stepwise { min, max, step } => {
                let snap = |value: u32, lo: u32, hi: u32, step: u32| {
                    let value = value.clamp(lo, hi.max(lo));
                    let step = step.max(1);
                    lo + (value - lo) / step * step
                };
                Some(Size::new(
                    snap(size.width, min.width, max.width, step.width),
                    snap(size.height, min.height, max.height, step.height),
                ))
            }
        }
    }
}

/// Pixel format together with the sizes available for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCaps {
    /// Pixel format.
    pub fourcc: FourCC,
    /// Sizes supported in this format.
    pub sizes: SizeRange,
}

/// Video format as negotiated with a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a format with a tightly packed stride.
    #[must_use]
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = fourcc.bytes_per_line(width);
        let size = fourcc.frame_size(stride, height, width * height * 2);
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Frame dimensions.
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}-{}", self.width, self.height, self.fourcc)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a frame delivered by a backend stream.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Get RGB values for a pixel of a YUYV frame.
    ///
    /// Returns `None` when the coordinates fall outside the data. For odd x
    /// coordinates the Y value of the second pixel of the pair is used with
    /// the shared U/V values.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32, width: u32) -> Option<(u8, u8, u8)> {
        // YUYV: [Y0 U Y1 V], each pixel pair shares U and V
        let pair_x = x & !1;
        let offset = ((y * width + pair_x) * 2) as usize;
        let pair = self.data.get(offset..offset + 4)?;

        let (y_val, u, v) = match *pair {
            [y0, u, y1, v] => (if x % 2 == 0 { y0 } else { y1 }, u, v),
            _ => return None,
        };

        Some(yuv_to_rgb(y_val, u, v))
    }
}

/// Convert YUV values to RGB using the ITU-R BT.601 formula.
///
/// RGB values are clamped to the 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

/// Identity and properties of a camera found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Unique, stable camera identifier.
    pub id: String,
    /// Static camera properties.
    pub properties: Properties,
}

/// Source of cameras: enumerates them and opens devices.
pub trait Backend {
    /// Device type opened by this backend.
    type Device: CameraDevice;

    /// List the cameras currently present.
    fn enumerate(&self) -> Result<Vec<CameraInfo>>;

    /// Open the device behind an enumerated camera.
    fn open(&self, info: &CameraInfo) -> Result<Self::Device>;
}

/// Abstraction over camera device operations.
pub trait CameraDevice: Send + 'static {
    /// The stream type returned by `create_stream`.
    type Stream<'a>: CaptureStream
    where
        Self: 'a;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Pixel formats and sizes the device can capture.
    fn supported_formats(&self) -> Result<Vec<FormatCaps>>;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Controls the device exposes, with their ranges.
    fn controls(&self) -> Result<Vec<(ControlId, ControlInfo)>>;

    /// Create a capture stream with the specified number of buffers.
    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>>;
}

/// Abstraction over capture stream operations.
pub trait CaptureStream {
    /// Capture the next frame from the stream.
    ///
    /// Returns `CameraError::Timeout` if no frame arrives within the
    /// backend's poll interval.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Apply controls before the next frame is captured.
    fn apply_controls(&mut self, controls: &ControlList) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display_and_parse() {
        assert_eq!(FourCC::YUYV.to_string(), "YUYV");
        assert_eq!("GREY".parse::<FourCC>().ok(), Some(FourCC::GREY));
        assert!("RGB".parse::<FourCC>().is_err());
    }

    #[test]
    fn test_format_new_computes_stride() {
        let yuyv = Format::new(640, 480, FourCC::YUYV);
        assert_eq!(yuyv.stride, 1280);
        assert_eq!(yuyv.size, 1280 * 480);

        let nv12 = Format::new(640, 480, FourCC::NV12);
        assert_eq!(nv12.stride, 640);
        assert_eq!(nv12.size, 640 * 480 * 3 / 2);
        assert_eq!(nv12.to_string(), "640x480-NV12");
    }

    #[test]
    fn test_plane_sizes() {
        assert_eq!(FourCC::NV12.plane_sizes(64, 4, 0), vec![256, 128]);
        assert_eq!(FourCC::RGB3.plane_sizes(12, 2, 0), vec![24]);
        assert_eq!(FourCC::MJPG.plane_sizes(0, 480, 9000), vec![9000]);
    }

    #[test]
    fn test_discrete_nearest() {
        let range = SizeRange::Discrete(vec![
            Size::new(640, 480),
            Size::new(1280, 720),
            Size::new(1920, 1080),
        ]);
        assert_eq!(range.nearest(Size::new(1300, 700)), Some(Size::new(1280, 720)));
        assert_eq!(range.nearest(Size::new(4000, 3000)), Some(Size::new(1920, 1080)));
        assert!(range.contains(Size::new(640, 480)));
        assert!(!range.contains(Size::new(641, 480)));
        assert_eq!(SizeRange::Discrete(Vec::new()).nearest(Size::new(1, 1)), None);
    }

    #[test]
    fn test_stepwise_nearest() {
        let range = SizeRange::Stepwise {
            min: Size::new(32, 32),
            max: Size::new(2592, 1944),
            step: Size::new(16, 8),
        };
        assert_eq!(range.nearest(Size::new(650, 485)), Some(Size::new(640, 480)));
        assert_eq!(range.nearest(Size::new(8, 8)), Some(Size::new(32, 32)));
        assert_eq!(range.nearest(Size::new(9999, 9999)), Some(Size::new(2592, 1944)));
    }

    #[test]
    fn test_pixel_at_out_of_bounds() {
        let frame = Frame {
            data: vec![235, 128, 235, 128],
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 4,
            },
        };
        assert_eq!(frame.pixel_at(1, 0, 2), Some((235, 235, 235)));
        assert_eq!(frame.pixel_at(0, 1, 2), None);
    }
}
