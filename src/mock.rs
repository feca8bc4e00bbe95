//! Mock backend producing test patterns, for running without hardware.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controls::{CameraLocation, ControlId, ControlInfo, ControlList, Properties};
use crate::error::{CameraError, Result};
use crate::traits::{
    yuv_to_rgb, Backend, CameraDevice, CameraInfo, CaptureStream, DeviceCapabilities, Format,
    FormatCaps, FourCC, Frame, FrameMetadata, Size, SizeRange,
};

/// Pixel formats the mock camera produces.
pub const MOCK_FORMATS: [FourCC; 3] = [FourCC::YUYV, FourCC::GREY, FourCC::RGB3];

/// Frame sizes the mock camera produces.
pub const MOCK_SIZES: [Size; 4] = [
    Size::new(640, 480),
    Size::new(1280, 720),
    Size::new(1920, 1080),
    Size::new(2592, 1944),
];

const ID_PREFIX: &str = "mock:";

type ControlLog = Arc<Mutex<Vec<ControlList>>>;

/// Backend exposing a number of mock cameras.
#[derive(Debug, Clone)]
pub struct MockBackend {
    cameras: u32,
    pattern: TestPattern,
    frame_interval: Duration,
    fail_after: Option<u32>,
    applied: ControlLog,
}

impl MockBackend {
    /// Create a backend with `cameras` mock cameras.
    #[must_use]
    pub fn new(cameras: u32) -> Self {
        Self {
            cameras,
            pattern: TestPattern::ColorBars,
            frame_interval: Duration::ZERO,
            fail_after: None,
            applied: Arc::default(),
        }
    }

    /// Set the pattern every camera produces.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Delay between frames, to mimic a real frame rate.
    #[must_use]
    pub const fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make streams fail with a stream error once `frames` frames were produced.
    #[must_use]
    pub const fn with_failure_after(mut self, frames: u32) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Every non-empty control list applied by streams of this backend.
    pub fn applied_controls(&self) -> Vec<ControlList> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Backend for MockBackend {
    type Device = MockDevice;

    fn enumerate(&self) -> Result<Vec<CameraInfo>> {
        Ok((0..self.cameras)
            .map(|index| CameraInfo {
                id: format!("{ID_PREFIX}{index}"),
                properties: Properties {
                    location: Some(if index % 2 == 0 {
                        CameraLocation::Front
                    } else {
                        CameraLocation::Back
                    }),
                    model: Some("Mock Camera".to_owned()),
                    ..Properties::default()
                },
            })
            .collect())
    }

    fn open(&self, info: &CameraInfo) -> Result<MockDevice> {
        let index = info
            .id
            .strip_prefix(ID_PREFIX)
            .and_then(|index| index.parse::<u32>().ok())
            .ok_or_else(|| CameraError::DeviceOpenFailed(info.id.clone()))?;
        if index >= self.cameras {
            return Err(CameraError::DeviceNotFound(index));
        }

        let mut device = MockDevice::new().with_pattern(self.pattern);
        device.capabilities.bus_info = info.id.clone();
        device.frame_interval = self.frame_interval;
        device.fail_after = self.fail_after;
        device.applied = Arc::clone(&self.applied);
        Ok(device)
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    frame_count: u32,
    pattern: TestPattern,
    frame_interval: Duration,
    fail_after: Option<u32>,
    applied: ControlLog,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            frame_count: 0,
            pattern: TestPattern::ColorBars,
            frame_interval: Duration::ZERO,
            fail_after: None,
            applied: Arc::default(),
        }
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the test pattern for frame generation.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn supported_formats(&self) -> Result<Vec<FormatCaps>> {
        Ok(MOCK_FORMATS
            .iter()
            .map(|&fourcc| FormatCaps {
                fourcc,
                sizes: SizeRange::Discrete(MOCK_SIZES.to_vec()),
            })
            .collect())
    }

    fn format(&self) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        if !MOCK_FORMATS.contains(&format.fourcc) {
            return Err(CameraError::FormatNotSupported(format.clone()));
        }
        let size = SizeRange::Discrete(MOCK_SIZES.to_vec())
            .nearest(format.size())
            .unwrap_or_else(|| self.format.size());
        self.format = Format::new(size.width, size.height, format.fourcc);
        Ok(self.format.clone())
    }

    fn controls(&self) -> Result<Vec<(ControlId, ControlInfo)>> {
        Ok(vec![
            (ControlId::AnalogueGain, ControlInfo::int(1, 16, 1)),
            (ControlId::ExposureTime, ControlInfo::int(100, 1_000_000, 33_000)),
            (ControlId::Brightness, ControlInfo::int(-100, 100, 0)),
            (ControlId::Contrast, ControlInfo::int(0, 200, 100)),
        ])
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        let pattern = self.pattern;
        Ok(MockStream {
            device: self,
            pattern,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
    pattern: TestPattern,
}

impl CaptureStream for MockStream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        if !self.device.frame_interval.is_zero() {
            thread::sleep(self.device.frame_interval);
        }
        if let Some(limit) = self.device.fail_after {
            if self.device.frame_count >= limit {
                return Err(CameraError::StreamError(format!(
                    "mock stream failed after {limit} frames"
                )));
            }
        }

        let format = &self.device.format;
        let data = generate_test_frame(format, self.pattern);

        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        #[allow(clippy::cast_possible_truncation)]
        let bytes_used = data.len() as u32;
        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used,
            },
        })
    }

    fn apply_controls(&mut self, controls: &ControlList) -> Result<()> {
        if !controls.is_empty() {
            self.device
                .applied
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(controls.clone());
        }
        Ok(())
    }
}

/// Generate test frame data in the format's pixel format.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let yuyv = generate_yuyv(format.width, format.height, pattern);

    match format.fourcc {
        FourCC::GREY => yuyv.iter().step_by(2).copied().collect(),
        FourCC::RGB3 => yuyv
            .chunks_exact(4)
            .flat_map(|pair| match *pair {
                [y0, u, y1, v] => {
                    let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
                    let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
                    [r0, g0, b0, r1, g1, b1]
                }
                _ => [0; 6],
            })
            .collect(),
        _ => yuyv,
    }
}

/// Generate a YUYV frame: rows of [Y0 U Y1 V] pixel pairs.
fn generate_yuyv(width: u32, height: u32, pattern: TestPattern) -> Vec<u8> {
    let row_bytes = width as usize * 2;
    let mut data = vec![0u8; row_bytes * height as usize];
    if row_bytes == 0 {
        return data;
    }

    for row in data.chunks_exact_mut(row_bytes) {
        for (pair_idx, pair) in row.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let x = pair_idx as u32 * 2;
            let (y_val, u_val, v_val) = pattern_yuv(pattern, x, width);
            pair.copy_from_slice(&[y_val, u_val, y_val, v_val]);
        }
    }

    data
}

/// YUV value of the pattern at column `x`.
fn pattern_yuv(pattern: TestPattern, x: u32, width: u32) -> (u8, u8, u8) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    match pattern {
        TestPattern::ColorBars => {
            let bar_width = (width / 8).max(1);
            let bar_idx = (x / bar_width).min(7) as usize;
            BARS.get(bar_idx).copied().unwrap_or((16, 128, 128))
        }
        TestPattern::Gradient => {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((u64::from(x) * 255) / u64::from(width.max(1))) as u8;
            (y_val, 128, 128)
        }
        TestPattern::Solid(y, u, v) => (y, u, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let new_format = Format::new(1280, 720, FourCC::GREY);
        let actual = device.set_format(&new_format).expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
        assert_eq!(actual.stride, 1280);

        let snapped = device
            .set_format(&Format::new(1000, 1000, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!((snapped.width, snapped.height), (1280, 720));

        assert!(device.set_format(&Format::new(640, 480, FourCC::NV12)).is_err());
    }

    #[test]
    fn test_mock_stream_capture() {
        let mut device = MockDevice::new();
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        let frame1 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert!(!frame1.data.is_empty());

        let frame2 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
    }

    #[test]
    fn test_mock_stream_uses_device_format() {
        let mut device = MockDevice::new()
            .with_format(Format::new(64, 8, FourCC::GREY))
            .with_pattern(TestPattern::Gradient);
        let mut stream = device.create_stream(1).expect("create_stream should succeed");

        let frame = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame.data.len(), 64 * 8);
        assert_eq!(frame.metadata.bytes_used, 64 * 8);
    }

    #[test]
    fn test_backend_stream_fails_after_limit() {
        let backend = MockBackend::new(1).with_failure_after(1);
        let info = backend.enumerate().expect("enumerate failed");
        let mut device = backend
            .open(info.first().expect("no camera"))
            .expect("open failed");
        let mut stream = device.create_stream(1).expect("create_stream should succeed");

        assert!(stream.next_frame().is_ok());
        assert!(matches!(
            stream.next_frame(),
            Err(CameraError::StreamError(_))
        ));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar is white (Y=235)
        assert_eq!(data.first(), Some(&235));

        let frame = Frame {
            data,
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 0,
            },
        };
        // Center of the blue bar
        let (r, g, b) = frame.pixel_at(7 * 80 - 40, 240, 640).expect("pixel missing");
        assert!(b > 200 && r < 40 && g < 40, "expected blue, got ({r}, {g}, {b})");
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge is dark
        assert!(data.first().is_some_and(|&y| y < 10));

        // Right edge is bright (last row, last pixel pair)
        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data.get(last_row_start + 638 * 2).copied().unwrap_or(0);
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data.get(..4), Some(&[128u8, 64, 128, 192][..]));
    }

    #[test]
    fn test_grey_and_rgb_frames() {
        let grey = generate_test_frame(
            &Format::new(64, 8, FourCC::GREY),
            TestPattern::Solid(100, 128, 128),
        );
        assert_eq!(grey.len(), 64 * 8);
        assert!(grey.iter().all(|&y| y == 100));

        let rgb = generate_test_frame(
            &Format::new(64, 8, FourCC::RGB3),
            TestPattern::Solid(100, 128, 128),
        );
        assert_eq!(rgb.len(), 64 * 8 * 3);
        assert_eq!(rgb.get(..3), Some(&[100u8, 100, 100][..]));
    }

    #[test]
    fn test_backend_enumerate_and_open() {
        let backend = MockBackend::new(2);
        let cameras = backend.enumerate().expect("enumerate failed");
        assert_eq!(cameras.len(), 2);
        assert_eq!(
            cameras.get(1).and_then(|c| c.properties.location),
            Some(CameraLocation::Back)
        );

        let device = backend
            .open(cameras.first().expect("camera missing"))
            .expect("open failed");
        assert_eq!(device.capabilities().bus_info, "mock:0");

        let missing = CameraInfo {
            id: "mock:5".to_owned(),
            properties: Properties::default(),
        };
        assert!(matches!(
            backend.open(&missing),
            Err(CameraError::DeviceNotFound(5))
        ));
    }

    #[test]
    fn test_stream_records_controls() {
        let backend = MockBackend::new(1);
        let info = backend
            .enumerate()
            .expect("enumerate failed")
            .into_iter()
            .next()
            .expect("camera missing");
        let mut device = backend.open(&info).expect("open failed");
        let mut stream = device.create_stream(1).expect("create_stream failed");

        let mut controls = ControlList::new();
        stream.apply_controls(&controls).expect("apply failed");
        controls.set(ControlId::AnalogueGain, crate::controls::ControlValue::Int(4));
        stream.apply_controls(&controls).expect("apply failed");

        assert_eq!(backend.applied_controls(), vec![controls]);
    }
}
