//! V4L2 backend using the v4l crate.

use std::io;
use std::path::Path;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::controls::{CameraLocation, ControlId, ControlInfo, ControlList, Properties};
use crate::error::{CameraError, Result};
use crate::traits::{
    Backend, CameraDevice, CameraInfo, CaptureStream, DeviceCapabilities, Format, FormatCaps,
    FourCC, Frame, FrameMetadata, Size, SizeRange,
};

/// How long `next_frame` waits for the driver before reporting a timeout.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// V4L2 control ids, in order of preference for each `ControlId`.
const V4L2_CONTROLS: [(ControlId, u32); 7] = [
    (ControlId::Brightness, 0x0098_0900),
    (ControlId::Contrast, 0x0098_0901),
    (ControlId::Saturation, 0x0098_0902),
    (ControlId::AnalogueGain, 0x009e_0903), // V4L2_CID_ANALOGUE_GAIN
    (ControlId::AnalogueGain, 0x0098_0913), // V4L2_CID_GAIN
    (ControlId::ExposureTime, 0x009a_0902), // V4L2_CID_EXPOSURE_ABSOLUTE, 100us units
    (ControlId::ExposureValue, 0x009a_0913), // V4L2_CID_AUTO_EXPOSURE_BIAS
];

/// Microseconds per unit of V4L2_CID_EXPOSURE_ABSOLUTE.
const EXPOSURE_UNIT_US: i64 = 100;

/// A device control mapped to its V4L2 id and range.
#[derive(Debug, Clone, Copy)]
struct MappedControl {
    id: ControlId,
    cid: u32,
    info: ControlInfo,
}

impl MappedControl {
    const fn scale(&self) -> i64 {
        unit_scale(self.id)
    }
}

/// Factor between `ControlId` units and the driver's units.
const fn unit_scale(id: ControlId) -> i64 {
    match id {
        ControlId::ExposureTime => EXPOSURE_UNIT_US,
        _ => 1,
    }
}

/// Backend enumerating `/dev/video*` capture nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4L2Backend;

impl Backend for V4L2Backend {
    type Device = V4L2Device;

    fn enumerate(&self) -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path();
            let device = match V4L2Device::with_path(path) {
                Ok(device) => device,
                Err(err) => {
                    log::debug!("skipping {}: {err}", path.display());
                    continue;
                }
            };
            let caps = device.capabilities();
            if !(caps.can_capture && caps.can_stream) {
                log::debug!("skipping {}: not a streaming capture node", path.display());
                continue;
            }
            cameras.push(CameraInfo {
                id: path.display().to_string(),
                properties: properties_from_caps(caps),
            });
        }
        Ok(cameras)
    }

    fn open(&self, info: &CameraInfo) -> Result<V4L2Device> {
        V4L2Device::with_path(Path::new(&info.id))
    }
}

fn properties_from_caps(caps: &DeviceCapabilities) -> Properties {
    let mut properties = Properties {
        location: caps
            .bus_info
            .starts_with("usb")
            .then_some(CameraLocation::External),
        model: Some(caps.card.clone()),
        ..Properties::default()
    };
    properties
        .extra
        .insert("Driver".to_owned(), caps.driver.clone());
    properties
        .extra
        .insert("BusInfo".to_owned(), caps.bus_info.clone());
    properties
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
    controls: Vec<MappedControl>,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        Self::from_device(device)
    }

    /// Open a V4L2 device by node path.
    pub fn with_path(path: &Path) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("{}: {err}", path.display())))?;
        Self::from_device(device)
    }

    fn from_device(device: Device) -> Result<Self> {
        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        let controls = match device.query_controls() {
            Ok(descriptions) => map_controls(&descriptions),
            Err(err) => {
                log::debug!("{}: no controls: {err}", capabilities.card);
                Vec::new()
            }
        };

        Ok(Self {
            device,
            capabilities,
            controls,
        })
    }
}

fn map_controls(descriptions: &[v4l::control::Description]) -> Vec<MappedControl> {
    let mut mapped: Vec<MappedControl> = Vec::new();
    for (id, cid) in V4L2_CONTROLS {
        if mapped.iter().any(|control| control.id == id) {
            continue;
        }
        let Some(desc) = descriptions.iter().find(|desc| desc.id == cid) else {
            continue;
        };
        let scale = unit_scale(id);
        mapped.push(MappedControl {
            id,
            cid,
            info: ControlInfo::int(
                desc.minimum.saturating_mul(scale),
                desc.maximum.saturating_mul(scale),
                desc.default.saturating_mul(scale),
            ),
        });
    }
    mapped
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl CameraDevice for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn supported_formats(&self) -> Result<Vec<FormatCaps>> {
        let descriptions = self
            .device
            .enum_formats()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let mut formats = Vec::with_capacity(descriptions.len());
        for desc in descriptions {
            let Ok(frame_sizes) = self.device.enum_framesizes(desc.fourcc) else {
                log::debug!("no frame sizes for {}", desc.fourcc);
                continue;
            };

            let mut discrete = Vec::new();
            let mut stepwise = None;
            for frame_size in frame_sizes {
                match frame_size.size {
                    FrameSizeEnum::Discrete(size) => {
                        discrete.push(Size::new(size.width, size.height));
                    }
                    FrameSizeEnum::Stepwise(range) => {
                        stepwise = Some(SizeRange::Stepwise {
                            min: Size::new(range.min_width, range.min_height),
                            max: Size::new(range.max_width, range.max_height),
                            step: Size::new(range.step_width, range.step_height),
                        });
                    }
                }
            }

            let sizes = match stepwise {
                Some(range) => range,
                None if !discrete.is_empty() => SizeRange::Discrete(discrete),
                None => continue,
            };
            formats.push(FormatCaps {
                fourcc: FourCC::from(desc.fourcc),
                sizes,
            });
        }
        Ok(formats)
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn controls(&self) -> Result<Vec<(ControlId, ControlInfo)>> {
        Ok(self
            .controls
            .iter()
            .map(|control| (control.id, control.info))
            .collect())
    }

    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>> {
        let device = &self.device;
        let mut stream = Stream::with_buffers(device, Type::VideoCapture, buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        stream.set_timeout(POLL_TIMEOUT);

        Ok(V4L2Stream {
            stream,
            device,
            controls: &self.controls,
        })
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
    device: &'a Device,
    controls: &'a [MappedControl],
}

impl CaptureStream for V4L2Stream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self.stream.next().map_err(|err| {
            if err.kind() == io::ErrorKind::TimedOut {
                CameraError::Timeout
            } else {
                CameraError::StreamError(err.to_string())
            }
        })?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        // Some drivers leave bytesused at zero for uncompressed formats
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            used => used.min(buf.len()),
        };
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }

    fn apply_controls(&mut self, controls: &ControlList) -> Result<()> {
        for (id, value) in controls.iter() {
            let Some(mapped) = self.controls.iter().find(|control| control.id == id) else {
                log::debug!("control {id} not supported by device");
                continue;
            };
            let clamped = mapped.info.clamp(value);
            if clamped != value.as_i64() {
                log::debug!("control {id} clamped from {value} to {clamped}");
            }
            self.device
                .set_control(Control {
                    id: mapped.cid,
                    value: Value::Integer(clamped / mapped.scale()),
                })
                .map_err(|err| CameraError::StreamError(format!("set {id}: {err}")))?;
        }
        Ok(())
    }
}
