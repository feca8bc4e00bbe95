//! Stream and camera configuration with validation.

use std::fmt;

use crate::traits::{FormatCaps, FourCC, Size};

/// Upper bound on buffers per stream.
pub const MAX_BUFFER_COUNT: u32 = 16;

/// Intended use of a stream, which drives its default configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Unprocessed sensor data.
    Raw,
    /// High quality single frames.
    StillCapture,
    /// Continuous frames for encoding.
    VideoRecording,
    /// Continuous frames for display.
    Viewfinder,
}

impl StreamRole {
    /// Default number of buffers for the role.
    pub const fn default_buffer_count(self) -> u32 {
        match self {
            Self::StillCapture => 1,
            Self::Raw => 2,
            Self::VideoRecording | Self::Viewfinder => 4,
        }
    }
}

/// Handle to a configured stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub(crate) usize);

impl StreamId {
    /// Position of the stream within the active configuration.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Configuration of a single stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    /// Frame size.
    pub size: Size,
    /// Pixel format.
    pub pixel_format: FourCC,
    /// Bytes per line of the first plane.
    pub stride: u32,
    /// Total bytes per frame.
    pub frame_size: u32,
    /// Number of buffers to allocate.
    pub buffer_count: u32,
    /// Role the stream was generated for.
    pub role: StreamRole,
    pub(crate) stream: Option<StreamId>,
}

impl StreamConfiguration {
    /// Create a stream configuration with a packed stride.
    pub fn new(size: Size, pixel_format: FourCC, role: StreamRole) -> Self {
        let mut config = Self {
            size,
            pixel_format,
            stride: 0,
            frame_size: 0,
            buffer_count: role.default_buffer_count(),
            role,
            stream: None,
        };
        config.update_layout(true);
        config
    }

    /// Stream handle, assigned once the configuration is applied to a camera.
    pub const fn stream(&self) -> Option<StreamId> {
        self.stream
    }

    /// Bytes in each plane of a frame.
    pub fn plane_sizes(&self) -> Vec<u32> {
        self.pixel_format
            .plane_sizes(self.stride, self.size.height, self.frame_size)
    }

    fn update_layout(&mut self, reset: bool) {
        let min_stride = self.pixel_format.bytes_per_line(self.size.width);
        if reset || self.stride < min_stride {
            self.stride = min_stride;
        }
        let estimate = self.size.width * self.size.height * 2;
        let fallback = if self.frame_size == 0 || reset {
            estimate
        } else {
            self.frame_size
        };
        self.frame_size = self
            .pixel_format
            .frame_size(self.stride, self.size.height, fallback);
    }
}

impl fmt::Display for StreamConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.size, self.pixel_format)
    }
}

/// Outcome of validating a camera configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Configuration can be applied as is.
    Valid,
    /// Configuration was changed to the closest supported one.
    Adjusted,
    /// Configuration cannot be made valid.
    Invalid,
}

/// Set of stream configurations for one camera.
#[derive(Debug, Clone)]
pub struct CameraConfiguration {
    streams: Vec<StreamConfiguration>,
    formats: Vec<FormatCaps>,
    max_streams: usize,
}

impl CameraConfiguration {
    pub(crate) const fn new(
        streams: Vec<StreamConfiguration>,
        formats: Vec<FormatCaps>,
        max_streams: usize,
    ) -> Self {
        Self {
            streams,
            formats,
            max_streams,
        }
    }

    /// Number of stream configurations.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether there are no stream configurations.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Stream configuration at `index`.
    pub fn get(&self, index: usize) -> Option<&StreamConfiguration> {
        self.streams.get(index)
    }

    /// Mutable stream configuration at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut StreamConfiguration> {
        self.streams.get_mut(index)
    }

    /// Iterate over the stream configurations.
    pub fn iter(&self) -> std::slice::Iter<'_, StreamConfiguration> {
        self.streams.iter()
    }

    pub(crate) fn streams_mut(&mut self) -> &mut [StreamConfiguration] {
        &mut self.streams
    }

    /// Adjust every stream to the closest configuration the camera supports.
    pub fn validate(&mut self) -> ConfigStatus {
        if self.streams.is_empty() || self.streams.len() > self.max_streams {
            return ConfigStatus::Invalid;
        }
        let Some(first) = self.formats.first() else {
            return ConfigStatus::Invalid;
        };

        let mut status = ConfigStatus::Valid;
        for config in &mut self.streams {
            let mut changed = false;
            let caps = match self
                .formats
                .iter()
                .find(|caps| caps.fourcc == config.pixel_format)
            {
                Some(caps) => caps,
                None => {
                    log::debug!(
                        "pixel format {} unsupported, using {}",
                        config.pixel_format,
                        first.fourcc
                    );
                    config.pixel_format = first.fourcc;
                    changed = true;
                    first
                }
            };

            let Some(size) = caps.sizes.nearest(config.size) else {
                return ConfigStatus::Invalid;
            };
            if size != config.size {
                log::debug!("size {} unsupported, using {size}", config.size);
                config.size = size;
                changed = true;
            }

            config.update_layout(changed);

            let buffer_count = config.buffer_count.clamp(1, MAX_BUFFER_COUNT);
            if buffer_count != config.buffer_count {
                config.buffer_count = buffer_count;
                changed = true;
            }

            if changed {
                status = ConfigStatus::Adjusted;
            }
        }

        status
    }
}

impl<'a> IntoIterator for &'a CameraConfiguration {
    type Item = &'a StreamConfiguration;
    type IntoIter = std::slice::Iter<'a, StreamConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
