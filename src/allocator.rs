//! Frame buffers and the allocator that reserves them per stream.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use crate::camera::Camera;
use crate::configuration::{StreamConfiguration, StreamId};
use crate::error::{CameraError, Result};
use crate::traits::CameraDevice;

/// Completion status of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    /// Frame captured completely.
    #[default]
    Success,
    /// Frame data is incomplete or corrupt.
    Error,
    /// Capture was cancelled before the frame arrived.
    Cancelled,
}

/// Per-plane metadata of a completed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneMetadata {
    /// Bytes of valid data in the plane.
    pub bytes_used: u32,
}

/// Metadata of the last frame captured into a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferMetadata {
    /// Completion status.
    pub status: FrameStatus,
    /// Frame sequence number from the device.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Per-plane bytes used.
    pub planes: Vec<PlaneMetadata>,
}

#[derive(Debug)]
struct BufferContents {
    planes: Vec<Vec<u8>>,
    metadata: BufferMetadata,
}

/// Memory for one captured frame, split in planes.
#[derive(Debug)]
pub struct FrameBuffer {
    contents: RwLock<BufferContents>,
}

impl FrameBuffer {
    /// Create a zeroed buffer with the given plane sizes.
    pub fn new(plane_sizes: &[u32]) -> Self {
        let planes = plane_sizes
            .iter()
            .map(|&size| vec![0u8; size as usize])
            .collect();
        Self {
            contents: RwLock::new(BufferContents {
                planes,
                metadata: BufferMetadata::default(),
            }),
        }
    }

    /// Metadata of the last completed frame.
    pub fn metadata(&self) -> BufferMetadata {
        self.read().metadata.clone()
    }

    /// Capacity of each plane in bytes.
    pub fn plane_lengths(&self) -> Vec<usize> {
        self.read().planes.iter().map(Vec::len).collect()
    }

    /// Map the buffer for reading.
    ///
    /// The capture thread cannot write into the buffer while the mapping is
    /// held.
    pub fn map(&self) -> MappedFrameBuffer<'_> {
        MappedFrameBuffer { guard: self.read() }
    }

    /// Copy frame data into the planes in order and record its metadata.
    pub(crate) fn fill(&self, data: &[u8], sequence: u32, timestamp: Duration) {
        let mut contents = self
            .contents
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut remaining = data;
        let mut planes = Vec::with_capacity(contents.planes.len());
        for plane in &mut contents.planes {
            let len = plane.len().min(remaining.len());
            let (head, tail) = remaining.split_at(len);
            if let Some(dest) = plane.get_mut(..len) {
                dest.copy_from_slice(head);
            }
            remaining = tail;
            #[allow(clippy::cast_possible_truncation)]
            planes.push(PlaneMetadata {
                bytes_used: len as u32,
            });
        }

        contents.metadata = BufferMetadata {
            status: if remaining.is_empty() {
                FrameStatus::Success
            } else {
                FrameStatus::Error
            },
            sequence,
            timestamp,
            planes,
        };
    }

    pub(crate) fn cancel(&self) {
        let mut contents = self
            .contents
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        contents.metadata.status = FrameStatus::Cancelled;
        for plane in &mut contents.metadata.planes {
            plane.bytes_used = 0;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BufferContents> {
        self.contents.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read access to the planes of a frame buffer.
pub struct MappedFrameBuffer<'a> {
    guard: RwLockReadGuard<'a, BufferContents>,
}

impl MappedFrameBuffer<'_> {
    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        self.guard.planes.len()
    }

    /// Valid bytes of plane `index`.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let plane = self.guard.planes.get(index)?;
        let used = self
            .guard
            .metadata
            .planes
            .get(index)
            .map_or(plane.len(), |meta| meta.bytes_used as usize);
        plane.get(..used.min(plane.len()))
    }

    /// Valid bytes of every plane.
    pub fn planes(&self) -> Vec<&[u8]> {
        (0..self.plane_count()).filter_map(|i| self.plane(i)).collect()
    }
}

/// Reserves frame buffers for the streams of a configured camera.
#[derive(Debug)]
pub struct FrameBufferAllocator {
    streams: Vec<StreamConfiguration>,
    buffers: BTreeMap<StreamId, Vec<Arc<FrameBuffer>>>,
}

impl FrameBufferAllocator {
    /// Create an allocator for the camera's active configuration.
    pub fn new<D: CameraDevice>(camera: &Camera<D>) -> Result<Self> {
        let streams = camera.streams().to_vec();
        if streams.is_empty() {
            return Err(CameraError::InvalidState {
                operation: "allocate buffers",
                state: camera.state().name(),
            });
        }
        Ok(Self {
            streams,
            buffers: BTreeMap::new(),
        })
    }

    /// Allocate `buffer_count` buffers for a stream. Returns the number allocated.
    pub fn allocate(&mut self, stream: StreamId) -> Result<usize> {
        if self.buffers.contains_key(&stream) {
            return Err(CameraError::BuffersAlreadyAllocated);
        }
        let config = self
            .streams
            .get(stream.index())
            .ok_or(CameraError::UnknownStream)?;

        let plane_sizes = config.plane_sizes();
        let buffers: Vec<Arc<FrameBuffer>> = (0..config.buffer_count)
            .map(|_| Arc::new(FrameBuffer::new(&plane_sizes)))
            .collect();
        let count = buffers.len();
        log::debug!(
            "allocated {count} buffers of {} bytes for stream {}",
            config.frame_size,
            stream.index()
        );
        self.buffers.insert(stream, buffers);
        Ok(count)
    }

    /// Buffers allocated for a stream.
    pub fn buffers(&self, stream: StreamId) -> &[Arc<FrameBuffer>] {
        self.buffers.get(&stream).map_or(&[], Vec::as_slice)
    }

    /// Release the buffers of a stream.
    pub fn free(&mut self, stream: StreamId) -> Result<()> {
        self.buffers
            .remove(&stream)
            .map(|_| ())
            .ok_or(CameraError::BuffersNotAllocated)
    }
}
