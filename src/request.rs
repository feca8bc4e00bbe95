//! Capture requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::allocator::FrameBuffer;
use crate::configuration::StreamId;
use crate::controls::ControlList;
use crate::error::{CameraError, Result};
use crate::traits::Frame;

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created or reused, not completed yet.
    Pending,
    /// All buffers were filled.
    Complete,
    /// Capture stopped before the request completed.
    Cancelled,
}

/// How much of a completed request to keep when reusing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseFlag {
    /// Drop the buffers.
    Default,
    /// Keep the buffers attached.
    ReuseBuffers,
}

/// One capture operation: a buffer per stream plus controls to apply.
#[derive(Debug)]
pub struct Request {
    cookie: u64,
    sequence: u32,
    status: RequestStatus,
    buffers: BTreeMap<StreamId, Arc<FrameBuffer>>,
    controls: ControlList,
}

impl Request {
    pub(crate) fn new(cookie: u64) -> Self {
        Self {
            cookie,
            sequence: 0,
            status: RequestStatus::Pending,
            buffers: BTreeMap::new(),
            controls: ControlList::new(),
        }
    }

    /// Application supplied identifier.
    pub const fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Queueing order assigned by the camera.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Current status.
    pub const fn status(&self) -> RequestStatus {
        self.status
    }

    /// Buffers attached to the request, by stream.
    pub const fn buffers(&self) -> &BTreeMap<StreamId, Arc<FrameBuffer>> {
        &self.buffers
    }

    /// Buffer attached for a stream.
    pub fn find_buffer(&self, stream: StreamId) -> Option<&Arc<FrameBuffer>> {
        self.buffers.get(&stream)
    }

    /// Controls applied before the frame is captured.
    pub const fn controls(&self) -> &ControlList {
        &self.controls
    }

    /// Mutable access to the request controls.
    pub fn controls_mut(&mut self) -> &mut ControlList {
        &mut self.controls
    }

    /// Attach a buffer for a stream. Each stream takes at most one buffer.
    pub fn add_buffer(&mut self, stream: StreamId, buffer: Arc<FrameBuffer>) -> Result<()> {
        if self.buffers.contains_key(&stream) {
            return Err(CameraError::BufferAlreadySet);
        }
        self.buffers.insert(stream, buffer);
        Ok(())
    }

    /// Make a completed request ready to be queued again.
    ///
    /// Controls are cleared; buffers are kept only with `ReuseBuffers`.
    pub fn reuse(&mut self, flag: ReuseFlag) {
        self.sequence = 0;
        self.status = RequestStatus::Pending;
        self.controls.clear();
        if flag == ReuseFlag::Default {
            self.buffers.clear();
        }
    }

    pub(crate) fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    pub(crate) fn complete(mut self, frame: &Frame) -> Self {
        for buffer in self.buffers.values() {
            buffer.fill(&frame.data, frame.metadata.sequence, frame.metadata.timestamp);
        }
        self.status = RequestStatus::Complete;
        self
    }

    pub(crate) fn cancel(mut self) -> Self {
        for buffer in self.buffers.values() {
            buffer.cancel();
        }
        self.status = RequestStatus::Cancelled;
        self
    }
}
