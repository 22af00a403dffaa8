// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Contract between the component and the accelerator bridge.
//!
//! Every call returns once the request is queued. `stop`, `pause` and
//! `destroy` complete later through the callback, which the bridge invokes
//! on its own thread.

use std::sync::Arc;

use crate::core::error::BufferRejected;
use crate::core::ports::{BufferHeader, ColorFormat, PortIndex};
use crate::core::Result;

/// Accelerator stream carrying one port's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Input,
    Overlay,
    RgbOutput,
    YuvOutput,
}

impl StreamId {
    pub fn port(self) -> PortIndex {
        match self {
            StreamId::Input => PortIndex::Input,
            StreamId::Overlay => PortIndex::Overlay,
            StreamId::RgbOutput => PortIndex::RgbOutput,
            StreamId::YuvOutput => PortIndex::YuvOutput,
        }
    }
}

impl From<PortIndex> for StreamId {
    fn from(port: PortIndex) -> Self {
        match port {
            PortIndex::Input => StreamId::Input,
            PortIndex::Overlay => StreamId::Overlay,
            PortIndex::RgbOutput => StreamId::RgbOutput,
            PortIndex::YuvOutput => StreamId::YuvOutput,
        }
    }
}

/// Handle to an open accelerator session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Per-stream geometry handed to the accelerator.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub stream: StreamId,
    pub enabled: bool,
    pub frame_width: u32,
    pub frame_height: u32,
    pub color_format: ColorFormat,
    pub buffer_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub component: String,
    pub streams: Vec<StreamParams>,
}

/// Per-buffer context submitted alongside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub frame_width: u32,
    pub frame_height: u32,
    pub color_format: ColorFormat,
}

/// Events delivered by the bridge on its callback thread.
#[derive(Debug)]
pub enum AcceleratorEvent {
    /// The accelerator finished with a buffer.
    BufferProcessed {
        stream: StreamId,
        buffer: BufferHeader,
        filled_len: usize,
    },
    /// The accelerator handed back a buffer it never processed (stop/destroy).
    BufferNotProcessed { stream: StreamId, buffer: BufferHeader },
    ProcessingStopped,
    ProcessingPaused,
    DspError { code: u32, recoverable: bool },
    InternalError { message: String },
}

pub type AcceleratorCallback = Arc<dyn Fn(AcceleratorEvent) + Send + Sync>;

/// Asynchronous bridge to the accelerator.
pub trait AcceleratorBridge: Send + Sync {
    fn open_session(&self, params: &SessionParams, callback: AcceleratorCallback) -> Result<SessionId>;

    /// Hand control parameters to an open session before processing starts.
    fn configure(&self, _session: SessionId, _params: &SessionParams) -> Result<()> {
        Ok(())
    }

    /// Include or exclude a stream from frame processing after a port is
    /// enabled or disabled on an open session.
    fn set_stream_enabled(&self, _session: SessionId, _stream: StreamId, _enabled: bool) -> Result<()> {
        Ok(())
    }

    /// Start, or resume after pause or stop.
    fn start(&self, session: SessionId) -> Result<()>;

    /// Completes with [`AcceleratorEvent::ProcessingStopped`] after every
    /// held buffer has been handed back.
    fn stop(&self, session: SessionId) -> Result<()>;

    /// Completes with [`AcceleratorEvent::ProcessingPaused`].
    fn pause(&self, session: SessionId) -> Result<()>;

    fn destroy(&self, session: SessionId) -> Result<()>;

    /// Queue a buffer. On failure the buffer comes back in the error.
    fn submit(
        &self,
        session: SessionId,
        stream: StreamId,
        buffer: BufferHeader,
        context: FrameContext,
    ) -> std::result::Result<(), BufferRejected>;
}
