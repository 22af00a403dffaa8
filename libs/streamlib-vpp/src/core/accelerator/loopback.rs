// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process accelerator that copies input payloads into output buffers.
//!
//! Callbacks are delivered from a dedicated dispatcher thread, like a real
//! bridge. In [`CompletionMode::Automatic`] every frame is processed as soon
//! as an input and one empty buffer per enabled output are queued. In
//! [`CompletionMode::Manual`] nothing completes until the owner steps it,
//! which lets tests hold buffers inside the accelerator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::core::error::BufferRejected;
use crate::core::ports::BufferHeader;
use crate::core::{Result, VppError};

use super::{
    AcceleratorBridge, AcceleratorCallback, AcceleratorEvent, FrameContext, SessionId,
    SessionParams, StreamId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    Automatic,
    Manual,
}

type Dispatch = (AcceleratorCallback, AcceleratorEvent);

const STREAMS: [StreamId; 4] = [
    StreamId::Input,
    StreamId::Overlay,
    StreamId::RgbOutput,
    StreamId::YuvOutput,
];

fn stream_slot(stream: StreamId) -> usize {
    stream.port().as_raw() as usize
}

struct Session {
    callback: AcceleratorCallback,
    enabled: [bool; 4],
    running: bool,
    paused: bool,
    queues: [VecDeque<BufferHeader>; 4],
}

impl Session {
    fn ready_frame(&self) -> bool {
        if !self.enabled[0] || self.queues[0].is_empty() {
            return false;
        }
        if self.enabled[1] && self.queues[1].is_empty() {
            return false;
        }
        (2..4).all(|i| !self.enabled[i] || !self.queues[i].is_empty())
    }
}

#[derive(Default)]
struct LoopbackState {
    sessions: HashMap<SessionId, Session>,
    current: Option<SessionId>,
    fail_next_open: bool,
    ignore_stop: bool,
    ignore_pause: bool,
    reject_submissions: bool,
    submitted: [u64; 4],
    stops: u64,
}

pub struct LoopbackAccelerator {
    mode: CompletionMode,
    state: Mutex<LoopbackState>,
    next_session: AtomicU64,
    dispatch_tx: Sender<Dispatch>,
}

impl LoopbackAccelerator {
    pub fn new(mode: CompletionMode) -> Result<Arc<Self>> {
        let (dispatch_tx, dispatch_rx) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("vpp-loopback-dispatch".to_string())
            .spawn(move || run_dispatcher(dispatch_rx))
            .map_err(|e| VppError::Runtime(format!("Failed to spawn thread: {}", e)))?;

        Ok(Arc::new(Self {
            mode,
            state: Mutex::new(LoopbackState::default()),
            next_session: AtomicU64::new(1),
            dispatch_tx,
        }))
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Make the next `open_session` fail.
    pub fn fail_next_open(&self) {
        self.state.lock().fail_next_open = true;
    }

    /// Swallow stop requests so the stop confirmation never arrives.
    pub fn ignore_stop(&self, ignore: bool) {
        self.state.lock().ignore_stop = ignore;
    }

    /// Swallow pause requests so the pause acknowledgment never arrives.
    pub fn ignore_pause(&self, ignore: bool) {
        self.state.lock().ignore_pause = ignore;
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.state.lock().reject_submissions = reject;
    }

    /// Buffers currently queued on `stream` of the current session.
    pub fn queued(&self, stream: StreamId) -> usize {
        let state = self.state.lock();
        state
            .current
            .and_then(|id| state.sessions.get(&id))
            .map(|s| s.queues[stream_slot(stream)].len())
            .unwrap_or(0)
    }

    /// Total buffers ever submitted on `stream`.
    pub fn submitted(&self, stream: StreamId) -> u64 {
        self.state.lock().submitted[stream_slot(stream)]
    }

    pub fn stop_requests(&self) -> u64 {
        self.state.lock().stops
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Complete the oldest queued buffer on `stream` without producing
    /// anything else.
    pub fn complete(&self, stream: StreamId, filled_len: usize) -> bool {
        let mut state = self.state.lock();
        let Some(session) = current_session(&mut state) else {
            return false;
        };
        let Some(buffer) = session.queues[stream_slot(stream)].pop_front() else {
            return false;
        };
        let callback = session.callback.clone();
        drop(state);
        self.emit(
            &callback,
            AcceleratorEvent::BufferProcessed {
                stream,
                buffer,
                filled_len,
            },
        );
        true
    }

    /// Process one full frame if one is ready, regardless of mode.
    pub fn process_frame(&self) -> bool {
        let mut state = self.state.lock();
        let Some(session) = current_session(&mut state) else {
            return false;
        };
        if !session.ready_frame() {
            return false;
        }
        let callback = session.callback.clone();
        let events = take_frame(session);
        drop(state);
        for event in events {
            self.emit(&callback, event);
        }
        true
    }

    /// Deliver an arbitrary event to the current session's callback.
    pub fn inject(&self, event: AcceleratorEvent) -> bool {
        let callback = {
            let state = self.state.lock();
            state
                .current
                .and_then(|id| state.sessions.get(&id))
                .map(|s| s.callback.clone())
        };
        match callback {
            Some(callback) => {
                self.emit(&callback, event);
                true
            }
            None => false,
        }
    }

    fn emit(&self, callback: &AcceleratorCallback, event: AcceleratorEvent) {
        if self.dispatch_tx.send((callback.clone(), event)).is_err() {
            tracing::warn!("[loopback] Dispatcher gone, dropping event");
        }
    }

    fn pump(&self, session_id: SessionId) {
        if self.mode != CompletionMode::Automatic {
            return;
        }
        loop {
            let mut state = self.state.lock();
            let Some(session) = state.sessions.get_mut(&session_id) else {
                return;
            };
            if !session.running || session.paused || !session.ready_frame() {
                return;
            }
            let callback = session.callback.clone();
            let events = take_frame(session);
            drop(state);
            for event in events {
                self.emit(&callback, event);
            }
        }
    }

    /// Hand back every queued buffer of a session.
    fn drain(session: &mut Session) -> Vec<AcceleratorEvent> {
        let mut events = Vec::new();
        for stream in STREAMS {
            while let Some(buffer) = session.queues[stream_slot(stream)].pop_front() {
                events.push(AcceleratorEvent::BufferNotProcessed { stream, buffer });
            }
        }
        events
    }
}

fn current_session(state: &mut LoopbackState) -> Option<&mut Session> {
    let id = state.current?;
    state.sessions.get_mut(&id)
}

fn take_frame(session: &mut Session) -> Vec<AcceleratorEvent> {
    let mut events = Vec::new();
    let Some(input) = session.queues[0].pop_front() else {
        return events;
    };
    for stream in [StreamId::RgbOutput, StreamId::YuvOutput] {
        let slot = stream_slot(stream);
        if !session.enabled[slot] {
            continue;
        }
        if let Some(mut output) = session.queues[slot].pop_front() {
            let filled_len = output.fill(input.payload());
            events.push(AcceleratorEvent::BufferProcessed {
                stream,
                buffer: output,
                filled_len,
            });
        }
    }
    // Inputs are released after the outputs derived from them.
    events.push(AcceleratorEvent::BufferProcessed {
        stream: StreamId::Input,
        buffer: input,
        filled_len: 0,
    });
    if session.enabled[1] {
        if let Some(overlay) = session.queues[1].pop_front() {
            events.push(AcceleratorEvent::BufferProcessed {
                stream: StreamId::Overlay,
                buffer: overlay,
                filled_len: 0,
            });
        }
    }
    events
}

fn run_dispatcher(rx: Receiver<Dispatch>) {
    tracing::debug!("[loopback] Dispatcher started");
    while let Ok((callback, event)) = rx.recv() {
        callback(event);
    }
    tracing::debug!("[loopback] Dispatcher stopped");
}

impl AcceleratorBridge for LoopbackAccelerator {
    fn open_session(&self, params: &SessionParams, callback: AcceleratorCallback) -> Result<SessionId> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_open) {
            return Err(VppError::Accelerator("loopback refused to open a session".to_string()));
        }
        let mut enabled = [false; 4];
        for stream in &params.streams {
            enabled[stream_slot(stream.stream)] = stream.enabled;
        }
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        state.sessions.insert(
            id,
            Session {
                callback,
                enabled,
                running: false,
                paused: false,
                queues: Default::default(),
            },
        );
        state.current = Some(id);
        tracing::debug!("[loopback] Opened {} for {}", id, params.component);
        Ok(id)
    }

    fn set_stream_enabled(&self, session: SessionId, stream: StreamId, enabled: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            let s = state
                .sessions
                .get_mut(&session)
                .ok_or_else(|| VppError::Accelerator(format!("unknown {}", session)))?;
            s.enabled[stream_slot(stream)] = enabled;
        }
        tracing::debug!("[loopback] {:?} enabled={} on {}", stream, enabled, session);
        self.pump(session);
        Ok(())
    }

    fn start(&self, session: SessionId) -> Result<()> {
        {
            let mut state = self.state.lock();
            let s = state
                .sessions
                .get_mut(&session)
                .ok_or_else(|| VppError::Accelerator(format!("unknown {}", session)))?;
            s.running = true;
            s.paused = false;
        }
        self.pump(session);
        Ok(())
    }

    fn stop(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        state.stops += 1;
        if state.ignore_stop {
            tracing::debug!("[loopback] Ignoring stop for {}", session);
            return Ok(());
        }
        let s = state
            .sessions
            .get_mut(&session)
            .ok_or_else(|| VppError::Accelerator(format!("unknown {}", session)))?;
        s.running = false;
        let callback = s.callback.clone();
        let mut events = Self::drain(s);
        events.push(AcceleratorEvent::ProcessingStopped);
        drop(state);
        for event in events {
            self.emit(&callback, event);
        }
        Ok(())
    }

    fn pause(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        if state.ignore_pause {
            return Ok(());
        }
        let s = state
            .sessions
            .get_mut(&session)
            .ok_or_else(|| VppError::Accelerator(format!("unknown {}", session)))?;
        s.paused = true;
        let callback = s.callback.clone();
        drop(state);
        self.emit(&callback, AcceleratorEvent::ProcessingPaused);
        Ok(())
    }

    fn destroy(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        let mut s = state
            .sessions
            .remove(&session)
            .ok_or_else(|| VppError::Accelerator(format!("unknown {}", session)))?;
        if state.current == Some(session) {
            state.current = None;
        }
        drop(state);
        for event in Self::drain(&mut s) {
            self.emit(&s.callback, event);
        }
        tracing::debug!("[loopback] Destroyed {}", session);
        Ok(())
    }

    fn submit(
        &self,
        session: SessionId,
        stream: StreamId,
        buffer: BufferHeader,
        _context: FrameContext,
    ) -> std::result::Result<(), BufferRejected> {
        {
            let mut state = self.state.lock();
            if state.reject_submissions {
                return Err(BufferRejected::new(
                    buffer,
                    VppError::Accelerator("loopback rejecting submissions".to_string()),
                ));
            }
            state.submitted[stream_slot(stream)] += 1;
            let Some(s) = state.sessions.get_mut(&session) else {
                return Err(BufferRejected::new(
                    buffer,
                    VppError::Accelerator(format!("unknown {}", session)),
                ));
            };
            s.queues[stream_slot(stream)].push_back(buffer);
        }
        self.pump(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::accelerator::StreamParams;
    use crate::core::ports::{BufferId, ColorFormat, ComponentId, PortIndex, StorageOrigin};

    fn params() -> SessionParams {
        SessionParams {
            component: "test".to_string(),
            streams: STREAMS
                .iter()
                .map(|&stream| StreamParams {
                    stream,
                    enabled: stream != StreamId::Overlay,
                    frame_width: 4,
                    frame_height: 4,
                    color_format: ColorFormat::CbYCrY,
                    buffer_count: 1,
                })
                .collect(),
        }
    }

    fn context() -> FrameContext {
        FrameContext {
            frame_width: 4,
            frame_height: 4,
            color_format: ColorFormat::CbYCrY,
        }
    }

    fn buffer(port: PortIndex, bytes: &[u8]) -> BufferHeader {
        let id = BufferId {
            component: ComponentId::new(),
            port,
            slot: 0,
        };
        let mut buffer = BufferHeader::new(id, StorageOrigin::SelfAllocated, vec![0; 8]);
        buffer.fill(bytes);
        buffer
    }

    fn open(mode: CompletionMode) -> (Arc<LoopbackAccelerator>, SessionId, Receiver<AcceleratorEvent>) {
        let loopback = LoopbackAccelerator::new(mode).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let callback: AcceleratorCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let session = loopback.open_session(&params(), callback).unwrap();
        (loopback, session, rx)
    }

    fn submit_frame(loopback: &LoopbackAccelerator, session: SessionId, bytes: &[u8]) {
        for (stream, port) in [
            (StreamId::RgbOutput, PortIndex::RgbOutput),
            (StreamId::YuvOutput, PortIndex::YuvOutput),
            (StreamId::Input, PortIndex::Input),
        ] {
            let payload: &[u8] = if port.is_input() { bytes } else { &[] };
            loopback
                .submit(session, stream, buffer(port, payload), context())
                .unwrap();
        }
    }

    fn next(rx: &Receiver<AcceleratorEvent>) -> AcceleratorEvent {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_manual_frame_copies_payload_and_releases_input_last() {
        let (loopback, session, rx) = open(CompletionMode::Manual);
        loopback.start(session).unwrap();
        submit_frame(&loopback, session, &[7, 8, 9]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        assert!(loopback.process_frame());
        let mut streams = Vec::new();
        for _ in 0..3 {
            match next(&rx) {
                AcceleratorEvent::BufferProcessed {
                    stream,
                    buffer,
                    filled_len,
                } => {
                    if stream != StreamId::Input {
                        assert_eq!(filled_len, 3);
                        assert_eq!(buffer.data()[..3], [7, 8, 9]);
                    }
                    streams.push(stream);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(
            streams,
            vec![StreamId::RgbOutput, StreamId::YuvOutput, StreamId::Input]
        );
        assert!(!loopback.process_frame());
    }

    #[test]
    fn test_disabled_stream_does_not_block_frames() {
        let (loopback, session, rx) = open(CompletionMode::Automatic);
        loopback.start(session).unwrap();
        loopback
            .set_stream_enabled(session, StreamId::YuvOutput, false)
            .unwrap();
        loopback
            .submit(session, StreamId::RgbOutput, buffer(PortIndex::RgbOutput, &[]), context())
            .unwrap();
        loopback
            .submit(session, StreamId::Input, buffer(PortIndex::Input, &[1]), context())
            .unwrap();

        assert!(matches!(
            next(&rx),
            AcceleratorEvent::BufferProcessed {
                stream: StreamId::RgbOutput,
                ..
            }
        ));
        assert!(matches!(
            next(&rx),
            AcceleratorEvent::BufferProcessed {
                stream: StreamId::Input,
                ..
            }
        ));
    }

    #[test]
    fn test_stop_hands_back_queued_buffers_before_confirming() {
        let (loopback, session, rx) = open(CompletionMode::Manual);
        loopback.start(session).unwrap();
        submit_frame(&loopback, session, &[1]);
        assert_eq!(loopback.queued(StreamId::Input), 1);

        loopback.stop(session).unwrap();
        let mut returned = 0;
        loop {
            match next(&rx) {
                AcceleratorEvent::BufferNotProcessed { .. } => returned += 1,
                AcceleratorEvent::ProcessingStopped => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(returned, 3);
        assert_eq!(loopback.stop_requests(), 1);
        assert_eq!(loopback.queued(StreamId::Input), 0);
    }

    #[test]
    fn test_fail_next_open_is_one_shot() {
        let loopback = LoopbackAccelerator::new(CompletionMode::Manual).unwrap();
        let callback: AcceleratorCallback = Arc::new(|_| {});
        loopback.fail_next_open();
        assert!(loopback.open_session(&params(), callback.clone()).is_err());
        let session = loopback.open_session(&params(), callback).unwrap();
        assert!(loopback.has_session());
        loopback.destroy(session).unwrap();
        assert!(!loopback.has_session());
    }
}
