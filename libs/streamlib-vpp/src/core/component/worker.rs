// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The component's worker thread.
//!
//! One thread serializes commands and client buffer traffic. Each iteration
//! first drains at most one pending command without blocking, then blocks on
//! a select over the command queue and, only while Running, the two buffer
//! queues. The select times out after the configured tick so external stop
//! requests are noticed without busy looping.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Select, TryRecvError};

use crate::core::accelerator::{AcceleratorBridge, FrameContext, SessionId, StreamId};
use crate::core::ports::{BufferHeader, BufferOwner, ColorFormat, PortFormat, PortIndex, PortTarget};
use crate::core::{Result, VppError};

use super::commands::{Command, WorkerMessage};
use super::shared::{Core, Delivery, Shared};
use super::{ComponentState, FaultKind, ResourceArbiter};

/// What woke the worker up.
enum Wake {
    Message(WorkerMessage),
    FilledInput(BufferHeader),
    FreeOutput(BufferHeader),
    Tick,
    Disconnected,
}

/// Result of a bounded wait on [`Shared::changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Ready,
    TimedOut,
    /// A fault was raised while waiting.
    Faulted,
}

pub(crate) struct Worker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) bridge: Arc<dyn AcceleratorBridge>,
    pub(crate) arbiter: Arc<dyn ResourceArbiter>,
    commands: Receiver<WorkerMessage>,
    filled_inputs: Receiver<BufferHeader>,
    free_outputs: Receiver<BufferHeader>,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        bridge: Arc<dyn AcceleratorBridge>,
        arbiter: Arc<dyn ResourceArbiter>,
        commands: Receiver<WorkerMessage>,
        filled_inputs: Receiver<BufferHeader>,
        free_outputs: Receiver<BufferHeader>,
    ) -> Self {
        Self {
            shared,
            bridge,
            arbiter,
            commands,
            filled_inputs,
            free_outputs,
        }
    }

    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("vpp-worker-{}", self.shared.id))
            .spawn(move || self.run())
            .map_err(|e| VppError::Runtime(format!("Failed to spawn thread: {}", e)))
    }

    fn run(self) {
        tracing::info!("[{}] Worker started", self.shared.name);
        loop {
            match self.next_wake() {
                Wake::Message(WorkerMessage::Shutdown) | Wake::Disconnected => break,
                Wake::Message(WorkerMessage::Command(command)) => self.handle_command(command),
                Wake::Message(WorkerMessage::Fault { kind, detail }) => self.fail(kind, detail),
                Wake::FilledInput(buffer) => self.process_buffer(buffer),
                Wake::FreeOutput(buffer) => self.process_buffer(buffer),
                Wake::Tick => {
                    if self.shared.stop_latch.load(Ordering::Acquire) {
                        tracing::debug!("[{}] Stop latch set", self.shared.name);
                        break;
                    }
                }
            }
        }
        self.teardown();
        tracing::info!("[{}] Worker stopped", self.shared.name);
    }

    fn next_wake(&self) -> Wake {
        match self.commands.try_recv() {
            Ok(message) => return Wake::Message(message),
            Err(TryRecvError::Disconnected) => return Wake::Disconnected,
            Err(TryRecvError::Empty) => {}
        }

        let serve_data = self.shared.state() == ComponentState::Running;
        let mut select = Select::new();
        let commands = select.recv(&self.commands);
        let filled = serve_data.then(|| select.recv(&self.filled_inputs));
        let free = serve_data.then(|| select.recv(&self.free_outputs));

        let Ok(op) = select.select_timeout(self.shared.config.timeouts.worker_tick()) else {
            return Wake::Tick;
        };
        let index = op.index();
        if index == commands {
            op.recv(&self.commands)
                .map_or(Wake::Disconnected, Wake::Message)
        } else if Some(index) == filled {
            op.recv(&self.filled_inputs)
                .map_or(Wake::Disconnected, Wake::FilledInput)
        } else if Some(index) == free {
            op.recv(&self.free_outputs)
                .map_or(Wake::Disconnected, Wake::FreeOutput)
        } else {
            Wake::Tick
        }
    }

    fn handle_command(&self, command: Command) {
        if self.shared.core.lock().state == ComponentState::Invalid {
            tracing::warn!("[{}] Dropping {:?} in the invalid state", self.shared.name, command);
            if matches!(command, Command::SetState(_)) {
                self.shared.end_transition();
            }
            return;
        }
        tracing::debug!("[{}] Command {:?}", self.shared.name, command);
        match command {
            Command::SetState(to) => self.set_state(to),
            Command::EnablePort(target) => self.enable_port(target),
            Command::DisablePort(target) => self.disable_port(target),
            Command::Flush(target) => self.flush(target),
            Command::MarkBuffer { port, mark } => {
                self.shared.core.lock().set_pending_mark(port, mark);
            }
        }
    }

    /// Forward a client buffer to the accelerator, or return it when its
    /// port no longer accepts traffic.
    fn process_buffer(&self, mut buffer: BufferHeader) {
        let id = buffer.id();
        let mut out = Vec::new();
        let mut core = self.shared.core.lock();
        let requeued = core.requeued.remove(&id);

        let session = core.session;
        let accepting = core.state == ComponentState::Running && core.ports.port(id.port).enabled;
        let Some(session) = session.filter(|_| accepting) else {
            tracing::debug!("[{}] {} not accepted, returning it", self.shared.name, id);
            self.release_or_fault(&mut core, buffer, &mut out);
            drop(core);
            self.shared.dispatch(out);
            return;
        };

        if id.port.is_input() && !requeued {
            if buffer.mark.is_none() {
                buffer.mark = core.take_pending_mark(id.port);
            }
            let classes = core.active_classes();
            if let Err(e) = core.propagation.on_input_accepted(&buffer, &classes) {
                self.release_or_fault(&mut core, buffer, &mut out);
                drop(core);
                self.shared.dispatch(out);
                let kind = match &e {
                    VppError::PropagationRingExhausted(_) => FaultKind::PropagationRingExhausted,
                    _ => FaultKind::Internal,
                };
                self.fail(kind, e.to_string());
                return;
            }
        } else {
            buffer.offset = 0;
            buffer.filled_len = 0;
        }

        if let Err(e) = core.ports.transition(id, BufferOwner::Accelerator) {
            drop(core);
            self.fail(FaultKind::Internal, e.to_string());
            return;
        }
        let context = frame_context(&core, id.port);
        drop(core);

        tracing::trace!("[{}] Submitting {}", self.shared.name, id);
        self.submit(session, buffer, context);
    }

    /// Submit outside the core lock; a refused buffer is returned and the
    /// component fails.
    pub(crate) fn submit(&self, session: SessionId, buffer: BufferHeader, context: FrameContext) {
        let stream = StreamId::from(buffer.port());
        let Err(rejected) = self.bridge.submit(session, stream, buffer, context) else {
            return;
        };
        let (buffer, error) = rejected.into_parts();
        let mut out = Vec::new();
        {
            let mut core = self.shared.core.lock();
            self.release_or_fault(&mut core, buffer, &mut out);
        }
        self.shared.dispatch(out);
        self.fail(FaultKind::Hardware, format!("accelerator refused buffer: {}", error));
    }

    pub(crate) fn release_or_fault(
        &self,
        core: &mut Core,
        buffer: BufferHeader,
        out: &mut Vec<Delivery>,
    ) {
        if let Err(e) = core.release(buffer, out) {
            tracing::error!("[{}] Cannot return buffer: {}", self.shared.name, e);
            self.shared.raise_fault(core, FaultKind::Internal, e.to_string());
        }
    }

    /// One pass over both buffer queues. Entries for ports in `scope` are
    /// returned to their sender; the rest go back onto the queue they came
    /// from.
    pub(crate) fn drain_queues(&self, scope: PortTarget) {
        let mut out = Vec::new();
        {
            let mut core = self.shared.core.lock();
            for rx in [&self.filled_inputs, &self.free_outputs] {
                for _ in 0..rx.len() {
                    let Ok(buffer) = rx.try_recv() else {
                        break;
                    };
                    let port = buffer.port();
                    if scope.contains(port) {
                        self.release_or_fault(&mut core, buffer, &mut out);
                        continue;
                    }
                    tracing::debug!("[{}] Requeueing {}", self.shared.name, buffer.id());
                    if let Err(e) = self.shared.queue_for(port).send(buffer) {
                        self.release_or_fault(&mut core, e.into_inner(), &mut out);
                    }
                }
            }
        }
        self.shared.dispatch(out);
    }

    /// Block until `ready` holds, a fault is raised, or `timeout` elapses.
    pub(crate) fn wait_until(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&Core) -> bool,
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut core = self.shared.core.lock();
        loop {
            if core.fault.is_some() {
                return WaitOutcome::Faulted;
            }
            if ready(&core) {
                return WaitOutcome::Ready;
            }
            if self.shared.changed.wait_until(&mut core, deadline).timed_out() {
                return if ready(&core) {
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }

    /// Release everything on worker exit.
    fn teardown(&self) {
        let session = {
            let mut core = self.shared.core.lock();
            core.session.take()
        };
        if let Some(session) = session {
            if let Err(e) = self.bridge.destroy(session) {
                tracing::warn!("[{}] Failed to destroy {}: {}", self.shared.name, session, e);
            }
            self.arbiter.release(&self.shared.name);
        }
        self.drain_queues(PortTarget::All);
        self.free_parked_buffers(PortTarget::All);
    }
}

pub(crate) fn frame_context(core: &Core, port: PortIndex) -> FrameContext {
    let port = core.ports.port(port);
    let color_format = match port.format {
        PortFormat::Video { color } | PortFormat::Image { color } => color,
        _ => ColorFormat::Unused,
    };
    FrameContext {
        frame_width: port.frame_width,
        frame_height: port.frame_height,
        color_format,
    }
}
