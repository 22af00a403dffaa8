// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Lifecycle transitions executed on the worker thread.
//!
//! Every transition sets the target state first, performs its handshake with
//! the accelerator (bounded condvar waits), and only then publishes the new
//! state and emits [`ComponentEvent::StateChanged`]. Timeouts and bridge
//! failures end in [`Worker::fail`], which is the only way into Invalid.

use std::sync::Arc;

use crate::core::accelerator::{SessionId, SessionParams, StreamId, StreamParams};
use crate::core::ports::{
    BufferHeader, BufferId, BufferOwner, BufferSlot, ColorFormat, PortFormat, PortIndex,
    PortTarget, StorageOrigin,
};
use crate::core::Result;

use super::callback::accelerator_callback;
use super::worker::{WaitOutcome, Worker, frame_context};
use super::{ComponentEvent, ComponentState, ErrorSeverity, FaultKind};

impl Worker {
    pub(crate) fn set_state(&self, to: ComponentState) {
        let current = self.shared.core.lock().state;
        if to == current {
            tracing::debug!("[{}] Already {}", self.shared.name, current);
            self.shared.end_transition();
            self.shared.callbacks.on_event(ComponentEvent::error(
                FaultKind::SameState,
                format!("already {}", current),
            ));
            return;
        }
        if !current.can_transition_to(to) {
            tracing::warn!("[{}] Rejected transition {} -> {}", self.shared.name, current, to);
            self.shared.end_transition();
            self.shared.callbacks.on_event(ComponentEvent::error(
                FaultKind::IncorrectStateTransition,
                format!("{} -> {}", current, to),
            ));
            return;
        }

        {
            let mut core = self.shared.core.lock();
            core.target = to;
            self.shared.publish(&core);
        }
        tracing::info!("[{}] Transition {} -> {}", self.shared.name, current, to);

        match (current, to) {
            (_, ComponentState::Invalid) => {
                self.fail(FaultKind::InvalidState, "invalid state requested".to_string())
            }
            (ComponentState::Unloaded, ComponentState::Idle) => self.load(),
            (ComponentState::Idle, ComponentState::Unloaded) => self.unload(),
            (ComponentState::Idle, ComponentState::Running) => self.execute(),
            (ComponentState::Paused, ComponentState::Running) => self.resume(),
            (ComponentState::Running, ComponentState::Paused) => self.pause(),
            (ComponentState::Running | ComponentState::Paused, ComponentState::Idle) => {
                self.stop_to_idle()
            }
            _ => self.shared.end_transition(),
        }
    }

    fn complete_transition(&self, state: ComponentState) {
        {
            let mut core = self.shared.core.lock();
            core.state = state;
            core.target = state;
            self.shared.publish(&core);
        }
        tracing::info!("[{}] Now {}", self.shared.name, state);
        self.shared.end_transition();
        self.shared
            .callbacks
            .on_event(ComponentEvent::StateChanged(state));
    }

    fn session(&self) -> Option<SessionId> {
        self.shared.core.lock().session
    }

    fn session_params(&self) -> SessionParams {
        let core = self.shared.core.lock();
        let streams = core
            .ports
            .iter()
            .map(|port| StreamParams {
                stream: StreamId::from(port.index),
                enabled: port.enabled,
                frame_width: port.frame_width,
                frame_height: port.frame_height,
                color_format: match port.format {
                    PortFormat::Video { color } | PortFormat::Image { color } => color,
                    _ => ColorFormat::Unused,
                },
                buffer_count: port.buffer_count,
            })
            .collect();
        SessionParams {
            component: self.shared.name.clone(),
            streams,
        }
    }

    // Unloaded -> Idle

    fn load(&self) {
        let params = self.session_params();
        let callback = accelerator_callback(Arc::downgrade(&self.shared));
        let session = match self.bridge.open_session(&params, callback) {
            Ok(session) => session,
            Err(e) => return self.reject_load(None, format!("open session: {}", e)),
        };
        self.shared.core.lock().session = Some(session);
        tracing::debug!("[{}] Opened {}", self.shared.name, session);

        if !self.arbiter.acquire(&params) {
            return self.reject_load(Some(session), "resource arbiter declined".to_string());
        }
        if let Err(e) = self.allocate_supplier_stock(PortTarget::All) {
            self.arbiter.release(&self.shared.name);
            return self.reject_load(Some(session), format!("supplier buffers: {}", e));
        }

        let timeout = self.shared.config.timeouts.population();
        match self.wait_until(timeout, |core| {
            core.ports.iter().all(|p| !p.enabled || p.populated)
        }) {
            WaitOutcome::Ready => {}
            WaitOutcome::TimedOut => {
                return self.fail(
                    FaultKind::PortUnresponsive,
                    format!("ports not populated within {:?}", timeout),
                );
            }
            WaitOutcome::Faulted => return,
        }

        if let Err(e) = self.bridge.configure(session, &self.session_params()) {
            self.arbiter.release(&self.shared.name);
            return self.reject_load(Some(session), format!("configure: {}", e));
        }

        {
            let mut core = self.shared.core.lock();
            for port in PortIndex::INPUTS {
                let size = core.ports.port(port).buffer_count;
                core.propagation.reset_port(port, size);
            }
            core.propagation.reset_counters();
        }
        self.complete_transition(ComponentState::Idle);
    }

    /// Undo a partial load and stay Unloaded.
    fn reject_load(&self, session: Option<SessionId>, detail: String) {
        tracing::warn!("[{}] Load rejected: {}", self.shared.name, detail);
        if let Some(session) = session {
            if let Err(e) = self.bridge.destroy(session) {
                tracing::warn!("[{}] Failed to destroy {}: {}", self.shared.name, session, e);
            }
        }
        self.free_parked_buffers(PortTarget::All);
        {
            let mut core = self.shared.core.lock();
            core.session = None;
            core.target = ComponentState::Unloaded;
            self.shared.publish(&core);
        }
        self.shared.end_transition();
        self.shared.callbacks.on_event(ComponentEvent::error(
            FaultKind::InsufficientResources,
            detail,
        ));
    }

    // Idle -> Unloaded

    fn unload(&self) {
        let session = self.shared.core.lock().session.take();
        if let Some(session) = session {
            if let Err(e) = self.bridge.destroy(session) {
                tracing::warn!("[{}] Failed to destroy {}: {}", self.shared.name, session, e);
            }
            self.arbiter.release(&self.shared.name);
        }
        self.drain_queues(PortTarget::All);
        self.free_parked_buffers(PortTarget::All);

        let timeout = self.shared.config.timeouts.unload();
        let outcome = self.wait_until(timeout, |core| {
            core.ports.iter().all(|p| !p.enabled || !p.populated)
        });
        if outcome == WaitOutcome::TimedOut {
            tracing::warn!(
                "[{}] Ports still populated after {:?}, unloading anyway",
                self.shared.name,
                timeout
            );
            self.shared.callbacks.on_event(ComponentEvent::Error {
                severity: ErrorSeverity::Minor,
                kind: FaultKind::PortUnresponsive,
                detail: "ports still populated at unload".to_string(),
            });
        }
        self.complete_transition(ComponentState::Unloaded);
    }

    // Idle -> Running

    fn execute(&self) {
        let Some(session) = self.session() else {
            return self.fail(FaultKind::Internal, "no accelerator session".to_string());
        };
        if let Err(e) = self.bridge.start(session) {
            return self.fail(FaultKind::Hardware, format!("start: {}", e));
        }
        {
            let mut core = self.shared.core.lock();
            core.state = ComponentState::Running;
            self.shared.publish(&core);
        }
        self.distribute_parked_buffers(session, PortTarget::All);
        self.complete_transition(ComponentState::Running);
    }

    // Paused -> Running

    fn resume(&self) {
        let Some(session) = self.session() else {
            return self.fail(FaultKind::Internal, "no accelerator session".to_string());
        };
        if let Err(e) = self.bridge.start(session) {
            return self.fail(FaultKind::Hardware, format!("resume: {}", e));
        }
        {
            let mut core = self.shared.core.lock();
            core.state = ComponentState::Running;
            self.shared.publish(&core);
        }
        self.distribute_parked_buffers(session, PortTarget::All);
        self.complete_transition(ComponentState::Running);
    }

    // Running -> Paused

    fn pause(&self) {
        let Some(session) = self.session() else {
            return self.fail(FaultKind::Internal, "no accelerator session".to_string());
        };
        if self.pause_accelerator(session) {
            self.complete_transition(ComponentState::Paused);
        }
    }

    /// Pause and wait for the acknowledgment. Returns false if the component
    /// failed.
    pub(crate) fn pause_accelerator(&self, session: SessionId) -> bool {
        self.shared.core.lock().pause_acked = false;
        if let Err(e) = self.bridge.pause(session) {
            self.fail(FaultKind::Hardware, format!("pause: {}", e));
            return false;
        }
        let timeout = self.shared.config.timeouts.accelerator_ack();
        match self.wait_until(timeout, |core| core.pause_acked) {
            WaitOutcome::Ready => true,
            WaitOutcome::TimedOut => {
                self.fail(
                    FaultKind::AcceleratorStuck,
                    format!("no pause acknowledgment within {:?}", timeout),
                );
                false
            }
            WaitOutcome::Faulted => false,
        }
    }

    /// Stop and wait for the confirmation. Every buffer the accelerator held
    /// has been handed back once this returns true.
    pub(crate) fn stop_accelerator(&self, session: SessionId) -> bool {
        self.shared.core.lock().stop_acked = false;
        if let Err(e) = self.bridge.stop(session) {
            self.fail(FaultKind::Hardware, format!("stop: {}", e));
            return false;
        }
        let timeout = self.shared.config.timeouts.accelerator_ack();
        match self.wait_until(timeout, |core| core.stop_acked) {
            WaitOutcome::Ready => true,
            WaitOutcome::TimedOut => {
                self.fail(
                    FaultKind::AcceleratorStuck,
                    format!("no stop confirmation within {:?}", timeout),
                );
                false
            }
            WaitOutcome::Faulted => false,
        }
    }

    // Running/Paused -> Idle

    fn stop_to_idle(&self) {
        let Some(session) = self.session() else {
            return self.fail(FaultKind::Internal, "no accelerator session".to_string());
        };
        self.shared.core.lock().stopping = true;
        if !self.stop_accelerator(session) {
            return;
        }
        self.drain_queues(PortTarget::All);

        let timeout = self.shared.config.timeouts.population();
        match self.wait_until(timeout, |core| {
            PortIndex::ALL.iter().all(|&p| core.port_at_rest(p))
        }) {
            WaitOutcome::Ready => {}
            WaitOutcome::TimedOut => {
                return self.fail(
                    FaultKind::PortUnresponsive,
                    format!("buffers not returned within {:?}", timeout),
                );
            }
            WaitOutcome::Faulted => return,
        }

        {
            let mut core = self.shared.core.lock();
            core.stopping = false;
            core.requeued.clear();
            core.pending_marks = [None, None];
            for port in PortIndex::INPUTS {
                let size = core.ports.port(port).buffer_count;
                core.propagation.reset_port(port, size);
            }
            core.propagation.reset_counters();
        }
        self.complete_transition(ComponentState::Idle);
    }

    /// Enter Invalid: tear down the session, hand back what can be handed
    /// back, and report exactly one error event.
    pub(crate) fn fail(&self, kind: FaultKind, detail: String) {
        self.shared.end_transition();
        let session = {
            let mut core = self.shared.core.lock();
            if core.state == ComponentState::Invalid {
                tracing::debug!("[{}] Already invalid, dropping {}: {}", self.shared.name, kind, detail);
                return;
            }
            core.state = ComponentState::Invalid;
            core.target = ComponentState::Invalid;
            core.fault = Some(kind);
            core.stopping = false;
            core.flush_scope = None;
            core.requeued.clear();
            self.shared.publish(&core);
            self.shared.changed.notify_all();
            core.session.take()
        };
        tracing::error!("[{}] Entering Invalid ({}): {}", self.shared.name, kind, detail);

        if let Some(session) = session {
            if let Err(e) = self.bridge.destroy(session) {
                tracing::warn!("[{}] Failed to destroy {}: {}", self.shared.name, session, e);
            }
            self.arbiter.release(&self.shared.name);
        }
        self.drain_queues(PortTarget::All);
        self.shared
            .callbacks
            .on_event(ComponentEvent::error(kind, detail));
    }

    // Supplier stock

    /// Allocate and register buffers for every enabled port in `target` this
    /// component supplies and that has none yet.
    pub(crate) fn allocate_supplier_stock(&self, target: PortTarget) -> Result<()> {
        for index in target.ports() {
            let (tunnel, count, size) = {
                let core = self.shared.core.lock();
                let port = core.ports.port(index);
                if !port.enabled || !port.is_supplier() || port.slot_count() > 0 {
                    continue;
                }
                let Some(tunnel) = port.tunnel.clone() else {
                    continue;
                };
                (tunnel, port.buffer_count, port.buffer_size)
            };

            for _ in 0..count {
                let id = {
                    let mut core = self.shared.core.lock();
                    let component = core.ports.component();
                    let mut slot =
                        BufferSlot::new(BufferOwner::ComponentOutbound, StorageOrigin::SelfAllocated, size);
                    slot.holding = true;
                    let added = core.ports.port_mut(index).add_slot(slot)?;
                    let id = BufferId {
                        component,
                        port: index,
                        slot: added.slot,
                    };
                    let buffer = BufferHeader::new(id, StorageOrigin::SelfAllocated, vec![0; size]);
                    core.ports.port_mut(index).held.push(buffer);
                    self.shared.publish(&core);
                    id
                };
                tunnel.peer.use_buffer(tunnel.peer_port, id, size)?;
            }
            tracing::debug!(
                "[{}] Supplied {} buffers on {} to {}",
                self.shared.name,
                count,
                index,
                tunnel.peer.name()
            );
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Unregister parked supplier stock from the peer and free it.
    ///
    /// Buffers a peer refused on a port it supplies are offered back once
    /// more; any it still refuses are dropped so the port can unpopulate.
    pub(crate) fn free_parked_buffers(&self, target: PortTarget) {
        for index in target.ports() {
            let (tunnel, supplier, held) = {
                let mut core = self.shared.core.lock();
                let port = core.ports.port_mut(index);
                let Some(tunnel) = port.tunnel.clone() else {
                    continue;
                };
                (tunnel, port.is_supplier(), std::mem::take(&mut port.held))
            };
            if held.is_empty() {
                continue;
            }
            let leftovers = if supplier {
                for buffer in &held {
                    let id = buffer.id();
                    if let Err(e) = tunnel.peer.free_buffer(tunnel.peer_port, id) {
                        tracing::warn!("[{}] Peer failed to free {}: {}", self.shared.name, id, e);
                    }
                }
                held
            } else {
                let mut out = Vec::new();
                {
                    let mut core = self.shared.core.lock();
                    for buffer in held {
                        self.release_or_fault(&mut core, buffer, &mut out);
                    }
                }
                self.shared.dispatch(out);
                let refused = std::mem::take(&mut self.shared.core.lock().ports.port_mut(index).held);
                for buffer in &refused {
                    tracing::warn!(
                        "[{}] {} refused {} again, dropping it",
                        self.shared.name,
                        tunnel.peer.name(),
                        buffer.id()
                    );
                }
                refused
            };

            let mut core = self.shared.core.lock();
            for buffer in leftovers {
                if let Err(e) = core.ports.port_mut(index).remove_slot(buffer.id().slot) {
                    tracing::warn!("[{}] {}", self.shared.name, e);
                }
            }
            self.shared.publish(&core);
        }
        self.shared.changed.notify_all();
    }

    /// Put parked buffers into circulation: empty supplier output buffers go
    /// to the accelerator, supplier input buffers go to the peer for filling,
    /// and buffers a supplying peer refused earlier are offered to it again.
    pub(crate) fn distribute_parked_buffers(&self, session: SessionId, target: PortTarget) {
        let mut out = Vec::new();
        let mut submissions = Vec::new();
        {
            let mut core = self.shared.core.lock();
            for index in target.ports() {
                let port = core.ports.port_mut(index);
                if !port.enabled || port.tunnel.is_none() || port.held.is_empty() {
                    continue;
                }
                let supplier = port.is_supplier();
                let held = std::mem::take(&mut port.held);
                for buffer in held {
                    if index.is_input() || !supplier {
                        self.release_or_fault(&mut core, buffer, &mut out);
                        continue;
                    }
                    match core.ports.transition(buffer.id(), BufferOwner::Accelerator) {
                        Ok(_) => {
                            let context = frame_context(&core, index);
                            submissions.push((buffer, context));
                        }
                        Err(e) => {
                            tracing::error!("[{}] {}", self.shared.name, e);
                            core.ports.port_mut(index).held.push(buffer);
                        }
                    }
                }
            }
        }
        self.shared.dispatch(out);
        for (buffer, context) in submissions {
            self.submit(session, buffer, context);
        }
    }
}
