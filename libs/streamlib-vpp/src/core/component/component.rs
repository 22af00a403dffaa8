// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client-facing handle of a video pre/post-processor component.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crate::core::config::ComponentConfig;
use crate::core::error::{BufferRejected, HandoffResult};
use crate::core::ports::{
    BufferHeader, BufferId, BufferOwner, BufferSlot, BufferSupplier, ComponentId, Mark,
    OwnershipCensus, PortDefinition, PortDirection, PortIndex, StorageOrigin,
};
use crate::core::tunnel::{self, TunnelRequest};
use crate::core::{Result, VppError};

use super::builder::VppComponentBuilder;
use super::commands::{Command, CommandKind, WorkerMessage};
use super::shared::{Delivery, PortStatus, Shared};
use super::{ComponentEvent, ComponentState, FaultKind};

/// A running component instance.
///
/// Owns the worker thread; dropping the handle stops the worker, which
/// destroys any open accelerator session and hands queued buffers back.
pub struct VppComponent {
    pub(crate) shared: Arc<Shared>,
    pub(crate) worker: Option<JoinHandle<()>>,
}

impl VppComponent {
    pub fn builder() -> VppComponentBuilder {
        VppComponentBuilder::new()
    }

    pub fn id(&self) -> ComponentId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.shared.config
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Queue a command for the worker.
    ///
    /// Completion is reported through [`ComponentEvent`]s.
    ///
    /// # Errors
    ///
    /// - [`VppError::InvalidState`] once the component is Invalid
    /// - [`VppError::Busy`] if a lifecycle transition is already pending
    /// - [`VppError::BadPort`] for a mark on an output port
    pub fn send_command(&self, command: Command) -> Result<()> {
        command.validate()?;

        let mut core = self.shared.core.lock();
        if core.state == ComponentState::Invalid {
            return Err(VppError::InvalidState);
        }
        if let Command::SetState(to) = command {
            if self.shared.transition_pending.swap(true, Ordering::AcqRel) {
                return Err(VppError::Busy(core.target.to_string()));
            }
            if core.state.can_transition_to(to) {
                core.target = to;
                self.shared.publish(&core);
            }
        }
        if let Command::EnablePort(target) = command {
            for port in target.ports() {
                core.ports.port_mut(port).enabled = true;
            }
            self.shared.publish(&core);
        }
        drop(core);

        let is_transition = matches!(command, Command::SetState(_));
        if self
            .shared
            .commands
            .send(WorkerMessage::Command(command))
            .is_err()
        {
            if is_transition {
                self.shared.transition_pending.store(false, Ordering::Release);
            }
            return Err(VppError::Runtime("worker thread has stopped".to_string()));
        }
        Ok(())
    }

    /// Raw form of [`send_command`](Self::send_command): opcode, integer
    /// argument and an optional mark for mark-buffer.
    pub fn send_raw_command(&self, kind: CommandKind, arg: u32, mark: Option<Mark>) -> Result<()> {
        self.send_command(Command::from_raw(kind, arg, mark)?)
    }

    // =========================================================================
    // Buffer hand-off
    // =========================================================================

    /// Hand a filled buffer to an input port.
    pub fn submit_input(&self, buffer: BufferHeader) -> HandoffResult {
        self.hand_off(buffer, PortDirection::Input)
    }

    /// Hand an empty buffer to an output port for filling.
    pub fn return_output(&self, buffer: BufferHeader) -> HandoffResult {
        self.hand_off(buffer, PortDirection::Output)
    }

    fn hand_off(&self, buffer: BufferHeader, direction: PortDirection) -> HandoffResult {
        let id = buffer.id();
        if id.port.direction() != direction {
            return Err(BufferRejected::new(
                buffer,
                VppError::BadPort(format!("{} is not an {:?} port", id.port, direction)),
            ));
        }

        let mut core = self.shared.core.lock();
        if core.state == ComponentState::Invalid {
            return Err(BufferRejected::new(buffer, VppError::InvalidState));
        }
        if core.state == ComponentState::Unloaded {
            return Err(BufferRejected::new(
                buffer,
                VppError::IncorrectStateOperation("no buffer traffic while Unloaded".to_string()),
            ));
        }
        if let Err(e) = core.ports.validate(id) {
            return Err(BufferRejected::new(buffer, e));
        }
        let port = core.ports.port(id.port);
        let enabled = port.enabled;

        // Supplier stock stays inside while it is not circulating.
        let parking = port.is_supplier()
            && (core.stopping || core.state == ComponentState::Idle || !enabled);
        if parking {
            if let Err(e) = core.ports.transition(id, BufferOwner::ComponentInbound) {
                return Err(BufferRejected::new(buffer, e));
            }
            if let Err(e) = core.ports.hold(id) {
                return Err(BufferRejected::new(buffer, e));
            }
            core.ports.port_mut(id.port).held.push(buffer);
            tracing::trace!("[{}] Parked {}", self.shared.name, id);
            self.shared.changed.notify_all();
            return Ok(());
        }
        if !enabled {
            return Err(BufferRejected::new(
                buffer,
                VppError::IncorrectStateOperation(format!("{} is disabled", id.port)),
            ));
        }
        if core.stopping {
            return Err(BufferRejected::new(
                buffer,
                VppError::IncorrectStateOperation("transition to Idle in progress".to_string()),
            ));
        }

        if let Err(e) = core.ports.transition(id, BufferOwner::ComponentInbound) {
            return Err(BufferRejected::new(buffer, e));
        }
        tracing::trace!("[{}] Accepted {}", self.shared.name, id);

        // Sent under the lock so a flush never sees the buffer between the
        // ledger and the queue.
        if let Err(e) = self.shared.queue_for(id.port).send(buffer) {
            let buffer = e.into_inner();
            let owner = core.ports.port(id.port).return_owner();
            if let Err(e) = core.ports.transition(id, owner) {
                tracing::error!("[{}] {}", self.shared.name, e);
            }
            return Err(BufferRejected::new(
                buffer,
                VppError::Runtime("worker thread has stopped".to_string()),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a buffer of `size` bytes on `port`.
    ///
    /// # Errors
    ///
    /// - [`VppError::BadPort`] if the port is disabled
    /// - [`VppError::BadParameter`] if `size` is below the port's buffer size
    /// - [`VppError::OutOfResources`] if the port already has all its buffers
    pub fn allocate_buffer(&self, port: PortIndex, size: usize) -> Result<BufferHeader> {
        self.register(port, StorageOrigin::SelfAllocated, vec![0; size])
    }

    /// Wrap externally supplied storage as a buffer on `port`.
    pub fn adopt_buffer(&self, port: PortIndex, storage: Vec<u8>) -> Result<BufferHeader> {
        self.register(port, StorageOrigin::External, storage)
    }

    fn register(&self, index: PortIndex, origin: StorageOrigin, storage: Vec<u8>) -> Result<BufferHeader> {
        let mut core = self.shared.core.lock();
        let state = core.state;
        if state == ComponentState::Invalid {
            return Err(VppError::InvalidState);
        }
        let component = core.ports.component();
        let port = core.ports.port_mut(index);
        if !port.enabled {
            return Err(VppError::BadPort(format!("{} is disabled", index)));
        }
        if state != ComponentState::Unloaded && port.populated {
            return Err(VppError::IncorrectStateOperation(format!(
                "{} is already populated",
                index
            )));
        }
        if storage.len() < port.buffer_size {
            return Err(VppError::BadParameter(format!(
                "{} needs {} bytes per buffer, got {}",
                index,
                port.buffer_size,
                storage.len()
            )));
        }

        let owner = port.return_owner();
        let added = port.add_slot(BufferSlot::new(owner, origin, storage.len()))?;
        let ring_size = port.buffer_count;
        if added.became_populated {
            tracing::debug!("[{}] {} populated", self.shared.name, index);
            core.propagation.reset_port(index, ring_size);
        }
        self.shared.publish(&core);
        self.shared.changed.notify_all();

        let id = BufferId {
            component,
            port: index,
            slot: added.slot,
        };
        Ok(BufferHeader::new(id, origin, storage))
    }

    /// Release a buffer back to the component and free its slot.
    ///
    /// Returns the storage of an adopted buffer so the caller can reclaim it.
    pub fn release_buffer(&self, buffer: BufferHeader) -> std::result::Result<Option<Vec<u8>>, BufferRejected> {
        let id = buffer.id();
        let mut events = Vec::new();
        {
            let mut core = self.shared.core.lock();
            let owner = match core.ports.validate(id) {
                Ok(slot) => slot.owner,
                Err(e) => return Err(BufferRejected::new(buffer, e)),
            };
            if !owner.is_external() {
                return Err(BufferRejected::new(
                    buffer,
                    VppError::IncorrectStateOperation(format!("{} is owned by {}", id, owner)),
                ));
            }

            let state = core.state;
            let target = core.target;
            let port = core.ports.port_mut(id.port);
            let in_use = matches!(
                state,
                ComponentState::Idle | ComponentState::Running | ComponentState::Paused
            );
            if in_use
                && target != ComponentState::Unloaded
                && port.enabled
                && port.populated
                && !port.disable_pending
            {
                events.push(Delivery::Event(ComponentEvent::error(
                    FaultKind::PortUnpopulated,
                    format!("{} released while in use", id.port),
                )));
            }

            if let Err(e) = port.remove_slot(id.slot) {
                return Err(BufferRejected::new(buffer, e));
            }
            if port.disable_pending && port.slot_count() == 0 {
                port.disable_pending = false;
                events.push(Delivery::Event(ComponentEvent::PortDisabled(id.port)));
            }
            self.shared.publish(&core);
            self.shared.changed.notify_all();
        }
        self.shared.dispatch(events);

        Ok(match buffer.origin() {
            StorageOrigin::SelfAllocated => None,
            StorageOrigin::External => Some(buffer.into_storage()),
        })
    }

    // =========================================================================
    // Tunneling
    // =========================================================================

    /// Connect `port` to a peer, or disconnect it with `None`.
    ///
    /// Only allowed while Unloaded or while the port is disabled. The peer
    /// must not call back into this component from inside the handshake.
    pub fn negotiate_tunnel(&self, port: PortIndex, request: Option<TunnelRequest>) -> Result<BufferSupplier> {
        let mut core = self.shared.core.lock();
        Self::check_port_configurable(core.state, core.ports.port(port).enabled, port)?;
        let prefix = self.shared.config.tunnel.compatible_prefix.clone();
        tunnel::negotiate(core.ports.port_mut(port), request, &prefix)
    }

    /// Record the supplier a peer settled on for `port`.
    pub fn set_buffer_supplier(&self, port: PortIndex, supplier: BufferSupplier) -> Result<()> {
        let mut core = self.shared.core.lock();
        Self::check_port_configurable(core.state, core.ports.port(port).enabled, port)?;
        core.ports.port_mut(port).supplier = supplier;
        tracing::debug!("[{}] {} supplier set to {:?}", self.shared.name, port, supplier);
        Ok(())
    }

    fn check_port_configurable(state: ComponentState, enabled: bool, port: PortIndex) -> Result<()> {
        match state {
            ComponentState::Invalid => Err(VppError::InvalidState),
            ComponentState::Unloaded => Ok(()),
            _ if !enabled => Ok(()),
            other => Err(VppError::IncorrectStateOperation(format!(
                "{} is enabled and the component is {}",
                port, other
            ))),
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn port_definition(&self, port: PortIndex) -> PortDefinition {
        self.shared.core.lock().ports.port(port).definition()
    }

    /// Current state, read without locking.
    pub fn state(&self) -> ComponentState {
        self.shared.state()
    }

    /// State the pending transition is heading for; equals `state()` when idle.
    pub fn target_state(&self) -> ComponentState {
        self.shared.target_state()
    }

    pub fn port_status(&self, port: PortIndex) -> PortStatus {
        self.shared.port_status(port)
    }

    /// Snapshot of who owns each buffer of `port`.
    pub fn ownership_census(&self, port: PortIndex) -> OwnershipCensus {
        self.shared.core.lock().ports.port(port).census()
    }

    /// Propagation records in use on an input port.
    pub fn propagation_in_use(&self, port: PortIndex) -> usize {
        self.shared
            .core
            .lock()
            .propagation
            .ring(port)
            .map_or(0, |ring| ring.in_use())
    }
}

impl Drop for VppComponent {
    fn drop(&mut self) {
        self.shared.stop_latch.store(true, Ordering::Release);
        if self.shared.commands.send(WorkerMessage::Shutdown).is_err() {
            tracing::debug!("[{}] Worker already gone", self.shared.name);
        }
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("[{}] Worker thread panicked", self.shared.name);
            }
        }
    }
}
