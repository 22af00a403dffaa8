// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! State shared by the client API, the worker and the accelerator callback.
//!
//! The port table, ownership ledger and propagation ledger live together in
//! [`Core`] behind one mutex. Lifecycle-relevant changes (stop/pause
//! acknowledgments, population, returns of supplier stock, faults) are
//! signalled on [`Shared::changed`]. State and port flags are mirrored into
//! atomics for lock-free status queries.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::core::accelerator::SessionId;
use crate::core::config::ComponentConfig;
use crate::core::ports::{
    BufferHeader, BufferId, BufferOwner, ComponentId, Mark, OutputClass, PortIndex, PortTable, PortTarget,
};
use crate::core::propagation::PropagationLedger;
use crate::core::tunnel::Tunnel;
use crate::core::Result;

use super::commands::WorkerMessage;
use super::{ComponentCallbacks, ComponentEvent, ComponentState, FaultKind};

/// Advisory port flags for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStatus {
    pub enabled: bool,
    pub populated: bool,
}

/// Something to hand to the outside world once the core lock is released.
pub(crate) enum Delivery {
    InputConsumed(BufferHeader),
    OutputReady(BufferHeader),
    ToPeer { tunnel: Tunnel, buffer: BufferHeader },
    Event(ComponentEvent),
}

pub(crate) struct Core {
    pub(crate) state: ComponentState,
    pub(crate) target: ComponentState,
    pub(crate) ports: PortTable,
    pub(crate) propagation: PropagationLedger,
    pub(crate) session: Option<SessionId>,
    /// Running/Paused -> Idle in progress; supplier stock is parked.
    pub(crate) stopping: bool,
    pub(crate) stop_acked: bool,
    pub(crate) pause_acked: bool,
    /// Ports being flushed while the accelerator is stopped.
    pub(crate) flush_scope: Option<PortTarget>,
    /// Inputs handed back unprocessed by a flush of another port. Their
    /// metadata is already in the propagation ledger.
    pub(crate) requeued: HashSet<BufferId>,
    pub(crate) pending_marks: [Option<Mark>; 2],
    pub(crate) fault: Option<FaultKind>,
}

impl Core {
    pub(crate) fn new(component: ComponentId, config: &ComponentConfig) -> Self {
        let ports = PortTable::new(component, &config.ports);
        let propagation = PropagationLedger::new(
            config.ports.input.buffer_count,
            config.ports.overlay.buffer_count,
        );
        Self {
            state: ComponentState::Unloaded,
            target: ComponentState::Unloaded,
            ports,
            propagation,
            session: None,
            stopping: false,
            stop_acked: false,
            pause_acked: false,
            flush_scope: None,
            requeued: HashSet::new(),
            pending_marks: [None, None],
            fault: None,
        }
    }

    /// Output classes an accepted input currently feeds.
    pub(crate) fn active_classes(&self) -> Vec<OutputClass> {
        OutputClass::ALL
            .iter()
            .copied()
            .filter(|class| self.ports.port(class.port()).enabled)
            .collect()
    }

    pub(crate) fn take_pending_mark(&mut self, port: PortIndex) -> Option<Mark> {
        match port {
            PortIndex::Input => self.pending_marks[0].take(),
            PortIndex::Overlay => self.pending_marks[1].take(),
            _ => None,
        }
    }

    pub(crate) fn set_pending_mark(&mut self, port: PortIndex, mark: Mark) {
        match port {
            PortIndex::Input => self.pending_marks[0] = Some(mark),
            PortIndex::Overlay => self.pending_marks[1] = Some(mark),
            _ => {}
        }
    }

    fn should_park(&self, index: PortIndex) -> bool {
        let port = self.ports.port(index);
        port.is_supplier() && (self.stopping || !port.enabled || !self.state.is_active())
    }

    /// Keep a buffer inside the component as supplier stock.
    pub(crate) fn park(&mut self, buffer: BufferHeader) -> Result<()> {
        let id = buffer.id();
        self.ports.hold(id)?;
        self.ports.port_mut(id.port).held.push(buffer);
        tracing::trace!("{} parked", id);
        Ok(())
    }

    /// Send a buffer back to the external party it belongs to: the peer on a
    /// tunneled port, the client otherwise. Supplier stock is parked instead
    /// while stopping, idle or disabled.
    pub(crate) fn release(&mut self, buffer: BufferHeader, out: &mut Vec<Delivery>) -> Result<()> {
        let id = buffer.id();
        self.requeued.remove(&id);
        if self.should_park(id.port) {
            return self.park(buffer);
        }
        let port = self.ports.port(id.port);
        let owner = port.return_owner();
        let tunnel = port.tunnel.clone();
        if !self.ports.transition(id, owner)?.moved() {
            return Ok(());
        }
        match tunnel {
            Some(tunnel) => out.push(Delivery::ToPeer { tunnel, buffer }),
            None if id.port.is_input() => out.push(Delivery::InputConsumed(buffer)),
            None => out.push(Delivery::OutputReady(buffer)),
        }
        Ok(())
    }

    /// Whether a port is back at rest: supplier stock fully parked, every
    /// other buffer with the client or peer.
    pub(crate) fn port_at_rest(&self, index: PortIndex) -> bool {
        let port = self.ports.port(index);
        if port.is_supplier() {
            port.held.len() == port.slot_count()
        } else {
            port.is_quiescent()
        }
    }
}

struct StatusBoard {
    state: AtomicU8,
    target: AtomicU8,
    enabled: [AtomicBool; PortIndex::COUNT],
    populated: [AtomicBool; PortIndex::COUNT],
}

pub(crate) struct Shared {
    pub(crate) id: ComponentId,
    pub(crate) name: String,
    pub(crate) config: ComponentConfig,
    pub(crate) core: Mutex<Core>,
    pub(crate) changed: Condvar,
    pub(crate) callbacks: Arc<dyn ComponentCallbacks>,
    pub(crate) commands: Sender<WorkerMessage>,
    pub(crate) filled_inputs: Sender<BufferHeader>,
    pub(crate) free_outputs: Sender<BufferHeader>,
    /// Set while a lifecycle command is queued or executing.
    pub(crate) transition_pending: AtomicBool,
    /// External stop request checked on idle ticks.
    pub(crate) stop_latch: AtomicBool,
    status: StatusBoard,
}

impl Shared {
    pub(crate) fn new(
        id: ComponentId,
        config: ComponentConfig,
        callbacks: Arc<dyn ComponentCallbacks>,
        commands: Sender<WorkerMessage>,
        filled_inputs: Sender<BufferHeader>,
        free_outputs: Sender<BufferHeader>,
    ) -> Self {
        let core = Core::new(id, &config);
        let shared = Self {
            id,
            name: config.name.clone(),
            config,
            core: Mutex::new(core),
            changed: Condvar::new(),
            callbacks,
            commands,
            filled_inputs,
            free_outputs,
            transition_pending: AtomicBool::new(false),
            stop_latch: AtomicBool::new(false),
            status: StatusBoard {
                state: AtomicU8::new(ComponentState::Unloaded.as_raw() as u8),
                target: AtomicU8::new(ComponentState::Unloaded.as_raw() as u8),
                enabled: Default::default(),
                populated: Default::default(),
            },
        };
        shared.publish(&shared.core.lock());
        shared
    }

    pub(crate) fn state(&self) -> ComponentState {
        let raw = self.status.state.load(Ordering::Acquire);
        ComponentState::from_raw(raw as u32).unwrap_or(ComponentState::Invalid)
    }

    pub(crate) fn target_state(&self) -> ComponentState {
        let raw = self.status.target.load(Ordering::Acquire);
        ComponentState::from_raw(raw as u32).unwrap_or(ComponentState::Invalid)
    }

    pub(crate) fn port_status(&self, port: PortIndex) -> PortStatus {
        PortStatus {
            enabled: self.status.enabled[port.slot()].load(Ordering::Relaxed),
            populated: self.status.populated[port.slot()].load(Ordering::Relaxed),
        }
    }

    /// Mirror state and port flags for lock-free readers.
    pub(crate) fn publish(&self, core: &Core) {
        self.status
            .state
            .store(core.state.as_raw() as u8, Ordering::Release);
        self.status
            .target
            .store(core.target.as_raw() as u8, Ordering::Release);
        for port in core.ports.iter() {
            let i = port.index.slot();
            self.status.enabled[i].store(port.enabled, Ordering::Relaxed);
            self.status.populated[i].store(port.populated, Ordering::Relaxed);
        }
    }

    /// Record a fatal condition seen outside the worker and wake it.
    ///
    /// Only the first fault is kept; the worker turns it into the single
    /// error event.
    pub(crate) fn raise_fault(&self, core: &mut Core, kind: FaultKind, detail: String) {
        if core.fault.is_some() || core.state == ComponentState::Invalid {
            tracing::debug!("[{}] Ignoring follow-up fault {}: {}", self.name, kind, detail);
            return;
        }
        tracing::error!("[{}] {} fault: {}", self.name, kind, detail);
        core.fault = Some(kind);
        self.changed.notify_all();
        if self
            .commands
            .send(WorkerMessage::Fault { kind, detail })
            .is_err()
        {
            tracing::warn!("[{}] Worker gone, fault not delivered", self.name);
        }
    }

    /// Accept the next lifecycle command. Called before the outcome of the
    /// current one is reported, so a client reacting to the event is not
    /// told the component is busy.
    pub(crate) fn end_transition(&self) {
        self.transition_pending.store(false, Ordering::Release);
    }

    pub(crate) fn queue_for(&self, port: PortIndex) -> &Sender<BufferHeader> {
        if port.is_input() {
            &self.filled_inputs
        } else {
            &self.free_outputs
        }
    }

    /// Hand deliveries to the client and peers. Must be called without the
    /// core lock held.
    pub(crate) fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::InputConsumed(buffer) => self.callbacks.on_input_consumed(buffer),
                Delivery::OutputReady(buffer) => self.callbacks.on_output_ready(buffer),
                Delivery::Event(event) => self.callbacks.on_event(event),
                Delivery::ToPeer { tunnel, buffer } => self.forward_to_peer(tunnel, buffer),
            }
        }
    }

    fn forward_to_peer(&self, tunnel: Tunnel, buffer: BufferHeader) {
        let result = if buffer.port().is_input() {
            tunnel.peer.return_output(tunnel.peer_port, buffer)
        } else {
            tunnel.peer.submit_input(tunnel.peer_port, buffer)
        };
        let Err(rejected) = result else {
            return;
        };
        let (buffer, error) = rejected.into_parts();
        tracing::warn!(
            "[{}] Peer refused {}: {}, keeping it",
            self.name,
            buffer.id(),
            error
        );
        let mut core = self.core.lock();
        let id = buffer.id();
        let parked = match core.ports.transition(id, BufferOwner::ComponentInbound) {
            Ok(_) => core.park(buffer),
            Err(e) => Err(e),
        };
        if let Err(e) = parked {
            self.raise_fault(&mut core, FaultKind::Internal, e.to_string());
        }
        self.changed.notify_all();
    }
}
