// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Flush, port disable and port enable.
//!
//! A flush recovers every buffer of the targeted ports. Buffers held by the
//! accelerator come back through a stop/restart round trip; buffers still in
//! the shared queues are picked out in one pass that puts other ports'
//! entries back. The round trip is skipped when none of the targeted ports
//! has anything inside the accelerator.

use crate::core::accelerator::StreamId;
use crate::core::ports::{BufferOwner, PortIndex, PortTarget};

use super::worker::{WaitOutcome, Worker};
use super::{ComponentEvent, ComponentState, FaultKind};

impl Worker {
    pub(crate) fn flush(&self, target: PortTarget) {
        if !self.flush_ports(target) {
            return;
        }
        for port in target.ports() {
            tracing::debug!("[{}] Flushed {}", self.shared.name, port);
            self.shared
                .callbacks
                .on_event(ComponentEvent::FlushComplete(port));
        }
    }

    /// Returns false if the component failed while flushing.
    fn flush_ports(&self, target: PortTarget) -> bool {
        let (session, state, in_accelerator) = {
            let core = self.shared.core.lock();
            let in_accelerator: usize = target
                .ports()
                .into_iter()
                .map(|p| core.ports.port(p).in_flight(BufferOwner::Accelerator))
                .sum();
            (core.session, core.state, in_accelerator)
        };

        if let Some(session) = session.filter(|_| in_accelerator > 0) {
            tracing::debug!(
                "[{}] Flushing {} with {} buffers in the accelerator",
                self.shared.name,
                target,
                in_accelerator
            );
            self.shared.core.lock().flush_scope = Some(target);
            let stopped = self.stop_accelerator(session);
            self.shared.core.lock().flush_scope = None;
            if !stopped {
                return false;
            }
            if let Err(e) = self.bridge.start(session) {
                self.fail(FaultKind::Hardware, format!("restart after flush: {}", e));
                return false;
            }
            if state == ComponentState::Paused && !self.pause_accelerator(session) {
                return false;
            }
        }

        self.drain_queues(target);

        let mut core = self.shared.core.lock();
        for port in target.ports() {
            let stray = core.ports.port(port).in_flight(BufferOwner::Accelerator);
            if stray > 0 {
                tracing::warn!(
                    "[{}] {} still has {} buffers in the accelerator after flush",
                    self.shared.name,
                    port,
                    stray
                );
            } else if port.is_input() {
                // Flushed inputs never produce their outputs.
                let size = core.ports.port(port).buffer_count;
                core.propagation.realign_port(port, size);
            }
        }
        true
    }

    pub(crate) fn disable_port(&self, target: PortTarget) {
        for port in target.ports() {
            let (state, supplier) = {
                let mut core = self.shared.core.lock();
                let p = core.ports.port_mut(port);
                p.enabled = false;
                let supplier = p.is_supplier();
                let state = core.state;
                self.shared.publish(&core);
                (state, supplier)
            };
            tracing::info!("[{}] Disabling {}", self.shared.name, port);

            if state != ComponentState::Unloaded {
                if !self.flush_ports(PortTarget::One(port)) {
                    return;
                }
                self.set_stream_enabled(port, false);
                if supplier {
                    let timeout = self.shared.config.timeouts.population();
                    match self.wait_until(timeout, |core| core.port_at_rest(port)) {
                        WaitOutcome::Ready => {}
                        WaitOutcome::TimedOut => {
                            return self.fail(
                                FaultKind::PortUnresponsive,
                                format!("{} supplier buffers not returned", port),
                            );
                        }
                        WaitOutcome::Faulted => return,
                    }
                }
                self.free_parked_buffers(PortTarget::One(port));
            }

            let done = {
                let mut core = self.shared.core.lock();
                let p = core.ports.port_mut(port);
                let done = p.slot_count() == 0;
                p.disable_pending = !done;
                done
            };
            if done {
                self.shared
                    .callbacks
                    .on_event(ComponentEvent::PortDisabled(port));
            } else {
                tracing::debug!("[{}] {} disables on last release", self.shared.name, port);
            }
        }
    }

    pub(crate) fn enable_port(&self, target: PortTarget) {
        for port in target.ports() {
            let state = {
                let mut core = self.shared.core.lock();
                let p = core.ports.port_mut(port);
                p.enabled = true;
                p.disable_pending = false;
                let state = core.state;
                self.shared.publish(&core);
                state
            };
            tracing::info!("[{}] Enabling {}", self.shared.name, port);

            if state != ComponentState::Unloaded {
                if let Err(e) = self.allocate_supplier_stock(PortTarget::One(port)) {
                    return self.fail(FaultKind::InsufficientResources, e.to_string());
                }
                let timeout = self.shared.config.timeouts.population();
                match self.wait_until(timeout, |core| core.ports.port(port).populated) {
                    WaitOutcome::Ready => {}
                    WaitOutcome::TimedOut => {
                        return self.fail(
                            FaultKind::PortUnresponsive,
                            format!("{} not populated within {:?}", port, timeout),
                        );
                    }
                    WaitOutcome::Faulted => return,
                }
                self.set_stream_enabled(port, true);
                let session = self.shared.core.lock().session;
                if let Some(session) = session.filter(|_| state == ComponentState::Running) {
                    self.distribute_parked_buffers(session, PortTarget::One(port));
                }
            }

            self.shared
                .callbacks
                .on_event(ComponentEvent::PortEnabled(port));
        }
    }

    fn set_stream_enabled(&self, port: PortIndex, enabled: bool) {
        let Some(session) = self.shared.core.lock().session else {
            return;
        };
        if let Err(e) = self.bridge.set_stream_enabled(session, StreamId::from(port), enabled) {
            tracing::warn!("[{}] Accelerator did not take {} change: {}", self.shared.name, port, e);
        }
    }
}
