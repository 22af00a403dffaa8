// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Accelerator completions, handled on the bridge's callback thread.

use std::sync::{Arc, Weak};

use crate::core::accelerator::{AcceleratorCallback, AcceleratorEvent};
use crate::core::ports::{BufferFlags, BufferHeader, BufferOwner};

use super::shared::{Core, Delivery, Shared};
use super::{ComponentEvent, FaultKind};

/// Build the callback handed to the bridge when a session opens.
///
/// Holds the component weakly so a session outliving the component only
/// drops its events.
pub(crate) fn accelerator_callback(shared: Weak<Shared>) -> AcceleratorCallback {
    Arc::new(move |event| match shared.upgrade() {
        Some(shared) => handle_event(&shared, event),
        None => tracing::debug!("Accelerator event after component teardown: {:?}", event),
    })
}

pub(crate) fn handle_event(shared: &Shared, event: AcceleratorEvent) {
    let mut out = Vec::new();
    {
        let mut core = shared.core.lock();
        match event {
            AcceleratorEvent::BufferProcessed {
                stream,
                mut buffer,
                filled_len,
            } => {
                tracing::trace!(
                    "[{}] {} processed on {:?} ({} bytes)",
                    shared.name,
                    buffer.id(),
                    stream,
                    filled_len
                );
                if let Some(class) = buffer.port().output_class() {
                    buffer.offset = 0;
                    buffer.filled_len = filled_len;
                    core.propagation.on_output_completed(class, &mut buffer);
                    announce_metadata(shared, &mut buffer, &mut out);
                }
                route_completed(shared, &mut core, buffer, &mut out);
            }
            AcceleratorEvent::BufferNotProcessed { stream, buffer } => {
                tracing::debug!(
                    "[{}] {} handed back unprocessed on {:?}",
                    shared.name,
                    buffer.id(),
                    stream
                );
                route_unprocessed(shared, &mut core, buffer, &mut out);
            }
            AcceleratorEvent::ProcessingStopped => {
                tracing::debug!("[{}] Accelerator stopped", shared.name);
                core.stop_acked = true;
            }
            AcceleratorEvent::ProcessingPaused => {
                tracing::debug!("[{}] Accelerator paused", shared.name);
                core.pause_acked = true;
            }
            AcceleratorEvent::DspError {
                code,
                recoverable: true,
            } => {
                tracing::warn!("[{}] Recoverable DSP error {:#x}, continuing", shared.name, code);
            }
            AcceleratorEvent::DspError { code, .. } => {
                shared.raise_fault(&mut core, FaultKind::Hardware, format!("DSP error {:#x}", code));
            }
            AcceleratorEvent::InternalError { message } => {
                shared.raise_fault(&mut core, FaultKind::Hardware, message);
            }
        }
        shared.changed.notify_all();
    }
    shared.dispatch(out);
}

/// Turn inherited end-of-stream and self-targeted marks into events.
fn announce_metadata(shared: &Shared, buffer: &mut BufferHeader, out: &mut Vec<Delivery>) {
    let port = buffer.port();
    if let Some(mark) = buffer.mark {
        if mark.target == shared.id {
            buffer.mark = None;
            out.push(Delivery::Event(ComponentEvent::Mark {
                port,
                token: mark.token,
            }));
        }
    }
    if buffer.flags.contains(BufferFlags::END_OF_STREAM) {
        out.push(Delivery::Event(ComponentEvent::BufferFlag {
            port,
            flags: buffer.flags,
        }));
    }
}

fn route_completed(shared: &Shared, core: &mut Core, buffer: BufferHeader, out: &mut Vec<Delivery>) {
    let id = buffer.id();
    let routed = match core.ports.transition(id, BufferOwner::ComponentOutbound) {
        Ok(_) => core.release(buffer, out),
        Err(e) => Err(e),
    };
    if let Err(e) = routed {
        shared.raise_fault(core, FaultKind::Internal, e.to_string());
    }
}

/// While a flush is in progress, buffers of ports outside its scope go back
/// onto their queue for resubmission after the accelerator restarts.
fn route_unprocessed(shared: &Shared, core: &mut Core, buffer: BufferHeader, out: &mut Vec<Delivery>) {
    let port = buffer.port();
    let requeue = core.flush_scope.is_some_and(|scope| !scope.contains(port));
    if !requeue {
        route_completed(shared, core, buffer, out);
        return;
    }
    let id = buffer.id();
    if let Err(e) = core.ports.transition(id, BufferOwner::ComponentInbound) {
        shared.raise_fault(core, FaultKind::Internal, e.to_string());
        return;
    }
    tracing::debug!("[{}] Requeueing {} outside the flush", shared.name, id);
    if port.is_input() {
        core.requeued.insert(id);
    }
    if let Err(e) = shared.queue_for(port).send(buffer) {
        core.requeued.remove(&id);
        let buffer = e.into_inner();
        if let Err(e) = core.release(buffer, out) {
            shared.raise_fault(core, FaultKind::Internal, e.to_string());
        }
    }
}
