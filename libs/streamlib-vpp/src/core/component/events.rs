// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Events and buffer returns delivered to the client.

use crate::core::ports::{BufferFlags, BufferHeader, MarkToken, PortIndex};

use super::ComponentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Minor,
    Severe,
    Critical,
}

/// Cause of an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Requested state equals the current state.
    SameState,
    IncorrectStateTransition,
    /// Session could not be opened, configured or admitted.
    InsufficientResources,
    /// A port did not populate (or unpopulate) in time.
    PortUnresponsive,
    /// A buffer was released from an enabled port while in use.
    PortUnpopulated,
    /// The accelerator never confirmed stop or pause.
    AcceleratorStuck,
    /// Accelerator or bridge failure.
    Hardware,
    PropagationRingExhausted,
    /// Explicit request to enter the invalid state.
    InvalidState,
    /// Ledger inconsistency.
    Internal,
}

impl FaultKind {
    /// Timeout-class faults: the component is stuck, not broken.
    pub fn is_timeout(self) -> bool {
        matches!(self, FaultKind::PortUnresponsive | FaultKind::AcceleratorStuck)
    }

    pub fn severity(self) -> ErrorSeverity {
        match self {
            FaultKind::SameState
            | FaultKind::IncorrectStateTransition
            | FaultKind::PortUnpopulated => ErrorSeverity::Minor,
            FaultKind::InsufficientResources
            | FaultKind::PortUnresponsive
            | FaultKind::AcceleratorStuck
            | FaultKind::PropagationRingExhausted => ErrorSeverity::Severe,
            FaultKind::Hardware | FaultKind::InvalidState | FaultKind::Internal => {
                ErrorSeverity::Critical
            }
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentEvent {
    /// A lifecycle transition completed.
    StateChanged(ComponentState),
    PortEnabled(PortIndex),
    PortDisabled(PortIndex),
    FlushComplete(PortIndex),
    /// An output buffer carried a mark targeted at this component.
    Mark { port: PortIndex, token: MarkToken },
    /// An output buffer carried end-of-stream.
    BufferFlag { port: PortIndex, flags: BufferFlags },
    Error {
        severity: ErrorSeverity,
        kind: FaultKind,
        detail: String,
    },
}

impl ComponentEvent {
    pub(crate) fn error(kind: FaultKind, detail: impl Into<String>) -> Self {
        ComponentEvent::Error {
            severity: kind.severity(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Client hooks supplied at construction.
///
/// Called from the worker thread or the accelerator callback thread, never
/// with internal locks held, so implementations may call back into the
/// component.
pub trait ComponentCallbacks: Send + Sync {
    fn on_event(&self, event: ComponentEvent);

    /// An input buffer is back with the client.
    fn on_input_consumed(&self, buffer: BufferHeader);

    /// An output buffer is filled and back with the client.
    fn on_output_ready(&self, buffer: BufferHeader);
}
