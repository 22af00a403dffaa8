// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Commands sent from the client to the worker thread.

use crate::core::ports::{Mark, PortIndex, PortTarget};
use crate::core::{Result, VppError};

use super::{ComponentState, FaultKind};

/// Raw command opcode, paired with an integer argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SetState,
    EnablePort,
    DisablePort,
    Flush,
    MarkBuffer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetState(ComponentState),
    EnablePort(PortTarget),
    DisablePort(PortTarget),
    Flush(PortTarget),
    /// Attach `mark` to the next input buffer accepted on `port`.
    MarkBuffer { port: PortIndex, mark: Mark },
}

impl Command {
    /// Build a command from an opcode and its integer argument.
    ///
    /// # Errors
    ///
    /// [`VppError::BadPort`] for an unknown port, or a mark on an output or
    /// on all ports. [`VppError::BadParameter`] for an unknown state or a
    /// mark-buffer without a mark.
    pub fn from_raw(kind: CommandKind, arg: u32, mark: Option<Mark>) -> Result<Self> {
        match kind {
            CommandKind::SetState => ComponentState::from_raw(arg).map(Command::SetState),
            CommandKind::EnablePort => PortTarget::from_raw(arg).map(Command::EnablePort),
            CommandKind::DisablePort => PortTarget::from_raw(arg).map(Command::DisablePort),
            CommandKind::Flush => PortTarget::from_raw(arg).map(Command::Flush),
            CommandKind::MarkBuffer => {
                let port = PortIndex::from_raw(arg)?;
                let mark = mark.ok_or_else(|| {
                    VppError::BadParameter("mark-buffer requires a mark".to_string())
                })?;
                Ok(Command::MarkBuffer { port, mark })
            }
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetState(_) => CommandKind::SetState,
            Command::EnablePort(_) => CommandKind::EnablePort,
            Command::DisablePort(_) => CommandKind::DisablePort,
            Command::Flush(_) => CommandKind::Flush,
            Command::MarkBuffer { .. } => CommandKind::MarkBuffer,
        }
    }

    /// Checks that need no component state.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Command::MarkBuffer { port, .. } = self {
            if !port.is_input() {
                return Err(VppError::BadPort(format!("{} cannot carry marks", port)));
            }
        }
        Ok(())
    }
}

/// Everything the worker's command queue carries.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Command(Command),
    /// Fatal condition raised on the accelerator callback thread.
    Fault { kind: FaultKind, detail: String },
    Shutdown,
}
