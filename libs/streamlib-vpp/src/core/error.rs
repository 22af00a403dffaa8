use thiserror::Error;

use crate::core::ports::{BufferHeader, BufferId, BufferOwner, PortIndex};

#[derive(Error, Debug)]
pub enum VppError {
    #[error("Bad port index: {0}")]
    BadPort(String),

    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("Operation not allowed in current state: {0}")]
    IncorrectStateOperation(String),

    #[error("Component is in the invalid state")]
    InvalidState,

    #[error("Lifecycle transition already pending toward {0}")]
    Busy(String),

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Illegal ownership transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: BufferId,
        from: BufferOwner,
        to: BufferOwner,
    },

    #[error("Propagation ring exhausted on port {0}")]
    PropagationRingExhausted(PortIndex),

    #[error("Tunneling unsupported: {0}")]
    TunnelingUnsupported(String),

    #[error("Ports not compatible: {0}")]
    PortsNotCompatible(String),

    #[error("Accelerator error: {0}")]
    Accelerator(String),

    #[error("Peer component error: {0}")]
    Peer(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VppError>;

/// A buffer hand-off that was refused.
///
/// Carries the buffer back to the caller so a synchronous failure never
/// strands custody.
#[derive(Debug)]
pub struct BufferRejected {
    pub buffer: BufferHeader,
    pub error: VppError,
}

impl BufferRejected {
    pub fn new(buffer: BufferHeader, error: VppError) -> Self {
        Self { buffer, error }
    }

    pub fn into_parts(self) -> (BufferHeader, VppError) {
        (self.buffer, self.error)
    }
}

impl std::fmt::Display for BufferRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer {} rejected: {}", self.buffer.id(), self.error)
    }
}

impl std::error::Error for BufferRejected {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type HandoffResult = std::result::Result<(), BufferRejected>;
