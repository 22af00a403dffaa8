// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use crate::core::error::HandoffResult;
use crate::core::ports::{BufferHeader, BufferId, BufferSupplier, PortDefinition};
use crate::core::Result;

/// A component on the other end of a tunnel.
///
/// Port numbers are the peer's own raw indices.
pub trait PeerComponent: Send + Sync {
    /// Implementation name, used for the compatibility check.
    fn name(&self) -> String;

    fn port_definition(&self, port: u32) -> Result<PortDefinition>;

    fn set_buffer_supplier(&self, port: u32, supplier: BufferSupplier) -> Result<()>;

    /// Register a buffer this component supplies for the peer's `port`.
    fn use_buffer(&self, port: u32, buffer: BufferId, size: usize) -> Result<()>;

    /// Unregister a supplied buffer before its storage is released.
    fn free_buffer(&self, port: u32, buffer: BufferId) -> Result<()>;

    /// Deliver a filled buffer to the peer's input `port`.
    fn submit_input(&self, port: u32, buffer: BufferHeader) -> HandoffResult;

    /// Deliver an empty buffer to the peer's output `port` for filling.
    fn return_output(&self, port: u32, buffer: BufferHeader) -> HandoffResult;
}

/// An established tunnel on one local port.
#[derive(Clone)]
pub struct Tunnel {
    pub peer: Arc<dyn PeerComponent>,
    pub peer_port: u32,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("peer", &self.peer.name())
            .field("peer_port", &self.peer_port)
            .finish()
    }
}

/// A request to connect a local port to a peer port.
#[derive(Clone)]
pub struct TunnelRequest {
    pub peer: Arc<dyn PeerComponent>,
    pub peer_port: u32,
    /// Supplier preference reported by the other side, if already negotiated.
    pub supplier: BufferSupplier,
}

impl TunnelRequest {
    pub fn new(peer: Arc<dyn PeerComponent>, peer_port: u32) -> Self {
        Self {
            peer,
            peer_port,
            supplier: BufferSupplier::Unspecified,
        }
    }

    pub fn with_supplier(mut self, supplier: BufferSupplier) -> Self {
        self.supplier = supplier;
        self
    }
}
