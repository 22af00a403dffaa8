// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Buffer ownership tags and the legal moves between them.

use super::StorageOrigin;

/// Which party currently holds a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferOwner {
    /// Outside the component, with the client.
    Client,
    /// Queued toward the accelerator.
    ComponentInbound,
    /// Submitted to the accelerator, awaiting completion.
    Accelerator,
    /// Completed, awaiting forwarding.
    ComponentOutbound,
    /// Handed to a tunnel peer.
    Peer,
}

impl BufferOwner {
    /// Client and peer sit outside the component.
    pub fn is_external(self) -> bool {
        matches!(self, BufferOwner::Client | BufferOwner::Peer)
    }

    /// Whether `self -> to` is a legal move. Same-owner moves into an
    /// external owner are accepted as no-ops.
    pub fn can_become(self, to: BufferOwner) -> bool {
        use BufferOwner::*;
        match (self, to) {
            (Client, Client) | (Peer, Peer) => true,
            (Client, ComponentInbound) | (Peer, ComponentInbound) => true,
            (ComponentInbound, Accelerator)
            | (ComponentInbound, ComponentOutbound)
            | (ComponentInbound, Client)
            | (ComponentInbound, Peer) => true,
            (Accelerator, ComponentOutbound)
            | (Accelerator, ComponentInbound)
            | (Accelerator, Client)
            | (Accelerator, Peer) => true,
            (ComponentOutbound, Client)
            | (ComponentOutbound, Peer)
            | (ComponentOutbound, Accelerator) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BufferOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BufferOwner::Client => "client",
            BufferOwner::ComponentInbound => "component-inbound",
            BufferOwner::Accelerator => "accelerator",
            BufferOwner::ComponentOutbound => "component-outbound",
            BufferOwner::Peer => "peer",
        };
        f.write_str(name)
    }
}

/// Outcome of an ownership move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved { from: BufferOwner },
    /// The buffer was already with the requested external owner.
    AlreadyThere,
}

impl Transition {
    pub fn moved(self) -> bool {
        matches!(self, Transition::Moved { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BufferSlot {
    pub(crate) owner: BufferOwner,
    /// Component accepted responsibility but has not forwarded the buffer.
    pub(crate) holding: bool,
    pub(crate) origin: StorageOrigin,
    pub(crate) capacity: usize,
}

impl BufferSlot {
    pub(crate) fn new(owner: BufferOwner, origin: StorageOrigin, capacity: usize) -> Self {
        Self {
            owner,
            holding: false,
            origin,
            capacity,
        }
    }

    /// Client, peer, or component-held supplier stock.
    pub(crate) fn is_quiescent(&self) -> bool {
        self.owner.is_external() || self.holding
    }
}

/// Count of slots per owner on one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnershipCensus {
    pub client: usize,
    pub inbound: usize,
    pub accelerator: usize,
    pub outbound: usize,
    pub peer: usize,
    pub holding: usize,
}

impl OwnershipCensus {
    pub fn total(&self) -> usize {
        self.client + self.inbound + self.accelerator + self.outbound + self.peer
    }

    pub fn count(&self, owner: BufferOwner) -> usize {
        match owner {
            BufferOwner::Client => self.client,
            BufferOwner::ComponentInbound => self.inbound,
            BufferOwner::Accelerator => self.accelerator,
            BufferOwner::ComponentOutbound => self.outbound,
            BufferOwner::Peer => self.peer,
        }
    }

    pub(crate) fn add(&mut self, slot: &BufferSlot) {
        match slot.owner {
            BufferOwner::Client => self.client += 1,
            BufferOwner::ComponentInbound => self.inbound += 1,
            BufferOwner::Accelerator => self.accelerator += 1,
            BufferOwner::ComponentOutbound => self.outbound += 1,
            BufferOwner::Peer => self.peer += 1,
        }
        if slot.holding {
            self.holding += 1;
        }
    }
}
