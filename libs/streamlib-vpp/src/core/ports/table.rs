// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Port table: per-port slots, flags, supplier role and tunnel.

use crate::core::config::{PortConfig, PortsConfig};
use crate::core::tunnel::Tunnel;
use crate::core::{Result, VppError};

use super::{
    BufferHeader, BufferId, BufferOwner, BufferSlot, BufferSupplier, ComponentId, OwnershipCensus,
    PortDefinition, PortDirection, PortFormat, PortIndex, Transition,
};

/// Result of registering a slot on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AddedSlot {
    pub(crate) slot: usize,
    pub(crate) became_populated: bool,
}

pub(crate) struct Port {
    pub(crate) index: PortIndex,
    pub(crate) format: PortFormat,
    pub(crate) frame_width: u32,
    pub(crate) frame_height: u32,
    pub(crate) buffer_count: usize,
    pub(crate) buffer_size: usize,
    pub(crate) enabled: bool,
    pub(crate) populated: bool,
    pub(crate) supplier: BufferSupplier,
    pub(crate) tunnel: Option<Tunnel>,
    /// Disable requested while populated; completes on last release.
    pub(crate) disable_pending: bool,
    /// Supplier stock parked inside the component.
    pub(crate) held: Vec<BufferHeader>,
    slots: Vec<Option<BufferSlot>>,
}

impl Port {
    pub(crate) fn from_config(index: PortIndex, config: &PortConfig) -> Self {
        Self {
            index,
            format: PortFormat::Video {
                color: config.color_format,
            },
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            buffer_count: config.buffer_count,
            buffer_size: config.buffer_size,
            enabled: config.enabled,
            populated: false,
            supplier: config.supplier,
            tunnel: None,
            disable_pending: false,
            held: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub(crate) fn definition(&self) -> PortDefinition {
        PortDefinition {
            port: self.index.as_raw(),
            direction: self.index.direction(),
            format: self.format,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            buffer_count: self.buffer_count,
            buffer_size: self.buffer_size,
            enabled: self.enabled,
            populated: self.populated,
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub(crate) fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }

    /// This component allocates the buffers of a tunneled port.
    pub(crate) fn is_supplier(&self) -> bool {
        if self.tunnel.is_none() {
            return false;
        }
        match self.index.direction() {
            PortDirection::Input => self.supplier == BufferSupplier::Input,
            PortDirection::Output => self.supplier == BufferSupplier::Output,
        }
    }

    /// External owner buffers of this port go back to.
    pub(crate) fn return_owner(&self) -> BufferOwner {
        if self.is_tunneled() {
            BufferOwner::Peer
        } else {
            BufferOwner::Client
        }
    }

    pub(crate) fn add_slot(&mut self, slot: BufferSlot) -> Result<AddedSlot> {
        if self.slot_count() >= self.buffer_count {
            return Err(VppError::OutOfResources(format!(
                "{} already has its {} buffers",
                self.index, self.buffer_count
            )));
        }
        let index = match self.slots.iter().position(|s| s.is_none()) {
            Some(free) => {
                self.slots[free] = Some(slot);
                free
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        let was_populated = self.populated;
        self.populated = self.slot_count() == self.buffer_count;
        Ok(AddedSlot {
            slot: index,
            became_populated: self.populated && !was_populated,
        })
    }

    pub(crate) fn remove_slot(&mut self, slot: usize) -> Result<BufferSlot> {
        let removed = self
            .slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or_else(|| {
                VppError::BadParameter(format!("{} has no buffer in slot {}", self.index, slot))
            })?;
        self.populated = false;
        Ok(removed)
    }

    pub(crate) fn slot(&self, slot: usize) -> Option<&BufferSlot> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, slot: usize) -> Option<&mut BufferSlot> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, &BufferSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    pub(crate) fn transition(&mut self, id: BufferId, to: BufferOwner) -> Result<Transition> {
        let slot = self.slot_mut(id.slot).ok_or_else(|| {
            VppError::BadParameter(format!("{} is not allocated", id))
        })?;
        let from = slot.owner;
        if !from.can_become(to) {
            return Err(VppError::IllegalTransition { id, from, to });
        }
        if from == to {
            tracing::warn!("{} already owned by {}, ignoring move", id, to);
            return Ok(Transition::AlreadyThere);
        }
        slot.owner = to;
        slot.holding = false;
        tracing::trace!("{} {} -> {}", id, from, to);
        Ok(Transition::Moved { from })
    }

    pub(crate) fn set_holding(&mut self, slot: usize, holding: bool) {
        if let Some(s) = self.slot_mut(slot) {
            s.holding = holding;
        }
    }

    pub(crate) fn census(&self) -> OwnershipCensus {
        let mut census = OwnershipCensus::default();
        for (_, slot) in self.slots() {
            census.add(slot);
        }
        census
    }

    /// Every slot is with the client, the peer, or parked as supplier stock.
    pub(crate) fn is_quiescent(&self) -> bool {
        self.slots().all(|(_, s)| s.is_quiescent())
    }

    /// Count of slots with `owner` that are not parked.
    pub(crate) fn in_flight(&self, owner: BufferOwner) -> usize {
        self.slots()
            .filter(|(_, s)| s.owner == owner && !s.holding)
            .count()
    }
}

pub(crate) struct PortTable {
    component: ComponentId,
    ports: Vec<Port>,
}

impl PortTable {
    pub(crate) fn new(component: ComponentId, config: &PortsConfig) -> Self {
        let ports = PortIndex::ALL
            .iter()
            .map(|&index| Port::from_config(index, config.get(index)))
            .collect();
        Self { component, ports }
    }

    pub(crate) fn component(&self) -> ComponentId {
        self.component
    }

    pub(crate) fn port(&self, index: PortIndex) -> &Port {
        &self.ports[index.slot()]
    }

    pub(crate) fn port_mut(&mut self, index: PortIndex) -> &mut Port {
        &mut self.ports[index.slot()]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    /// Reject ids minted by another component or naming a free slot.
    pub(crate) fn validate(&self, id: BufferId) -> Result<&BufferSlot> {
        if id.component != self.component {
            return Err(VppError::BadParameter(format!(
                "{} belongs to component {}",
                id, id.component
            )));
        }
        self.port(id.port)
            .slot(id.slot)
            .ok_or_else(|| VppError::BadParameter(format!("{} is not allocated", id)))
    }

    pub(crate) fn transition(&mut self, id: BufferId, to: BufferOwner) -> Result<Transition> {
        self.validate(id)?;
        self.port_mut(id.port).transition(id, to)
    }

    /// Move a buffer to component-outbound and mark it parked.
    pub(crate) fn hold(&mut self, id: BufferId) -> Result<()> {
        let owner = self.validate(id)?.owner;
        if owner != BufferOwner::ComponentOutbound {
            self.transition(id, BufferOwner::ComponentOutbound)?;
        }
        self.port_mut(id.port).set_holding(id.slot, true);
        Ok(())
    }
}
