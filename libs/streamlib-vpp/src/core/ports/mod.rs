// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod buffer;
mod ownership;
mod port;
pub(crate) mod table;

pub use buffer::{BufferFlags, BufferHeader, BufferId, ComponentId, Mark, MarkToken, StorageOrigin};
pub use ownership::{BufferOwner, OwnershipCensus, Transition};
pub(crate) use ownership::BufferSlot;
pub use port::{
    ALL_PORTS, BufferSupplier, ColorFormat, OutputClass, PortDefinition, PortDirection,
    PortDomain, PortFormat, PortIndex, PortTarget,
};
pub(crate) use table::{Port, PortTable};
