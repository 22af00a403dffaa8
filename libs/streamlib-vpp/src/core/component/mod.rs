// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The component: client API, worker thread, lifecycle and flush.

mod arbiter;
mod builder;
mod callback;
mod commands;
#[allow(clippy::module_inception)]
mod component;
mod events;
mod flush;
mod lifecycle;
mod shared;
mod state;
mod worker;

pub use arbiter::{GrantAll, ResourceArbiter};
pub use builder::VppComponentBuilder;
pub use commands::{Command, CommandKind};
pub use component::VppComponent;
pub use events::{ComponentCallbacks, ComponentEvent, ErrorSeverity, FaultKind};
pub use shared::PortStatus;
pub use state::ComponentState;
