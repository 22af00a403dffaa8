// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Commonly used types for `use streamlib_vpp::prelude::*`.

pub use crate::core::{
    // Errors
    error::{BufferRejected, Result, VppError},

    // Component
    component::{
        Command, ComponentCallbacks, ComponentEvent, ComponentState, FaultKind, VppComponent,
    },

    // Buffers and ports
    ports::{BufferFlags, BufferHeader, PortIndex, PortTarget},

    // Accelerator
    accelerator::{AcceleratorBridge, CompletionMode, LoopbackAccelerator},

    // Config
    config::ComponentConfig,
};
