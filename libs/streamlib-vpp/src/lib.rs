// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Video pre/post-processor component.
//!
//! A [`VppComponent`] owns four ports (primary input, overlay input, RGB
//! output, YUV output), forwards client buffers to an asynchronous
//! [`AcceleratorBridge`], and tracks the custody of every buffer until it is
//! handed back to the client or a tunneled peer.

#![allow(clippy::type_complexity)] // Callback types are clear in context

pub mod core;

pub use core::prelude;
pub use core::{
    AcceleratorBridge, AcceleratorCallback, AcceleratorEvent, BufferFlags, BufferHeader,
    BufferId, BufferOwner, BufferRejected, BufferSupplier, ColorFormat, Command, CommandKind,
    CompletionMode, ComponentCallbacks, ComponentConfig, ComponentEvent, ComponentId,
    ComponentState, ErrorSeverity, FaultKind, FrameContext, GrantAll, HandoffResult,
    LoopbackAccelerator, Mark, MarkToken, OwnershipCensus, PeerComponent, PortDefinition,
    PortDirection, PortFormat, PortIndex, PortStatus, PortTarget, ResourceArbiter, Result,
    SessionId, SessionParams, StreamId, StreamParams, TunnelRequest, VppComponent,
    VppComponentBuilder, VppError,
};
