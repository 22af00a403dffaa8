// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod bridge;
mod loopback;

pub use bridge::{
    AcceleratorBridge, AcceleratorCallback, AcceleratorEvent, FrameContext, SessionId,
    SessionParams, StreamId, StreamParams,
};
pub use loopback::{CompletionMode, LoopbackAccelerator};
