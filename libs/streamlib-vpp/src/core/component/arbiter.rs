// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::accelerator::SessionParams;

/// Admission control consulted before a component goes Idle.
pub trait ResourceArbiter: Send + Sync {
    /// Accept or reject the session described by `params`.
    fn acquire(&self, params: &SessionParams) -> bool;

    /// Return resources granted by a previous `acquire`.
    fn release(&self, _component: &str) {}
}

/// Admits every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrantAll;

impl ResourceArbiter for GrantAll {
    fn acquire(&self, _params: &SessionParams) -> bool {
        true
    }
}
