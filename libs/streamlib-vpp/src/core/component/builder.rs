// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Builder for [`VppComponent`].

use std::sync::Arc;

use crate::core::accelerator::AcceleratorBridge;
use crate::core::config::ComponentConfig;
use crate::core::ports::ComponentId;
use crate::core::{Result, VppError};

use super::component::VppComponent;
use super::shared::Shared;
use super::worker::Worker;
use super::{ComponentCallbacks, GrantAll, ResourceArbiter};

/// Builder for configuring and constructing a [`VppComponent`].
pub struct VppComponentBuilder {
    config: ComponentConfig,
    bridge: Option<Arc<dyn AcceleratorBridge>>,
    callbacks: Option<Arc<dyn ComponentCallbacks>>,
    arbiter: Option<Arc<dyn ResourceArbiter>>,
}

impl Default for VppComponentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VppComponentBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: ComponentConfig::default(),
            bridge: None,
            callbacks: None,
            arbiter: None,
        }
    }

    /// Set the component configuration.
    pub fn with_config(mut self, config: ComponentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the accelerator bridge.
    pub fn with_bridge<B: AcceleratorBridge + 'static>(mut self, bridge: B) -> Self {
        self.bridge = Some(Arc::new(bridge));
        self
    }

    /// Set the accelerator bridge from an Arc.
    pub fn with_bridge_arc(mut self, bridge: Arc<dyn AcceleratorBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Set the client callbacks.
    pub fn with_callbacks<C: ComponentCallbacks + 'static>(mut self, callbacks: C) -> Self {
        self.callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Set the client callbacks from an Arc.
    pub fn with_callbacks_arc(mut self, callbacks: Arc<dyn ComponentCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Set a custom resource arbiter. Defaults to [`GrantAll`].
    pub fn with_arbiter<A: ResourceArbiter + 'static>(mut self, arbiter: A) -> Self {
        self.arbiter = Some(Arc::new(arbiter));
        self
    }

    /// Set a custom resource arbiter from an Arc.
    pub fn with_arbiter_arc(mut self, arbiter: Arc<dyn ResourceArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Validate the configuration and start the worker thread.
    pub fn build(self) -> Result<VppComponent> {
        self.config.validate()?;
        let bridge = self
            .bridge
            .ok_or_else(|| VppError::Configuration("no accelerator bridge set".to_string()))?;
        let callbacks = self
            .callbacks
            .ok_or_else(|| VppError::Configuration("no client callbacks set".to_string()))?;
        let arbiter = self.arbiter.unwrap_or_else(|| Arc::new(GrantAll));

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (filled_tx, filled_rx) = crossbeam_channel::unbounded();
        let (free_tx, free_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared::new(
            ComponentId::new(),
            self.config,
            callbacks,
            command_tx,
            filled_tx,
            free_tx,
        ));
        let worker = Worker::new(
            Arc::clone(&shared),
            bridge,
            arbiter,
            command_rx,
            filled_rx,
            free_rx,
        )
        .spawn()?;

        tracing::info!("[{}] Component {} created", shared.name, shared.id);
        Ok(VppComponent {
            shared,
            worker: Some(worker),
        })
    }
}
