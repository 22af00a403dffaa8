// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod component_config;

pub use component_config::{ComponentConfig, PortConfig, PortsConfig, TimeoutConfig, TunnelConfig};
