// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Component configuration via `vpp.yaml`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ports::{BufferSupplier, ColorFormat, PortIndex};
use crate::core::{Result, VppError};

const DEFAULT_WIDTH: u32 = 176;
const DEFAULT_HEIGHT: u32 = 144;

/// Static description of one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub enabled: bool,
    /// Number of buffers that make the port populated.
    pub buffer_count: usize,
    /// Minimum size of each buffer in bytes.
    pub buffer_size: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    pub color_format: ColorFormat,
    /// Supplier preference reported during tunnel negotiation.
    pub supplier: BufferSupplier,
}

impl PortConfig {
    fn video(color_format: ColorFormat, buffer_size: usize) -> Self {
        Self {
            enabled: true,
            buffer_count: 1,
            buffer_size,
            frame_width: DEFAULT_WIDTH,
            frame_height: DEFAULT_HEIGHT,
            color_format,
            supplier: BufferSupplier::Input,
        }
    }

    /// Frame size in bytes for the configured geometry and format.
    pub fn frame_bytes(&self) -> usize {
        self.frame_width as usize * self.frame_height as usize * self.color_format.bytes_per_pixel()
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::video(ColorFormat::CbYCrY, (DEFAULT_WIDTH * DEFAULT_HEIGHT * 2) as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub input: PortConfig,
    pub overlay: PortConfig,
    pub rgb_output: PortConfig,
    pub yuv_output: PortConfig,
}

impl PortsConfig {
    pub fn get(&self, port: PortIndex) -> &PortConfig {
        match port {
            PortIndex::Input => &self.input,
            PortIndex::Overlay => &self.overlay,
            PortIndex::RgbOutput => &self.rgb_output,
            PortIndex::YuvOutput => &self.yuv_output,
        }
    }

    pub fn get_mut(&mut self, port: PortIndex) -> &mut PortConfig {
        match port {
            PortIndex::Input => &mut self.input,
            PortIndex::Overlay => &mut self.overlay,
            PortIndex::RgbOutput => &mut self.rgb_output,
            PortIndex::YuvOutput => &mut self.yuv_output,
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        let pixels = (DEFAULT_WIDTH * DEFAULT_HEIGHT) as usize;
        Self {
            input: PortConfig::video(ColorFormat::Yuv420Planar, pixels * 3 / 2),
            overlay: PortConfig::video(ColorFormat::Rgb888, pixels * 3),
            rgb_output: PortConfig::video(ColorFormat::Rgb565, pixels * 2),
            yuv_output: PortConfig::video(ColorFormat::CbYCrY, pixels * 2),
        }
    }
}

/// Bounded waits used by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle tick of the worker's multiplexed wait.
    pub worker_tick_ms: u64,
    /// Wait for ports to become populated (idle transition, port enable).
    pub population_ms: u64,
    /// Wait for the accelerator to confirm stop or pause.
    pub accelerator_ack_ms: u64,
    /// Wait for ports to unpopulate on unload. Expiry is not fatal.
    pub unload_ms: u64,
}

impl TimeoutConfig {
    pub fn worker_tick(&self) -> Duration {
        Duration::from_millis(self.worker_tick_ms)
    }

    pub fn population(&self) -> Duration {
        Duration::from_millis(self.population_ms)
    }

    pub fn accelerator_ack(&self) -> Duration {
        Duration::from_millis(self.accelerator_ack_ms)
    }

    pub fn unload(&self) -> Duration {
        Duration::from_millis(self.unload_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            worker_tick_ms: 100,
            population_ms: 2_000,
            accelerator_ack_ms: 2_000,
            unload_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Peers whose name starts with this prefix may be tunneled to.
    pub compatible_prefix: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            compatible_prefix: "OMX.TI.".to_string(),
        }
    }
}

/// Component configuration from `vpp.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    pub name: String,
    pub ports: PortsConfig,
    pub timeouts: TimeoutConfig,
    pub tunnel: TunnelConfig,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            name: "OMX.TI.VPP".to_string(),
            ports: PortsConfig::default(),
            timeouts: TimeoutConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl ComponentConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "vpp.yaml";

    /// Load configuration from a directory. Returns error if the file is
    /// missing, cannot be parsed, or fails validation.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            VppError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            VppError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded component config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file
    /// is missing or unusable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for port in PortIndex::ALL {
            let cfg = self.ports.get(port);
            if cfg.enabled && cfg.buffer_count == 0 {
                return Err(VppError::Configuration(format!(
                    "{} is enabled with a buffer count of zero",
                    port
                )));
            }
        }
        let t = &self.timeouts;
        if t.worker_tick_ms == 0 || t.population_ms == 0 || t.accelerator_ack_ms == 0 {
            return Err(VppError::Configuration(
                "worker tick, population and accelerator timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
