// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Port identity, direction and format descriptors.
//!
//! The component has a fixed shape: a primary input, an overlay input and
//! two independently formatted outputs (RGB and YUV).

use serde::{Deserialize, Serialize};

use crate::core::{Result, VppError};

/// Raw port index meaning "every port" in commands.
pub const ALL_PORTS: u32 = u32::MAX;

/// One of the four ports of the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortIndex {
    Input,
    Overlay,
    RgbOutput,
    YuvOutput,
}

impl PortIndex {
    pub const COUNT: usize = 4;
    pub const ALL: [PortIndex; Self::COUNT] = [
        PortIndex::Input,
        PortIndex::Overlay,
        PortIndex::RgbOutput,
        PortIndex::YuvOutput,
    ];
    pub const INPUTS: [PortIndex; 2] = [PortIndex::Input, PortIndex::Overlay];

    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(PortIndex::Input),
            1 => Ok(PortIndex::Overlay),
            2 => Ok(PortIndex::RgbOutput),
            3 => Ok(PortIndex::YuvOutput),
            other => Err(VppError::BadPort(format!("no port with index {}", other))),
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    pub fn direction(self) -> PortDirection {
        match self {
            PortIndex::Input | PortIndex::Overlay => PortDirection::Input,
            PortIndex::RgbOutput | PortIndex::YuvOutput => PortDirection::Output,
        }
    }

    pub fn is_input(self) -> bool {
        self.direction() == PortDirection::Input
    }

    /// Output class served by this port, if it is an output.
    pub fn output_class(self) -> Option<OutputClass> {
        match self {
            PortIndex::RgbOutput => Some(OutputClass::Rgb),
            PortIndex::YuvOutput => Some(OutputClass::Yuv),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PortIndex::Input => "input",
            PortIndex::Overlay => "overlay",
            PortIndex::RgbOutput => "rgb_output",
            PortIndex::YuvOutput => "yuv_output",
        }
    }
}

impl std::fmt::Display for PortIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.as_raw())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// Color family of an output port. Each class keeps its own correlation
/// counter in the propagation ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputClass {
    Rgb,
    Yuv,
}

impl OutputClass {
    pub const COUNT: usize = 2;
    pub const ALL: [OutputClass; Self::COUNT] = [OutputClass::Rgb, OutputClass::Yuv];

    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    pub fn port(self) -> PortIndex {
        match self {
            OutputClass::Rgb => PortIndex::RgbOutput,
            OutputClass::Yuv => PortIndex::YuvOutput,
        }
    }
}

/// Scope of a port command: a single port or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortTarget {
    One(PortIndex),
    All,
}

impl PortTarget {
    pub fn from_raw(raw: u32) -> Result<Self> {
        if raw == ALL_PORTS {
            Ok(PortTarget::All)
        } else {
            PortIndex::from_raw(raw).map(PortTarget::One)
        }
    }

    pub fn contains(self, port: PortIndex) -> bool {
        match self {
            PortTarget::One(p) => p == port,
            PortTarget::All => true,
        }
    }

    pub fn ports(self) -> Vec<PortIndex> {
        match self {
            PortTarget::One(p) => vec![p],
            PortTarget::All => PortIndex::ALL.to_vec(),
        }
    }
}

impl From<PortIndex> for PortTarget {
    fn from(port: PortIndex) -> Self {
        PortTarget::One(port)
    }
}

impl std::fmt::Display for PortTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortTarget::One(p) => write!(f, "{}", p),
            PortTarget::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Yuv420Planar,
    CbYCrY,
    Rgb565,
    Rgb888,
    Bgr888,
    Argb8888,
    Unused,
}

impl ColorFormat {
    /// Bytes per pixel, rounded up for planar formats.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorFormat::Yuv420Planar => 2,
            ColorFormat::CbYCrY | ColorFormat::Rgb565 => 2,
            ColorFormat::Rgb888 | ColorFormat::Bgr888 => 3,
            ColorFormat::Argb8888 => 4,
            ColorFormat::Unused => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDomain {
    Video,
    Image,
    Audio,
    Other,
}

/// Domain-specific format of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum PortFormat {
    Video { color: ColorFormat },
    Image { color: ColorFormat },
    Audio { encoding: u32 },
    Other { format: u32 },
}

impl PortFormat {
    pub fn domain(&self) -> PortDomain {
        match self {
            PortFormat::Video { .. } => PortDomain::Video,
            PortFormat::Image { .. } => PortDomain::Image,
            PortFormat::Audio { .. } => PortDomain::Audio,
            PortFormat::Other { .. } => PortDomain::Other,
        }
    }

    /// Whether a tunnel between ports of these formats can carry data.
    ///
    /// Video color sub-formats are not compared; the accelerator converts
    /// between them.
    pub fn is_compatible_with(&self, other: &PortFormat) -> bool {
        match (self.domain(), other.domain()) {
            (PortDomain::Video, PortDomain::Video) => true,
            _ => self == other,
        }
    }
}

/// Which side of a tunnel allocates the buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSupplier {
    #[default]
    Unspecified,
    Input,
    Output,
}

/// Port definition as reported to clients and tunnel peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub port: u32,
    pub direction: PortDirection,
    pub format: PortFormat,
    pub frame_width: u32,
    pub frame_height: u32,
    pub buffer_count: usize,
    pub buffer_size: usize,
    pub enabled: bool,
    pub populated: bool,
}
