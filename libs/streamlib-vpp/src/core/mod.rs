// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod accelerator;
pub mod component;
pub mod config;
pub mod error;
pub mod ports;
pub mod prelude;
pub mod propagation;
pub mod tunnel;

pub use accelerator::*;
pub use component::*;
pub use config::*;
pub use error::*;
pub use ports::*;
pub use propagation::*;
pub use tunnel::*;
