// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod negotiate;
mod peer;

pub(crate) use negotiate::negotiate;
pub use peer::{PeerComponent, Tunnel, TunnelRequest};
