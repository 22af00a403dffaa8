// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod ledger;
mod record;

pub use ledger::{PropagationLedger, PropagationRing};
pub use record::{Inherited, PropagationRecord};
