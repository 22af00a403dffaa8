// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Component lifecycle states.
//!
//! ```text
//! ┌──────────┐        ┌──────┐        ┌─────────┐  pause   ┌────────┐
//! │ Unloaded │◄──────►│ Idle │◄──────►│ Running │─────────►│ Paused │
//! └──────────┘        └──────┘◄──┐    └─────────┘◄─────────┴───┬────┘
//!                                └───────────────────────────────┘
//!
//! Any state except Invalid may enter Invalid. Invalid is terminal.
//! ```

use crate::core::{Result, VppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComponentState {
    /// No accelerator session, buffers may be allocated.
    #[default]
    Unloaded,
    /// Session open and ports populated, not processing.
    Idle,
    /// Buffers flow to the accelerator.
    Running,
    /// Session paused, port traffic is not serviced.
    Paused,
    /// Unrecoverable failure. Only reconstruction leaves this state.
    Invalid,
}

impl ComponentState {
    pub fn can_transition_to(self, to: ComponentState) -> bool {
        use ComponentState::*;
        match (self, to) {
            (Invalid, _) => false,
            (_, Invalid) => true,
            (Unloaded, Idle) => true,
            (Idle, Unloaded) | (Idle, Running) => true,
            (Running, Idle) | (Running, Paused) => true,
            (Paused, Running) | (Paused, Idle) => true,
            _ => false,
        }
    }

    /// Running or paused: an accelerator session may hold buffers.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Unloaded),
            1 => Ok(Self::Idle),
            2 => Ok(Self::Running),
            3 => Ok(Self::Paused),
            4 => Ok(Self::Invalid),
            other => Err(VppError::BadParameter(format!("no state with value {}", other))),
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "Unloaded"),
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComponentState::*;

    const ALL: [ComponentState; 5] = [Unloaded, Idle, Running, Paused, Invalid];

    fn reachable(from: ComponentState) -> Vec<ComponentState> {
        ALL.iter()
            .copied()
            .filter(|&to| from.can_transition_to(to))
            .collect()
    }

    #[test]
    fn test_component_state_default_is_unloaded() {
        assert_eq!(ComponentState::default(), Unloaded);
    }

    #[test]
    fn test_lifecycle_monotonicity() {
        assert_eq!(reachable(Unloaded), vec![Idle, Invalid]);
        assert_eq!(reachable(Idle), vec![Unloaded, Running, Invalid]);
        assert_eq!(reachable(Running), vec![Idle, Paused, Invalid]);
        assert_eq!(reachable(Paused), vec![Idle, Running, Invalid]);
        assert!(reachable(Invalid).is_empty());
    }

    #[test]
    fn test_same_state_is_not_a_transition() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_raw_roundtrip() {
        for state in ALL {
            assert_eq!(ComponentState::from_raw(state.as_raw()).unwrap(), state);
        }
        assert!(ComponentState::from_raw(9).is_err());
    }

    #[test]
    fn test_is_active() {
        assert!(Running.is_active());
        assert!(Paused.is_active());
        assert!(!Idle.is_active());
        assert!(!Invalid.is_active());
    }
}
