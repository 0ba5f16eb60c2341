// SPDX-License-Identifier: GPL-3.0-only

//! Observable session lifecycle

use crate::errors::{ConfigurationError, PermissionError};
use std::fmt;

/// Why a session ended up in [`SessionState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Permission(PermissionError),
    Configuration(ConfigurationError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Permission(e) => write!(f, "{}", e),
            FailureReason::Configuration(e) => write!(f, "{}", e),
        }
    }
}

/// Session lifecycle
///
/// ```text
/// Idle ──▶ Configuring ──▶ Stopped ◀──▶ Running
///   │            │
///   └────────────┴──────▶ Failed
/// ```
///
/// `Configuring` is entered at most once. `Failed` is terminal for the
/// controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Configuring,
    Running,
    Stopped,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::Failed(_))
    }

    /// Whether a capture binding exists in this state
    pub fn is_configured(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Configuring => write!(f, "configuring"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
