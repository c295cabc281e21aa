use std::fmt;

use crate::error::{ErrorCategory, RtspError};

/// Client session state machine.
///
/// ```text
/// Idle → Connecting → Describing → SettingUp → Playing → TornDown
///            └────────────┴────────────┴──────────┴────→ Failed(reason)
/// ```
///
/// `TornDown` and `Failed` are terminal. A stop request moves any state to
/// `TornDown`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Describing,
    SettingUp,
    Playing,
    TornDown,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TornDown | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Describing => write!(f, "describing"),
            Self::SettingUp => write!(f, "setting up"),
            Self::Playing => write!(f, "playing"),
            Self::TornDown => write!(f, "torn down"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("authentication rejected")]
    Unauthorized,
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

impl FailureReason {
    /// Classify a fatal error. `None` for a cancellation, which is not a
    /// failure.
    pub fn from_error(err: &RtspError) -> Option<Self> {
        Some(match (err.category(), err) {
            (ErrorCategory::Cancelled, _) => return None,
            (_, RtspError::Timeout(what)) => Self::Timeout(what.clone()),
            (ErrorCategory::Auth, _) => Self::Unauthorized,
            (ErrorCategory::Network, _) => Self::Network(err.to_string()),
            (ErrorCategory::Protocol, _)
            | (ErrorCategory::Depacketization, _)
            | (ErrorCategory::Usage, _) => Self::Protocol(err.to_string()),
        })
    }
}
