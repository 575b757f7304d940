//! Connection status

use serde::{Deserialize, Serialize};

/// Current state of a session, as observed by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Never connected
    #[default]
    Idle,
    /// Opening the transport
    Connecting,
    /// Transport open
    Connected,
    /// Transport closed
    Disconnected,
    /// Waiting to retry after a failure
    Reconnecting,
    /// Transport open and microphone streaming
    Listening,
    /// Transport open and the service is working on a turn
    Processing,
    /// Last operation failed
    Error,
}

impl ConnectionStatus {
    /// Status name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Error => "error",
        }
    }

    /// True for statuses that imply an open transport
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Listening | Self::Processing)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
