//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default speech service endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8766";

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Default reconnect attempt budget
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connection settings, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,
    /// Constant delay before each reconnect attempt
    pub reconnect_interval: Duration,
    /// Attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Ping interval while connected
    pub heartbeat_interval: Duration,
    /// Reconnect after unexpected closes and failed opens
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            auto_reconnect: true,
        }
    }
}

impl SessionConfig {
    /// Config for `endpoint` with every other setting at its default
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Check the endpoint and intervals
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a `ws`/`wss` URL or an interval is zero
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.reconnect_interval.is_zero() {
            return Err(Error::Config(
                "reconnect interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
