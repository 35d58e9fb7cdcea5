//! Link configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Name token advertised by Muse v3 sensors (e.g. `muse_v3_42`).
pub const DEFAULT_NAME_TOKEN: &str = "muse_v3";

/// Settings for a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// Substring an advertised local name must contain to match.
    pub name_token: String,
    /// Give up scanning after this long. `None` scans until stopped.
    pub scan_timeout: Option<Duration>,
    /// Bound on the platform connect call. `None` waits for the platform.
    pub connect_timeout: Option<Duration>,
    /// Abort the connection unless both characteristics are found and subscribed.
    pub require_all_subscriptions: bool,
    /// Capacity of the link event channel.
    pub event_capacity: usize,
    /// Capacity of the notification channel.
    pub notification_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            name_token: DEFAULT_NAME_TOKEN.to_string(),
            scan_timeout: None,
            connect_timeout: None,
            require_all_subscriptions: false,
            event_capacity: 64,
            notification_capacity: 256,
        }
    }
}

impl LinkConfig {
    /// Set the advertised name token to match.
    pub fn with_name_token(mut self, token: impl Into<String>) -> Self {
        self.name_token = token.into();
        self
    }

    /// Stop scanning after `timeout` without a match.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    /// Fail a connection attempt whose platform connect takes longer than `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Treat a missing or unsubscribed characteristic as fatal.
    pub fn with_require_all_subscriptions(mut self, required: bool) -> Self {
        self.require_all_subscriptions = required;
        self
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty name token or a zero
    /// channel capacity.
    pub fn validate(&self) -> Result<()> {
        if self.name_token.is_empty() {
            return Err(invalid("name_token", "\"\""));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "0"));
        }
        if self.notification_capacity == 0 {
            return Err(invalid("notification_capacity", "0"));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &str) -> Error {
    Error::InvalidConfig {
        name: name.to_string(),
        value: value.to_string(),
    }
}
