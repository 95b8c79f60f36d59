//! Per-client settings.

use std::time::Duration;

use crate::constants::{LIVENESS_INTERVAL, RECONNECT_DELAY};
use crate::notify::NotificationPolicy;
use crate::ClientError;

/// Settings a [`NetClient`](crate::NetClient) is built from.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub address: String,
    pub username: String,
    /// Silence tolerated before the watchdog pings, and again before it
    /// disconnects.
    pub liveness_interval: Duration,
    pub reconnect_delay: Duration,
    pub notification_policy: NotificationPolicy,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Result<Self, ClientError> {
        let address = address.into();
        let username = username.into();
        if address.is_empty() {
            return Err(ClientError::EmptyAddress);
        }
        if username.is_empty() {
            return Err(ClientError::EmptyUsername);
        }
        Ok(Self {
            address,
            username,
            liveness_interval: LIVENESS_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            notification_policy: NotificationPolicy::default(),
        })
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_notification_policy(mut self, policy: NotificationPolicy) -> Self {
        self.notification_policy = policy;
        self
    }
}
