//! Agent configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay URL (`ws://` or `wss://`)
    pub url: String,
    /// Appended to the URL as the `deviceId` query parameter
    pub device_id: Option<String>,
    /// Interval between keep-alive pings. Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// Delay the backoff resets to after a successful connect
    pub backoff_floor: Duration,
    /// Upper bound on the backoff delay (before jitter)
    pub backoff_ceiling: Duration,
    /// Random jitter added to each delay is drawn from `[0, jitter)`
    pub jitter: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/".into(),
            device_id: None,
            heartbeat_interval: Duration::from_secs(30),
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        }
    }
}

impl AgentConfig {
    /// The address actually dialed.
    pub fn endpoint(&self) -> String {
        match &self.device_id {
            Some(id) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{separator}deviceId={id}", self.url)
            }
            None => self.url.clone(),
        }
    }
}
