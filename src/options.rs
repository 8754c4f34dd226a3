use std::time::Duration;

/// Configures HTTP timeout and retry behavior for [`crate::ApiClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Total attempt ceiling, first try included. With `max_attempts: 3` a
    /// persistently failing endpoint is hit three times before the error is
    /// surfaced.
    pub max_attempts: u32,
    /// Base retry delay. The wait after the n-th failed attempt is
    /// `retry_delay * n` (linear backoff).
    pub retry_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Configures reconnection and heartbeat behavior for [`crate::EventStream`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconnectOptions {
    /// Timeout for a single WebSocket handshake.
    pub connect_timeout: Duration,
    /// Base reconnect interval. Attempt n waits
    /// `min(base_interval * n, cap_interval)`.
    pub base_interval: Duration,
    /// Upper bound on the reconnect delay.
    pub cap_interval: Duration,
    /// Reconnect attempt ceiling before the stream fails permanently and
    /// waits for a manual `connect()`.
    pub max_attempts: u32,
    /// Heartbeat probe period while connected. The probe is advisory: a
    /// missing `pong` response takes no action on its own.
    pub heartbeat_interval: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            base_interval: Duration::from_secs(5),
            cap_interval: Duration::from_secs(30),
            max_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
