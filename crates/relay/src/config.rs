//! Server tuning knobs.

use std::time::Duration;

use relay_protocol::MAX_FRAME_LEN;

/// Configuration for the relay server.
///
/// Every field has a sensible default; override only what you need:
///
/// ```
/// use std::time::Duration;
/// use relay::ServerConfig;
///
/// let config = ServerConfig {
///     idle_timeout: Some(Duration::from_secs(300)),
///     ..ServerConfig::default()
/// };
/// assert_eq!(config.outbound_capacity, 32);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on how long the router waits before running a
    /// dispatch cycle when no events arrive. Requeued deliveries are
    /// retried at least this often.
    pub cycle_interval: Duration,

    /// How long a connection reader waits for a frame before checking
    /// whether it should stop.
    pub read_poll: Duration,

    /// Frames that may be queued for one connection before it counts as
    /// not writable.
    pub outbound_capacity: usize,

    /// Most events handled in one dispatch cycle.
    pub max_batch: usize,

    /// Connections silent for longer than this are torn down. `None`
    /// keeps idle connections forever.
    pub idle_timeout: Option<Duration>,

    /// Largest frame accepted or sent.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(50),
            read_poll: Duration::from_millis(250),
            outbound_capacity: 32,
            max_batch: 256,
            idle_timeout: None,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}
