use std::time::Duration;

/// Client-side timing knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub retry_delay: Duration,
    /// How long the receiver holds the socket per poll.
    pub poll: Duration,
    /// How long a request waits for its response.
    pub response_timeout: Duration,
    /// Pause after sending `exit` so the frame leaves before the close.
    pub exit_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            retry_delay: Duration::from_secs(1),
            poll: Duration::from_millis(250),
            response_timeout: Duration::from_secs(5),
            exit_grace: Duration::from_millis(500),
        }
    }
}
