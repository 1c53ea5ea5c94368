//! Connection state and reconnect backoff.

use std::time::Duration;

use derive_getters::Getters;

/// Lifecycle of the live-game socket.
///
/// `attempt` counts reconnects since the last time the channel was open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket, no pending reconnect.
    #[default]
    Disconnected,
    /// Socket requested, waiting for it to open.
    Connecting {
        /// Reconnect attempt this socket belongs to.
        attempt: u32,
    },
    /// Socket open, credential sent, waiting for the first server message.
    Authenticating {
        /// Reconnect attempt this socket belongs to.
        attempt: u32,
    },
    /// Authenticated and exchanging messages.
    Open,
    /// Explicit close in progress.
    Closing,
    /// Waiting for the backoff timer before reconnecting.
    Reconnecting {
        /// Attempt the timer was scheduled for.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
}

impl ConnectionState {
    /// Whether outbound messages can be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Authenticating { attempt } => write!(f, "authenticating (attempt {attempt})"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt}, in {}ms)", delay.as_millis())
            }
        }
    }
}

/// Exponential reconnect backoff: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Default delay before the first reconnect.
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1_000);
    /// Default ceiling on the delay.
    pub const DEFAULT_MAX: Duration = Duration::from_millis(30_000);

    /// Creates a backoff policy.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before reconnect `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}
