//! Game clocks: time formats and the display countdown between snapshots.
//!
//! The server owns clock values. The client only counts the side to move
//! down from the last snapshot so the display keeps ticking.

use std::str::FromStr;
use std::time::{Duration, Instant};

use derive_getters::Getters;
use derive_more::{Display, Error};

use crate::board::Side;
use crate::channel::LiveGame;

/// Time formats offered when creating a game, as `minutes+increment`.
pub const STANDARD_TIME_FORMATS: [&str; 15] = [
    "1+0", "1+1", "2+1", "3+0", "3+2", "5+0", "5+3", "10+0", "10+5", "15+10", "30+0", "60+0",
    "60+30", "90+30", "120+0",
];

/// A time control: base minutes per player plus a per-move increment in
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Getters)]
pub struct TimeFormat {
    minutes: u32,
    increment_secs: u32,
}

impl TimeFormat {
    /// Creates a time format.
    pub fn new(minutes: u32, increment_secs: u32) -> Self {
        Self {
            minutes,
            increment_secs,
        }
    }

    /// Initial time per player.
    pub fn total(&self) -> Duration {
        Duration::from_secs(u64::from(self.minutes) * 60)
    }

    /// Per-move increment.
    pub fn increment(&self) -> Duration {
        Duration::from_secs(u64::from(self.increment_secs))
    }

    /// Whether this format is one the server offers.
    pub fn is_standard(&self) -> bool {
        let text = self.to_string();
        STANDARD_TIME_FORMATS.contains(&text.as_str())
    }
}

impl std::fmt::Display for TimeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.minutes, self.increment_secs)
    }
}

impl FromStr for TimeFormat {
    type Err = TimeFormatError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (minutes, increment) = text
            .trim()
            .split_once('+')
            .ok_or_else(|| TimeFormatError::new(text))?;
        let minutes = minutes.parse().map_err(|_| TimeFormatError::new(text))?;
        let increment = increment.parse().map_err(|_| TimeFormatError::new(text))?;
        Ok(Self::new(minutes, increment))
    }
}

/// Text that is not `minutes+increment`.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Invalid time format {:?}; expected minutes+increment", input)]
pub struct TimeFormatError {
    /// Rejected input.
    pub input: String,
}

impl TimeFormatError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

/// Clock display anchored to one authoritative snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockView {
    white: Duration,
    black: Duration,
    running: Option<Side>,
    anchored_at: Instant,
}

impl ClockView {
    /// Anchors a countdown at `now` from the session snapshot.
    ///
    /// The clock of `to_move` runs only once the game has begun.
    pub fn from_session(game: &LiveGame, to_move: Side, now: Instant) -> Self {
        Self {
            white: millis(game.white_time_ms),
            black: millis(game.black_time_ms),
            running: game.has_begun.then_some(to_move),
            anchored_at: now,
        }
    }

    /// Side whose clock is running.
    pub fn running(&self) -> Option<Side> {
        self.running
    }

    /// Remaining time for `side` at `now`.
    pub fn remaining(&self, side: Side, now: Instant) -> Duration {
        let snapshot = match side {
            Side::White => self.white,
            Side::Black => self.black,
        };
        if self.running == Some(side) {
            snapshot.saturating_sub(now.saturating_duration_since(self.anchored_at))
        } else {
            snapshot
        }
    }

    /// Side whose clock has reached zero at `now`.
    pub fn flagged(&self, now: Instant) -> Option<Side> {
        self.running
            .filter(|side| self.remaining(*side, now).is_zero())
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// Renders a clock as `MM:SS`, truncating partial seconds.
pub fn format_clock(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
