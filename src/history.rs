//! Completed games and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::{MoveRecord, STARTING_LAYOUT, Side};

/// How a finished game was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WinningReason {
    /// The loser was checkmated.
    Checkmate,
    /// The loser resigned.
    Resignation,
    /// The loser ran out of time.
    Timeout,
}

/// A finished game as stored by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedGame {
    /// Game identifier.
    pub id: String,
    /// White participant.
    pub white_user_id: String,
    /// Black participant.
    pub black_user_id: String,
    /// Time control, as `minutes+increment`.
    pub time_format: String,
    /// Every move played.
    #[serde(default)]
    pub moves: Vec<MoveRecord>,
    /// Whether the game finished.
    #[serde(default)]
    pub has_completed: bool,
    /// Result string: `1-0`, `0-1` or `1/2-1/2`.
    #[serde(default)]
    pub winner: Option<String>,
    /// How the game was decided.
    #[serde(default)]
    pub winning_reason: Option<WinningReason>,
    /// White's display name.
    #[serde(default)]
    pub white_username: String,
    /// Black's display name.
    #[serde(default)]
    pub black_username: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl CompletedGame {
    /// Colour `user_id` played, if they took part.
    pub fn color_of(&self, user_id: &str) -> Option<Side> {
        if self.white_user_id == user_id {
            Some(Side::White)
        } else if self.black_user_id == user_id {
            Some(Side::Black)
        } else {
            None
        }
    }

    /// Result from `user_id`'s point of view.
    pub fn verdict_for(&self, user_id: &str) -> Verdict {
        match self.color_of(user_id) {
            Some(side) => Verdict::for_player(self.winner.as_deref(), side),
            None => Verdict::Unknown,
        }
    }

    /// Layout after the last move.
    pub fn final_layout(&self) -> &str {
        self.moves
            .last()
            .map_or(STARTING_LAYOUT, |last| last.after.as_str())
    }
}

/// Result of a game from one player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Verdict {
    /// The player won.
    Win,
    /// The player lost.
    Loss,
    /// Drawn game.
    Draw,
    /// No recognizable result.
    Unknown,
}

impl Verdict {
    /// Maps a result string to a verdict for the player of `side`.
    pub fn for_player(outcome: Option<&str>, side: Side) -> Self {
        match (outcome, side) {
            (Some("1-0"), Side::White) | (Some("0-1"), Side::Black) => Self::Win,
            (Some("1-0"), Side::Black) | (Some("0-1"), Side::White) => Self::Loss,
            (Some("1/2-1/2"), _) => Self::Draw,
            _ => Self::Unknown,
        }
    }
}

/// Win/loss/draw totals for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameStats {
    /// Games won.
    pub wins: u32,
    /// Games lost.
    pub losses: u32,
    /// Games drawn.
    pub draws: u32,
}

impl GameStats {
    /// Tallies `games` from `user_id`'s point of view.
    pub fn tally<'a>(user_id: &str, games: impl IntoIterator<Item = &'a CompletedGame>) -> Self {
        games
            .into_iter()
            .fold(Self::default(), |mut stats, game| {
                match game.verdict_for(user_id) {
                    Verdict::Win => stats.wins += 1,
                    Verdict::Loss => stats.losses += 1,
                    Verdict::Draw => stats.draws += 1,
                    Verdict::Unknown => {}
                }
                stats
            })
    }

    /// Total decided games.
    pub fn total(&self) -> u32 {
        self.wins + self.losses + self.draws
    }
}
