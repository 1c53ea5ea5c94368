//! Wire format of the live-game socket.
//!
//! Every frame after the initial credential is a JSON envelope. Inbound
//! envelopes carry a `type`, an optional `game` session snapshot and a
//! free-form `data` payload; outbound envelopes carry `type` and `data`.

use derive_more::{Display, Error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

use crate::board::{MoveRecord, Side};

/// Discriminator of an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InboundKind {
    /// A move was played; `data` is the move record, `game` the new session.
    Move,
    /// Authoritative board snapshot.
    #[serde(rename = "gameStateUpdate")]
    #[strum(serialize = "gameStateUpdate")]
    GameStateUpdate,
    /// Both players joined; `data` is the session.
    GameStarted,
    /// The game finished; `data` is the completed game.
    GameEnded,
    /// Server-side error report.
    Error,
    /// Any type this client does not know.
    #[serde(other)]
    Unknown,
}

/// Inbound message envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: InboundKind,
    /// Session snapshot accompanying the message.
    #[serde(default)]
    pub game: Option<LiveGame>,
    /// Type-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEnvelope {
    /// Decodes the payload as `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.data)
            .map_err(|e| ProtocolError::new(format!("{} payload: {e}", self.kind)))
    }
}

/// Server-authoritative record of an in-progress game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LiveGame {
    /// Session identifier.
    pub id: String,
    /// Whether both players have joined.
    #[serde(default)]
    pub has_begun: bool,
    /// Initial time per player.
    #[serde(default)]
    pub total_time_ms: i64,
    /// Per-move increment.
    #[serde(default)]
    pub increment_ms: i64,
    /// White's remaining time at the snapshot.
    #[serde(default)]
    pub white_time_ms: i64,
    /// Black's remaining time at the snapshot.
    #[serde(default)]
    pub black_time_ms: i64,
    /// White participant.
    #[serde(default)]
    pub white_id: Option<String>,
    /// Black participant.
    #[serde(default)]
    pub black_id: Option<String>,
    /// Moves played so far.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub moves: Vec<MoveRecord>,
}

impl LiveGame {
    /// Colour assigned to `user_id`, if they are a participant.
    pub fn color_of(&self, user_id: &str) -> Option<Side> {
        if self.white_id.as_deref() == Some(user_id) {
            Some(Side::White)
        } else if self.black_id.as_deref() == Some(user_id) {
            Some(Side::Black)
        } else {
            None
        }
    }

    /// Remaining time for `side` at the snapshot.
    pub fn time_ms(&self, side: Side) -> i64 {
        match side {
            Side::White => self.white_time_ms,
            Side::Black => self.black_time_ms,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<MoveRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<MoveRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payload of a `gameStateUpdate` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameStateUpdate {
    /// Authoritative layout string.
    pub fen: String,
    /// Server's view of the side to move. Informational; the layout decides.
    #[serde(default)]
    pub turn: Option<String>,
    /// Move that produced this layout.
    #[serde(default, rename = "lastMove", alias = "last_move")]
    pub last_move: Option<MoveRecord>,
}

/// Outbound message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A locally played move.
    Move(MoveRecord),
    /// The local player resigns.
    Resignation {},
}

impl OutboundMessage {
    /// Serializes the envelope into a text frame.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::new(e.to_string()))
    }
}

/// Parses an inbound text frame.
#[instrument(skip(text), fields(len = text.len()))]
pub fn parse_inbound(text: &str) -> Result<InboundEnvelope, ProtocolError> {
    let envelope: InboundEnvelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::new(e.to_string()))?;
    debug!(kind = %envelope.kind, "Decoded inbound frame");
    Ok(envelope)
}

/// A frame that does not match the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Protocol error: {} at {}:{}", message, file, line)]
pub struct ProtocolError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ProtocolError {
    /// Creates a new error with caller location tracking.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}
