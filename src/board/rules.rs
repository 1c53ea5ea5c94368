//! Rules-engine capability backed by `shakmaty`.
//!
//! The rest of the crate treats this module as an opaque capability: it can
//! enumerate legal destinations from a square, apply a move, answer
//! check/checkmate/game-over questions and convert to and from the
//! board-layout (FEN) string used on the wire.

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, File, Move, Position as _, Rank, Role};
use tracing::{debug, instrument, warn};

pub use shakmaty::Square;

/// Layout string of the standard starting position.
pub const STARTING_LAYOUT: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Colour of a player or piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Side {
    /// White pieces, moves first.
    #[serde(rename = "w")]
    #[strum(serialize = "white")]
    White,
    /// Black pieces.
    #[serde(rename = "b")]
    #[strum(serialize = "black")]
    Black,
}

impl Side {
    /// Returns the other side.
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    /// Reads the side-to-move field of a board-layout string.
    ///
    /// This is the only place the client derives whose turn it is.
    pub fn to_move_in(layout: &str) -> Option<Self> {
        match layout.split_whitespace().nth(1)? {
            "w" => Some(Self::White),
            "b" => Some(Self::Black),
            _ => None,
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Self::White,
            Color::Black => Self::Black,
        }
    }
}

impl From<Side> for Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// Kind of chess piece, serialized with its lowercase letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    /// Pawn.
    #[serde(rename = "p")]
    Pawn,
    /// Knight.
    #[serde(rename = "n")]
    Knight,
    /// Bishop.
    #[serde(rename = "b")]
    Bishop,
    /// Rook.
    #[serde(rename = "r")]
    Rook,
    /// Queen.
    #[serde(rename = "q")]
    Queen,
    /// King.
    #[serde(rename = "k")]
    King,
}

impl PieceKind {
    /// Lowercase letter for this piece kind.
    pub fn letter(self) -> char {
        Role::from(self).char()
    }
}

impl From<Role> for PieceKind {
    fn from(role: Role) -> Self {
        match role {
            Role::Pawn => Self::Pawn,
            Role::Knight => Self::Knight,
            Role::Bishop => Self::Bishop,
            Role::Rook => Self::Rook,
            Role::Queen => Self::Queen,
            Role::King => Self::King,
        }
    }
}

impl From<PieceKind> for Role {
    fn from(kind: PieceKind) -> Self {
        match kind {
            PieceKind::Pawn => Role::Pawn,
            PieceKind::Knight => Role::Knight,
            PieceKind::Bishop => Role::Bishop,
            PieceKind::Rook => Role::Rook,
            PieceKind::Queen => Role::Queen,
            PieceKind::King => Role::King,
        }
    }
}

/// A requested move, before the rules engine has resolved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveRequest {
    /// Origin square.
    pub from: Square,
    /// Destination square (the king's destination for castling).
    pub to: Square,
    /// Promotion piece; a promoting pawn move without one promotes to a queen.
    pub promotion: Option<PieceKind>,
}

impl MoveRequest {
    /// Creates a move request without a promotion piece.
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    /// Sets the promotion piece.
    pub fn with_promotion(mut self, promotion: PieceKind) -> Self {
        self.promotion = Some(promotion);
        self
    }

    /// Parses coordinate notation such as `e2e4` or `e7e8q`.
    #[instrument]
    pub fn parse(text: &str) -> Result<Self, MalformedMove> {
        let uci: UciMove = text
            .trim()
            .parse()
            .map_err(|e| MalformedMove::new(format!("{text:?}: {e}")))?;
        match uci {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Ok(Self {
                from,
                to,
                promotion: promotion.map(PieceKind::from),
            }),
            _ => Err(MalformedMove::new(format!("{text:?} is not a board move"))),
        }
    }
}

impl std::fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(promotion) = self.promotion {
            write!(f, "{}", promotion.letter())?;
        }
        Ok(())
    }
}

/// A move resolved by the rules engine, in the shape exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Layout before the move.
    pub before: String,
    /// Layout after the move.
    pub after: String,
    /// Side that moved.
    pub color: Side,
    /// Piece that moved.
    pub piece: PieceKind,
    /// Origin square.
    pub from: String,
    /// Destination square.
    pub to: String,
    /// Standard algebraic notation.
    pub san: String,
    /// Long (coordinate) notation.
    pub lan: String,
    /// Captured piece, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured: Option<PieceKind>,
    /// Promotion piece, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

/// A legal, internally consistent chess position.
#[derive(Debug, Clone)]
pub struct Position {
    chess: Chess,
}

impl Position {
    /// Returns the standard starting position.
    pub fn new() -> Self {
        Self {
            chess: Chess::default(),
        }
    }

    /// Parses a board-layout string.
    #[instrument]
    pub fn from_layout(layout: &str) -> Result<Self, MalformedPosition> {
        let fen: Fen = layout.trim().parse().map_err(|e| {
            warn!(error = %e, "Rejected layout string");
            MalformedPosition::new(format!("{layout:?}: {e}"))
        })?;
        let chess: Chess = fen.into_position(CastlingMode::Standard).map_err(|e| {
            warn!(error = %e, "Layout describes an impossible position");
            MalformedPosition::new(format!("{layout:?}: {e}"))
        })?;
        Ok(Self { chess })
    }

    /// Serializes this position as a board-layout string.
    pub fn to_layout(&self) -> String {
        Fen::from_position(self.chess.clone(), EnPassantMode::Legal).to_string()
    }

    /// Side to move.
    pub fn turn(&self) -> Side {
        self.chess.turn().into()
    }

    /// Piece standing on `square`.
    pub fn piece_at(&self, square: Square) -> Option<(Side, PieceKind)> {
        self.chess
            .board()
            .piece_at(square)
            .map(|piece| (piece.color.into(), piece.role.into()))
    }

    /// Legal destination squares for the piece on `from`.
    ///
    /// Castling is reported with the king's destination square.
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        let mut destinations: Vec<Square> = self
            .chess
            .legal_moves()
            .iter()
            .filter(|m| m.from() == Some(from))
            .filter_map(|m| match m.to_uci(CastlingMode::Standard) {
                UciMove::Normal { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        destinations.sort();
        destinations.dedup();
        destinations
    }

    /// Applies `request`, returning the resulting position and its record.
    ///
    /// Returns `None` when the rules engine rejects the move.
    #[instrument(skip_all, fields(request = %request))]
    pub fn apply(&self, request: &MoveRequest) -> Option<(Position, MoveRecord)> {
        let resolved = self.resolve(request, request.promotion.map(Role::from)).or_else(|| {
            match request.promotion {
                None => self.resolve(request, Some(Role::Queen)),
                Some(_) => None,
            }
        });
        let Some(m) = resolved else {
            debug!("Rules engine rejected move");
            return None;
        };

        let san = SanPlus::from_move(self.chess.clone(), &m).to_string();
        let lan = m.to_uci(CastlingMode::Standard).to_string();
        let next = match self.chess.clone().play(&m) {
            Ok(next) => Position { chess: next },
            Err(e) => {
                warn!(error = %e, "Legal move failed to apply");
                return None;
            }
        };

        let record = MoveRecord {
            before: self.to_layout(),
            after: next.to_layout(),
            color: self.turn(),
            piece: m.role().into(),
            from: request.from.to_string(),
            to: request.to.to_string(),
            san,
            lan,
            captured: m.capture().map(PieceKind::from),
            promotion: m.promotion().map(PieceKind::from),
        };
        Some((next, record))
    }

    fn resolve(&self, request: &MoveRequest, promotion: Option<Role>) -> Option<Move> {
        UciMove::Normal {
            from: request.from,
            to: request.to,
            promotion,
        }
        .to_move(&self.chess)
        .ok()
    }

    /// Whether the side to move is in check.
    pub fn is_check(&self) -> bool {
        self.chess.is_check()
    }

    /// Whether the side to move is checkmated.
    pub fn is_checkmate(&self) -> bool {
        self.chess.is_checkmate()
    }

    /// Whether the game is over (checkmate, stalemate, insufficient material).
    pub fn is_game_over(&self) -> bool {
        self.chess.is_game_over()
    }

    /// Renders the board as eight text rows, white at the bottom.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(8 * 18);
        for rank in (0..8u32).rev() {
            out.push(char::from(b'1' + rank as u8));
            for file in 0..8u32 {
                let square = Square::from_coords(File::new(file), Rank::new(rank));
                let glyph = match self.piece_at(square) {
                    Some((Side::White, kind)) => kind.letter().to_ascii_uppercase(),
                    Some((Side::Black, kind)) => kind.letter(),
                    None => '.',
                };
                out.push(' ');
                out.push(glyph);
            }
            out.push('\n');
        }
        out.push_str("  a b c d e f g h\n");
        out
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.to_layout() == other.to_layout()
    }
}

impl Eq for Position {}

/// A board-layout string that does not describe a legal position.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Malformed position: {} at {}:{}", message, file, line)]
pub struct MalformedPosition {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl MalformedPosition {
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

/// Move text that is not valid coordinate notation.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Malformed move: {}", message)]
pub struct MalformedMove {
    /// Error message.
    pub message: String,
}

impl MalformedMove {
    fn new(message: String) -> Self {
        Self { message }
    }
}
