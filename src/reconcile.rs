//! Reconciliation between the local board and the live channel.
//!
//! Local moves apply optimistically and are forwarded to the channel through
//! a post-move hook. Any layout the server names afterwards overwrites the
//! local position, in arrival order.

use tracing::{info, instrument};

use crate::board::{
    BoardController, HookKey, MalformedPosition, MoveRecord, MoveRequest, Side,
};
use crate::channel::{ChannelEvent, ChannelHandle, LiveView};

/// Key of the hook that forwards applied moves.
pub const FORWARD_HOOK: &str = "sendMove";

/// Destination for locally applied moves.
pub trait MoveSink: Send + 'static {
    /// Submits an applied move to the server.
    fn submit(&self, record: &MoveRecord);
}

impl<F> MoveSink for F
where
    F: Fn(&MoveRecord) + Send + 'static,
{
    fn submit(&self, record: &MoveRecord) {
        self(record)
    }
}

impl MoveSink for ChannelHandle {
    fn submit(&self, record: &MoveRecord) {
        self.send_move(record.clone());
    }
}

/// Keeps a [`BoardController`] consistent with the server.
#[derive(Debug)]
pub struct Reconciler {
    board: BoardController,
    local_color: Option<Side>,
}

impl Reconciler {
    /// Wraps `board`, forwarding its applied moves to `sink`.
    pub fn new(mut board: BoardController, sink: impl MoveSink) -> Self {
        board.register_post_hook(Some(HookKey::named(FORWARD_HOOK)), move |_, record| {
            if let Some(record) = record {
                sink.submit(record);
            }
        });
        Self {
            board,
            local_color: None,
        }
    }

    /// The wrapped controller.
    pub fn board(&self) -> &BoardController {
        &self.board
    }

    /// Mutable access to the wrapped controller, for hook registration.
    pub fn board_mut(&mut self) -> &mut BoardController {
        &mut self.board
    }

    /// Local player's colour, once known.
    pub fn local_color(&self) -> Option<Side> {
        self.local_color
    }

    /// Fixes the local player's colour.
    pub fn set_local_color(&mut self, color: Side) {
        self.local_color = Some(color);
    }

    /// Side to move on the local board.
    pub fn turn(&self) -> Side {
        self.board.turn()
    }

    /// Whether the local player is to move.
    pub fn is_local_turn(&self) -> bool {
        self.local_color == Some(self.turn())
    }

    /// Attempts a local move.
    ///
    /// Once the local colour is known, moves of the opponent's pieces are
    /// rejected by the controller like any illegal move.
    #[instrument(skip_all, fields(request = %request))]
    pub fn attempt_move(&mut self, request: MoveRequest) -> Option<MoveRecord> {
        match self.local_color {
            Some(color) => self.board.attempt_move_as(color, request),
            None => self.board.attempt_move(request),
        }
    }

    /// Applies a channel event to the local board.
    ///
    /// Returns whether the local position changed.
    #[instrument(skip_all)]
    pub fn apply(&mut self, event: &ChannelEvent) -> Result<bool, MalformedPosition> {
        match event {
            ChannelEvent::PositionChanged { layout, .. } => {
                let changed = self.board.set_position(layout)?;
                if changed {
                    info!(layout = %layout, "Adopted server position");
                }
                Ok(changed)
            }
            ChannelEvent::GameStarted { color, .. } => {
                info!(color = %color, "Local colour assigned");
                self.local_color = Some(*color);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Brings the local board in line with a live view snapshot.
    #[instrument(skip_all)]
    pub fn sync_from(&mut self, view: &LiveView) -> Result<bool, MalformedPosition> {
        if let Some(color) = view.local_color() {
            self.local_color = Some(*color);
        }
        self.board.set_position(view.layout())
    }

    /// Stops forwarding moves and returns the controller.
    pub fn into_board(mut self) -> BoardController {
        self.board.unregister_post_hook(&HookKey::named(FORWARD_HOOK));
        self.board
    }
}
