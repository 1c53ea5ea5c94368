//! Local board controller: the single mutation entry point for the position.

use super::hooks::{HookKey, HookRegistry, PostHook, PreHook};
use super::rules::{MalformedPosition, MoveRecord, MoveRequest, Position, Side};
use tracing::{debug, info, instrument};

/// One-shot callback fired when a move delivers checkmate.
pub type CheckmateCallback = Box<dyn FnOnce(&MoveRecord) + Send>;

/// Owns the canonical position and the move hooks around it.
///
/// [`BoardController::attempt_move`] never panics or errors on a rule
/// violation; rejected attempts return `None`.
pub struct BoardController {
    position: Position,
    pre_hooks: HookRegistry<PreHook>,
    post_hooks: HookRegistry<PostHook>,
    on_checkmate: Option<CheckmateCallback>,
}

impl BoardController {
    /// Creates a controller at the starting position.
    #[instrument]
    pub fn new() -> Self {
        Self::with_position(Position::new())
    }

    /// Creates a controller at `position`.
    pub fn with_position(position: Position) -> Self {
        Self {
            position,
            pre_hooks: HookRegistry::new(),
            post_hooks: HookRegistry::new(),
            on_checkmate: None,
        }
    }

    /// Installs the one-shot checkmate callback, replacing any pending one.
    pub fn on_checkmate(&mut self, callback: impl FnOnce(&MoveRecord) + Send + 'static) {
        self.on_checkmate = Some(Box::new(callback));
    }

    /// The canonical position.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// The canonical position as a layout string.
    pub fn layout(&self) -> String {
        self.position.to_layout()
    }

    /// Side to move.
    pub fn turn(&self) -> Side {
        self.position.turn()
    }

    /// Attempts `request`, applying it to the canonical position on success.
    #[instrument(skip_all, fields(request = %request))]
    pub fn attempt_move(&mut self, request: MoveRequest) -> Option<MoveRecord> {
        self.attempt(request, None, None::<fn(&MoveRecord)>)
    }

    /// Attempts `request` on behalf of `side`.
    ///
    /// A request to move a piece of the other colour is rejected like any
    /// illegal move: post-hooks still fire with no record.
    #[instrument(skip_all, fields(request = %request, side = %side))]
    pub fn attempt_move_as(&mut self, side: Side, request: MoveRequest) -> Option<MoveRecord> {
        self.attempt(request, Some(side), None::<fn(&MoveRecord)>)
    }

    /// Attempts `request` but hands the resolved record to `apply` instead
    /// of replacing the canonical position.
    ///
    /// Used when the move must wait for server confirmation.
    #[instrument(skip_all, fields(request = %request))]
    pub fn attempt_move_deferred(
        &mut self,
        request: MoveRequest,
        apply: impl FnOnce(&MoveRecord),
    ) -> Option<MoveRecord> {
        self.attempt(request, None, Some(apply))
    }

    fn attempt<A: FnOnce(&MoveRecord)>(
        &mut self,
        request: MoveRequest,
        side: Option<Side>,
        apply: Option<A>,
    ) -> Option<MoveRecord> {
        let owned = match (side, self.position.piece_at(request.from)) {
            (Some(side), Some((owner, _))) if owner != side => {
                debug!(owner = %owner, side = %side, "Piece belongs to the opponent");
                false
            }
            _ => true,
        };
        let legal = owned
            && self
                .position
                .legal_destinations(request.from)
                .contains(&request.to);

        let mut checkmate = false;
        let record = if legal {
            for hook in self.pre_hooks.iter_mut() {
                hook(&request);
            }
            match self.position.apply(&request) {
                Some((next, record)) => {
                    checkmate = next.is_checkmate();
                    match apply {
                        Some(apply) => apply(&record),
                        None => self.position = next,
                    }
                    info!(san = %record.san, "Move applied");
                    Some(record)
                }
                None => None,
            }
        } else {
            debug!("Destination not reachable from origin");
            None
        };

        for hook in self.post_hooks.iter_mut() {
            hook(&request, record.as_ref());
        }

        if checkmate {
            if let (Some(callback), Some(record)) = (self.on_checkmate.take(), record.as_ref()) {
                info!("Checkmate");
                callback(record);
            }
        }

        record
    }

    /// Overwrites the canonical position from a layout string.
    ///
    /// Returns whether the position changed. Hooks never fire. On error the
    /// existing position is left untouched.
    #[instrument(skip(self))]
    pub fn set_position(&mut self, layout: &str) -> Result<bool, MalformedPosition> {
        let next = Position::from_layout(layout)?;
        if next == self.position {
            debug!("Position unchanged");
            return Ok(false);
        }
        self.position = next;
        Ok(true)
    }

    /// Registers a pre-move hook.
    pub fn register_pre_hook(
        &mut self,
        key: Option<HookKey>,
        hook: impl FnMut(&MoveRequest) + Send + 'static,
    ) -> HookKey {
        self.pre_hooks.register(key, Box::new(hook))
    }

    /// Registers a post-move hook.
    pub fn register_post_hook(
        &mut self,
        key: Option<HookKey>,
        hook: impl FnMut(&MoveRequest, Option<&MoveRecord>) + Send + 'static,
    ) -> HookKey {
        self.post_hooks.register(key, Box::new(hook))
    }

    /// Removes a pre-move hook. Unknown keys are ignored.
    pub fn unregister_pre_hook(&mut self, key: &HookKey) -> bool {
        self.pre_hooks.unregister(key)
    }

    /// Removes a post-move hook. Unknown keys are ignored.
    pub fn unregister_post_hook(&mut self, key: &HookKey) -> bool {
        self.post_hooks.unregister(key)
    }

    /// Whether a post-move hook is registered under `key`.
    pub fn has_post_hook(&self, key: &HookKey) -> bool {
        self.post_hooks.contains(key)
    }
}

impl Default for BoardController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BoardController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardController")
            .field("layout", &self.position.to_layout())
            .field("pre_hooks", &self.pre_hooks)
            .field("post_hooks", &self.post_hooks)
            .field("on_checkmate", &self.on_checkmate.is_some())
            .finish()
    }
}
