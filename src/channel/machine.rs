//! Channel state machine.
//!
//! [`ChannelCore`] owns the connection state, the authenticated session and
//! the live view of the game. It performs no I/O: every input returns the
//! [`Effect`]s the driver must execute, in order. Socket events carry the
//! [`SocketId`] they belong to, and events from a socket that is no longer
//! current are ignored.

use std::time::Duration;

use derive_getters::Getters;
use url::Url;
use tracing::{debug, info, instrument, warn};

use super::auth::{AuthError, AuthSession};
use super::protocol::{GameStateUpdate, InboundKind, LiveGame, OutboundMessage, parse_inbound};
use super::state::{Backoff, ConnectionState};
use crate::board::{MoveRecord, Position, STARTING_LAYOUT, Side};

/// Identity of one socket opened by the channel.
pub type SocketId = u64;

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the credential collaborator for a fresh token.
    RefreshCredential,
    /// Open a socket to `url`.
    OpenSocket {
        /// Identity to report socket events under.
        socket: SocketId,
        /// Live-game endpoint.
        url: Url,
    },
    /// Send a text frame.
    SendFrame {
        /// Target socket.
        socket: SocketId,
        /// Frame body.
        text: String,
    },
    /// Close a socket.
    CloseSocket {
        /// Socket to close.
        socket: SocketId,
    },
    /// Arm the reconnect timer, replacing any armed one.
    ScheduleReconnect {
        /// Generation to report back when the timer fires.
        generation: u64,
        /// Backoff delay.
        delay: Duration,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Publish an event to observers.
    Emit(ChannelEvent),
}

/// Notification published to channel observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// The server named a new board layout.
    PositionChanged {
        /// Authoritative layout string.
        layout: String,
        /// Move that produced it, when known.
        last_move: Option<MoveRecord>,
    },
    /// A new session snapshot arrived.
    SessionUpdated(LiveGame),
    /// Both players joined and the local colour is known.
    GameStarted {
        /// Local player's colour.
        color: Side,
        /// Session at start.
        game: LiveGame,
    },
    /// The game finished; payload is the completed game as sent.
    GameEnded(serde_json::Value),
    /// A failure observers should know about.
    Error(ChannelError),
    /// The credential could not be refreshed and the user was logged out.
    LoggedOut,
}

/// Channel failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ChannelError {
    /// No credential; a refresh has been requested.
    #[display("No credential available; refreshing")]
    AuthenticationMissing,
    /// Credential refresh failed; the session was logged out.
    #[display("Authentication failed: {_0}")]
    AuthenticationFailed(#[error(not(source))] String),
    /// A send was attempted while the channel was not open.
    #[display("Channel is not open")]
    ChannelUnavailable,
    /// The server reported an error or sent an unreadable frame.
    #[display("Protocol error: {_0}")]
    Protocol(#[error(not(source))] String),
    /// Neither participant of a started game is the local user.
    #[display("User {user_id} is not a participant (white: {white_id:?}, black: {black_id:?})")]
    ColorAssignmentFailure {
        /// Local user.
        user_id: String,
        /// White participant named by the server.
        white_id: Option<String>,
        /// Black participant named by the server.
        black_id: Option<String>,
    },
}

impl ChannelError {
    /// Whether the hosting view must stop and show this error.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::ColorAssignmentFailure { .. } | Self::AuthenticationFailed(_)
        )
    }
}

/// What the client currently knows about the live game.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct LiveView {
    /// Latest authoritative layout string.
    layout: String,
    /// Latest move received from the server.
    last_move: Option<MoveRecord>,
    /// Latest session snapshot.
    session: Option<LiveGame>,
    /// Local player's colour, once the game has started.
    local_color: Option<Side>,
    /// Whether the game has started.
    has_begun: bool,
    /// Whether the game has ended.
    has_ended: bool,
    /// Blocking failure, if one occurred.
    fatal: Option<ChannelError>,
}

impl LiveView {
    fn new() -> Self {
        Self {
            layout: STARTING_LAYOUT.to_string(),
            last_move: None,
            session: None,
            local_color: None,
            has_begun: false,
            has_ended: false,
            fatal: None,
        }
    }

    /// Side to move, read from the layout string.
    pub fn turn(&self) -> Option<Side> {
        Side::to_move_in(&self.layout)
    }
}

impl Default for LiveView {
    fn default() -> Self {
        Self::new()
    }
}

/// Sans-IO live-game channel.
#[derive(Debug)]
pub struct ChannelCore {
    auth: AuthSession,
    ws_base: Url,
    backoff: Backoff,
    state: ConnectionState,
    game_id: Option<String>,
    socket: Option<SocketId>,
    next_socket: SocketId,
    timer_generation: u64,
    timer_armed: bool,
    awaiting_credential: bool,
    refreshing: bool,
    disposed: bool,
    view: LiveView,
}

impl ChannelCore {
    /// Creates a disconnected channel for `auth` against `ws_base`.
    pub fn new(auth: AuthSession, ws_base: Url) -> Self {
        Self {
            auth,
            ws_base,
            backoff: Backoff::default(),
            state: ConnectionState::Disconnected,
            game_id: None,
            socket: None,
            next_socket: 0,
            timer_generation: 0,
            timer_armed: false,
            awaiting_credential: false,
            refreshing: false,
            disposed: false,
            view: LiveView::new(),
        }
    }

    /// Replaces the reconnect backoff policy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Live view of the game.
    pub fn view(&self) -> &LiveView {
        &self.view
    }

    /// Authenticated session.
    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    /// Session the channel is bound to.
    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    /// Socket currently owned by the channel.
    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// Whether [`ChannelCore::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Binds the channel to `game_id` and starts connecting.
    ///
    /// Any socket or reconnect timer from a previous binding is released
    /// first. Without a credential a refresh is requested and the channel
    /// stays disconnected until it resolves.
    #[instrument(skip(self), fields(state = %self.state))]
    pub fn connect(&mut self, game_id: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.disposed {
            warn!("Connect after dispose ignored");
            return effects;
        }
        if game_id.is_empty() {
            warn!("No game id; releasing connection");
            self.release(&mut effects);
            self.game_id = None;
            self.awaiting_credential = false;
            self.set_state(ConnectionState::Disconnected, &mut effects);
            return effects;
        }
        if self.game_id.as_deref() == Some(game_id) && self.is_engaged() {
            debug!("Already bound to this game");
            return effects;
        }

        self.release(&mut effects);
        if self.game_id.as_deref() != Some(game_id) {
            self.view = LiveView::new();
            self.game_id = Some(game_id.to_string());
        }

        if self.auth.credential().is_none() {
            self.await_credential(&mut effects);
            self.set_state(ConnectionState::Disconnected, &mut effects);
        } else {
            self.open_socket(0, &mut effects);
        }
        effects
    }

    /// Completes a credential refresh requested by the channel.
    #[instrument(skip(self, token))]
    pub fn credential_refreshed(&mut self, token: String) -> Vec<Effect> {
        self.refreshing = false;
        self.update_credential(token)
    }

    /// Reports that the credential collaborator failed.
    #[instrument(skip(self))]
    pub fn credential_refresh_failed(&mut self, error: AuthError) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.refreshing = false;
        if self.disposed {
            return effects;
        }
        warn!(error = %error, "Credential refresh failed; logging out");
        self.awaiting_credential = false;
        self.auth.clear();
        self.release(&mut effects);
        self.fail(ChannelError::AuthenticationFailed(error.to_string()), &mut effects);
        effects.push(Effect::Emit(ChannelEvent::LoggedOut));
        self.set_state(ConnectionState::Disconnected, &mut effects);
        effects
    }

    /// Installs a new credential.
    ///
    /// A live or pending connection is replaced by one that authenticates
    /// with the new credential.
    #[instrument(skip(self, token))]
    pub fn update_credential(&mut self, token: String) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.disposed {
            return effects;
        }
        self.auth.set_token(token);
        let live = self.socket.is_some() || matches!(self.state, ConnectionState::Reconnecting { .. });
        if self.awaiting_credential || live {
            info!("Reconnecting with new credential");
            self.awaiting_credential = false;
            self.release(&mut effects);
            self.open_socket(0, &mut effects);
        }
        effects
    }

    /// The socket finished its opening handshake.
    #[instrument(skip(self))]
    pub fn socket_opened(&mut self, socket: SocketId) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_stale(socket) {
            return effects;
        }
        let ConnectionState::Connecting { attempt } = self.state else {
            debug!(state = %self.state, "Open event outside Connecting ignored");
            return effects;
        };

        match self.auth.credential() {
            Some(token) => {
                effects.push(Effect::SendFrame {
                    socket,
                    text: token.to_string(),
                });
                self.set_state(ConnectionState::Authenticating { attempt }, &mut effects);
            }
            None => {
                warn!("Credential lost before authentication");
                self.release(&mut effects);
                self.await_credential(&mut effects);
                self.set_state(ConnectionState::Disconnected, &mut effects);
            }
        }
        effects
    }

    /// A text frame arrived.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn frame_received(&mut self, socket: SocketId, text: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_stale(socket) {
            return effects;
        }
        match self.state {
            ConnectionState::Authenticating { .. } => {
                self.set_state(ConnectionState::Open, &mut effects);
            }
            ConnectionState::Open => {}
            other => {
                debug!(state = %other, "Frame outside an authenticated session ignored");
                return effects;
            }
        }
        self.dispatch(text, &mut effects);
        effects
    }

    /// The socket closed.
    #[instrument(skip(self))]
    pub fn socket_closed(&mut self, socket: SocketId, clean: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_stale(socket) {
            return effects;
        }
        self.socket = None;
        self.after_socket_loss(clean, &mut effects);
        effects
    }

    /// The socket failed.
    #[instrument(skip(self))]
    pub fn socket_errored(&mut self, socket: SocketId, message: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_stale(socket) {
            return effects;
        }
        warn!(error = %message, "Socket error");
        self.socket = None;
        effects.push(Effect::CloseSocket { socket });
        self.after_socket_loss(false, &mut effects);
        effects
    }

    /// The reconnect timer of `generation` fired.
    #[instrument(skip(self))]
    pub fn reconnect_due(&mut self, generation: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.disposed || !self.timer_armed || generation != self.timer_generation {
            debug!("Stale reconnect timer ignored");
            return effects;
        }
        self.timer_armed = false;
        if let ConnectionState::Reconnecting { attempt, .. } = self.state {
            self.open_socket(attempt.saturating_add(1), &mut effects);
        }
        effects
    }

    /// Sends a locally played move. Dropped with a warning unless open.
    #[instrument(skip(self, record), fields(san = %record.san))]
    pub fn send_move(&mut self, record: MoveRecord) -> Vec<Effect> {
        self.send(OutboundMessage::Move(record))
    }

    /// Sends a resignation. Dropped with a warning unless open.
    #[instrument(skip(self))]
    pub fn send_resignation(&mut self) -> Vec<Effect> {
        self.send(OutboundMessage::Resignation {})
    }

    /// Closes the channel explicitly. No reconnect follows.
    #[instrument(skip(self), fields(state = %self.state))]
    pub fn close(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.disposed {
            return effects;
        }
        self.cancel_timer(&mut effects);
        self.awaiting_credential = false;
        self.game_id = None;
        match self.socket {
            Some(socket) => {
                effects.push(Effect::CloseSocket { socket });
                self.set_state(ConnectionState::Closing, &mut effects);
            }
            None => self.set_state(ConnectionState::Disconnected, &mut effects),
        }
        effects
    }

    /// Releases every resource. Every later input is a no-op.
    #[instrument(skip(self))]
    pub fn dispose(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.disposed {
            return effects;
        }
        self.release(&mut effects);
        self.awaiting_credential = false;
        self.set_state(ConnectionState::Disconnected, &mut effects);
        self.disposed = true;
        info!("Channel disposed");
        effects
    }

    fn send(&mut self, message: OutboundMessage) -> Vec<Effect> {
        let mut effects = Vec::new();
        let (ConnectionState::Open, Some(socket)) = (self.state, self.socket) else {
            warn!(
                state = %self.state,
                reason = %ChannelError::ChannelUnavailable,
                "Dropping outbound message"
            );
            return effects;
        };
        match message.to_frame() {
            Ok(text) => effects.push(Effect::SendFrame { socket, text }),
            Err(e) => {
                warn!(error = %e, "Could not encode outbound message");
                effects.push(Effect::Emit(ChannelEvent::Error(ChannelError::Protocol(
                    e.message,
                ))));
            }
        }
        effects
    }

    fn dispatch(&mut self, text: &str, effects: &mut Vec<Effect>) {
        let envelope = match parse_inbound(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Unreadable frame");
                effects.push(Effect::Emit(ChannelEvent::Error(ChannelError::Protocol(
                    e.message,
                ))));
                return;
            }
        };

        match envelope.kind {
            InboundKind::GameStateUpdate => match envelope.data_as::<GameStateUpdate>() {
                Ok(update) => {
                    if self.adopt_layout(update.fen, effects) {
                        if let Some(last_move) = update.last_move {
                            self.view.last_move = Some(last_move);
                        }
                        self.emit_position(effects);
                    }
                }
                Err(e) => self.protocol_error(e.message, effects),
            },
            InboundKind::Move => match envelope.data_as::<MoveRecord>() {
                Ok(record) => {
                    if !self.adopt_layout(record.after.clone(), effects) {
                        return;
                    }
                    self.view.last_move = Some(record);
                    if let Some(game) = envelope.game {
                        self.view.session = Some(game.clone());
                        effects.push(Effect::Emit(ChannelEvent::SessionUpdated(game)));
                    }
                    self.emit_position(effects);
                }
                Err(e) => self.protocol_error(e.message, effects),
            },
            InboundKind::GameStarted => match envelope.data_as::<LiveGame>() {
                Ok(game) => self.start_game(game, effects),
                Err(e) => self.protocol_error(e.message, effects),
            },
            InboundKind::GameEnded => {
                info!("Game ended");
                self.view.has_ended = true;
                effects.push(Effect::Emit(ChannelEvent::GameEnded(envelope.data)));
            }
            InboundKind::Error => {
                let message = match envelope.data {
                    serde_json::Value::String(message) => message,
                    other => other.to_string(),
                };
                self.protocol_error(message, effects);
            }
            InboundKind::Unknown => debug!("Unknown message type ignored"),
        }
    }

    fn start_game(&mut self, mut game: LiveGame, effects: &mut Vec<Effect>) {
        let Some(color) = game.color_of(self.auth.user_id()) else {
            let error = ChannelError::ColorAssignmentFailure {
                user_id: self.auth.user_id().clone(),
                white_id: game.white_id.clone(),
                black_id: game.black_id.clone(),
            };
            self.fail(error, effects);
            return;
        };
        info!(color = %color, "Game started");

        if let Some(last) = game.moves.last() {
            if self.adopt_layout(last.after.clone(), effects) {
                self.view.last_move = Some(last.clone());
                self.emit_position(effects);
            }
        }
        game.has_begun = true;
        self.view.local_color = Some(color);
        self.view.has_begun = true;
        self.view.session = Some(game.clone());
        effects.push(Effect::Emit(ChannelEvent::GameStarted { color, game }));
    }

    /// Replaces the view's layout if `layout` is a legal position.
    ///
    /// A malformed layout keeps the previous one and is reported as a
    /// protocol error.
    fn adopt_layout(&mut self, layout: String, effects: &mut Vec<Effect>) -> bool {
        match Position::from_layout(&layout) {
            Ok(_) => {
                self.view.layout = layout;
                true
            }
            Err(e) => {
                self.protocol_error(e.message, effects);
                false
            }
        }
    }

    fn emit_position(&self, effects: &mut Vec<Effect>) {
        effects.push(Effect::Emit(ChannelEvent::PositionChanged {
            layout: self.view.layout.clone(),
            last_move: self.view.last_move.clone(),
        }));
    }

    fn protocol_error(&self, message: String, effects: &mut Vec<Effect>) {
        warn!(error = %message, "Server reported an error");
        effects.push(Effect::Emit(ChannelEvent::Error(ChannelError::Protocol(message))));
    }

    fn fail(&mut self, error: ChannelError, effects: &mut Vec<Effect>) {
        warn!(error = %error, "Blocking channel failure");
        self.view.fatal = Some(error.clone());
        effects.push(Effect::Emit(ChannelEvent::Error(error)));
    }

    fn after_socket_loss(&mut self, clean: bool, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Closing => self.set_state(ConnectionState::Disconnected, effects),
            _ if clean => {
                info!("Server closed the channel");
                self.set_state(ConnectionState::Disconnected, effects);
            }
            ConnectionState::Open => self.schedule(0, effects),
            ConnectionState::Connecting { attempt } | ConnectionState::Authenticating { attempt } => {
                self.schedule(attempt, effects)
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting { .. } => {}
        }
    }

    fn schedule(&mut self, attempt: u32, effects: &mut Vec<Effect>) {
        let delay = self.backoff.delay(attempt);
        self.timer_generation += 1;
        self.timer_armed = true;
        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        effects.push(Effect::ScheduleReconnect {
            generation: self.timer_generation,
            delay,
        });
        self.set_state(ConnectionState::Reconnecting { attempt, delay }, effects);
    }

    fn open_socket(&mut self, attempt: u32, effects: &mut Vec<Effect>) {
        let Some(game_id) = self.game_id.clone() else {
            return;
        };
        let Some(url) = self.endpoint(&game_id) else {
            self.protocol_error(format!("cannot build endpoint from {}", self.ws_base), effects);
            self.set_state(ConnectionState::Disconnected, effects);
            return;
        };
        self.next_socket += 1;
        let socket = self.next_socket;
        self.socket = Some(socket);
        info!(socket, url = %url, attempt, "Opening socket");
        effects.push(Effect::OpenSocket { socket, url });
        self.set_state(ConnectionState::Connecting { attempt }, effects);
    }

    fn endpoint(&self, game_id: &str) -> Option<Url> {
        let mut url = self.ws_base.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["game", "live", game_id]);
        Some(url)
    }

    fn release(&mut self, effects: &mut Vec<Effect>) {
        if let Some(socket) = self.socket.take() {
            debug!(socket, "Releasing socket");
            effects.push(Effect::CloseSocket { socket });
        }
        self.cancel_timer(effects);
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.timer_armed {
            self.timer_armed = false;
            self.timer_generation += 1;
            effects.push(Effect::CancelReconnect);
        }
    }

    fn await_credential(&mut self, effects: &mut Vec<Effect>) {
        self.awaiting_credential = true;
        effects.push(Effect::Emit(ChannelEvent::Error(
            ChannelError::AuthenticationMissing,
        )));
        if !self.refreshing {
            self.refreshing = true;
            effects.push(Effect::RefreshCredential);
        }
    }

    fn is_engaged(&self) -> bool {
        self.awaiting_credential
            || self.socket.is_some()
            || matches!(self.state, ConnectionState::Reconnecting { .. })
    }

    fn is_stale(&self, socket: SocketId) -> bool {
        let stale = self.disposed || self.socket != Some(socket);
        if stale {
            debug!(socket, current = ?self.socket, "Event from stale socket ignored");
        }
        stale
    }

    fn set_state(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Connection state changed");
            self.state = next;
            effects.push(Effect::Emit(ChannelEvent::StateChanged(next)));
        }
    }
}
