//! Strictly Chess library - client-side live chess synchronization
//!
//! Keeps a local chess board consistent with an authoritative game server
//! over a reconnecting, authenticated WebSocket.
//!
//! # Architecture
//!
//! - **Board**: local controller owning the canonical position, with move hooks
//! - **Channel**: live game socket state machine and its tokio driver
//! - **Reconciler**: optimistic local moves, overwritten by server layouts
//! - **Api**: HTTP collaborators (credential refresh, game creation, history)
//!
//! # Example
//!
//! ```no_run
//! use strictly_chess::{
//!     AuthSession, BoardController, ChannelCore, HttpCredentialRefresher, ApiClient,
//!     Reconciler, TungsteniteTransport, spawn_channel,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session = AuthSession::new("u1", Some("token".to_string()));
//! let api = ApiClient::new("http://localhost:8080".parse()?)?;
//! let core = ChannelCore::new(session, "ws://localhost:8080".parse()?);
//! let (channel, mut events) =
//!     spawn_channel(core, TungsteniteTransport, HttpCredentialRefresher::new(api));
//!
//! let mut reconciler = Reconciler::new(BoardController::new(), channel.clone());
//! channel.connect("game-1");
//! while let Some(event) = events.recv().await {
//!     reconciler.apply(&event)?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod api;
mod board;
mod channel;
mod clock;
mod config;
mod history;
mod reconcile;

// Crate-level exports - Board
pub use board::{
    BoardController, CheckmateCallback, HookKey, HookRegistry, MalformedMove, MalformedPosition,
    MoveRecord, MoveRequest, PieceKind, Position, PostHook, PreHook, STARTING_LAYOUT, Side,
    Square,
};

// Crate-level exports - Live game channel
pub use channel::{
    AccessClaims, AuthError, AuthSession, Backoff, ChannelCore, ChannelError, ChannelEvent,
    ChannelHandle, Connection, ConnectionState, CredentialRefresher, Effect, GameStateUpdate,
    InboundEnvelope, InboundFrame, InboundKind, LiveGame, LiveView, OutboundMessage,
    ProtocolError, SocketId, Transport, TransportError, TungsteniteConnection,
    TungsteniteTransport, parse_inbound, spawn as spawn_channel,
};

// Crate-level exports - Reconciliation
pub use reconcile::{FORWARD_HOOK, MoveSink, Reconciler};

// Crate-level exports - HTTP collaborators
pub use api::{ApiClient, ApiError, HttpCredentialRefresher};

// Crate-level exports - Clocks and history
pub use clock::{
    ClockView, STANDARD_TIME_FORMATS, TimeFormat, TimeFormatError, format_clock,
};
pub use history::{CompletedGame, GameStats, Verdict, WinningReason};

// Crate-level exports - Configuration
pub use config::{BackoffConfig, ClientConfig, ConfigError};
