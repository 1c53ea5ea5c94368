//! Live game channel: a reconnecting, authenticated socket bound to one game.
//!
//! [`ChannelCore`] is the pure state machine; [`spawn`] runs it on tokio over
//! a [`Transport`].

mod auth;
mod driver;
mod machine;
mod protocol;
mod state;
mod transport;

pub use auth::{AccessClaims, AuthError, AuthSession, CredentialRefresher};
pub use driver::{ChannelHandle, spawn};
pub use machine::{ChannelCore, ChannelError, ChannelEvent, Effect, LiveView, SocketId};
pub use protocol::{
    GameStateUpdate, InboundEnvelope, InboundKind, LiveGame, OutboundMessage, ProtocolError,
    parse_inbound,
};
pub use state::{Backoff, ConnectionState};
pub use transport::{
    Connection, InboundFrame, Transport, TransportError, TungsteniteConnection,
    TungsteniteTransport,
};
