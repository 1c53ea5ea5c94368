//! Tests for the tokio channel driver over an in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use strictly_chess::{
    AuthError, AuthSession, ChannelCore, ChannelError, ChannelEvent, Connection, ConnectionState,
    CredentialRefresher, InboundFrame, MoveRecord, STARTING_LAYOUT, Side, Transport,
    TransportError, spawn_channel,
};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use url::Url;

const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

/// Server end of one in-memory socket.
struct ServerEnd {
    url: Url,
    to_client: mpsc::UnboundedSender<InboundFrame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    fn push(&self, frame: serde_json::Value) {
        self.to_client
            .send(InboundFrame::Text(frame.to_string()))
            .expect("client end alive");
    }

    async fn next_frame(&mut self) -> Option<String> {
        timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }
}

struct FakeTransport {
    servers: mpsc::UnboundedSender<ServerEnd>,
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    outbound: mpsc::UnboundedSender<String>,
}

fn fake_transport() -> (FakeTransport, mpsc::UnboundedReceiver<ServerEnd>) {
    let (servers, accepted) = mpsc::unbounded_channel();
    (FakeTransport { servers }, accepted)
}

#[async_trait]
impl Transport for FakeTransport {
    type Connection = FakeConnection;

    async fn connect(&self, url: &Url) -> Result<FakeConnection, TransportError> {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.servers
            .send(ServerEnd {
                url: url.clone(),
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::new("test dropped the acceptor"))?;
        Ok(FakeConnection { inbound, outbound })
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::new("server end dropped"))
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Refresher that always answers the same way and counts calls.
struct StaticRefresher {
    answer: Result<String, AuthError>,
    calls: Arc<Mutex<u32>>,
}

impl StaticRefresher {
    fn new(answer: Result<String, AuthError>) -> (Self, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0));
        (
            Self {
                answer,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl CredentialRefresher for StaticRefresher {
    async fn refresh(&self, _session: &AuthSession) -> Result<String, AuthError> {
        *self.calls.lock().await += 1;
        self.answer.clone()
    }
}

fn jwt_for(user_id: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({"sub": user_id, "exp": 4_102_444_800i64}).to_string());
    format!("{header}.{claims}.signature")
}

fn ws_base() -> Url {
    Url::parse("ws://localhost:8080").expect("valid url")
}

async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    mut wanted: impl FnMut(&ChannelEvent) -> bool,
) -> ChannelEvent {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel running");
        if wanted(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_authenticates_with_first_frame_and_opens() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, _events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    let mut server = servers.recv().await.expect("socket opened");

    assert_eq!(server.url.as_str(), "ws://localhost:8080/game/live/g1");
    assert_eq!(server.next_frame().await.as_deref(), Some("tok"));
    assert_eq!(
        channel.state(),
        ConnectionState::Authenticating { attempt: 0 }
    );

    server.push(json!({"type": "gameStateUpdate", "data": {"fen": AFTER_E4}}));
    let state = channel.wait_for_state(ConnectionState::is_open).await;

    assert_eq!(state, Some(ConnectionState::Open));
    let view = channel.view();
    assert_eq!(view.layout(), AFTER_E4);
    assert_eq!(view.turn(), Some(Side::Black));
}

#[tokio::test(start_paused = true)]
async fn test_unclean_drop_reconnects_after_backoff() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, _events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    let mut first = servers.recv().await.expect("socket opened");
    first.next_frame().await.expect("credential frame");
    first.push(json!({"type": "hello", "data": null}));
    channel.wait_for_state(ConnectionState::is_open).await;
    let first_url = first.url.clone();

    drop(first);
    let state = channel
        .wait_for_state(|s| matches!(s, ConnectionState::Reconnecting { .. }))
        .await;
    assert_eq!(
        state,
        Some(ConnectionState::Reconnecting {
            attempt: 0,
            delay: Duration::from_millis(1000)
        })
    );

    let started = tokio::time::Instant::now();
    let mut second = servers.recv().await.expect("socket reopened");
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(second.url, first_url);
    assert_eq!(second.next_frame().await.as_deref(), Some("tok"));
    assert_eq!(
        channel.state(),
        ConnectionState::Authenticating { attempt: 1 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_moves_reach_the_server_only_when_open() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, _events) = spawn_channel(core, transport, refresher);
    let record: MoveRecord = serde_json::from_value(json!({
        "before": STARTING_LAYOUT,
        "after": AFTER_E4,
        "color": "w",
        "piece": "p",
        "from": "e2",
        "to": "e4",
        "san": "e4",
        "lan": "e2e4"
    }))
    .expect("valid record");

    channel.connect("g1");
    let mut server = servers.recv().await.expect("socket opened");
    server.next_frame().await.expect("credential frame");

    channel.send_move(record.clone());
    server.push(json!({"type": "hello", "data": null}));
    channel.wait_for_state(ConnectionState::is_open).await;
    channel.send_move(record);
    channel.send_resignation();

    let frame: serde_json::Value =
        serde_json::from_str(&server.next_frame().await.expect("move frame")).expect("json");
    assert_eq!(frame["type"], "move");
    assert_eq!(frame["data"]["lan"], "e2e4");
    assert_eq!(
        server.next_frame().await.as_deref(),
        Some(r#"{"type":"resignation","data":{}}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_credential_is_refreshed() {
    let (transport, mut servers) = fake_transport();
    let token = jwt_for("u7");
    let (refresher, calls) = StaticRefresher::new(Ok(token.clone()));
    let core = ChannelCore::new(AuthSession::new("u7", None), ws_base());
    let (channel, mut events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    let event = next_event(&mut events, |e| matches!(e, ChannelEvent::Error(_))).await;
    assert_eq!(event, ChannelEvent::Error(ChannelError::AuthenticationMissing));

    let mut server = servers.recv().await.expect("socket opened after refresh");
    assert_eq!(server.next_frame().await, Some(token));
    assert_eq!(*calls.lock().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_logs_out() {
    let (transport, _servers) = fake_transport();
    let (refresher, _) =
        StaticRefresher::new(Err(AuthError::RefreshFailed("expired".to_string())));
    let core = ChannelCore::new(AuthSession::new("u1", None), ws_base());
    let (channel, mut events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    next_event(&mut events, |e| *e == ChannelEvent::LoggedOut).await;

    let fatal = channel.view().fatal().clone().expect("fatal error recorded");
    assert!(fatal.is_blocking());
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_game_started_event_carries_colour() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, mut events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    let mut server = servers.recv().await.expect("socket opened");
    server.next_frame().await.expect("credential frame");
    server.push(json!({
        "type": "game_started",
        "data": {"id": "g1", "white_id": "u2", "black_id": "u1", "has_begun": true}
    }));

    let event = next_event(&mut events, |e| matches!(e, ChannelEvent::GameStarted { .. })).await;
    let ChannelEvent::GameStarted { color, game } = event else {
        unreachable!("filtered above");
    };
    assert_eq!(color, Side::Black);
    assert_eq!(game.id, "g1");
}

#[tokio::test(start_paused = true)]
async fn test_dispose_closes_socket_and_stops() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, _events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    let mut server = servers.recv().await.expect("socket opened");
    server.next_frame().await.expect("credential frame");

    channel.dispose();

    assert_eq!(server.next_frame().await, None, "client end closed");
    channel.wait_for_state(|s| *s == ConnectionState::Disconnected).await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_switching_games_replaces_socket() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, _events) = spawn_channel(core, transport, refresher);

    channel.connect("g1");
    let mut first = servers.recv().await.expect("first socket");
    first.next_frame().await.expect("credential frame");

    channel.connect("g2");
    let second = servers.recv().await.expect("second socket");

    assert_eq!(second.url.as_str(), "ws://localhost:8080/game/live/g2");
    assert_eq!(first.next_frame().await, None, "first socket closed");
}

#[tokio::test(start_paused = true)]
async fn test_view_subscribers_see_server_layout() {
    let (transport, mut servers) = fake_transport();
    let (refresher, _) = StaticRefresher::new(Err(AuthError::Missing));
    let core = ChannelCore::new(AuthSession::new("u1", Some("tok".to_string())), ws_base());
    let (channel, _events) = spawn_channel(core, transport, refresher);
    let mut view = channel.subscribe_view();

    channel.connect("g1");
    let mut server = servers.recv().await.expect("socket opened");
    server.next_frame().await.expect("credential frame");
    server.push(json!({"type": "gameStateUpdate", "data": {"fen": AFTER_E4}}));

    let seen = timeout(
        Duration::from_secs(5),
        view.wait_for(|view| view.layout() == AFTER_E4),
    )
    .await
    .expect("view updated within timeout")
    .expect("channel running")
    .clone();
    assert_eq!(seen.turn(), Some(Side::Black));
}
