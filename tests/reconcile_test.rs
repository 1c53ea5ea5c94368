//! Tests for reconciling the local board with server state.

use std::sync::{Arc, Mutex};

use serde_json::json;
use strictly_chess::{
    AuthSession, BoardController, ChannelCore, ChannelEvent, Effect, FORWARD_HOOK, HookKey,
    MoveRecord, MoveRequest, Reconciler, STARTING_LAYOUT, Side,
};
use url::Url;

const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
const AFTER_D4: &str = "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1";

type Sent = Arc<Mutex<Vec<MoveRecord>>>;

fn reconciler() -> (Reconciler, Sent) {
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sent);
    let reconciler = Reconciler::new(BoardController::new(), move |record: &MoveRecord| {
        sink.lock().expect("lock").push(record.clone());
    });
    (reconciler, sent)
}

fn mv(text: &str) -> MoveRequest {
    MoveRequest::parse(text).expect("valid move text")
}

fn emitted(effects: Vec<Effect>) -> Vec<ChannelEvent> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Emit(event) => Some(event),
            _ => None,
        })
        .collect()
}

#[test]
fn test_local_move_applies_optimistically_and_is_forwarded() {
    let (mut reconciler, sent) = reconciler();
    reconciler.set_local_color(Side::White);

    let record = reconciler.attempt_move(mv("e2e4")).expect("e4 is legal");

    assert_eq!(reconciler.board().layout(), AFTER_E4);
    let sent = sent.lock().expect("lock");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], record);
    assert_eq!(sent[0].lan, "e2e4");
}

#[test]
fn test_rejected_move_is_not_forwarded() {
    let (mut reconciler, sent) = reconciler();

    assert!(reconciler.attempt_move(mv("e2e5")).is_none());

    assert!(sent.lock().expect("lock").is_empty());
    assert_eq!(reconciler.board().layout(), STARTING_LAYOUT);
}

#[test]
fn test_opponent_pieces_are_guarded() {
    let (mut reconciler, sent) = reconciler();
    reconciler.set_local_color(Side::Black);

    assert!(reconciler.attempt_move(mv("e2e4")).is_none());

    assert!(sent.lock().expect("lock").is_empty());
    assert_eq!(reconciler.board().layout(), STARTING_LAYOUT);
    assert!(!reconciler.is_local_turn());
}

#[test]
fn test_server_echo_overrides_local_divergence() {
    let (mut reconciler, _) = reconciler();
    reconciler.set_local_color(Side::White);
    reconciler.attempt_move(mv("d2d4")).expect("d4 is legal");
    assert_eq!(reconciler.board().layout(), AFTER_D4);

    let changed = reconciler
        .apply(&ChannelEvent::PositionChanged {
            layout: AFTER_E4.to_string(),
            last_move: None,
        })
        .expect("valid layout");

    assert!(changed);
    assert_eq!(reconciler.board().layout(), AFTER_E4);
}

#[test]
fn test_matching_echo_changes_nothing() {
    let (mut reconciler, sent) = reconciler();
    reconciler.set_local_color(Side::White);
    reconciler.attempt_move(mv("e2e4")).expect("e4 is legal");

    let changed = reconciler
        .apply(&ChannelEvent::PositionChanged {
            layout: AFTER_E4.to_string(),
            last_move: None,
        })
        .expect("valid layout");

    assert!(!changed);
    assert_eq!(sent.lock().expect("lock").len(), 1, "echo is not re-sent");
}

#[test]
fn test_end_to_end_with_channel_core() {
    let (mut reconciler, sent) = reconciler();
    let mut core = ChannelCore::new(
        AuthSession::new("u1", Some("tok".to_string())),
        Url::parse("ws://localhost:8080").expect("valid url"),
    );
    let socket = core
        .connect("g1")
        .into_iter()
        .find_map(|effect| match effect {
            Effect::OpenSocket { socket, .. } => Some(socket),
            _ => None,
        })
        .expect("socket opened");
    core.socket_opened(socket);

    let started = json!({
        "type": "game_started",
        "data": {"id": "g1", "white_id": "u1", "black_id": "u2"}
    })
    .to_string();
    for event in emitted(core.frame_received(socket, &started)) {
        reconciler.apply(&event).expect("valid event");
    }
    assert_eq!(reconciler.local_color(), Some(Side::White));
    assert!(reconciler.is_local_turn());

    // Local client diverges with d4; the server confirms e4.
    reconciler.attempt_move(mv("d2d4")).expect("d4 is legal");
    assert_eq!(sent.lock().expect("lock").len(), 1);

    let echo = json!({
        "type": "move",
        "data": {
            "before": STARTING_LAYOUT,
            "after": AFTER_E4,
            "color": "w",
            "piece": "p",
            "from": "e2",
            "to": "e4",
            "san": "e4",
            "lan": "e2e4"
        }
    })
    .to_string();
    for event in emitted(core.frame_received(socket, &echo)) {
        reconciler.apply(&event).expect("valid event");
    }

    assert_eq!(reconciler.board().layout(), AFTER_E4);
    assert_eq!(reconciler.turn(), Side::Black);
    assert!(!reconciler.is_local_turn());
}

#[test]
fn test_game_started_event_sets_colour() {
    let (mut reconciler, _) = reconciler();

    reconciler
        .apply(&ChannelEvent::GameStarted {
            color: Side::Black,
            game: Default::default(),
        })
        .expect("no layout involved");

    assert_eq!(reconciler.local_color(), Some(Side::Black));
}

#[test]
fn test_malformed_server_layout_is_reported() {
    let (mut reconciler, _) = reconciler();
    reconciler.attempt_move(mv("e2e4")).expect("e4 is legal");

    let result = reconciler.apply(&ChannelEvent::PositionChanged {
        layout: "garbage".to_string(),
        last_move: None,
    });

    assert!(result.is_err());
    assert_eq!(reconciler.board().layout(), AFTER_E4);
}

#[test]
fn test_reconciler_recovers_after_malformed_layout() {
    let (mut reconciler, sent) = reconciler();
    reconciler.set_local_color(Side::White);
    reconciler
        .apply(&ChannelEvent::PositionChanged {
            layout: "garbage".to_string(),
            last_move: None,
        })
        .expect_err("garbage is not a layout");

    reconciler.attempt_move(mv("d2d4")).expect("board still playable");
    let changed = reconciler
        .apply(&ChannelEvent::PositionChanged {
            layout: AFTER_E4.to_string(),
            last_move: None,
        })
        .expect("valid layout");

    assert!(changed);
    assert_eq!(reconciler.board().layout(), AFTER_E4);
    assert_eq!(sent.lock().expect("lock").len(), 1);
}

#[test]
fn test_opponent_piece_still_fires_post_hooks() {
    let (mut reconciler, sent) = reconciler();
    reconciler.set_local_color(Side::White);
    let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    reconciler
        .board_mut()
        .register_post_hook(Some("selection".into()), move |_, record| {
            sink.lock().expect("lock").push(record.is_some());
        });

    assert!(reconciler.attempt_move(mv("e7e5")).is_none());
    assert!(reconciler.attempt_move(mv("e2e4")).is_some());

    assert_eq!(*seen.lock().expect("lock"), vec![false, true]);
    assert_eq!(sent.lock().expect("lock").len(), 1);
}

#[test]
fn test_sync_from_view() {
    let (mut reconciler, _) = reconciler();
    reconciler.attempt_move(mv("e2e4")).expect("e4 is legal");
    let core = ChannelCore::new(
        AuthSession::new("u1", Some("tok".to_string())),
        Url::parse("ws://localhost:8080").expect("valid url"),
    );

    assert!(reconciler.sync_from(core.view()).expect("valid layout"));
    assert_eq!(reconciler.board().layout(), STARTING_LAYOUT);
    assert_eq!(reconciler.local_color(), None);
}

#[test]
fn test_into_board_stops_forwarding() {
    let (reconciler, sent) = reconciler();
    assert!(reconciler.board().has_post_hook(&HookKey::named(FORWARD_HOOK)));

    let mut board = reconciler.into_board();
    assert!(!board.has_post_hook(&HookKey::named(FORWARD_HOOK)));

    board.attempt_move(mv("e2e4")).expect("e4 is legal");
    assert!(sent.lock().expect("lock").is_empty());
}
