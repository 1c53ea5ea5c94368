//! Strictly Chess - live chess client.

#![warn(missing_docs)]

mod cli;

use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command};
use strictly_chess::{
    ApiClient, AuthSession, BoardController, ChannelCore, ChannelEvent, ChannelHandle,
    ClientConfig, ClockView, GameStats, HttpCredentialRefresher, MoveRequest, Reconciler, Side,
    TimeFormat, TungsteniteTransport, Verdict, format_clock, spawn_channel,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    let session = resolve_session(&cli, &config)?;

    match cli.command {
        Command::Play { game_id } => run_play(config, session, game_id).await,
        Command::New { time_format } => run_new(config, session, time_format).await,
        Command::Show { game_id } => run_show(config, session, game_id).await,
        Command::Stats { user, games } => run_stats(config, session, user, games).await,
    }
}

/// Builds the authenticated session from the token or the configured user.
fn resolve_session(cli: &Cli, config: &ClientConfig) -> Result<AuthSession> {
    let user_id = cli.user_id.clone().or_else(|| config.user_id().clone());
    match (&cli.token, user_id) {
        (Some(token), user_id) => match AuthSession::from_token(token.clone()) {
            Ok(session) => Ok(session),
            Err(e) => {
                let user_id = user_id.with_context(|| format!("{e}; pass --user-id"))?;
                warn!(error = %e, "Token carries no user id; using --user-id");
                Ok(AuthSession::new(user_id, Some(token.clone())))
            }
        },
        (None, Some(user_id)) => Ok(AuthSession::new(user_id, None)),
        (None, None) => bail!("Either --token or --user-id is required"),
    }
}

fn api_client(config: &ClientConfig, session: &AuthSession) -> Result<ApiClient> {
    let mut api = ApiClient::new(config.api_base_url()?)?;
    api.set_token(session.token().clone());
    Ok(api)
}

/// Joins a live game and relays moves between stdin and the server.
#[instrument(skip(config, session))]
async fn run_play(config: ClientConfig, session: AuthSession, game_id: String) -> Result<()> {
    let api = api_client(&config, &session)?;
    let core = ChannelCore::new(session, config.ws_base_url()?).with_backoff(config.backoff_policy());
    let (channel, mut events) =
        spawn_channel(core, TungsteniteTransport, HttpCredentialRefresher::new(api));

    let mut board = BoardController::new();
    board.on_checkmate(|record| info!(san = %record.san, "Checkmate"));
    let mut reconciler = Reconciler::new(board, channel.clone());

    info!(game_id = %game_id, "Joining game");
    channel.connect(game_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                match handle_event(&mut reconciler, &event) {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_input(&mut reconciler, &channel, line.trim()) {
                        break Ok(());
                    }
                }
                None => break Ok(()),
            }
        }
    };

    channel.dispose();
    outcome
}

/// Applies one channel event. Returns whether to keep playing.
fn handle_event(reconciler: &mut Reconciler, event: &ChannelEvent) -> Result<bool> {
    if let Err(e) = reconciler.apply(event) {
        warn!(error = %e, "Server layout rejected; keeping local board");
    }
    match event {
        ChannelEvent::StateChanged(state) => println!("[{state}]"),
        ChannelEvent::PositionChanged { last_move, .. } => {
            if let Some(last_move) = last_move {
                println!("{} played {}", last_move.color, last_move.san);
            }
            print!("{}", reconciler.board().position().render());
            let marker = if reconciler.is_local_turn() { " (you)" } else { "" };
            println!("{} to move{marker}", reconciler.turn());
        }
        ChannelEvent::SessionUpdated(game) => {
            let to_move = game
                .moves
                .last()
                .and_then(|last| Side::to_move_in(&last.after))
                .unwrap_or(Side::White);
            let clock = ClockView::from_session(game, to_move, Instant::now());
            let now = Instant::now();
            println!(
                "white {}  black {}",
                format_clock(clock.remaining(Side::White, now)),
                format_clock(clock.remaining(Side::Black, now))
            );
        }
        ChannelEvent::GameStarted { color, .. } => {
            println!("Game started; you play {color}");
            print!("{}", reconciler.board().position().render());
        }
        ChannelEvent::GameEnded(data) => {
            let winner = data.get("winner").and_then(|w| w.as_str());
            let verdict = reconciler
                .local_color()
                .map_or(Verdict::Unknown, |side| Verdict::for_player(winner, side));
            println!("Game over: {verdict}");
            return Ok(false);
        }
        ChannelEvent::Error(error) if error.is_blocking() => bail!("{error}"),
        ChannelEvent::Error(error) => eprintln!("{error}"),
        ChannelEvent::LoggedOut => {
            println!("Logged out");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Handles one line of user input. Returns whether to keep playing.
fn handle_input(reconciler: &mut Reconciler, channel: &ChannelHandle, line: &str) -> bool {
    match line {
        "" => {}
        "quit" => return false,
        "resign" => channel.send_resignation(),
        text => match MoveRequest::parse(text) {
            Ok(request) => {
                if reconciler.attempt_move(request).is_none() {
                    println!("Illegal move: {request}");
                }
            }
            Err(e) => println!("{e}"),
        },
    }
    true
}

/// Creates a live game and prints its id.
#[instrument(skip(config, session))]
async fn run_new(config: ClientConfig, session: AuthSession, time_format: String) -> Result<()> {
    let time_format: TimeFormat = time_format.parse()?;
    if !time_format.is_standard() {
        warn!(time_format = %time_format, "Not one of the standard time formats");
    }
    let game = api_client(&config, &session)?
        .create_live_game(time_format)
        .await?;
    println!("{}", game.id);
    Ok(())
}

/// Prints a completed game.
#[instrument(skip(config, session))]
async fn run_show(config: ClientConfig, session: AuthSession, game_id: String) -> Result<()> {
    let game = api_client(&config, &session)?.fetch_game(&game_id).await?;
    println!(
        "{} (white) vs {} (black), {}",
        game.white_username, game.black_username, game.time_format
    );
    for (index, pair) in game.moves.chunks(2).enumerate() {
        let sans: Vec<&str> = pair.iter().map(|m| m.san.as_str()).collect();
        println!("{:>3}. {}", index + 1, sans.join(" "));
    }
    let reason = game
        .winning_reason
        .map_or_else(String::new, |reason| format!(" by {reason}"));
    println!(
        "Result: {}{reason} ({})",
        game.winner.as_deref().unwrap_or("*"),
        game.verdict_for(session.user_id())
    );
    Ok(())
}

/// Prints win/loss/draw totals.
#[instrument(skip(config, session))]
async fn run_stats(
    config: ClientConfig,
    session: AuthSession,
    user: Option<String>,
    games: bool,
) -> Result<()> {
    let user = user.unwrap_or_else(|| session.user_id().clone());
    let api = api_client(&config, &session)?;
    let stats = if games {
        let history = api.fetch_user_games(&user).await?;
        for game in &history {
            println!(
                "{}  {} vs {}  {}  {}",
                game.id,
                game.white_username,
                game.black_username,
                game.time_format,
                game.verdict_for(&user)
            );
        }
        GameStats::tally(&user, &history)
    } else {
        api.fetch_game_stats(&user).await?
    };
    println!(
        "{user}: {} wins, {} losses, {} draws",
        stats.wins, stats.losses, stats.draws
    );
    Ok(())
}
