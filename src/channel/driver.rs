//! Tokio driver for [`ChannelCore`].
//!
//! One task runs the state machine. Each socket gets its own task that
//! reports back through an internal signal channel, tagged with its
//! [`SocketId`]. The reconnect timer lives in the driver loop and is replaced
//! or dropped as the machine asks.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::auth::{AuthError, CredentialRefresher};
use super::machine::{ChannelCore, ChannelEvent, Effect, LiveView, SocketId};
use super::state::ConnectionState;
use super::transport::{Connection, InboundFrame, Transport};
use crate::board::MoveRecord;

#[derive(Debug)]
enum Command {
    Connect(String),
    UpdateCredential(String),
    SendMove(MoveRecord),
    SendResignation,
    Close,
    Dispose,
}

#[derive(Debug)]
enum Signal {
    Opened(SocketId),
    Frame(SocketId, String),
    Closed(SocketId, bool),
    Errored(SocketId, String),
    Refreshed(Result<String, AuthError>),
}

#[derive(Debug)]
enum SocketCommand {
    Send(String),
    Close,
}

/// Cloneable handle to a running channel.
///
/// When every handle is dropped the channel disposes itself.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    view: watch::Receiver<LiveView>,
}

impl ChannelHandle {
    /// Binds the channel to `game_id` and connects.
    pub fn connect(&self, game_id: impl Into<String>) {
        self.command(Command::Connect(game_id.into()));
    }

    /// Installs a new credential, reconnecting a live connection.
    pub fn update_credential(&self, token: impl Into<String>) {
        self.command(Command::UpdateCredential(token.into()));
    }

    /// Sends a locally played move. Dropped unless the channel is open.
    pub fn send_move(&self, record: MoveRecord) {
        self.command(Command::SendMove(record));
    }

    /// Resigns the game. Dropped unless the channel is open.
    pub fn send_resignation(&self) {
        self.command(Command::SendResignation);
    }

    /// Closes the connection without reconnecting.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Stops the channel for good.
    pub fn dispose(&self) {
        self.command(Command::Dispose);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Current live view.
    pub fn view(&self) -> LiveView {
        self.view.borrow().clone()
    }

    /// Receiver that observes the live view.
    pub fn subscribe_view(&self) -> watch::Receiver<LiveView> {
        self.view.clone()
    }

    /// Waits until the connection state satisfies `predicate`.
    ///
    /// Returns `None` if the channel stops first.
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        let mut state = self.state.clone();
        state.wait_for(|s| predicate(s)).await.ok().map(|s| *s)
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Channel has stopped; command dropped");
        }
    }
}

/// Starts the channel on the current tokio runtime.
///
/// Returns the command handle and the stream of channel events.
#[instrument(skip_all)]
pub fn spawn<T, R>(
    core: ChannelCore,
    transport: T,
    refresher: R,
) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>)
where
    T: Transport,
    R: CredentialRefresher,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(core.state());
    let (view_tx, view_rx) = watch::channel(core.view().clone());

    let driver = Driver {
        core,
        transport: Arc::new(transport),
        refresher: Arc::new(refresher),
        signals: signal_tx,
        sockets: HashMap::new(),
        timer: None,
        events: event_tx,
        state: state_tx,
        view: view_tx,
    };
    tokio::spawn(driver.run(command_rx, signal_rx));
    info!("Channel driver started");

    let handle = ChannelHandle {
        commands: command_tx,
        state: state_rx,
        view: view_rx,
    };
    (handle, event_rx)
}

type Timer = Option<(u64, Pin<Box<Sleep>>)>;

struct Driver<T: Transport, R: CredentialRefresher> {
    core: ChannelCore,
    transport: Arc<T>,
    refresher: Arc<R>,
    signals: mpsc::UnboundedSender<Signal>,
    sockets: HashMap<SocketId, mpsc::UnboundedSender<SocketCommand>>,
    timer: Timer,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    view: watch::Sender<LiveView>,
}

impl<T: Transport, R: CredentialRefresher> Driver<T, R> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            let effects = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All channel handles dropped");
                        self.core.dispose()
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
                generation = wait_for_timer(&mut self.timer) => {
                    self.timer = None;
                    self.core.reconnect_due(generation)
                }
            };
            self.execute(effects);
            if self.core.is_disposed() {
                break;
            }
        }
        info!("Channel driver stopped");
    }

    fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::Connect(game_id) => self.core.connect(&game_id),
            Command::UpdateCredential(token) => self.core.update_credential(token),
            Command::SendMove(record) => self.core.send_move(record),
            Command::SendResignation => self.core.send_resignation(),
            Command::Close => self.core.close(),
            Command::Dispose => self.core.dispose(),
        }
    }

    fn handle_signal(&mut self, signal: Signal) -> Vec<Effect> {
        match signal {
            Signal::Opened(socket) => self.core.socket_opened(socket),
            Signal::Frame(socket, text) => self.core.frame_received(socket, &text),
            Signal::Closed(socket, clean) => {
                self.sockets.remove(&socket);
                self.core.socket_closed(socket, clean)
            }
            Signal::Errored(socket, message) => {
                self.sockets.remove(&socket);
                self.core.socket_errored(socket, &message)
            }
            Signal::Refreshed(Ok(token)) => self.core.credential_refreshed(token),
            Signal::Refreshed(Err(e)) => self.core.credential_refresh_failed(e),
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::RefreshCredential => {
                    let refresher = Arc::clone(&self.refresher);
                    let session = self.core.auth().clone();
                    let signals = self.signals.clone();
                    tokio::spawn(async move {
                        let result = refresher.refresh(&session).await;
                        let _ = signals.send(Signal::Refreshed(result));
                    });
                }
                Effect::OpenSocket { socket, url } => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.sockets.insert(socket, tx);
                    tokio::spawn(run_socket(
                        Arc::clone(&self.transport),
                        socket,
                        url,
                        rx,
                        self.signals.clone(),
                    ));
                }
                Effect::SendFrame { socket, text } => match self.sockets.get(&socket) {
                    Some(tx) => {
                        if tx.send(SocketCommand::Send(text)).is_err() {
                            debug!(socket, "Socket task already finished");
                        }
                    }
                    None => debug!(socket, "Frame for unknown socket dropped"),
                },
                Effect::CloseSocket { socket } => {
                    if let Some(tx) = self.sockets.remove(&socket) {
                        let _ = tx.send(SocketCommand::Close);
                    }
                }
                Effect::ScheduleReconnect { generation, delay } => {
                    self.timer = Some((generation, Box::pin(tokio::time::sleep(delay))));
                }
                Effect::CancelReconnect => self.timer = None,
                Effect::Emit(event) => {
                    if self.events.send(event).is_err() {
                        debug!("No event listener");
                    }
                }
            }
        }

        let state = self.core.state();
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        let view = self.core.view();
        self.view.send_if_modified(|current| {
            let changed = *current != *view;
            if changed {
                *current = view.clone();
            }
            changed
        });
    }
}

async fn wait_for_timer(timer: &mut Timer) -> u64 {
    match timer {
        Some((generation, sleep)) => {
            sleep.as_mut().await;
            *generation
        }
        None => std::future::pending().await,
    }
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<SocketCommand>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, SocketCommand::Close) {
            return;
        }
    }
}

#[instrument(skip(transport, url, commands, signals), fields(url = %url))]
async fn run_socket<T: Transport>(
    transport: Arc<T>,
    socket: SocketId,
    url: Url,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let mut connection = tokio::select! {
        result = transport.connect(&url) => match result {
            Ok(connection) => connection,
            Err(e) => {
                let _ = signals.send(Signal::Errored(socket, e.message));
                return;
            }
        },
        _ = wait_for_close(&mut commands) => {
            debug!("Socket released before it opened");
            return;
        }
    };
    let _ = signals.send(Signal::Opened(socket));

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = connection.send_text(text).await {
                        let _ = signals.send(Signal::Errored(socket, e.message));
                        return;
                    }
                }
                Some(SocketCommand::Close) | None => {
                    if let Err(e) = connection.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                    let _ = signals.send(Signal::Closed(socket, true));
                    return;
                }
            },
            frame = connection.next_frame() => match frame {
                Some(Ok(InboundFrame::Text(text))) => {
                    let _ = signals.send(Signal::Frame(socket, text));
                }
                Some(Ok(InboundFrame::Closed { clean })) => {
                    let _ = signals.send(Signal::Closed(socket, clean));
                    return;
                }
                Some(Err(e)) => {
                    let _ = signals.send(Signal::Errored(socket, e.message));
                    return;
                }
                None => {
                    let _ = signals.send(Signal::Closed(socket, false));
                    return;
                }
            }
        }
    }
}
