//! IBKR bridge tick stream
//!
//! Maintains one WebSocket to the bridge's stream endpoint. Subscribe and
//! unsubscribe commands issued while the socket is down are queued and
//! flushed in order once it opens; symbols that were live on a dropped
//! connection are re-subscribed before the queue is flushed.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use indexmap::IndexSet;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, warn};

use terminal_core::{ControlFrame, ControlOp, InboundFrame, SessionState, Tick, TICK_FRAME_TYPE};

use crate::reconnect::ReconnectPolicy;
use crate::types::DEFAULT_WS_URL;

/// Capacity of the command and event channels
const CHANNEL_CAPACITY: usize = 1024;

/// Feed session errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FeedError {
    /// The session was closed (or its task has exited)
    #[error("Feed session closed")]
    SessionClosed,
}

/// Events delivered to the session owner
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Batch of ticks from one inbound frame, in frame order
    Ticks(Vec<Tick>),
    /// Connection state changed
    State(SessionState),
}

/// Configuration for [`FeedSession`]
#[derive(Clone, Debug)]
pub struct FeedSessionConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
}

impl FeedSessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for FeedSessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URL)
    }
}

// ============================================================================
// Session state machine
// ============================================================================

/// Socket-independent bookkeeping for a feed session
///
/// Tracks the connection state, the FIFO of commands waiting for a socket
/// and the symbols the bridge is streaming on the current connection.
#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    pending: VecDeque<ControlFrame>,
    active: IndexSet<String>,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCore {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            pending: VecDeque::new(),
            active: IndexSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Symbols subscribed on the current (or last) connection
    pub fn active_symbols(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handshake started
    pub fn begin_connect(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Connecting;
        }
    }

    /// Accept a caller command
    ///
    /// Returns the frame to write now when connected. Otherwise the frame is
    /// queued (or dropped if the session is closed) and `None` is returned.
    pub fn command(&mut self, frame: ControlFrame) -> Option<ControlFrame> {
        match self.state {
            SessionState::Closed => None,
            SessionState::Connected => {
                self.record_sent(&frame);
                Some(frame)
            }
            SessionState::Disconnected | SessionState::Connecting => {
                self.pending.push_back(frame);
                None
            }
        }
    }

    /// Socket opened: frames to write, in order
    ///
    /// Re-subscribes carried-over symbols first, then drains the queue.
    pub fn on_open(&mut self) -> Vec<ControlFrame> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.state = SessionState::Connected;

        let mut frames: Vec<ControlFrame> =
            self.active.iter().map(ControlFrame::subscribe).collect();

        while let Some(frame) = self.pending.pop_front() {
            self.record_sent(&frame);
            frames.push(frame);
        }

        frames
    }

    /// Socket lost
    pub fn on_disconnect(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Disconnected;
        }
    }

    /// Explicit close; queued commands are discarded
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.pending.clear();
        self.active.clear();
    }

    fn record_sent(&mut self, frame: &ControlFrame) {
        match frame.op {
            ControlOp::Subscribe => {
                self.active.insert(frame.symbol.clone());
            }
            ControlOp::Unsubscribe => {
                self.active.shift_remove(&frame.symbol);
            }
        }
    }
}

/// Decode an inbound text frame into ticks
///
/// Returns `None` for malformed JSON, for frame types other than `tick`
/// and for tick frames whose payload is not a list of ticks.
pub fn parse_tick_frame(text: &str) -> Option<Vec<Tick>> {
    let frame = match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("[Feed] Dropping malformed frame: {}", e);
            return None;
        }
    };

    if frame.kind != TICK_FRAME_TYPE {
        debug!("[Feed] Ignoring frame type: {}", frame.kind);
        return None;
    }

    match serde_json::from_value::<Vec<Tick>>(frame.data) {
        Ok(ticks) => Some(ticks),
        Err(e) => {
            debug!("[Feed] Dropping malformed tick payload: {}", e);
            None
        }
    }
}

// ============================================================================
// Feed session
// ============================================================================

/// Commands sent to the session task
#[derive(Debug)]
enum SessionCommand {
    Control(ControlFrame),
    /// Start over after the reconnect policy gave up
    Reconnect,
    Close,
}

/// Handle to the bridge tick stream
///
/// Commands and events travel over channels; the socket itself lives in a
/// task started by [`FeedSession::connect`].
pub struct FeedSession {
    config: FeedSessionConfig,
    command_tx: mpsc::Sender<SessionCommand>,
    /// Taken when the session task starts
    command_rx: Option<mpsc::Receiver<SessionCommand>>,
    event_tx: mpsc::Sender<FeedEvent>,
    state_rx: watch::Receiver<SessionState>,
    state_tx: Option<watch::Sender<SessionState>>,
}

impl FeedSession {
    /// Create a session and the receiver for its events
    ///
    /// Nothing connects until [`FeedSession::connect`] is called, but
    /// commands can be issued right away.
    pub fn new(config: FeedSessionConfig) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        (
            Self {
                config,
                command_tx,
                command_rx: Some(command_rx),
                event_tx,
                state_rx,
                state_tx: Some(state_tx),
            },
            event_rx,
        )
    }

    /// Start the session task
    ///
    /// Calling it again after the reconnect policy gave up starts a fresh
    /// round of attempts.
    pub fn connect(&mut self) -> Result<(), FeedError> {
        match (self.command_rx.take(), self.state_tx.take()) {
            (Some(command_rx), Some(state_tx)) => {
                let config = self.config.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    Self::connection_loop(config, command_rx, event_tx, state_tx).await;
                });
                Ok(())
            }
            _ => self
                .command_tx
                .try_send(SessionCommand::Reconnect)
                .map_err(|_| FeedError::SessionClosed),
        }
    }

    /// Subscribe to ticks for a symbol
    pub async fn subscribe(&self, symbol: &str) -> Result<(), FeedError> {
        self.send(SessionCommand::Control(ControlFrame::subscribe(symbol)))
            .await
    }

    /// Stop ticks for a symbol
    pub async fn unsubscribe(&self, symbol: &str) -> Result<(), FeedError> {
        self.send(SessionCommand::Control(ControlFrame::unsubscribe(symbol)))
            .await
    }

    /// Close the socket and stop reconnecting
    pub async fn close(&self) -> Result<(), FeedError> {
        self.send(SessionCommand::Close).await
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), FeedError> {
        if self.state() == SessionState::Closed {
            return Err(FeedError::SessionClosed);
        }
        self.command_tx
            .send(command)
            .await
            .map_err(|_| FeedError::SessionClosed)
    }

    /// Publish a state change to the watch and the event channel
    async fn publish_state(
        state: SessionState,
        state_tx: &watch::Sender<SessionState>,
        event_tx: &mpsc::Sender<FeedEvent>,
    ) {
        if *state_tx.borrow() == state {
            return;
        }
        state_tx.send_replace(state);
        let _ = event_tx.send(FeedEvent::State(state)).await;
    }

    /// Main connection loop with reconnection logic
    async fn connection_loop(
        config: FeedSessionConfig,
        mut command_rx: mpsc::Receiver<SessionCommand>,
        event_tx: mpsc::Sender<FeedEvent>,
        state_tx: watch::Sender<SessionState>,
    ) {
        let mut core = SessionCore::new();
        let mut reconnect_attempts = 0u32;

        loop {
            // Commands issued before this attempt go to the queue first
            while let Ok(command) = command_rx.try_recv() {
                if !Self::queue_offline(&mut core, command) {
                    Self::finish(&mut core, &state_tx, &event_tx).await;
                    return;
                }
            }

            core.begin_connect();
            Self::publish_state(core.state(), &state_tx, &event_tx).await;
            info!("[Feed] Connecting to {}", config.url);

            match connect_async(config.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("[Feed] Connected");
                    reconnect_attempts = 0;

                    let frames = core.on_open();
                    Self::publish_state(core.state(), &state_tx, &event_tx).await;

                    let (mut write, mut read) = ws_stream.split();
                    let mut healthy = true;

                    for frame in &frames {
                        if let Err(e) = send_frame(&mut write, frame).await {
                            warn!("[Feed] Failed to flush {:?} {}: {}", frame.op, frame.symbol, e);
                            healthy = false;
                            break;
                        }
                    }

                    while healthy {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Some(ticks) = parse_tick_frame(&text) {
                                            if !ticks.is_empty() {
                                                let event = FeedEvent::Ticks(ticks);
                                                let _ = event_tx.send(event).await;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Ping(data))) => {
                                        if let Err(e) = write.send(Message::Pong(data)).await {
                                            warn!("[Feed] Failed to send pong: {}", e);
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        info!("[Feed] Connection closed by server");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("[Feed] Error: {}", e);
                                        break;
                                    }
                                    None => {
                                        info!("[Feed] Stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }

                            cmd = command_rx.recv() => {
                                match cmd {
                                    Some(SessionCommand::Control(frame)) => {
                                        if let Some(frame) = core.command(frame) {
                                            if let Err(e) = send_frame(&mut write, &frame).await {
                                                warn!(
                                                    "[Feed] Failed to send {:?} {}: {}",
                                                    frame.op, frame.symbol, e
                                                );
                                                break;
                                            }
                                        }
                                    }
                                    Some(SessionCommand::Reconnect) => {}
                                    Some(SessionCommand::Close) | None => {
                                        let _ = write.send(Message::Close(None)).await;
                                        Self::finish(&mut core, &state_tx, &event_tx).await;
                                        return;
                                    }
                                }
                            }
                        }
                    }

                    core.on_disconnect();
                    Self::publish_state(core.state(), &state_tx, &event_tx).await;
                }
                Err(e) => {
                    error!("[Feed] Connection failed: {}", e);
                    core.on_disconnect();
                    Self::publish_state(core.state(), &state_tx, &event_tx).await;
                }
            }

            reconnect_attempts += 1;
            let delay = config.reconnect.delay(reconnect_attempts, &mut rand::rng());

            match delay {
                Some(delay) => {
                    info!(
                        "[Feed] Reconnecting in {:?} (attempt {})",
                        delay, reconnect_attempts
                    );
                    if !Self::wait_offline(&mut core, &mut command_rx, delay).await {
                        Self::finish(&mut core, &state_tx, &event_tx).await;
                        return;
                    }
                }
                None => {
                    if config.reconnect.enabled {
                        error!("[Feed] Max reconnect attempts reached");
                    }
                    if !Self::park(&mut core, &mut command_rx).await {
                        Self::finish(&mut core, &state_tx, &event_tx).await;
                        return;
                    }
                    reconnect_attempts = 0;
                }
            }
        }
    }

    /// Queue a command while no socket is open; `false` means close
    fn queue_offline(core: &mut SessionCore, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Control(frame) => {
                core.command(frame);
                true
            }
            SessionCommand::Reconnect => true,
            SessionCommand::Close => false,
        }
    }

    /// Sleep out a backoff delay while still accepting commands
    async fn wait_offline(
        core: &mut SessionCore,
        command_rx: &mut mpsc::Receiver<SessionCommand>,
        delay: Duration,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Reconnect) => return true,
                    Some(command) => {
                        if !Self::queue_offline(core, command) {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }
    }

    /// Wait for an explicit reconnect after the policy gave up
    async fn park(
        core: &mut SessionCore,
        command_rx: &mut mpsc::Receiver<SessionCommand>,
    ) -> bool {
        info!("[Feed] Disconnected; waiting for reconnect request");
        loop {
            match command_rx.recv().await {
                Some(SessionCommand::Reconnect) => return true,
                Some(command) => {
                    if !Self::queue_offline(core, command) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    async fn finish(
        core: &mut SessionCore,
        state_tx: &watch::Sender<SessionState>,
        event_tx: &mpsc::Sender<FeedEvent>,
    ) {
        info!("[Feed] Session closed");
        core.close();
        Self::publish_state(core.state(), state_tx, event_tx).await;
    }
}

impl std::fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSession")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

async fn send_frame<S>(write: &mut S, frame: &ControlFrame) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => {
            debug!("[Feed] Sending {}", json);
            write.send(Message::Text(json.into())).await
        }
        Err(e) => {
            warn!("[Feed] Failed to encode control frame: {}", e);
            Ok(())
        }
    }
}
