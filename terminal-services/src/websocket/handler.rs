//! WebSocket connection handler
//!
//! Handles individual chart client connections: control frame parsing,
//! subscription bookkeeping and forwarding of bar updates.

use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use terminal_core::{BarUpdate, ControlFrame, ControlOp, ErrorCode, ServerMessage, SessionState};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::subscription::{ClientId, SubscriptionManager};

/// Subscription event for notifying the live pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// First client subscribed to a symbol
    Subscribe { symbol: String },
    /// Last client left a symbol
    Unsubscribe { symbol: String },
}

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WebSocketState {
    /// Subscription manager
    pub subscriptions: Arc<SubscriptionManager>,
    /// Bar updates published by the live pipeline
    bar_updates: broadcast::Sender<BarUpdate>,
    /// Upstream feed state, pushed to clients as it changes
    feed_state: Option<watch::Receiver<SessionState>>,
    /// Channel to notify the pipeline of subscription changes
    subscription_event_tx: Option<mpsc::Sender<SubscriptionEvent>>,
}

impl WebSocketState {
    /// Create new WebSocket state fed by `bar_updates`
    pub fn new(bar_updates: broadcast::Sender<BarUpdate>) -> Self {
        Self {
            subscriptions: Arc::new(SubscriptionManager::new()),
            bar_updates,
            feed_state: None,
            subscription_event_tx: None,
        }
    }

    /// Set the subscription event sender (for pipeline integration)
    pub fn set_subscription_event_sender(&mut self, tx: mpsc::Sender<SubscriptionEvent>) {
        self.subscription_event_tx = Some(tx);
    }

    /// Forward upstream feed state changes to clients
    pub fn set_feed_state(&mut self, state: watch::Receiver<SessionState>) {
        self.feed_state = Some(state);
    }

    /// Get a subscription event channel
    pub fn create_subscription_event_channel() -> (
        mpsc::Sender<SubscriptionEvent>,
        mpsc::Receiver<SubscriptionEvent>,
    ) {
        mpsc::channel(256)
    }

    /// Handle a new client connection
    ///
    /// `incoming` yields the client's text frames; everything for the client
    /// goes to `outgoing`. Returns when `incoming` ends or `outgoing` closes.
    pub async fn handle_connection<S>(
        &self,
        mut incoming: S,
        outgoing: mpsc::Sender<ServerMessage>,
    )
    where
        S: Stream<Item = String> + Send + Unpin,
    {
        let client_id = self.subscriptions.new_client_id();
        info!("New WebSocket connection: {}", client_id);

        let forward_task = tokio::spawn(Self::forward_updates(
            client_id,
            Arc::clone(&self.subscriptions),
            self.bar_updates.subscribe(),
            self.feed_state.clone(),
            outgoing.clone(),
        ));

        while let Some(text) = incoming.next().await {
            if let Err(e) = self.handle_message(client_id, &text).await {
                warn!("Error handling message from {}: {}", client_id, e);
                let _ = outgoing
                    .send(ServerMessage::Error {
                        code: ErrorCode::InvalidMessage,
                        message: e,
                    })
                    .await;
            }
            if outgoing.is_closed() {
                break;
            }
        }

        forward_task.abort();

        // Clean up subscriptions
        for symbol in self.subscriptions.remove_client(client_id) {
            self.notify(SubscriptionEvent::Unsubscribe { symbol }).await;
        }
        info!("WebSocket connection closed: {}", client_id);
    }

    /// Forward bar updates (filtered by subscription) and feed state
    async fn forward_updates(
        client_id: ClientId,
        subscriptions: Arc<SubscriptionManager>,
        mut bar_rx: broadcast::Receiver<BarUpdate>,
        feed_state: Option<watch::Receiver<SessionState>>,
        outgoing: mpsc::Sender<ServerMessage>,
    ) {
        let mut feed_state = match feed_state {
            Some(mut state) => {
                let current = *state.borrow_and_update();
                if outgoing.send(ServerMessage::ConnectionStatus(current)).await.is_err() {
                    return;
                }
                Some(state)
            }
            None => None,
        };

        loop {
            let message = tokio::select! {
                update = bar_rx.recv() => match update {
                    Ok(update) => {
                        if !subscriptions.is_subscribed(client_id, &update.symbol) {
                            continue;
                        }
                        ServerMessage::Bar(update)
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged {} messages", client_id, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = wait_for_change(&mut feed_state) => match changed {
                    Some(state) => ServerMessage::ConnectionStatus(state),
                    None => {
                        feed_state = None;
                        continue;
                    }
                },
            };

            if outgoing.send(message).await.is_err() {
                break;
            }
        }
    }

    /// Handle one text frame from a client
    async fn handle_message(&self, client_id: ClientId, text: &str) -> Result<(), String> {
        let frame: ControlFrame =
            serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {}", e))?;

        let symbol = frame.symbol.trim();
        if symbol.is_empty() {
            return Err("Missing symbol".to_string());
        }

        match frame.op {
            ControlOp::Subscribe => {
                if self.subscriptions.subscribe(client_id, symbol) {
                    self.notify(SubscriptionEvent::Subscribe {
                        symbol: symbol.to_string(),
                    })
                    .await;
                }
            }
            ControlOp::Unsubscribe => {
                if self.subscriptions.unsubscribe(client_id, symbol) {
                    self.notify(SubscriptionEvent::Unsubscribe {
                        symbol: symbol.to_string(),
                    })
                    .await;
                }
            }
        }

        debug!("Client {} {:?} {}", client_id, frame.op, symbol);
        Ok(())
    }

    async fn notify(&self, event: SubscriptionEvent) {
        if let Some(ref tx) = self.subscription_event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Resolve on the next feed state change; pends forever without a watch
async fn wait_for_change(
    state: &mut Option<watch::Receiver<SessionState>>,
) -> Option<SessionState> {
    match state {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for WebSocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketState")
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}
