//! Live pipeline
//!
//! Connects the bridge tick stream to the bar cache: every tick batch is
//! applied to the cached series of its symbols in arrival order and the
//! patched bars are broadcast to chart clients.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;
use terminal_core::{BarUpdate, SessionState};
use terminal_ibkr::{FeedError, FeedEvent, FeedSession, FeedSessionConfig};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::bar_cache::{BarCache, CacheStats};
use crate::websocket::SubscriptionEvent;

/// Stale threshold - if no message for this duration, consider connection stale
const STALE_THRESHOLD_SECS: u64 = 60;

/// Health logging interval
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Health status for the feed connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub is_stale: bool,
}

/// Overall pipeline health
#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealth {
    pub feed: ConnectionHealth,
    pub cache: CacheStats,
    pub healthy: bool,
}

/// Configuration for the LivePipeline
#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub feed: FeedSessionConfig,
}

/// Health metrics for the feed connection (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    connected: AtomicBool,
    last_message_epoch_ms: AtomicU64,
    message_count: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn record_message(&self) {
        self.last_message_epoch_ms.store(now_ms(), Ordering::SeqCst);
        self.message_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_health(&self) -> ConnectionHealth {
        let connected = self.connected.load(Ordering::SeqCst);
        let last_ms = self.last_message_epoch_ms.load(Ordering::SeqCst);
        let message_count = self.message_count.load(Ordering::SeqCst);

        let last_message_time = if last_ms > 0 {
            DateTime::from_timestamp(
                (last_ms / 1000) as i64,
                ((last_ms % 1000) * 1_000_000) as u32,
            )
        } else {
            None
        };

        let is_stale = if connected && last_ms > 0 {
            now_ms().saturating_sub(last_ms) > STALE_THRESHOLD_SECS * 1000
        } else {
            !connected
        };

        ConnectionHealth {
            connected,
            last_message_time,
            message_count,
            is_stale,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Applies feed events to the cache and publishes the results
#[derive(Clone)]
struct Dispatcher {
    cache: BarCache,
    update_tx: broadcast::Sender<BarUpdate>,
    metrics: Arc<ConnectionMetrics>,
}

impl Dispatcher {
    fn dispatch(&self, event: FeedEvent) -> Vec<BarUpdate> {
        match event {
            FeedEvent::Ticks(ticks) => {
                self.metrics.record_message();

                let mut published = Vec::new();
                for tick in &ticks {
                    for update in self.cache.apply_tick(tick) {
                        // No receivers just means no chart is open
                        let _ = self.update_tx.send(update.clone());
                        published.push(update);
                    }
                }
                published
            }
            FeedEvent::State(state) => {
                info!("[Pipeline] Feed state: {:?}", state);
                self.metrics.set_connected(state.is_connected());
                Vec::new()
            }
        }
    }
}

/// Drives the bar cache from the live tick stream
pub struct LivePipeline {
    config: PipelineConfig,
    dispatcher: Dispatcher,
    feed: Option<FeedSession>,
}

impl LivePipeline {
    /// Create a new LivePipeline over `cache`
    pub fn new(config: PipelineConfig, cache: BarCache) -> Self {
        let (update_tx, _) = broadcast::channel(1024);

        Self {
            config,
            dispatcher: Dispatcher {
                cache,
                update_tx,
                metrics: Arc::new(ConnectionMetrics::new()),
            },
            feed: None,
        }
    }

    /// Sender side of the bar update broadcast (for WebSocket state)
    pub fn bar_updates(&self) -> broadcast::Sender<BarUpdate> {
        self.dispatcher.update_tx.clone()
    }

    /// Receive bar updates
    pub fn subscribe_updates(&self) -> broadcast::Receiver<BarUpdate> {
        self.dispatcher.update_tx.subscribe()
    }

    /// Feed connection state, once started
    pub fn feed_state(&self) -> Option<watch::Receiver<SessionState>> {
        self.feed.as_ref().map(FeedSession::watch_state)
    }

    pub fn cache(&self) -> &BarCache {
        &self.dispatcher.cache
    }

    /// Open the feed session and start applying ticks
    pub fn start(&mut self) -> Result<(), FeedError> {
        info!("[Pipeline] Starting live pipeline");

        let (mut feed, mut events) = FeedSession::new(self.config.feed.clone());
        feed.connect()?;

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let updates = dispatcher.dispatch(event);
                if !updates.is_empty() {
                    debug!("[Pipeline] Published {} bar updates", updates.len());
                }
            }
            info!("[Pipeline] Feed event stream ended");
        });

        // Periodic health logging
        let metrics = Arc::clone(&self.dispatcher.metrics);
        let cache = self.dispatcher.cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
            loop {
                interval.tick().await;

                let health = metrics.get_health();
                let status = if health.connected {
                    format!(
                        "connected ({}s ago)",
                        health
                            .last_message_time
                            .map(|t| (Utc::now() - t).num_seconds())
                            .unwrap_or(0)
                    )
                } else {
                    "disconnected".to_string()
                };

                info!(
                    "[Pipeline] Health: feed={}, cached series={}",
                    status,
                    cache.stats().entries
                );
            }
        });

        self.feed = Some(feed);
        Ok(())
    }

    /// Apply one feed event directly
    pub fn apply_event(&self, event: FeedEvent) -> Vec<BarUpdate> {
        self.dispatcher.dispatch(event)
    }

    /// Subscribe to ticks for a symbol upstream
    pub async fn subscribe(&self, symbol: &str) -> Result<(), FeedError> {
        info!("[Pipeline] Subscribing to {}", symbol);
        match self.feed {
            Some(ref feed) => feed.subscribe(symbol).await,
            None => Ok(()),
        }
    }

    /// Drop ticks for a symbol upstream
    pub async fn unsubscribe(&self, symbol: &str) -> Result<(), FeedError> {
        info!("[Pipeline] Unsubscribing from {}", symbol);
        match self.feed {
            Some(ref feed) => feed.unsubscribe(symbol).await,
            None => Ok(()),
        }
    }

    /// Process subscription events from chart clients
    pub async fn process_subscription_events(&self, mut rx: mpsc::Receiver<SubscriptionEvent>) {
        info!("[Pipeline] Started processing subscription events");

        while let Some(event) = rx.recv().await {
            let result = match &event {
                SubscriptionEvent::Subscribe { symbol } => self.subscribe(symbol).await,
                SubscriptionEvent::Unsubscribe { symbol } => self.unsubscribe(symbol).await,
            };

            if let Err(e) = result {
                warn!("[Pipeline] Failed to forward {:?}: {}", event, e);
            }
        }

        info!("[Pipeline] Subscription event channel closed");
    }

    /// Get health status
    pub fn health(&self) -> PipelineHealth {
        let feed = self.dispatcher.metrics.get_health();
        let healthy = !feed.is_stale;

        PipelineHealth {
            feed,
            cache: self.dispatcher.cache.stats(),
            healthy,
        }
    }

    /// Close the feed session
    pub async fn shutdown(&self) {
        if let Some(ref feed) = self.feed {
            let _ = feed.close().await;
        }
    }
}

impl std::fmt::Debug for LivePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePipeline")
            .field("config", &self.config)
            .field("feed", &self.feed)
            .finish()
    }
}
