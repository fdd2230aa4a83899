//! Chart services for the Trading Dashboard
//!
//! This crate owns the candle cache and everything that keeps it current:
//! history fetches, resampling for timeframes the upstream cannot serve,
//! live tick application and fan-out to chart clients.

pub mod bar_cache;
pub mod drawing;
pub mod live;
pub mod pipeline;
pub mod resample;
pub mod websocket;

pub use bar_cache::{normalize_history, BarCache, BarCacheError, CacheEntry, CacheStats};
pub use drawing::{render, Drawing, DrawingState, Point, Shape, Tool};
pub use live::apply_tick;
pub use pipeline::{ConnectionHealth, LivePipeline, PipelineConfig, PipelineHealth};
pub use resample::{resample, resample_label};
pub use websocket::{ClientId, SubscriptionEvent, SubscriptionManager, WebSocketState};
