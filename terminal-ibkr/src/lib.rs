//! IBKR bridge integration for the Trading Dashboard
//!
//! The bridge exposes historical bars over REST (`POST /api/history`) and
//! live ticks over a WebSocket (`/ws/stream`). Both default to
//! `localhost:8000`.

pub mod client;
pub mod reconnect;
pub mod types;
pub mod websocket;

pub use client::IbkrClient;
pub use reconnect::ReconnectPolicy;
pub use types::{HistoryRequest, HistoryResponse, WhatToShow, DEFAULT_API_BASE, DEFAULT_WS_URL};
pub use websocket::{
    parse_tick_frame, FeedError, FeedEvent, FeedSession, FeedSessionConfig, SessionCore,
};
