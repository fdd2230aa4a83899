//! Streaming protocol types
//!
//! The same `{op, symbol}` control frame is used upstream (dashboard to
//! tick bridge) and downstream (chart client to dashboard server).

use serde::{Deserialize, Serialize};

use crate::bar::BarUpdate;

// ============================================================================
// Control frames (client -> server)
// ============================================================================

/// Subscription operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlOp {
    Subscribe,
    Unsubscribe,
}

/// `{"op": "subscribe", "symbol": "AAPL"}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlFrame {
    pub op: ControlOp,
    pub symbol: String,
}

impl ControlFrame {
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self {
            op: ControlOp::Subscribe,
            symbol: symbol.into(),
        }
    }

    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self {
            op: ControlOp::Unsubscribe,
            symbol: symbol.into(),
        }
    }
}

// ============================================================================
// Data frames (server -> client)
// ============================================================================

/// Envelope of every inbound bridge frame: `{"type": ..., "data": ...}`
///
/// `data` is left undecoded so that frame types we do not consume never
/// fail parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Frame type carrying tick batches
pub const TICK_FRAME_TYPE: &str = "tick";

/// Messages pushed from the dashboard server to chart clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Trailing bar of a cached series changed
    Bar(BarUpdate),
    /// Upstream feed connection changed state
    ConnectionStatus(SessionState),
    /// Client sent something we could not handle
    Error { code: ErrorCode, message: String },
}

/// Error codes for chart client errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
}

/// Feed session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No socket; commands are queued
    Disconnected,
    /// Socket handshake in progress; commands are queued
    Connecting,
    /// Socket open; commands are sent immediately
    Connected,
    /// Explicitly closed, terminal
    Closed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}
