//! WebSocket infrastructure for streaming bar updates
//!
//! Chart clients subscribe per symbol; the live pipeline publishes bar
//! updates which are forwarded to the clients watching that symbol.

mod handler;
mod subscription;

pub use handler::{SubscriptionEvent, WebSocketState};
pub use subscription::{ClientId, SubscriptionManager};
