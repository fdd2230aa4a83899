//! Core types for the Trading Dashboard
//!
//! This crate defines the shared data structures used across the dashboard:
//! bars and series keys, timeframes, ticks, the streaming wire protocol and
//! the history backend seam.

pub mod bar;
pub mod error;
pub mod feed;
pub mod history;
pub mod tick;
pub mod timeframe;

pub use bar::{
    parse_bar_time, Bar, BarUpdate, Direction, RawBar, RawTime, SeriesKey, SeriesStats,
    VolumePoint, INCOMPLETE_BAR_THRESHOLD,
};
pub use error::{TerminalError, TerminalResult};
pub use feed::{
    ControlFrame, ControlOp, ErrorCode, InboundFrame, ServerMessage, SessionState,
    TICK_FRAME_TYPE,
};
pub use history::HistorySource;
pub use tick::Tick;
pub use timeframe::{SeriesSource, Timeframe};
