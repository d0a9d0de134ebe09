//! Core types for the scanlink channel.
//!
//! This crate provides the wire envelope, the closed message enums for each
//! direction, and the telemetry value objects carried inside them. It does no
//! I/O; the client and the mock server build on it.

mod api;
mod message;
mod telemetry;

pub use api::ApiResponse;
pub use message::{
    now_millis, ClientMessage, DecodeError, Envelope, ScannerAck, ScannerCommand, ServerMessage,
};
pub use telemetry::{LogLine, LogRecord, ServerInfo, StatsData};

use std::fmt;

/// Close code used for intentional client-side closes.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Mounted, waiting for the initial connect delay.
    #[default]
    Idle,
    /// Transport open attempt in flight.
    Connecting,
    /// Normal operation.
    Open,
    /// Lost the connection, a retry timer is pending.
    ReconnectScheduled,
    /// Retry budget exhausted. Terminal.
    Failed,
    /// Closed with a normal closure. Terminal.
    Closed,
}

impl Phase {
    pub fn is_open(self) -> bool {
        self == Phase::Open
    }

    /// No further automatic transitions happen from a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Failed | Phase::Closed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::ReconnectScheduled => "reconnecting",
            Phase::Failed => "failed",
            Phase::Closed => "closed",
        };
        f.write_str(label)
    }
}
