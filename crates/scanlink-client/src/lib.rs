//! Client side of the scanlink dashboard channel.
//!
//! A [`Connection`] owns one logical WebSocket to the scanner backend. It
//! derives the endpoint, reconnects with jittered exponential backoff up to a
//! fixed budget, decodes inbound frames into a shared [`Store`], and exposes
//! typed command emitters that only deliver while the channel is open.

mod commands;
mod config;
mod connection;
pub mod dispatch;
pub mod endpoint;
mod error;
pub mod history;
pub mod lifecycle;
pub mod store;
pub mod transport;

pub use config::ClientConfig;
pub use connection::Connection;
pub use error::ClientError;
pub use history::{Sample, ServerHistory};
pub use store::{ConnectionStatus, DashboardState, Level, Notification, Store};
pub use transport::{Connector, Frame, Link, WsConnector};

pub use scanlink_core::Phase;
