//! Canopy client runtime
//!
//! Keeps a local [`Archive`](canopy_archive::Archive) converging with a chat
//! server over an unreliable line-oriented connection. The pieces:
//!
//! - [`NetClient`]: the connection state machine (send/receive loops,
//!   liveness watchdog, welcome seeding, parent backfill, presence)
//! - [`Composer`]: builds outbound records onto a queue that survives
//!   reconnects
//! - [`spawn_supervisor`]: reconnect loop with a fixed delay
//! - [`spawn_history`]: single-writer cursor actor for the frontend
//! - [`should_notify`]: notification policy

pub mod composer;
pub mod config;
pub mod connection;
pub mod constants;
pub mod history;
pub mod notify;
pub mod presence;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use composer::Composer;
pub use config::ClientConfig;
pub use connection::{ConnectionStatus, DisconnectHandler, NetClient, ReceiveHandler};
pub use history::{HistoryHandle, HistoryView, spawn_history, spawn_history_with_capacity};
pub use notify::{NotificationPolicy, Notifier, should_notify};
pub use presence::{PresenceError, Session, SessionList};
pub use supervisor::{Supervisor, quit, spawn_supervisor};
pub use transport::{BoxedStream, Connector, Transport, tcp_connector};

/// Errors from the client runtime.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server address is empty")]
    EmptyAddress,
    #[error("username is empty")]
    EmptyUsername,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("client shut down")]
    Shutdown,
}
