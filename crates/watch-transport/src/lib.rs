//! One reconnecting websocket per dashboard session.
//!
//! [`Transport`] owns the socket exclusively: it frames raw text both ways,
//! reconnects with a fixed delay after unexpected closure, and reports
//! Open / Error / Close transitions to registered listeners so dependent
//! subscriptions can be replayed. It never interprets payloads.

use thiserror::Error;

mod config;
mod connection;
mod listeners;
mod transport;

pub use config::TransportConfig;
pub use connection::{ConnectionEvent, ConnectionEventKind, ConnectionListener, ConnectionState};
pub use listeners::{ListenerRegistry, ListenerToken};
pub use transport::{FrameReceiver, Transport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport closed")]
    Closed,
    #[error("connection failed after {attempts} attempts")]
    ConnectFailed { attempts: u32 },
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
