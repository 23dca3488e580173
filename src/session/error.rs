//! Error types for the session registry.

use crate::model::ConnectionId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// The connection was never registered or has already disconnected.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection handle is already registered.
    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// The registry actor has stopped.
    #[error("Session registry closed")]
    Closed,
}
