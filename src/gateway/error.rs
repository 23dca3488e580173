//! Error types for the tracking store.

use crate::framework::FrameworkError;
use crate::model::{OrderId, OrderStatus};
use std::time::Duration;
use thiserror::Error;

/// Errors a [`TrackingGateway`](super::TrackingGateway) call can produce.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// The referenced order or document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store refused the write.
    #[error("Rejected by store: {0}")]
    Rejected(String),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within the configured limit.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

impl From<FrameworkError> for GatewayError {
    fn from(e: FrameworkError) -> Self {
        match e {
            FrameworkError::NotFound(id) => GatewayError::NotFound(id),
            FrameworkError::EntityError(e) => GatewayError::Rejected(e.to_string()),
            other => GatewayError::Unavailable(other.to_string()),
        }
    }
}

/// Order records refuse to move out of a terminal status.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Order {order_id} is already {status}")]
pub struct OrderFinished {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// A snapshot with a terminal status no longer accepts writes.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Tracking for order {order_id} ended with status {status}")]
pub struct SnapshotClosed {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// Failure to load the order seed file.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Cannot read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed seed file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot store seeded order: {0}")]
    Store(#[from] GatewayError),
}
