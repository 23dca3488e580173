//! Error types for the per-order trackers.

use crate::gateway::GatewayError;
use crate::model::{OrderId, OrderStatus};
use crate::session::RegistryError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrackingError {
    /// The store has no order with this id.
    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),

    /// The order already reached a terminal status; nothing changes it any more.
    #[error("Tracking for order {order_id} already ended with status {status}")]
    TrackingEnded { order_id: OrderId, status: OrderStatus },

    #[error("Store error: {0}")]
    Store(#[from] GatewayError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The tracker pool no longer accepts work.
    #[error("Tracker pool stopped")]
    Stopped,
}
