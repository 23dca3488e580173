//! # Tracking Store Gateway
//!
//! The relay's only view of the durable store. It reads and merges tracking snapshots and
//! reads or sets the fields of an order record it needs; the records themselves are
//! owned elsewhere.
//!
//! [`InMemoryGateway`] is the in-process implementation, built from two
//! [`ResourceActor`](crate::framework::ResourceActor)s. Failure handling around these
//! calls (timeouts, best-effort writes) lives in the tracker, not here.

pub mod entity;
pub mod error;
pub mod memory;

pub use error::*;
pub use memory::*;

use crate::geo::GeoPoint;
use crate::model::{OrderId, OrderStatus, SnapshotPatch, TrackingSnapshot};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Contract with the external durable store.
#[async_trait]
pub trait TrackingGateway: Send + Sync + 'static {
    /// The persisted snapshot, or `None` if the order was never tracked.
    async fn get_snapshot(&self, order_id: &OrderId)
        -> Result<Option<TrackingSnapshot>, GatewayError>;

    /// Merge `patch` into the stored snapshot, creating it if needed. Never replaces.
    async fn merge_snapshot(&self, order_id: &OrderId, patch: SnapshotPatch)
        -> Result<(), GatewayError>;

    /// Coordinates of the order's delivery address.
    ///
    /// `Ok(None)` when the order exists but has no usable coordinates;
    /// [`GatewayError::NotFound`] when the order does not exist.
    async fn get_order_delivery_target(&self, order_id: &OrderId)
        -> Result<Option<GeoPoint>, GatewayError>;

    /// Current status of the order record.
    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatus, GatewayError>;

    async fn set_order_status(&self, order_id: &OrderId, status: OrderStatus)
        -> Result<(), GatewayError>;
}

/// Bound a gateway call by `limit`, mapping expiry to [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| GatewayError::Timeout(limit))?
}
