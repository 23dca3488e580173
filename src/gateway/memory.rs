//! In-process store built on the resource actor framework.

use crate::framework::{FrameworkError, ResourceActor, ResourceClient};
use crate::gateway::{GatewayError, SeedError, TrackingGateway};
use crate::geo::GeoPoint;
use crate::model::{
    NewOrder, OrderId, OrderRecord, OrderStatus, OrderUpdate, SnapshotPatch, TrackingSnapshot,
};
use async_trait::async_trait;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// [`TrackingGateway`] over one actor holding snapshots and one holding order records.
///
/// Cloning shares the same actors.
#[derive(Clone)]
pub struct InMemoryGateway {
    snapshots: ResourceClient<TrackingSnapshot>,
    orders: ResourceClient<OrderRecord>,
}

impl InMemoryGateway {
    /// Wrap existing clients; tests hand in [`MockClient`](crate::framework::mock::MockClient)s here.
    pub fn new(
        snapshots: ResourceClient<TrackingSnapshot>,
        orders: ResourceClient<OrderRecord>,
    ) -> Self {
        Self { snapshots, orders }
    }

    /// Spawn both store actors and return the gateway with their task handles.
    ///
    /// The actors stop once every clone of the gateway is dropped.
    pub fn start(buffer_size: usize) -> (Self, Vec<JoinHandle<()>>) {
        let (snapshot_actor, snapshots) = ResourceActor::<TrackingSnapshot>::new(buffer_size);
        let (order_actor, orders) = ResourceActor::<OrderRecord>::new(buffer_size);

        let handles = vec![
            tokio::spawn(snapshot_actor.run()),
            tokio::spawn(order_actor.run()),
        ];
        (Self::new(snapshots, orders), handles)
    }

    /// Register an order record, as the order-management surface would.
    pub async fn insert_order(&self, order: OrderRecord) -> Result<OrderRecord, GatewayError> {
        let params = NewOrder {
            status: order.status,
            delivery_target: order.delivery_target,
        };
        Ok(self.orders.create(order.id, params).await?)
    }

    /// Register every record, failing on the first one the store refuses.
    pub async fn seed_orders(
        &self,
        orders: impl IntoIterator<Item = OrderRecord>,
    ) -> Result<usize, GatewayError> {
        let mut count = 0;
        for order in orders {
            self.insert_order(order).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Load order records from a JSON array file and register them.
    pub async fn seed_from_file(&self, path: impl AsRef<Path>) -> Result<usize, SeedError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let orders = parse_seed(&text)?;
        let count = self.seed_orders(orders).await?;
        info!(path = %path.display(), count, "Seeded orders");
        Ok(count)
    }

    async fn order(&self, order_id: &OrderId) -> Result<OrderRecord, GatewayError> {
        self.orders
            .get(order_id.clone())
            .await?
            .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))
    }
}

/// Parse the seed format: `[{"id", "status", "deliveryAddress": {"lat", "lng"}}]`.
pub fn parse_seed(text: &str) -> Result<Vec<OrderRecord>, serde_json::Error> {
    serde_json::from_str(text)
}

#[async_trait]
impl TrackingGateway for InMemoryGateway {
    #[instrument(skip_all, fields(order_id = %order_id))]
    async fn get_snapshot(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<TrackingSnapshot>, GatewayError> {
        Ok(self.snapshots.get(order_id.clone()).await?)
    }

    #[instrument(skip_all, fields(order_id = %order_id))]
    async fn merge_snapshot(
        &self,
        order_id: &OrderId,
        patch: SnapshotPatch,
    ) -> Result<(), GatewayError> {
        debug!(?patch, "merge_snapshot called");
        self.snapshots.merge(order_id.clone(), patch).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(order_id = %order_id))]
    async fn get_order_delivery_target(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<GeoPoint>, GatewayError> {
        let order = self.order(order_id).await?;
        Ok(order.delivery_target.filter(GeoPoint::is_valid))
    }

    #[instrument(skip_all, fields(order_id = %order_id))]
    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatus, GatewayError> {
        Ok(self.order(order_id).await?.status)
    }

    #[instrument(skip_all, fields(order_id = %order_id, %status))]
    async fn set_order_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), GatewayError> {
        self.orders
            .update(order_id.clone(), OrderUpdate { status })
            .await
            .map_err(|e| match e {
                FrameworkError::NotFound(_) => GatewayError::NotFound(order_id.to_string()),
                other => GatewayError::from(other),
            })?;
        Ok(())
    }
}
