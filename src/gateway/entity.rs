//! [`ActorEntity`] implementations for the documents the in-process store holds.

use crate::framework::ActorEntity;
use crate::gateway::{OrderFinished, SnapshotClosed};
use crate::model::{
    NewOrder, OrderId, OrderRecord, OrderStatus, OrderUpdate, SnapshotPatch, TrackingSnapshot,
};
use async_trait::async_trait;

#[async_trait]
impl ActorEntity for OrderRecord {
    type Id = OrderId;
    type Create = NewOrder;
    type Update = OrderUpdate;
    type Error = OrderFinished;

    fn from_create_params(id: OrderId, params: NewOrder) -> Result<Self, OrderFinished> {
        Ok(Self::new(id, params.status, params.delivery_target))
    }

    /// Moves the order to the requested status.
    ///
    /// Re-applying the current status is accepted; leaving a terminal one is not.
    async fn on_update(&mut self, update: OrderUpdate) -> Result<(), OrderFinished> {
        if self.status.is_terminal() && update.status != self.status {
            return Err(OrderFinished {
                order_id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = update.status;
        Ok(())
    }
}

#[async_trait]
impl ActorEntity for TrackingSnapshot {
    type Id = OrderId;
    type Create = OrderStatus;
    type Update = SnapshotPatch;
    type Error = SnapshotClosed;

    fn from_create_params(id: OrderId, status: OrderStatus) -> Result<Self, SnapshotClosed> {
        Ok(Self::new(id, status))
    }

    fn blank(id: &OrderId) -> Option<Self> {
        Some(Self::new(id.clone(), OrderStatus::default()))
    }

    async fn on_update(&mut self, patch: SnapshotPatch) -> Result<(), SnapshotClosed> {
        if self.is_closed() {
            return Err(SnapshotClosed {
                order_id: self.order_id.clone(),
                status: self.status,
            });
        }
        self.apply(patch);
        Ok(())
    }
}
