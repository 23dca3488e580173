use crate::geo::GeoPoint;
use crate::model::{OrderId, OrderStatus};
use serde::{Deserialize, Serialize};

/// The slice of an order record the relay cares about.
///
/// The full record (items, payment, customer profile) is owned by the order-management
/// surface; the relay only reads its status and delivery coordinates and writes its status.
///
/// # Actor Framework
/// Implements [`ActorEntity`](crate::framework::ActorEntity) (see
/// `gateway::entity`) so the in-process store can hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: OrderId,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, rename = "deliveryAddress", skip_serializing_if = "Option::is_none")]
    pub delivery_target: Option<GeoPoint>,
}

impl OrderRecord {
    pub fn new(id: OrderId, status: OrderStatus, delivery_target: Option<GeoPoint>) -> Self {
        Self {
            id,
            status,
            delivery_target,
        }
    }
}

/// Payload for creating an order record.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub status: OrderStatus,
    pub delivery_target: Option<GeoPoint>,
}

/// Payload for changing an order's status.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub status: OrderStatus,
}
