//! # Wire Protocol
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": {...}}`.
//! [`decode`] is the only way inbound frames enter the relay: anything it rejects is
//! dropped here and never reaches the trackers or the geo math.

use crate::geo::GeoPoint;
use crate::model::{CourierId, OrderId, OrderStatus, RoutePolyline, TrackingSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// INBOUND
// =============================================================================

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    JoinTracking(JoinTracking),
    LeaveTracking(LeaveTracking),
    UpdateLocation(LocationReport),
    OrderStatusChange(StatusChangeRequest),
}

impl InboundEvent {
    pub fn order_id(&self) -> &OrderId {
        match self {
            InboundEvent::JoinTracking(e) => &e.order_id,
            InboundEvent::LeaveTracking(e) => &e.order_id,
            InboundEvent::UpdateLocation(e) => &e.order_id,
            InboundEvent::OrderStatusChange(e) => &e.order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::JoinTracking(_) => "join-tracking",
            InboundEvent::LeaveTracking(_) => "leave-tracking",
            InboundEvent::UpdateLocation(_) => "update-location",
            InboundEvent::OrderStatusChange(_) => "order-status-change",
        }
    }
}

/// Who a connection says it is. Informational only; nothing is authorized on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Courier,
    Customer,
    Admin,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTracking {
    pub order_id: OrderId,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveTracking {
    pub order_id: OrderId,
}

/// A courier position fix.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub order_id: OrderId,
    #[serde(alias = "deliveryBoyId")]
    pub courier_id: CourierId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub route_polyline: Option<RoutePolyline>,
}

impl LocationReport {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Events the relay sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Persisted snapshot, sent only to a connection that just joined.
    TrackingData(TrackingSnapshot),
    LocationUpdate(TrackingSnapshot),
    StatusUpdate(StatusNotice),
    /// Last event a room receives before it is closed.
    TrackingEnded(StatusNotice),
    /// Sent only to the connection whose status change failed.
    StatusChangeFailed(StatusChangeFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotice {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeFailure {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub reason: String,
}

// =============================================================================
// CODEC
// =============================================================================

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },

    #[error("Empty {0}")]
    EmptyId(&'static str),
}

/// Parse and validate one inbound text frame.
pub fn decode(text: &str) -> Result<InboundEvent, ProtocolError> {
    let event: InboundEvent = serde_json::from_str(text)?;

    if event.order_id().as_str().trim().is_empty() {
        return Err(ProtocolError::EmptyId("orderId"));
    }
    if let InboundEvent::UpdateLocation(report) = &event {
        if report.courier_id.0.trim().is_empty() {
            return Err(ProtocolError::EmptyId("courierId"));
        }
        if !report.position().is_valid() {
            return Err(ProtocolError::InvalidCoordinates {
                lat: report.lat,
                lng: report.lng,
            });
        }
    }
    Ok(event)
}

pub fn encode(event: &OutboundEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
