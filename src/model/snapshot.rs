use crate::geo::{GeoPoint, TripMetrics};
use crate::model::{CourierId, OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Route drawn by observers, supplied by the courier app. Stored and relayed untouched.
pub type RoutePolyline = serde_json::Value;

/// The most recently known state of one order's delivery.
///
/// `distance_km` and `eta_minutes` are present exactly when both the courier and the
/// customer positions are known; [`TrackingSnapshot::refresh_metrics`] maintains that.
/// Once `status` is terminal the snapshot no longer changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier_id: Option<CourierId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier_position: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_position: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_position: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_polyline: Option<RoutePolyline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

impl TrackingSnapshot {
    pub fn new(order_id: OrderId, status: OrderStatus) -> Self {
        Self {
            order_id,
            courier_id: None,
            courier_position: None,
            customer_position: None,
            origin_position: None,
            route_polyline: None,
            distance_km: None,
            eta_minutes: None,
            status,
            updated_at: Utc::now(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn metrics(&self) -> Option<TripMetrics> {
        match (self.courier_position, self.customer_position) {
            (Some(courier), Some(customer)) => Some(TripMetrics::between(courier, customer)),
            _ => None,
        }
    }

    /// Recompute distance and ETA from the current positions, clearing both when either
    /// position is unknown.
    pub fn refresh_metrics(&mut self) {
        let metrics = self.metrics();
        self.distance_km = metrics.map(|m| m.distance_km);
        self.eta_minutes = metrics.map(|m| m.eta_minutes);
    }

    /// Record a courier fix and the metrics derived from it.
    pub fn record_courier_position(
        &mut self,
        courier_id: CourierId,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) {
        self.courier_id = Some(courier_id);
        self.courier_position = Some(position);
        self.refresh_metrics();
        self.updated_at = at;
    }

    /// Fold in a stored copy that arrived after this one was built locally. The local
    /// courier fix is newer; fields only the store knew are taken from `stored`.
    pub fn absorb(&mut self, stored: TrackingSnapshot, keep_status: bool) {
        if stored.origin_position.is_some() {
            self.origin_position = stored.origin_position;
        }
        if self.customer_position.is_none() {
            self.customer_position = stored.customer_position;
        }
        if self.route_polyline.is_none() {
            self.route_polyline = stored.route_polyline;
        }
        if self.courier_position.is_none() {
            self.courier_id = stored.courier_id;
            self.courier_position = stored.courier_position;
        }
        if !keep_status {
            self.status = stored.status;
        }
        self.refresh_metrics();
    }

    /// Merge a partial update. Fields the patch does not carry are kept.
    pub fn apply(&mut self, patch: SnapshotPatch) {
        if let Some(courier_id) = patch.courier_id {
            self.courier_id = Some(courier_id);
        }
        if let Some(position) = patch.courier_position {
            self.courier_position = Some(position);
        }
        if let Some(position) = patch.customer_position {
            self.customer_position = Some(position);
        }
        if let Some(position) = patch.origin_position {
            self.origin_position = Some(position);
        }
        if let Some(route) = patch.route_polyline {
            self.route_polyline = Some(route);
        }
        if let Some(distance) = patch.distance_km {
            self.distance_km = Some(distance);
        }
        if let Some(eta) = patch.eta_minutes {
            self.eta_minutes = Some(eta);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.updated_at {
            self.updated_at = at;
        }
    }
}

/// Partial snapshot written with merge semantics: `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier_id: Option<CourierId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier_position: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_position: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_position: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_polyline: Option<RoutePolyline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SnapshotPatch {
    /// Everything a courier fix touched on `snapshot`.
    pub fn location(snapshot: &TrackingSnapshot) -> Self {
        Self {
            courier_id: snapshot.courier_id.clone(),
            courier_position: snapshot.courier_position,
            customer_position: snapshot.customer_position,
            origin_position: snapshot.origin_position,
            route_polyline: snapshot.route_polyline.clone(),
            distance_km: snapshot.distance_km,
            eta_minutes: snapshot.eta_minutes,
            status: None,
            updated_at: Some(snapshot.updated_at),
        }
    }

    pub fn status(status: OrderStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(at),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }
}
