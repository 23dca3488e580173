#![allow(dead_code)]

use delivery_relay::geo::GeoPoint;
use delivery_relay::model::ConnectionId;
use delivery_relay::protocol::{
    InboundEvent, JoinTracking, LeaveTracking, LocationReport, OutboundEvent, Role,
    StatusChangeRequest,
};
use delivery_relay::model::OrderStatus;
use delivery_relay::relay::Relay;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

pub fn kitchen() -> GeoPoint {
    GeoPoint::new(28.6139, 77.2090)
}

pub fn customer() -> GeoPoint {
    GeoPoint::new(28.6200, 77.2295)
}

pub fn join(order_id: &str, role: Role) -> InboundEvent {
    InboundEvent::JoinTracking(JoinTracking {
        order_id: order_id.into(),
        role,
    })
}

pub fn leave(order_id: &str) -> InboundEvent {
    InboundEvent::LeaveTracking(LeaveTracking {
        order_id: order_id.into(),
    })
}

pub fn location(order_id: &str, courier_id: &str, at: GeoPoint) -> InboundEvent {
    InboundEvent::UpdateLocation(LocationReport {
        order_id: order_id.into(),
        courier_id: courier_id.into(),
        lat: at.lat,
        lng: at.lng,
        route_polyline: None,
    })
}

pub fn status_change(order_id: &str, status: OrderStatus) -> InboundEvent {
    InboundEvent::OrderStatusChange(StatusChangeRequest {
        order_id: order_id.into(),
        status,
    })
}

/// Connect and join `order_id` in one step.
pub async fn observer(relay: &Relay, order_id: &str, role: Role) -> (ConnectionId, Receiver<OutboundEvent>) {
    let (connection, rx) = relay.connect().await.expect("connect");
    relay.handle(connection, join(order_id, role)).await.expect("join");
    (connection, rx)
}

/// Next event, failing the test if none arrives within two seconds.
pub async fn recv(rx: &mut Receiver<OutboundEvent>) -> OutboundEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("outbound queue closed")
}

/// Assert that nothing arrives for a short while.
pub async fn assert_silent(rx: &mut Receiver<OutboundEvent>) {
    let next = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(next.is_err(), "expected no event, got {:?}", next);
}

/// Poll `check` until it returns true, for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within two seconds");
}
