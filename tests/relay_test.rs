//! End-to-end flows through a real registry, real trackers and the in-process store.

mod common;

use common::*;
use delivery_relay::config::Config;
use delivery_relay::gateway::TrackingGateway;
use delivery_relay::lifecycle::RelaySystem;
use delivery_relay::model::{OrderId, OrderRecord, OrderStatus};
use delivery_relay::protocol::{OutboundEvent, Role, StatusNotice};
use delivery_relay::relay::RelayError;
use delivery_relay::tracker::TrackingError;
use std::time::Duration;

async fn system_with_orders(config: Config, orders: Vec<OrderRecord>) -> RelaySystem {
    let system = RelaySystem::in_memory(config);
    system
        .store()
        .expect("in-memory store")
        .seed_orders(orders)
        .await
        .expect("seed orders");
    system
}

async fn delhi_system() -> RelaySystem {
    system_with_orders(
        Config::default(),
        vec![OrderRecord::new("order_1".into(), OrderStatus::PickedUp, Some(customer()))],
    )
    .await
}

#[tokio::test]
async fn test_joined_observer_receives_location_with_metrics() {
    let system = delhi_system().await;
    let relay = &system.relay;

    let (_customer, mut rx) = observer(relay, "order_1", Role::Customer).await;
    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay.handle(courier, location("order_1", "courier_1", kitchen())).await.unwrap();

    let OutboundEvent::LocationUpdate(snapshot) = recv(&mut rx).await else {
        panic!("expected location-update");
    };
    assert_eq!(snapshot.order_id, OrderId::from("order_1"));
    assert_eq!(snapshot.courier_id, Some("courier_1".into()));
    assert_eq!(snapshot.courier_position, Some(kitchen()));
    assert_eq!(snapshot.customer_position, Some(customer()));
    assert_eq!(snapshot.eta_minutes, Some(6));
    let distance = snapshot.distance_km.unwrap();
    assert!((distance - 2.1).abs() < 0.05, "got {distance}");
    assert_eq!(snapshot.status, OrderStatus::PickedUp);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_updates_reach_every_subscriber_in_send_order() {
    let system = delhi_system().await;
    let relay = &system.relay;

    let (_customer, mut customer_rx) = observer(relay, "order_1", Role::Customer).await;
    let (_admin, mut admin_rx) = observer(relay, "order_1", Role::Admin).await;
    let (courier, _courier_rx) = relay.connect().await.unwrap();

    let first = kitchen();
    let second = delivery_relay::geo::GeoPoint::new(28.6170, 77.2190);
    relay.handle(courier, location("order_1", "courier_1", first)).await.unwrap();
    relay.handle(courier, location("order_1", "courier_1", second)).await.unwrap();

    for rx in [&mut customer_rx, &mut admin_rx] {
        let positions: Vec<_> = [recv(rx).await, recv(rx).await]
            .into_iter()
            .map(|event| match event {
                OutboundEvent::LocationUpdate(snapshot) => snapshot.courier_position,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(positions, vec![Some(first), Some(second)]);
    }

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leave_stops_delivery_to_that_connection_only() {
    let system = delhi_system().await;
    let relay = &system.relay;

    let (customer, mut customer_rx) = observer(relay, "order_1", Role::Customer).await;
    let (_admin, mut admin_rx) = observer(relay, "order_1", Role::Admin).await;
    let (courier, _courier_rx) = relay.connect().await.unwrap();

    relay.handle(customer, leave("order_1")).await.unwrap();
    relay.handle(courier, location("order_1", "courier_1", kitchen())).await.unwrap();

    assert!(matches!(recv(&mut admin_rx).await, OutboundEvent::LocationUpdate(_)));
    assert_silent(&mut customer_rx).await;

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_removes_connection_from_rooms() {
    let system = delhi_system().await;
    let relay = &system.relay;

    let (customer, mut customer_rx) = observer(relay, "order_1", Role::Customer).await;
    let (_admin, mut admin_rx) = observer(relay, "order_1", Role::Admin).await;
    relay.disconnect(customer).await.unwrap();
    assert_eq!(customer_rx.recv().await, None);

    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay.handle(courier, location("order_1", "courier_1", kitchen())).await.unwrap();
    assert!(matches!(recv(&mut admin_rx).await, OutboundEvent::LocationUpdate(_)));

    let health = relay.health().await.unwrap();
    assert_eq!(health.active_rooms, 1);
    assert_eq!(health.connected_clients, 2);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_terminal_status_ends_session_once() {
    let system = delhi_system().await;
    let relay = &system.relay;

    let (_customer, mut customer_rx) = observer(relay, "order_1", Role::Customer).await;
    let (courier, mut courier_rx) = observer(relay, "order_1", Role::Courier).await;

    relay
        .handle(courier, status_change("order_1", OrderStatus::Delivered))
        .await
        .unwrap();

    let notice = StatusNotice { order_id: "order_1".into(), status: OrderStatus::Delivered };
    for rx in [&mut customer_rx, &mut courier_rx] {
        assert_eq!(recv(rx).await, OutboundEvent::StatusUpdate(notice.clone()));
        assert_eq!(recv(rx).await, OutboundEvent::TrackingEnded(notice.clone()));
    }
    assert_eq!(relay.health().await.unwrap().active_rooms, 0);

    // A late fix neither reaches anyone nor revives the room.
    relay.handle(courier, location("order_1", "courier_1", kitchen())).await.unwrap();
    assert_silent(&mut customer_rx).await;
    assert_silent(&mut courier_rx).await;
    assert_eq!(relay.health().await.unwrap().active_rooms, 0);

    // A later join starts a fresh room and only gets the final snapshot.
    let (_late, mut late_rx) = observer(relay, "order_1", Role::Admin).await;
    let OutboundEvent::TrackingData(snapshot) = recv(&mut late_rx).await else {
        panic!("expected tracking-data");
    };
    assert_eq!(snapshot.status, OrderStatus::Delivered);
    assert_eq!(relay.health().await.unwrap().active_rooms, 1);
    assert_silent(&mut customer_rx).await;

    let store = system.store().unwrap();
    assert_eq!(
        store.get_order_status(&"order_1".into()).await.unwrap(),
        OrderStatus::Delivered
    );

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_change_after_end_is_rejected() {
    let system = delhi_system().await;
    let relay = &system.relay;
    let (admin, mut admin_rx) = observer(relay, "order_1", Role::Admin).await;

    relay.handle(admin, status_change("order_1", OrderStatus::Cancelled)).await.unwrap();
    recv(&mut admin_rx).await;
    recv(&mut admin_rx).await;

    let result = relay.handle(admin, status_change("order_1", OrderStatus::OnTheWay)).await;
    assert!(matches!(
        result,
        Err(RelayError::Tracking(TrackingError::TrackingEnded { status: OrderStatus::Cancelled, .. }))
    ));
    let OutboundEvent::StatusChangeFailed(failure) = recv(&mut admin_rx).await else {
        panic!("expected status-change-failed");
    };
    assert_eq!(failure.status, OrderStatus::OnTheWay);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_delivery_target_skips_metrics() {
    let system = system_with_orders(
        Config::default(),
        vec![OrderRecord::new("order_2".into(), OrderStatus::OnTheWay, None)],
    )
    .await;
    let relay = &system.relay;

    let (_customer, mut rx) = observer(relay, "order_2", Role::Customer).await;
    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay.handle(courier, location("order_2", "courier_1", kitchen())).await.unwrap();

    let OutboundEvent::LocationUpdate(snapshot) = recv(&mut rx).await else {
        panic!("expected location-update");
    };
    assert_eq!(snapshot.courier_position, Some(kitchen()));
    assert_eq!(snapshot.customer_position, None);
    assert_eq!(snapshot.distance_km, None);
    assert_eq!(snapshot.eta_minutes, None);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_order_is_dropped() {
    let system = delhi_system().await;
    let relay = &system.relay;

    let (_watcher, mut rx) = observer(relay, "ghost", Role::Admin).await;
    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay.handle(courier, location("ghost", "courier_1", kitchen())).await.unwrap();
    assert_silent(&mut rx).await;

    // The connection keeps working.
    relay.handle(courier, join("order_1", Role::Courier)).await.unwrap();
    relay.handle(courier, location("order_1", "courier_1", kitchen())).await.unwrap();

    let result = relay.handle(courier, status_change("ghost", OrderStatus::Ready)).await;
    assert!(matches!(result, Err(RelayError::Tracking(TrackingError::UnknownOrder(_)))));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_is_persisted_and_replayed_to_late_joiners() {
    let system = delhi_system().await;
    let relay = &system.relay;
    let store = system.store().unwrap().clone();
    let order_id = OrderId::from("order_1");

    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay.handle(courier, location("order_1", "courier_1", kitchen())).await.unwrap();

    eventually(|| {
        let store = store.clone();
        let order_id = order_id.clone();
        async move {
            matches!(
                store.get_snapshot(&order_id).await,
                Ok(Some(snapshot)) if snapshot.courier_position == Some(kitchen())
            )
        }
    })
    .await;

    let stored = store.get_snapshot(&order_id).await.unwrap().unwrap();
    assert_eq!(stored.eta_minutes, Some(6));
    assert_eq!(stored.status, OrderStatus::PickedUp);

    let (_late, mut late_rx) = observer(relay, "order_1", Role::Customer).await;
    let OutboundEvent::TrackingData(replayed) = recv(&mut late_rx).await else {
        panic!("expected tracking-data");
    };
    assert_eq!(replayed.courier_position, Some(kitchen()));
    assert_eq!(replayed.eta_minutes, Some(6));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_tracker_restarts_from_stored_snapshot() {
    let config = Config {
        tracker_idle: Duration::from_millis(50),
        ..Config::default()
    };
    let system = system_with_orders(
        config,
        vec![OrderRecord::new("order_1".into(), OrderStatus::OnTheWay, Some(customer()))],
    )
    .await;
    let relay = &system.relay;

    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay
        .handle(courier, location("order_1", "courier_1", kitchen()))
        .await
        .unwrap();
    assert_eq!(relay.health().await.unwrap().active_trackers, 1);

    eventually(move || async move { relay.health().await.unwrap().active_trackers == 0 }).await;

    let (_customer, mut rx) = observer(relay, "order_1", Role::Customer).await;
    let OutboundEvent::TrackingData(snapshot) = recv(&mut rx).await else {
        panic!("expected tracking-data");
    };
    assert_eq!(snapshot.courier_position, Some(kitchen()));
    assert_eq!(snapshot.customer_position, Some(customer()));
    assert_eq!(relay.health().await.unwrap().active_trackers, 1);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_new_snapshot_carries_origin() {
    let config = Config {
        origin: Some(kitchen()),
        ..Config::default()
    };
    let system = system_with_orders(
        config,
        vec![OrderRecord::new("order_1".into(), OrderStatus::OnTheWay, Some(customer()))],
    )
    .await;
    let relay = &system.relay;

    let (_customer, mut rx) = observer(relay, "order_1", Role::Customer).await;
    let (courier, _courier_rx) = relay.connect().await.unwrap();
    relay
        .handle(courier, location("order_1", "courier_1", customer()))
        .await
        .unwrap();

    let OutboundEvent::LocationUpdate(snapshot) = recv(&mut rx).await else {
        panic!("expected location-update");
    };
    assert_eq!(snapshot.origin_position, Some(kitchen()));
    assert_eq!(snapshot.distance_km, Some(0.0));
    assert_eq!(snapshot.eta_minutes, Some(2));

    system.shutdown().await.unwrap();
}
