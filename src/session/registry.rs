//! # Session Registry
//!
//! A single actor owns every room (`order -> connections`) and every connection's
//! subscription state. All mutation goes through [`RegistryClient`]; the maps are
//! never shared, so a room is never observed half-updated.
//!
//! Outbound events are queued on each connection's bounded channel with `try_send`.
//! A connection whose queue is full misses that event rather than stalling the room.
//! Status notices are the exception: a connection that cannot take one is evicted, which
//! closes its queue. Its client reconnects and the join replays the current snapshot.

use crate::model::{ConnectionId, OrderId};
use crate::protocol::{OutboundEvent, Role};
use crate::session::RegistryError;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

type Reply<T> = oneshot::Sender<T>;

/// Everything the registry tracks about one live connection.
#[derive(Debug)]
struct ConnectionState {
    outbound: mpsc::Sender<OutboundEvent>,
    /// Orders this connection watches, with the role it joined each one as.
    subscriptions: HashMap<OrderId, Role>,
}

/// Outcome of queueing one event on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    Full,
    Gone,
}

/// Events a subscriber must not silently miss.
fn must_arrive(event: &OutboundEvent) -> bool {
    matches!(event, OutboundEvent::StatusUpdate(_) | OutboundEvent::TrackingEnded(_))
}

/// Room and connection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_rooms: usize,
    pub connected_clients: usize,
}

#[derive(Debug)]
enum RegistryRequest {
    Connect {
        connection: ConnectionId,
        outbound: mpsc::Sender<OutboundEvent>,
        respond_to: Reply<Result<(), RegistryError>>,
    },
    Join {
        order_id: OrderId,
        connection: ConnectionId,
        role: Role,
        respond_to: Reply<Result<(), RegistryError>>,
    },
    Leave {
        order_id: OrderId,
        connection: ConnectionId,
        respond_to: Reply<()>,
    },
    Disconnect {
        connection: ConnectionId,
        respond_to: Reply<Vec<OrderId>>,
    },
    Targets {
        order_id: OrderId,
        respond_to: Reply<Vec<ConnectionId>>,
    },
    Broadcast {
        order_id: OrderId,
        event: OutboundEvent,
        respond_to: Reply<usize>,
    },
    SendTo {
        connection: ConnectionId,
        event: OutboundEvent,
        respond_to: Reply<bool>,
    },
    Close {
        order_id: OrderId,
        farewell: Option<OutboundEvent>,
        respond_to: Reply<usize>,
    },
    Stats {
        respond_to: Reply<RegistryStats>,
    },
    Shutdown {
        respond_to: Reply<()>,
    },
}

// =============================================================================
// ACTOR
// =============================================================================

pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryRequest>,
    rooms: HashMap<OrderId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionState>,
}

impl RegistryActor {
    pub fn new(buffer_size: usize) -> (Self, RegistryClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            rooms: HashMap::new(),
            connections: HashMap::new(),
        };
        (actor, RegistryClient { sender })
    }

    /// Runs until [`RegistryClient::shutdown`] is called or every client is dropped.
    pub async fn run(mut self) {
        info!("Registry started");

        while let Some(request) = self.receiver.recv().await {
            match request {
                RegistryRequest::Connect { connection, outbound, respond_to } => {
                    let _ = respond_to.send(self.connect(connection, outbound));
                }
                RegistryRequest::Join { order_id, connection, role, respond_to } => {
                    let _ = respond_to.send(self.join(order_id, connection, role));
                }
                RegistryRequest::Leave { order_id, connection, respond_to } => {
                    self.leave(&order_id, connection);
                    let _ = respond_to.send(());
                }
                RegistryRequest::Disconnect { connection, respond_to } => {
                    let _ = respond_to.send(self.disconnect(connection));
                }
                RegistryRequest::Targets { order_id, respond_to } => {
                    let targets = self
                        .rooms
                        .get(&order_id)
                        .map(|room| room.iter().copied().collect())
                        .unwrap_or_default();
                    let _ = respond_to.send(targets);
                }
                RegistryRequest::Broadcast { order_id, event, respond_to } => {
                    let _ = respond_to.send(self.broadcast(&order_id, event));
                }
                RegistryRequest::SendTo { connection, event, respond_to } => {
                    let _ = respond_to.send(self.send_to(connection, event));
                }
                RegistryRequest::Close { order_id, farewell, respond_to } => {
                    let _ = respond_to.send(self.close(&order_id, farewell));
                }
                RegistryRequest::Stats { respond_to } => {
                    let _ = respond_to.send(self.stats());
                }
                RegistryRequest::Shutdown { respond_to } => {
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        info!(
            rooms = self.rooms.len(),
            connections = self.connections.len(),
            "Registry stopped"
        );
    }

    fn connect(
        &mut self,
        connection: ConnectionId,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Result<(), RegistryError> {
        if self.connections.contains_key(&connection) {
            return Err(RegistryError::DuplicateConnection(connection));
        }
        self.connections.insert(
            connection,
            ConnectionState {
                outbound,
                subscriptions: HashMap::new(),
            },
        );
        info!(%connection, clients = self.connections.len(), "Connected");
        Ok(())
    }

    fn join(
        &mut self,
        order_id: OrderId,
        connection: ConnectionId,
        role: Role,
    ) -> Result<(), RegistryError> {
        let state = self
            .connections
            .get_mut(&connection)
            .ok_or(RegistryError::UnknownConnection(connection))?;
        state.subscriptions.insert(order_id.clone(), role);

        let room = self.rooms.entry(order_id.clone()).or_default();
        if room.insert(connection) {
            info!(%order_id, %connection, ?role, size = room.len(), "Joined");
        }
        Ok(())
    }

    fn leave(&mut self, order_id: &OrderId, connection: ConnectionId) {
        if let Some(state) = self.connections.get_mut(&connection) {
            state.subscriptions.remove(order_id);
        }
        self.remove_member(order_id, connection);
    }

    fn disconnect(&mut self, connection: ConnectionId) -> Vec<OrderId> {
        let Some(state) = self.connections.remove(&connection) else {
            return Vec::new();
        };
        let orders: Vec<OrderId> = state.subscriptions.into_keys().collect();
        for order_id in &orders {
            self.remove_member(order_id, connection);
        }
        info!(%connection, rooms_left = orders.len(), "Disconnected");
        orders
    }

    fn remove_member(&mut self, order_id: &OrderId, connection: ConnectionId) {
        let Some(room) = self.rooms.get_mut(order_id) else {
            return;
        };
        if room.remove(&connection) {
            debug!(%order_id, %connection, size = room.len(), "Left");
        }
        if room.is_empty() {
            self.rooms.remove(order_id);
            debug!(%order_id, "Room removed");
        }
    }

    fn broadcast(&mut self, order_id: &OrderId, event: OutboundEvent) -> usize {
        let Some(room) = self.rooms.get(order_id) else {
            return 0;
        };
        let members: Vec<ConnectionId> = room.iter().copied().collect();
        self.deliver_all(&members, event)
    }

    fn send_to(&mut self, connection: ConnectionId, event: OutboundEvent) -> bool {
        self.deliver_all(&[connection], event) == 1
    }

    /// Queue `event` for each connection, evicting those that cannot take an event
    /// they must not miss. Returns how many accepted it.
    fn deliver_all(&mut self, connections: &[ConnectionId], event: OutboundEvent) -> usize {
        let critical = must_arrive(&event);
        let mut queued = 0;
        let mut stalled = Vec::new();
        for connection in connections {
            match self.deliver(*connection, event.clone()) {
                Delivery::Queued => queued += 1,
                Delivery::Full if critical => stalled.push(*connection),
                Delivery::Full => warn!(%connection, "Outbound queue full, event dropped"),
                Delivery::Gone => {}
            }
        }
        for connection in stalled {
            warn!(%connection, event = ?event, "Outbound queue full, evicting connection");
            self.disconnect(connection);
        }
        queued
    }

    fn deliver(&self, connection: ConnectionId, event: OutboundEvent) -> Delivery {
        let Some(state) = self.connections.get(&connection) else {
            return Delivery::Gone;
        };
        match state.outbound.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Empty and remove a room, optionally sending every former member one last event.
    fn close(&mut self, order_id: &OrderId, farewell: Option<OutboundEvent>) -> usize {
        let Some(room) = self.rooms.remove(order_id) else {
            return 0;
        };
        for connection in &room {
            if let Some(state) = self.connections.get_mut(connection) {
                state.subscriptions.remove(order_id);
            }
        }
        if let Some(event) = farewell {
            let members: Vec<ConnectionId> = room.iter().copied().collect();
            self.deliver_all(&members, event);
        }
        info!(%order_id, members = room.len(), "Session closed");
        room.len()
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_rooms: self.rooms.len(),
            connected_clients: self.connections.len(),
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Cloneable handle to the [`RegistryActor`].
#[derive(Clone)]
pub struct RegistryClient {
    sender: mpsc::Sender<RegistryRequest>,
}

impl RegistryClient {
    /// Register a connection and the queue its outbound events go to.
    #[instrument(skip(self, outbound))]
    pub async fn connect(
        &self,
        connection: ConnectionId,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Result<(), RegistryError> {
        self.call(|respond_to| RegistryRequest::Connect { connection, outbound, respond_to })
            .await?
    }

    /// Subscribe `connection` to `order_id`. Joining twice is a no-op.
    #[instrument(skip(self))]
    pub async fn join(
        &self,
        order_id: OrderId,
        connection: ConnectionId,
        role: Role,
    ) -> Result<(), RegistryError> {
        self.call(|respond_to| RegistryRequest::Join { order_id, connection, role, respond_to })
            .await?
    }

    /// Unsubscribe; a no-op if the connection is not in the room.
    pub async fn leave(&self, order_id: OrderId, connection: ConnectionId) -> Result<(), RegistryError> {
        self.call(|respond_to| RegistryRequest::Leave { order_id, connection, respond_to })
            .await
    }

    /// Forget a connection and remove it from every room it was in.
    /// Returns the orders it was subscribed to.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<Vec<OrderId>, RegistryError> {
        self.call(|respond_to| RegistryRequest::Disconnect { connection, respond_to })
            .await
    }

    pub async fn broadcast_targets(&self, order_id: OrderId) -> Result<Vec<ConnectionId>, RegistryError> {
        self.call(|respond_to| RegistryRequest::Targets { order_id, respond_to })
            .await
    }

    /// Queue `event` for every member of the room. Returns how many accepted it.
    pub async fn broadcast(&self, order_id: OrderId, event: OutboundEvent) -> Result<usize, RegistryError> {
        self.call(|respond_to| RegistryRequest::Broadcast { order_id, event, respond_to })
            .await
    }

    /// Queue `event` for one connection. Returns whether it was accepted.
    pub async fn send_to(&self, connection: ConnectionId, event: OutboundEvent) -> Result<bool, RegistryError> {
        self.call(|respond_to| RegistryRequest::SendTo { connection, event, respond_to })
            .await
    }

    /// Forcibly empty and remove a room. Returns how many members it had.
    pub async fn close_session(&self, order_id: OrderId) -> Result<usize, RegistryError> {
        self.call(|respond_to| RegistryRequest::Close { order_id, farewell: None, respond_to })
            .await
    }

    /// Send `farewell` to every member, then close the room, as one registry step.
    /// Nobody can join in between and miss the farewell while staying subscribed.
    pub async fn end_session(
        &self,
        order_id: OrderId,
        farewell: OutboundEvent,
    ) -> Result<usize, RegistryError> {
        self.call(|respond_to| RegistryRequest::Close {
            order_id,
            farewell: Some(farewell),
            respond_to,
        })
        .await
    }

    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        self.call(|respond_to| RegistryRequest::Stats { respond_to }).await
    }

    /// Stop the actor. Dropping its state closes every connection's outbound queue.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.call(|respond_to| RegistryRequest::Shutdown { respond_to }).await
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(Reply<R>) -> RegistryRequest,
    ) -> Result<R, RegistryError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| RegistryError::Closed)?;
        response.await.map_err(|_| RegistryError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, TrackingSnapshot};
    use crate::protocol::StatusNotice;

    fn start() -> RegistryClient {
        let (actor, client) = RegistryActor::new(32);
        tokio::spawn(actor.run());
        client
    }

    async fn connect(client: &RegistryClient, id: u64) -> (ConnectionId, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let connection = ConnectionId(id);
        client.connect(connection, tx).await.unwrap();
        (connection, rx)
    }

    fn notice(order: &str) -> OutboundEvent {
        OutboundEvent::StatusUpdate(StatusNotice {
            order_id: order.into(),
            status: OrderStatus::Ready,
        })
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let registry = start();
        let (a, _rx) = connect(&registry, 1).await;
        let order = OrderId::from("o1");

        registry.join(order.clone(), a, Role::Customer).await.unwrap();
        registry.join(order.clone(), a, Role::Customer).await.unwrap();

        assert_eq!(registry.broadcast_targets(order).await.unwrap(), vec![a]);
        assert_eq!(registry.stats().await.unwrap().active_rooms, 1);
    }

    #[tokio::test]
    async fn test_join_requires_connection() {
        let registry = start();
        let result = registry.join("o1".into(), ConnectionId(9), Role::Admin).await;
        assert_eq!(result, Err(RegistryError::UnknownConnection(ConnectionId(9))));
    }

    #[tokio::test]
    async fn test_leave_removes_empty_room() {
        let registry = start();
        let (a, _rx) = connect(&registry, 1).await;
        let order = OrderId::from("o1");

        registry.leave(order.clone(), a).await.unwrap();
        registry.join(order.clone(), a, Role::Customer).await.unwrap();
        registry.leave(order.clone(), a).await.unwrap();

        assert!(registry.broadcast_targets(order).await.unwrap().is_empty());
        assert_eq!(
            registry.stats().await.unwrap(),
            RegistryStats { active_rooms: 0, connected_clients: 1 }
        );
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_room() {
        let registry = start();
        let (a, _rx_a) = connect(&registry, 1).await;
        let (b, mut rx_b) = connect(&registry, 2).await;

        for order in ["o1", "o2", "o3"] {
            registry.join(order.into(), a, Role::Admin).await.unwrap();
        }
        registry.join("o2".into(), b, Role::Customer).await.unwrap();

        let mut left = registry.disconnect(a).await.unwrap();
        left.sort();
        assert_eq!(left, vec![OrderId::from("o1"), "o2".into(), "o3".into()]);

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats, RegistryStats { active_rooms: 1, connected_clients: 1 });

        assert_eq!(registry.broadcast("o2".into(), notice("o2")).await.unwrap(), 1);
        assert_eq!(rx_b.recv().await, Some(notice("o2")));
    }

    #[tokio::test]
    async fn test_end_session_sends_farewell_once() {
        let registry = start();
        let (a, mut rx_a) = connect(&registry, 1).await;
        let (b, mut rx_b) = connect(&registry, 2).await;
        let order = OrderId::from("o1");
        registry.join(order.clone(), a, Role::Courier).await.unwrap();
        registry.join(order.clone(), b, Role::Customer).await.unwrap();

        let members = registry.end_session(order.clone(), notice("o1")).await.unwrap();
        assert_eq!(members, 2);
        assert_eq!(rx_a.try_recv().ok(), Some(notice("o1")));
        assert_eq!(rx_b.try_recv().ok(), Some(notice("o1")));

        assert_eq!(registry.broadcast(order.clone(), notice("o1")).await.unwrap(), 0);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(registry.close_session(order).await.unwrap(), 0);
    }

    fn position(order: &str) -> OutboundEvent {
        OutboundEvent::LocationUpdate(TrackingSnapshot::new(order.into(), OrderStatus::OnTheWay))
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let registry = start();
        let (tx, _rx) = mpsc::channel(1);
        let slow = ConnectionId(1);
        registry.connect(slow, tx).await.unwrap();
        registry.join("o1".into(), slow, Role::Customer).await.unwrap();

        assert_eq!(registry.broadcast("o1".into(), position("o1")).await.unwrap(), 1);
        assert_eq!(registry.broadcast("o1".into(), position("o1")).await.unwrap(), 0);
        assert_eq!(registry.stats().await.unwrap().connected_clients, 1);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_on_farewell() {
        let registry = start();
        let (tx, mut slow_rx) = mpsc::channel(1);
        let slow = ConnectionId(1);
        registry.connect(slow, tx).await.unwrap();
        let (fast, mut fast_rx) = connect(&registry, 2).await;
        let order = OrderId::from("o1");
        registry.join(order.clone(), slow, Role::Customer).await.unwrap();
        registry.join(order.clone(), fast, Role::Admin).await.unwrap();

        assert_eq!(registry.broadcast(order.clone(), notice("o1")).await.unwrap(), 2);
        let members = registry.end_session(order, notice("o1")).await.unwrap();
        assert_eq!(members, 2);

        // The fast member gets both notices; the stalled one is cut off after the first.
        assert_eq!(fast_rx.try_recv().ok(), Some(notice("o1")));
        assert_eq!(fast_rx.try_recv().ok(), Some(notice("o1")));
        assert_eq!(slow_rx.recv().await, Some(notice("o1")));
        assert_eq!(slow_rx.recv().await, None);
        assert_eq!(
            registry.stats().await.unwrap(),
            RegistryStats { active_rooms: 0, connected_clients: 1 }
        );
        assert!(registry.disconnect(slow).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_on_status_update() {
        let registry = start();
        let (tx, mut rx) = mpsc::channel(1);
        let slow = ConnectionId(1);
        registry.connect(slow, tx).await.unwrap();
        for order in ["o1", "o2"] {
            registry.join(order.into(), slow, Role::Customer).await.unwrap();
        }

        let fix = position("o1");
        assert_eq!(registry.broadcast("o1".into(), fix.clone()).await.unwrap(), 1);
        assert_eq!(registry.broadcast("o1".into(), notice("o1")).await.unwrap(), 0);

        assert_eq!(rx.recv().await, Some(fix));
        assert_eq!(rx.recv().await, None);
        assert_eq!(registry.stats().await.unwrap(), RegistryStats::default());
    }

    #[test]
    fn test_role_is_kept_per_room() {
        let (mut actor, _client) = RegistryActor::new(1);
        let (tx, _rx) = mpsc::channel(1);
        let connection = ConnectionId(1);
        actor.connect(connection, tx).unwrap();
        actor.join("o1".into(), connection, Role::Courier).unwrap();
        actor.join("o2".into(), connection, Role::Customer).unwrap();

        let subscriptions = &actor.connections[&connection].subscriptions;
        assert_eq!(subscriptions.get(&OrderId::from("o1")), Some(&Role::Courier));
        assert_eq!(subscriptions.get(&OrderId::from("o2")), Some(&Role::Customer));
    }

    #[tokio::test]
    async fn test_shutdown_closes_outbound_queues() {
        let registry = start();
        let (_a, mut rx) = connect(&registry, 1).await;

        registry.shutdown().await.unwrap();
        assert_eq!(rx.recv().await, None);
        assert_eq!(registry.stats().await, Err(RegistryError::Closed));
    }
}
