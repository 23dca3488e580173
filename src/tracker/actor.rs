//! # Order Tracker
//!
//! One actor per order with live activity. It is the only writer of that order's
//! snapshot, so location fixes and status changes for an order are applied one at a
//! time, in the order they were queued.
//!
//! The tracker keeps the latest snapshot in memory and treats the store as a
//! best-effort mirror: broadcasts are computed from the local copy and go out before
//! the matching write is even attempted.

use crate::gateway::{with_timeout, GatewayError, TrackingGateway};
use crate::geo::GeoPoint;
use crate::model::{
    ConnectionId, CourierId, OrderId, OrderStatus, RoutePolyline, SnapshotPatch, TrackingSnapshot,
};
use crate::protocol::{OutboundEvent, StatusNotice};
use crate::session::RegistryClient;
use crate::tracker::{SnapshotWriter, TrackingError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Knobs shared by every tracker.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Upper bound for each store call.
    pub store_timeout: Duration,
    /// A tracker with no work for this long stops; the next event starts a fresh one.
    pub idle_timeout: Duration,
    /// Depth of the best-effort write queue.
    pub write_buffer: usize,
    /// Depth of the tracker's own command queue.
    pub command_buffer: usize,
    /// Dispatch site stamped into snapshots this relay creates.
    pub origin: Option<GeoPoint>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(300),
            write_buffer: 16,
            command_buffer: 64,
            origin: None,
        }
    }
}

/// A courier position fix, already validated at the protocol boundary.
#[derive(Debug, Clone)]
pub struct LocationFix {
    pub courier_id: CourierId,
    pub position: GeoPoint,
    pub route_polyline: Option<RoutePolyline>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum TrackerCommand {
    Location(LocationFix),
    Status {
        status: OrderStatus,
        respond_to: oneshot::Sender<Result<(), TrackingError>>,
    },
    /// Send the current snapshot, if any, to a connection that just joined.
    Replay { connection: ConnectionId },
}

pub struct Tracker {
    order_id: OrderId,
    gateway: Arc<dyn TrackingGateway>,
    registry: RegistryClient,
    settings: TrackerSettings,
    snapshot: Option<TrackingSnapshot>,
    /// The store was asked for a snapshot and answered (possibly "none").
    snapshot_loaded: bool,
    /// Status of the order record, once the store confirmed the order exists.
    order_status: Option<OrderStatus>,
    writes: mpsc::Sender<SnapshotPatch>,
    writer: JoinHandle<()>,
}

impl Tracker {
    /// Spawn a tracker for `order_id` and return its command queue.
    ///
    /// With a `predecessor`, commands queue up but none is handled until that channel
    /// closes, which is when the previous tracker for the order has flushed its writes.
    pub fn spawn(
        order_id: OrderId,
        gateway: Arc<dyn TrackingGateway>,
        registry: RegistryClient,
        settings: TrackerSettings,
        predecessor: Option<watch::Receiver<()>>,
    ) -> (mpsc::Sender<TrackerCommand>, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.command_buffer.max(1));
        let (writes, writer) = SnapshotWriter::spawn(
            order_id.clone(),
            gateway.clone(),
            settings.store_timeout,
            settings.write_buffer,
        );
        let tracker = Self {
            order_id,
            gateway,
            registry,
            settings,
            snapshot: None,
            snapshot_loaded: false,
            order_status: None,
            writes,
            writer,
        };
        (sender, tokio::spawn(tracker.run(receiver, predecessor)))
    }

    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<TrackerCommand>,
        predecessor: Option<watch::Receiver<()>>,
    ) {
        if let Some(mut previous) = predecessor {
            debug!(order_id = %self.order_id, "Waiting for previous tracker to flush");
            while previous.changed().await.is_ok() {}
        }
        debug!(order_id = %self.order_id, "Tracker started");

        loop {
            match tokio::time::timeout(self.settings.idle_timeout, receiver.recv()).await {
                Ok(Some(command)) => self.handle(command).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new work, then finish what was queued before the close.
                    receiver.close();
                    while let Ok(command) = receiver.try_recv() {
                        self.handle(command).await;
                    }
                    debug!(order_id = %self.order_id, "Tracker idle");
                    break;
                }
            }
        }

        let Tracker { order_id, writes, writer, .. } = self;
        drop(writes);
        if let Err(e) = writer.await {
            error!(%order_id, error = ?e, "Writer task failed");
        }
        debug!(%order_id, "Tracker stopped");
    }

    async fn handle(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Location(fix) => self.on_location(fix).await,
            TrackerCommand::Status { status, respond_to } => {
                let result = self.on_status(status).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::Replay { connection } => self.on_replay(connection).await,
        }
    }

    // -------------------------------------------------------------------------
    // Location
    // -------------------------------------------------------------------------

    async fn on_location(&mut self, fix: LocationFix) {
        let order_id = self.order_id.clone();
        self.load_snapshot().await;

        if let Some(status) = self.ended_status() {
            warn!(%order_id, %status, "Location update after tracking ended, dropped");
            return;
        }

        if self.order_status.is_none() {
            match self.call(self.gateway.get_order_status(&order_id)).await {
                Ok(status) => self.order_status = Some(status),
                Err(e) if e.is_not_found() => {
                    warn!(%order_id, courier_id = %fix.courier_id, "Location update for unknown order, dropped");
                    return;
                }
                Err(e) => warn!(%order_id, error = %e, "Order status unavailable, continuing"),
            }
        }
        if let Some(status) = self.order_status.filter(|s| s.is_terminal()) {
            // Finished through the order-management path rather than through this relay.
            warn!(%order_id, %status, "Location update for finished order, dropped");
            return;
        }

        let customer = self.customer_position().await;

        let created = self.snapshot.is_none();
        let status_known = self.snapshot_loaded || self.order_status.is_some();
        // Unconfirmed, the store may already hold a dispatch site.
        let origin = self.settings.origin.filter(|_| self.snapshot_loaded);
        let initial_status = self.order_status.unwrap_or(OrderStatus::OnTheWay);
        let snapshot = self.snapshot.get_or_insert_with(|| {
            let mut snapshot = TrackingSnapshot::new(order_id.clone(), initial_status);
            snapshot.origin_position = origin;
            snapshot
        });

        if customer.is_some() {
            snapshot.customer_position = customer;
        }
        if let Some(route) = fix.route_polyline {
            snapshot.route_polyline = Some(route);
        }
        snapshot.record_courier_position(fix.courier_id, fix.position, fix.received_at);

        debug!(
            %order_id,
            lat = fix.position.lat,
            lng = fix.position.lng,
            distance_km = ?snapshot.distance_km,
            eta_minutes = ?snapshot.eta_minutes,
            "Location update"
        );

        let mut patch = SnapshotPatch::location(snapshot);
        // Without a confirmed status a guess could overwrite the stored one.
        if created && status_known {
            patch = patch.with_status(snapshot.status);
        }
        let event = OutboundEvent::LocationUpdate(snapshot.clone());

        self.broadcast(event).await;
        self.persist_best_effort(patch);
    }

    /// The customer's coordinates, fetched from the order until they are known.
    async fn customer_position(&self) -> Option<GeoPoint> {
        if let Some(position) = self.snapshot.as_ref().and_then(|s| s.customer_position) {
            return Some(position);
        }
        match self.call(self.gateway.get_order_delivery_target(&self.order_id)).await {
            Ok(target) => {
                if target.is_none() {
                    debug!(order_id = %self.order_id, "No delivery target, skipping metrics");
                }
                target
            }
            Err(e) => {
                warn!(order_id = %self.order_id, error = %e, "Delivery target unavailable, skipping metrics");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    async fn on_status(&mut self, status: OrderStatus) -> Result<(), TrackingError> {
        let order_id = self.order_id.clone();
        self.load_snapshot().await;

        if let Some(current) = self.ended_status() {
            return Err(TrackingError::TrackingEnded { order_id, status: current });
        }

        if let Err(e) = self.call(self.gateway.set_order_status(&order_id, status)).await {
            error!(%order_id, %status, error = %e, "Status change failed");
            return Err(match e {
                GatewayError::NotFound(_) => TrackingError::UnknownOrder(order_id),
                other => TrackingError::Store(other),
            });
        }
        self.order_status = Some(status);

        let now = Utc::now();
        let origin = self.settings.origin.filter(|_| self.snapshot_loaded);
        let mut patch = SnapshotPatch::status(status, now);
        if self.snapshot.is_none() {
            patch.origin_position = origin;
        }
        let snapshot = self.snapshot.get_or_insert_with(|| {
            let mut snapshot = TrackingSnapshot::new(order_id.clone(), status);
            snapshot.origin_position = origin;
            snapshot
        });
        snapshot.status = status;
        snapshot.updated_at = now;
        self.persist(patch).await;

        info!(%order_id, %status, "Status changed");
        let notice = StatusNotice { order_id: order_id.clone(), status };
        self.broadcast(OutboundEvent::StatusUpdate(notice.clone())).await;

        if status.is_terminal() {
            match self
                .registry
                .end_session(order_id.clone(), OutboundEvent::TrackingEnded(notice))
                .await
            {
                Ok(members) => info!(%order_id, %status, members, "Tracking ended"),
                Err(e) => warn!(%order_id, error = %e, "Could not close session"),
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Replay
    // -------------------------------------------------------------------------

    async fn on_replay(&mut self, connection: ConnectionId) {
        self.load_snapshot().await;
        let Some(snapshot) = self.snapshot.clone() else {
            debug!(order_id = %self.order_id, %connection, "Nothing to replay");
            return;
        };
        if let Err(e) = self
            .registry
            .send_to(connection, OutboundEvent::TrackingData(snapshot))
            .await
        {
            warn!(order_id = %self.order_id, %connection, error = %e, "Replay failed");
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Fetch the persisted snapshot once. A failed fetch is retried on the next event;
    /// a late answer is folded into whatever was built locally meanwhile.
    async fn load_snapshot(&mut self) {
        if self.snapshot_loaded {
            return;
        }
        match self.call(self.gateway.get_snapshot(&self.order_id)).await {
            Ok(stored) => {
                self.snapshot_loaded = true;
                self.snapshot = match (self.snapshot.take(), stored) {
                    (Some(mut local), Some(stored)) => {
                        // The order record outranks the stored copy, unless tracking ended.
                        let keep_status = self.order_status.is_some() && !stored.is_closed();
                        local.absorb(stored, keep_status);
                        Some(local)
                    }
                    (Some(mut local), None) => {
                        local.origin_position = local.origin_position.or(self.settings.origin);
                        Some(local)
                    }
                    (local, stored) => local.or(stored),
                };
            }
            Err(e) => warn!(order_id = %self.order_id, error = %e, "Snapshot unavailable, continuing"),
        }
    }

    fn ended_status(&self) -> Option<OrderStatus> {
        self.snapshot
            .as_ref()
            .filter(|s| s.is_closed())
            .map(|s| s.status)
    }

    async fn call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        with_timeout(self.settings.store_timeout, call).await
    }

    async fn broadcast(&self, event: OutboundEvent) {
        match self.registry.broadcast(self.order_id.clone(), event).await {
            Ok(delivered) => debug!(order_id = %self.order_id, delivered, "Broadcast"),
            Err(e) => warn!(order_id = %self.order_id, error = %e, "Broadcast failed"),
        }
    }

    /// Queue a location patch without waiting; a full queue drops it.
    fn persist_best_effort(&self, patch: SnapshotPatch) {
        if let Err(e) = self.writes.try_send(patch) {
            warn!(order_id = %self.order_id, error = %e, "Snapshot write dropped");
        }
    }

    /// Queue a status patch, waiting for room so terminal statuses always reach the store.
    async fn persist(&self, patch: SnapshotPatch) {
        if self.writes.send(patch).await.is_err() {
            warn!(order_id = %self.order_id, "Writer stopped, snapshot write dropped");
        }
    }
}
