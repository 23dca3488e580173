//! # Relay
//!
//! [`Relay`] turns decoded client events into registry and tracker work. It is
//! transport-agnostic: the websocket server in [`server`] and the integration tests
//! drive it the same way, through [`Relay::connect`], [`Relay::handle`] and
//! [`Relay::disconnect`].

pub mod server;

use crate::model::ConnectionId;
use crate::protocol::{InboundEvent, OutboundEvent, StatusChangeFailure, StatusChangeRequest};
use crate::session::{RegistryClient, RegistryError};
use crate::tracker::{LocationFix, TrackerCommand, TrackerPool, TrackingError};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("Relay is shutting down")]
    ShuttingDown,
}

/// Operational snapshot served at `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub active_rooms: usize,
    pub connected_clients: usize,
    pub active_trackers: usize,
}

#[derive(Clone)]
pub struct Relay {
    registry: RegistryClient,
    pool: TrackerPool,
    next_connection: Arc<AtomicU64>,
    outbound_buffer: usize,
}

impl Relay {
    pub fn new(registry: RegistryClient, pool: TrackerPool, outbound_buffer: usize) -> Self {
        Self {
            registry,
            pool,
            next_connection: Arc::new(AtomicU64::new(1)),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Register a new connection. Events for it arrive on the returned receiver, which
    /// closes once the connection is disconnected or the relay stops.
    pub async fn connect(&self) -> Result<(ConnectionId, mpsc::Receiver<OutboundEvent>), RelayError> {
        let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let (outbound, receiver) = mpsc::channel(self.outbound_buffer);
        self.registry.connect(connection, outbound).await?;
        Ok((connection, receiver))
    }

    /// Apply one inbound event from `connection`.
    #[instrument(skip(self, event), fields(event = event.name(), order_id = %event.order_id()))]
    pub async fn handle(&self, connection: ConnectionId, event: InboundEvent) -> Result<(), RelayError> {
        match event {
            InboundEvent::JoinTracking(join) => {
                self.registry
                    .join(join.order_id.clone(), connection, join.role)
                    .await?;
                self.pool
                    .dispatch(&join.order_id, TrackerCommand::Replay { connection })
                    .await?;
            }
            InboundEvent::LeaveTracking(leave) => {
                self.registry.leave(leave.order_id, connection).await?;
            }
            InboundEvent::UpdateLocation(report) => {
                let fix = LocationFix {
                    courier_id: report.courier_id.clone(),
                    position: report.position(),
                    route_polyline: report.route_polyline,
                    received_at: Utc::now(),
                };
                self.pool
                    .dispatch(&report.order_id, TrackerCommand::Location(fix))
                    .await?;
            }
            InboundEvent::OrderStatusChange(request) => {
                self.change_status(connection, request).await?;
            }
        }
        Ok(())
    }

    /// Forget `connection` and remove it from every room.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), RelayError> {
        let left = self.registry.disconnect(connection).await?;
        debug!(%connection, rooms = left.len(), "Connection cleaned up");
        Ok(())
    }

    pub async fn health(&self) -> Result<Health, RelayError> {
        let stats = self.registry.stats().await?;
        Ok(Health {
            status: "ok",
            active_rooms: stats.active_rooms,
            connected_clients: stats.connected_clients,
            active_trackers: self.pool.active_count(),
        })
    }

    /// Apply a status change and wait for the outcome. On failure the requesting
    /// connection is told why; nobody else is.
    async fn change_status(
        &self,
        connection: ConnectionId,
        request: StatusChangeRequest,
    ) -> Result<(), RelayError> {
        let result = self.request_status(&request).await;
        if let Err(e) = &result {
            warn!(order_id = %request.order_id, status = %request.status, error = %e, "Status change rejected");
            let failure = StatusChangeFailure {
                order_id: request.order_id,
                status: request.status,
                reason: e.to_string(),
            };
            if let Err(e) = self
                .registry
                .send_to(connection, OutboundEvent::StatusChangeFailed(failure))
                .await
            {
                warn!(%connection, error = %e, "Could not report status change failure");
            }
        }
        result
    }

    async fn request_status(&self, request: &StatusChangeRequest) -> Result<(), RelayError> {
        let (respond_to, response) = oneshot::channel();
        let command = TrackerCommand::Status {
            status: request.status,
            respond_to,
        };
        self.pool.dispatch(&request.order_id, command).await?;
        response.await.map_err(|_| RelayError::ShuttingDown)??;
        Ok(())
    }
}
