//! # Delivery Relay
//!
//! Live delivery tracking: couriers report their position, every observer of the order
//! (customer app, admin dashboard) receives the updated snapshot with distance and ETA,
//! and the session is torn down once the order is delivered or cancelled.
//!
//! ## Design
//!
//! All mutable state is owned by actors and reached through message passing:
//!
//! - The **session registry** ([`session`]) owns every room and every connection's
//!   subscriptions. Rooms are never shared, so they are never seen half-updated.
//! - One **tracker** per active order ([`tracker`]) applies location fixes and status
//!   changes one at a time. It broadcasts first and persists afterwards through a
//!   bounded, best-effort writer, so a slow store never delays observers.
//! - The **store** is reached through the [`gateway::TrackingGateway`] trait. The
//!   in-process implementation is built from the generic [`framework::ResourceActor`].
//!
//! ## Module Tour
//!
//! - [`geo`]: haversine distance and the ETA heuristic
//! - [`model`]: identifiers, order status, snapshots
//! - [`protocol`]: the JSON wire format and its validation
//! - [`relay`]: the transport-agnostic [`relay::Relay`] and the axum server
//! - [`lifecycle`]: [`lifecycle::RelaySystem`] start-up/shutdown and tracing setup
//! - [`config`]: environment configuration
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=info PORT=3001 STORE_SEED_FILE=orders.json cargo run
//! ```

pub mod config;
pub mod framework;
pub mod gateway;
pub mod geo;
pub mod lifecycle;
pub mod model;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod tracker;
