//! # Observability & Tracing
//!
//! [`setup_tracing`] initializes structured logging with the `tracing` crate. The level
//! comes from `RUST_LOG` and defaults to `info`.
//!
//! ```bash
//! # Room joins, status changes, tracker start/stop
//! RUST_LOG=info cargo run
//!
//! # Every location fix with its distance and ETA, every broadcast count
//! RUST_LOG=debug cargo run
//!
//! # Only the trackers
//! RUST_LOG=delivery_relay::tracker=debug cargo run
//! ```
//!
//! Log lines carry structured fields rather than interpolated text, so they can be
//! filtered by order or connection:
//!
//! ```text
//! INFO Connected connection=conn_1 clients=1
//! INFO Joined order_id=order_42 connection=conn_1 role=Customer size=1
//! DEBUG Location update order_id=order_42 lat=28.6139 lng=77.209 distance_km=Some(2.11) eta_minutes=Some(6)
//! WARN Snapshot write failed, not retried order_id=order_42 error=Store call timed out after 3s
//! INFO Status changed order_id=order_42 status=delivered
//! INFO Session closed order_id=order_42 members=2
//! ```
//!
//! HTTP requests are traced by `tower_http`'s `TraceLayer`.

use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
