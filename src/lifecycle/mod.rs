//! Runtime orchestration: wiring the actors together, stopping them in order, and
//! initializing logging.
//!
//! - [`RelaySystem`] - starts the registry, the tracker pool and (optionally) the in-process store
//! - [`setup_tracing`] - initializes the tracing subscriber

pub mod relay_system;
pub mod tracing;

pub use relay_system::*;
pub use self::tracing::*;
