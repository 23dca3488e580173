//! Pure data structures shared by the relay, the tracker actors and the store gateway.
//!
//! [`TrackingSnapshot`] and [`OrderRecord`] implement the
//! [`ActorEntity`](crate::framework::ActorEntity) trait so the in-process store can manage
//! them with a [`ResourceActor`](crate::framework::ResourceActor).

pub mod ids;
pub mod order;
pub mod snapshot;
pub mod status;

pub use ids::*;
pub use order::*;
pub use snapshot::*;
pub use status::*;
