//! Per-order single-writer trackers and the pool that routes events to them.

pub mod actor;
pub mod error;
pub mod pool;
pub mod writer;

pub use actor::*;
pub use error::*;
pub use pool::*;
pub use writer::*;
