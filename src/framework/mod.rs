//! Generic actor framework behind the in-process document store.
//!
//! # Main Components
//!
//! - [`ActorEntity`] - Trait that stored document types implement
//! - [`ResourceActor`] - Generic actor that owns a keyed collection of documents
//! - [`ResourceClient`] - Cloneable client for a `ResourceActor`
//! - [`FrameworkError`] - Common error types
//!
//! # Testing
//!
//! See the [`mock`] module for scripting store answers without spawning actors.

pub mod core;
pub mod mock;

pub use self::core::*;
