//! # Core Actor Framework
//!
//! This module defines the generic building blocks the in-process document store is made of.
//!
//! ## Key Types
//!
//! - [`ActorEntity`]: The trait that every stored document type implements.
//! - [`ResourceActor`]: The generic actor that owns a keyed collection of documents.
//! - [`ResourceClient`]: The generic, cloneable client for talking to a `ResourceActor`.
//! - [`FrameworkError`]: Common errors (e.g., ActorClosed, NotFound).

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

// =============================================================================
// 1. THE ABSTRACTION
// =============================================================================

/// Trait that any document must implement to be managed by [`ResourceActor`].
///
/// Documents are keyed by caller-supplied ids (an order id, for instance) rather than
/// generated ones, which is how the durable store addresses them too.
///
/// # Provided Methods (Hooks)
/// - [`ActorEntity::blank`] decides whether a merging write may create the document.
/// - [`ActorEntity::on_create`] runs once after construction.
///
/// The defaults refuse merges into missing documents and accept every creation.
#[async_trait]
pub trait ActorEntity: Clone + Debug + Send + Sync + 'static {
    /// The unique identifier for this document.
    type Id: Eq + Hash + Clone + Send + Sync + Display + Debug;

    /// The data required to create a new instance.
    type Create: Send + Sync + Debug;

    /// A partial update. Fields it does not carry must be left untouched.
    type Update: Send + Sync + Debug;

    /// The error type for this document's hooks.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Construct the full document from the id and payload.
    fn from_create_params(id: Self::Id, params: Self::Create) -> Result<Self, Self::Error>;

    /// Empty document a [`ResourceRequest::Merge`] starts from when nothing is stored yet.
    fn blank(_id: &Self::Id) -> Option<Self> {
        None
    }

    /// Called immediately after the document is constructed, before it is stored.
    async fn on_create(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Apply a partial update.
    async fn on_update(&mut self, update: Self::Update) -> Result<(), Self::Error>;
}

// =============================================================================
// 2. THE GENERIC MESSAGES & ERRORS
// =============================================================================

/// Errors that can occur within the actor framework itself.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("Actor closed")]
    ActorClosed,
    #[error("Actor dropped response channel")]
    ActorDropped,
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    AlreadyExists(String),
    #[error("Entity error: {0}")]
    EntityError(Box<dyn std::error::Error + Send + Sync>),
}

/// Type alias for the one-shot response channel used by actors.
pub type Response<T> = oneshot::Sender<Result<T, FrameworkError>>;

/// Internal message type sent to the actor to request operations.
///
/// `Update` only touches documents that exist; `Merge` is the document-store style
/// "set with merge" that creates the document from [`ActorEntity::blank`] first.
#[derive(Debug)]
pub enum ResourceRequest<T: ActorEntity> {
    Create {
        id: T::Id,
        params: T::Create,
        respond_to: Response<T>,
    },
    Get {
        id: T::Id,
        respond_to: Response<Option<T>>,
    },
    Update {
        id: T::Id,
        update: T::Update,
        respond_to: Response<T>,
    },
    Merge {
        id: T::Id,
        update: T::Update,
        respond_to: Response<T>,
    },
}

// =============================================================================
// 3. THE GENERIC ACTOR SERVER
// =============================================================================

/// The generic actor that manages a collection of documents.
///
/// Requests are processed sequentially, so the `store` needs no lock; the actor
/// owns it exclusively.
pub struct ResourceActor<T: ActorEntity> {
    receiver: mpsc::Receiver<ResourceRequest<T>>,
    store: HashMap<T::Id, T>,
}

impl<T: ActorEntity> ResourceActor<T> {
    pub fn new(buffer_size: usize) -> (Self, ResourceClient<T>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            store: HashMap::new(),
        };
        (actor, ResourceClient::new(sender))
    }

    /// Runs the actor's event loop, processing messages until every client is dropped.
    pub async fn run(mut self) {
        let entity_type = std::any::type_name::<T>()
            .split("::")
            .last()
            .unwrap_or("Unknown");
        info!(entity_type, "Actor started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ResourceRequest::Create { id, params, respond_to } => {
                    debug!(entity_type, %id, ?params, "Create");
                    let result = self.create(id, params).await;
                    if let Err(e) = &result {
                        warn!(entity_type, error = %e, "Create failed");
                    }
                    let _ = respond_to.send(result);
                }
                ResourceRequest::Get { id, respond_to } => {
                    let item = self.store.get(&id).cloned();
                    debug!(entity_type, %id, found = item.is_some(), "Get");
                    let _ = respond_to.send(Ok(item));
                }
                ResourceRequest::Update { id, update, respond_to } => {
                    debug!(entity_type, %id, ?update, "Update");
                    let result = self.update(id, update, false).await;
                    if let Err(e) = &result {
                        warn!(entity_type, error = %e, "Update failed");
                    }
                    let _ = respond_to.send(result);
                }
                ResourceRequest::Merge { id, update, respond_to } => {
                    debug!(entity_type, %id, ?update, "Merge");
                    let result = self.update(id, update, true).await;
                    if let Err(e) = &result {
                        warn!(entity_type, error = %e, "Merge failed");
                    }
                    let _ = respond_to.send(result);
                }
            }
        }

        info!(entity_type, size = self.store.len(), "Shutdown");
    }

    async fn create(&mut self, id: T::Id, params: T::Create) -> Result<T, FrameworkError> {
        if self.store.contains_key(&id) {
            return Err(FrameworkError::AlreadyExists(id.to_string()));
        }
        let mut item = T::from_create_params(id.clone(), params)
            .map_err(|e| FrameworkError::EntityError(Box::new(e)))?;
        item.on_create()
            .await
            .map_err(|e| FrameworkError::EntityError(Box::new(e)))?;
        self.store.insert(id.clone(), item.clone());
        info!(%id, size = self.store.len(), "Created");
        Ok(item)
    }

    async fn update(&mut self, id: T::Id, update: T::Update, upsert: bool) -> Result<T, FrameworkError> {
        let existing = self.store.get(&id).cloned();
        let mut item = match existing {
            Some(item) => item,
            None if upsert => {
                T::blank(&id).ok_or_else(|| FrameworkError::NotFound(id.to_string()))?
            }
            None => return Err(FrameworkError::NotFound(id.to_string())),
        };

        // Work on a copy so a rejected update leaves the stored document untouched.
        item.on_update(update)
            .await
            .map_err(|e| FrameworkError::EntityError(Box::new(e)))?;
        self.store.insert(id, item.clone());
        Ok(item)
    }
}

// =============================================================================
// 4. THE GENERIC CLIENT
// =============================================================================

/// A type-safe client for interacting with a `ResourceActor`.
///
/// Holds only a sender, so cloning is inexpensive and clones can be shared across tasks.
pub struct ResourceClient<T: ActorEntity> {
    sender: mpsc::Sender<ResourceRequest<T>>,
}

impl<T: ActorEntity> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: ActorEntity> ResourceClient<T> {
    pub fn new(sender: mpsc::Sender<ResourceRequest<T>>) -> Self {
        Self { sender }
    }

    pub async fn create(&self, id: T::Id, params: T::Create) -> Result<T, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Create { id, params, respond_to })
            .await
    }

    pub async fn get(&self, id: T::Id) -> Result<Option<T>, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Get { id, respond_to })
            .await
    }

    pub async fn update(&self, id: T::Id, update: T::Update) -> Result<T, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Update { id, update, respond_to })
            .await
    }

    pub async fn merge(&self, id: T::Id, update: T::Update) -> Result<T, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Merge { id, update, respond_to })
            .await
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(Response<R>) -> ResourceRequest<T>,
    ) -> Result<R, FrameworkError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| FrameworkError::ActorClosed)?;
        response.await.map_err(|_| FrameworkError::ActorDropped)?
    }
}
