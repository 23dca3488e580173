use crate::config::Config;
use crate::gateway::{InMemoryGateway, TrackingGateway};
use crate::relay::server::AppState;
use crate::relay::Relay;
use crate::session::{RegistryActor, RegistryClient, RegistryError};
use crate::tracker::TrackerPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

const REGISTRY_BUFFER: usize = 256;
const STORE_BUFFER: usize = 256;

/// Starts and stops everything the relay runs on.
///
/// # Architecture
///
/// - **Registry actor**: owns rooms and per-connection state
/// - **Tracker pool**: one single-writer actor per active order, each with a writer task
/// - **Store actors** (in-memory only): snapshot documents and order records
///
/// # Example
///
/// ```ignore
/// let system = RelaySystem::in_memory(Config::default());
/// let app = build_app(system.app_state());
/// // ... serve ...
/// system.shutdown().await?;
/// ```
pub struct RelaySystem {
    /// Entry point for connections and events.
    pub relay: Relay,
    pub config: Arc<Config>,
    registry: RegistryClient,
    pool: TrackerPool,
    registry_handle: JoinHandle<()>,
    store: Option<InMemoryGateway>,
    store_handles: Vec<JoinHandle<()>>,
}

impl RelaySystem {
    /// Wire the relay on top of an externally provided gateway.
    pub fn new(gateway: Arc<dyn TrackingGateway>, config: Config) -> Self {
        let (registry_actor, registry) = RegistryActor::new(REGISTRY_BUFFER);
        let registry_handle = tokio::spawn(registry_actor.run());

        let pool = TrackerPool::new(gateway, registry.clone(), config.tracker_settings());
        let relay = Relay::new(registry.clone(), pool.clone(), config.outbound_buffer);

        info!(
            addr = %config.bind_addr(),
            store_timeout = ?config.store_timeout,
            tracker_idle = ?config.tracker_idle,
            "Relay system started"
        );

        Self {
            relay,
            config: Arc::new(config),
            registry,
            pool,
            registry_handle,
            store: None,
            store_handles: Vec::new(),
        }
    }

    /// Wire the relay on top of a fresh in-process store.
    pub fn in_memory(config: Config) -> Self {
        let (store, store_handles) = InMemoryGateway::start(STORE_BUFFER);
        let mut system = Self::new(Arc::new(store.clone()), config);
        system.store = Some(store);
        system.store_handles = store_handles;
        system
    }

    /// The in-process store, when the system was built with [`RelaySystem::in_memory`].
    pub fn store(&self) -> Option<&InMemoryGateway> {
        self.store.as_ref()
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            relay: self.relay.clone(),
            config: self.config.clone(),
        }
    }

    /// Gracefully shuts down the system.
    ///
    /// 1. Stop accepting tracker work and drain every tracker, flushing pending writes
    /// 2. Stop the registry, which closes every connection's outbound queue
    /// 3. Stop the in-process store actors
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down relay...");

        // =====================================================================
        // Step 1: Drain trackers
        // =====================================================================
        self.pool.shutdown().await;

        // =====================================================================
        // Step 2: Stop the registry
        // =====================================================================
        match self.registry.shutdown().await {
            Ok(()) | Err(RegistryError::Closed) => {}
            Err(e) => return Err(format!("Registry shutdown failed: {e}")),
        }
        if let Err(e) = self.registry_handle.await {
            error!("Registry task failed: {:?}", e);
            return Err(format!("Registry task failed: {:?}", e));
        }

        // =====================================================================
        // Step 3: Stop the store
        // =====================================================================
        // Every write was acknowledged before the trackers stopped, so nothing is lost.
        for handle in self.store_handles {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Store task failed: {:?}", e);
                    return Err(format!("Store task failed: {:?}", e));
                }
            }
        }

        info!("Relay shutdown complete.");
        Ok(())
    }
}
