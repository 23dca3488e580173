//! Routes events to the tracker of their order, starting trackers on demand.
//!
//! A tracker that stops removes its own entry from the pool. A tracker started while
//! an earlier one for the same order is still flushing waits for it before touching
//! the store, so the two never interleave writes.

use crate::gateway::TrackingGateway;
use crate::model::OrderId;
use crate::session::RegistryClient;
use crate::tracker::{Tracker, TrackerCommand, TrackerSettings, TrackingError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct TrackerEntry {
    generation: u64,
    sender: mpsc::Sender<TrackerCommand>,
    handle: JoinHandle<()>,
    /// Closes once the tracker and its writer have finished.
    stopped: watch::Receiver<()>,
}

struct PoolInner {
    trackers: Mutex<HashMap<OrderId, TrackerEntry>>,
    next_generation: AtomicU64,
    /// Trackers that stopped accepting work but may still be flushing writes.
    retired: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    gateway: Arc<dyn TrackingGateway>,
    registry: RegistryClient,
    settings: TrackerSettings,
}

/// Cloneable handle to the set of live trackers.
#[derive(Clone)]
pub struct TrackerPool {
    inner: Arc<PoolInner>,
}

impl TrackerPool {
    pub fn new(
        gateway: Arc<dyn TrackingGateway>,
        registry: RegistryClient,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                trackers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                retired: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                gateway,
                registry,
                settings,
            }),
        }
    }

    /// Queue `command` on the order's tracker, starting one if none is running.
    ///
    /// Waits while the tracker's queue is full, which only slows the caller's
    /// connection down.
    pub async fn dispatch(
        &self,
        order_id: &OrderId,
        command: TrackerCommand,
    ) -> Result<(), TrackingError> {
        let mut command = command;
        // A tracker that went idle between lookup and send rejects the command;
        // the second attempt starts a fresh one.
        for _ in 0..2 {
            let sender = self.sender_for(order_id)?;
            match sender.send(command).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    debug!(%order_id, "Tracker stopped before accepting work, restarting");
                    command = returned;
                }
            }
        }
        error!(%order_id, "Tracker could not be started");
        Err(TrackingError::Stopped)
    }

    /// Number of trackers still accepting work.
    pub fn active_count(&self) -> usize {
        self.inner
            .trackers
            .lock()
            .values()
            .filter(|entry| !entry.sender.is_closed())
            .count()
    }

    /// Stop accepting work and wait for every tracker to finish its queue and flush
    /// its pending writes.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let trackers: Vec<(OrderId, TrackerEntry)> = self.inner.trackers.lock().drain().collect();
        info!(trackers = trackers.len(), "Draining trackers");

        for (order_id, entry) in trackers {
            drop(entry.sender);
            if let Err(e) = entry.handle.await {
                error!(%order_id, error = ?e, "Tracker task failed");
            }
        }

        let retired: Vec<JoinHandle<()>> = self.inner.retired.lock().drain(..).collect();
        for handle in retired {
            if let Err(e) = handle.await {
                error!(error = ?e, "Tracker task failed");
            }
        }
    }

    fn sender_for(&self, order_id: &OrderId) -> Result<mpsc::Sender<TrackerCommand>, TrackingError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TrackingError::Stopped);
        }
        let mut trackers = self.inner.trackers.lock();
        if let Some(entry) = trackers.get(order_id) {
            if !entry.sender.is_closed() {
                return Ok(entry.sender.clone());
            }
        }
        // Still flushing: the successor waits for it.
        let predecessor = trackers.remove(order_id).map(|stale| {
            let stopped = stale.stopped.clone();
            self.retire(stale);
            stopped
        });

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (stopped_tx, stopped) = watch::channel(());
        let (sender, tracker) = Tracker::spawn(
            order_id.clone(),
            self.inner.gateway.clone(),
            self.inner.registry.clone(),
            self.inner.settings.clone(),
            predecessor,
        );
        let handle = tokio::spawn(reap_on_exit(
            Arc::downgrade(&self.inner),
            order_id.clone(),
            generation,
            tracker,
            stopped_tx,
        ));
        debug!(%order_id, active = trackers.len() + 1, "Tracker spawned");
        trackers.insert(
            order_id.clone(),
            TrackerEntry { generation, sender: sender.clone(), handle, stopped },
        );
        Ok(sender)
    }

    fn retire(&self, entry: TrackerEntry) {
        let mut retired = self.inner.retired.lock();
        retired.retain(|handle| !handle.is_finished());
        retired.push(entry.handle);
    }
}

/// Wait for a tracker to finish, then drop its pool entry unless a successor owns it.
async fn reap_on_exit(
    pool: Weak<PoolInner>,
    order_id: OrderId,
    generation: u64,
    tracker: JoinHandle<()>,
    stopped: watch::Sender<()>,
) {
    if let Err(e) = tracker.await {
        error!(%order_id, error = ?e, "Tracker task failed");
    }
    drop(stopped);

    let Some(pool) = pool.upgrade() else {
        return;
    };
    let mut trackers = pool.trackers.lock();
    if trackers
        .get(&order_id)
        .is_some_and(|entry| entry.generation == generation)
    {
        trackers.remove(&order_id);
        debug!(%order_id, active = trackers.len(), "Tracker removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::model::ConnectionId;
    use crate::session::RegistryActor;
    use std::time::Duration;

    fn pool(idle_timeout: Duration) -> TrackerPool {
        let (gateway, _store) = InMemoryGateway::start(64);
        let (registry, client) = RegistryActor::new(64);
        tokio::spawn(registry.run());
        let settings = TrackerSettings {
            idle_timeout,
            ..TrackerSettings::default()
        };
        TrackerPool::new(Arc::new(gateway), client, settings)
    }

    fn tracked(pool: &TrackerPool) -> usize {
        pool.inner.trackers.lock().len()
    }

    #[tokio::test]
    async fn test_idle_trackers_leave_the_pool() {
        let pool = pool(Duration::from_millis(20));
        for n in 0..200 {
            let order_id = OrderId::from(format!("order_{n}").as_str());
            let replay = TrackerCommand::Replay { connection: ConnectionId(1) };
            pool.dispatch(&order_id, replay).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tracked(&pool) > 0 {
            assert!(tokio::time::Instant::now() < deadline, "{} trackers left", tracked(&pool));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_order_returning_after_idle_gets_a_new_tracker() {
        let pool = pool(Duration::from_millis(100));
        let order_id = OrderId::from("order_1");
        let replay = || TrackerCommand::Replay { connection: ConnectionId(1) };

        pool.dispatch(&order_id, replay()).await.unwrap();
        assert_eq!(pool.active_count(), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(tracked(&pool), 0);

        pool.dispatch(&order_id, replay()).await.unwrap();
        assert_eq!(pool.active_count(), 1);

        pool.shutdown().await;
        assert_eq!(tracked(&pool), 0);
        assert!(matches!(
            pool.dispatch(&order_id, replay()).await,
            Err(TrackingError::Stopped)
        ));
    }
}
