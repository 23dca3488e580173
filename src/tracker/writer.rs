//! Best-effort snapshot persistence, decoupled from broadcasting.
//!
//! Each tracker owns one writer task fed through a bounded queue. Patches are merged
//! into the store in queue order; a failed merge is logged and never retried, since a
//! newer patch for the same order is usually already queued behind it.

use crate::gateway::{with_timeout, TrackingGateway};
use crate::model::{OrderId, SnapshotPatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct SnapshotWriter {
    order_id: OrderId,
    gateway: Arc<dyn TrackingGateway>,
    store_timeout: Duration,
    receiver: mpsc::Receiver<SnapshotPatch>,
}

impl SnapshotWriter {
    /// Spawn the writer for one order. It stops after the returned sender is dropped
    /// and everything already queued has been written.
    pub fn spawn(
        order_id: OrderId,
        gateway: Arc<dyn TrackingGateway>,
        store_timeout: Duration,
        buffer_size: usize,
    ) -> (mpsc::Sender<SnapshotPatch>, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let writer = Self {
            order_id,
            gateway,
            store_timeout,
            receiver,
        };
        (sender, tokio::spawn(writer.run()))
    }

    async fn run(mut self) {
        let mut written = 0usize;
        let mut failed = 0usize;

        while let Some(patch) = self.receiver.recv().await {
            let result = with_timeout(
                self.store_timeout,
                self.gateway.merge_snapshot(&self.order_id, patch),
            )
            .await;
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    failed += 1;
                    warn!(order_id = %self.order_id, error = %e, "Snapshot write failed, not retried");
                }
            }
        }

        debug!(order_id = %self.order_id, written, failed, "Writer stopped");
    }
}
