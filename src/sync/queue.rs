//! "Sync this tenant" signals.
//!
//! Unbounded, so producers never wait. A tenant that is already waiting in
//! the queue is not queued a second time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::store::TenantId;

type Pending = Arc<Mutex<HashSet<TenantId>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashSet<TenantId>> {
    // The set holds plain ids; a panic elsewhere cannot leave it inconsistent.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer side; cheap to clone and hand to request handlers.
#[derive(Clone)]
pub struct SyncScheduler {
    tx: mpsc::UnboundedSender<TenantId>,
    pending: Pending,
}

impl SyncScheduler {
    /// Queue a sync for `tenant`. Returns false if it was already queued or
    /// the engine has stopped.
    pub fn schedule(&self, tenant: TenantId) -> bool {
        let mut pending = lock(&self.pending);
        if !pending.insert(tenant) {
            return false;
        }
        if self.tx.send(tenant).is_err() {
            pending.remove(&tenant);
            tracing::warn!(tenant, "Sync engine stopped, dropping schedule request");
            return false;
        }
        true
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Consumer side, owned by the dispatcher.
pub struct SyncQueue {
    rx: mpsc::UnboundedReceiver<TenantId>,
    pending: Pending,
}

impl SyncQueue {
    /// Wait for the next tenant. `None` once every scheduler is dropped.
    pub async fn recv(&mut self) -> Option<TenantId> {
        let tenant = self.rx.recv().await?;
        lock(&self.pending).remove(&tenant);
        Some(tenant)
    }
}

pub fn sync_queue() -> (SyncScheduler, SyncQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending: Pending = Arc::new(Mutex::new(HashSet::new()));
    (
        SyncScheduler {
            tx,
            pending: pending.clone(),
        },
        SyncQueue { rx, pending },
    )
}
