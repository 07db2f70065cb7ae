//! Mirroring media to remote destinations.
//!
//! A single dispatcher task drains the [`queue`] and reconciles every
//! destination of a tenant concurrently. Within one destination the work is
//! strictly sequential: uploads oldest first, then removals, then one
//! batched commit of the results. Failures are logged and left for the next
//! cycle; nothing here is reported back to whoever scheduled the sync.

pub mod backend;
pub mod catalog;
pub mod queue;
pub mod telegram;

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{Error, Result};
use crate::store::TenantId;
use backend::{BackendError, BackendResolver, DestinationConfig, RemoteBackend};
use catalog::{LinkChange, SyncCatalog, SyncDestination};
use queue::{sync_queue, SyncQueue, SyncScheduler};

/// How hard to try before leaving an item for the next cycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per remote operation, including the first.
    pub max_attempts: u32,
    pub upload_backoff: Duration,
    pub delete_backoff: Duration,
    /// Attempts at committing a batch of results.
    pub commit_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            upload_backoff: Duration::from_secs(1),
            delete_backoff: Duration::from_secs(60),
            commit_attempts: 3,
        }
    }
}

/// Counts from one destination's reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub destination_id: i64,
    pub uploaded: usize,
    /// Uploads rejected for good; recorded with an empty remote reference.
    pub failed_permanently: usize,
    /// Items left for the next cycle after retryable failures.
    pub deferred: usize,
    pub removed: usize,
    /// The soft-deleted destination had nothing left and is gone.
    pub destination_removed: bool,
}

/// Call `op` until it succeeds, fails permanently or runs out of attempts.
fn with_retry<T>(
    backend: &dyn RemoteBackend,
    attempts: u32,
    backoff: Duration,
    mut op: impl FnMut() -> std::result::Result<T, BackendError>,
) -> std::result::Result<T, BackendError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && backend.is_retryable(&e) => {
                tracing::debug!(attempt, error = %e, "Retryable backend error, backing off");
                std::thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-destination reconciliation. Blocking; run it off the async runtime.
pub struct Reconciler {
    catalog: Arc<SyncCatalog>,
    resolver: Arc<dyn BackendResolver>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<SyncCatalog>,
        resolver: Arc<dyn BackendResolver>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            resolver,
            policy,
        }
    }

    pub fn reconcile_destination(
        &self,
        tenant: TenantId,
        destination: &SyncDestination,
    ) -> Result<ReconcileReport> {
        let config = destination.typed_config()?;
        let backend = self.resolver.resolve(&config)?;
        if !backend.validate() {
            return Err(Error::InvalidConfig(format!(
                "destination {} failed validation",
                destination.name
            )));
        }

        let work = self.catalog.pending_work(tenant, destination)?;
        let mut report = ReconcileReport {
            destination_id: destination.id,
            ..Default::default()
        };
        if work.is_empty() && !destination.is_deleted() {
            return Ok(report);
        }
        tracing::info!(
            tenant,
            destination = destination.id,
            uploads = work.uploads.len(),
            deletions = work.deletions.len(),
            "Reconciling destination"
        );

        let mut changes = Vec::with_capacity(work.uploads.len() + work.deletions.len());

        for item in &work.uploads {
            let result = with_retry(
                backend.as_ref(),
                self.policy.max_attempts,
                self.policy.upload_backoff,
                || backend.upload(&item.content_type, &item.path),
            );
            match result {
                Ok(remote_ref) => {
                    report.uploaded += 1;
                    tracing::debug!(
                        tenant,
                        destination = destination.id,
                        media_id = item.media_id,
                        progress = report.uploaded,
                        total = work.uploads.len(),
                        "Uploaded"
                    );
                    changes.push(LinkChange::Uploaded {
                        media_id: item.media_id,
                        remote_ref,
                    });
                }
                Err(e) if backend.is_retryable(&e) => {
                    report.deferred += 1;
                    tracing::warn!(tenant, destination = destination.id, media_id = item.media_id, error = %e, "Upload failed, retrying next cycle");
                }
                Err(e) => {
                    report.failed_permanently += 1;
                    tracing::warn!(tenant, destination = destination.id, media_id = item.media_id, error = %e, "Upload rejected");
                    changes.push(LinkChange::Uploaded {
                        media_id: item.media_id,
                        remote_ref: String::new(),
                    });
                }
            }
        }

        for link in &work.deletions {
            if !link.remote_ref.is_empty() {
                let result = with_retry(
                    backend.as_ref(),
                    self.policy.max_attempts,
                    self.policy.delete_backoff,
                    || backend.delete(&link.remote_ref),
                );
                match result {
                    Ok(()) => {}
                    Err(e) if backend.is_retryable(&e) => {
                        report.deferred += 1;
                        tracing::warn!(tenant, destination = destination.id, media_id = link.media_id, error = %e, "Remote delete failed, retrying next cycle");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(tenant, destination = destination.id, media_id = link.media_id, error = %e, "Remote delete rejected, forgetting link");
                    }
                }
            }
            report.removed += 1;
            changes.push(LinkChange::Removed { link_id: link.id });
        }

        report.destination_removed = self.commit(tenant, destination, &changes)?;
        if report.destination_removed {
            tracing::info!(tenant, destination = destination.id, "Removed deleted destination");
        }
        tracing::info!(
            tenant,
            destination = destination.id,
            uploaded = report.uploaded,
            failed = report.failed_permanently,
            deferred = report.deferred,
            removed = report.removed,
            "Destination reconciled"
        );
        Ok(report)
    }

    fn commit(
        &self,
        tenant: TenantId,
        destination: &SyncDestination,
        changes: &[LinkChange],
    ) -> Result<bool> {
        let attempts = self.policy.commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.catalog.apply_results(tenant, destination, changes) {
                Ok(removed) => return Ok(removed),
                Err(e) if attempt < attempts => {
                    tracing::warn!(tenant, destination = destination.id, attempt, error = %e, "Commit of sync results failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reconcile every destination of `tenant`, live and soft-deleted, in
    /// parallel. Errors are logged per destination.
    pub async fn reconcile_tenant(self: &Arc<Self>, tenant: TenantId) -> Vec<ReconcileReport> {
        let catalog = self.catalog.clone();
        let listed =
            tokio::task::spawn_blocking(move || catalog.list_destinations(tenant, true)).await;
        let destinations = match listed {
            Ok(Ok(destinations)) => destinations,
            Ok(Err(e)) => {
                tracing::error!(tenant, error = %e, "Could not load sync destinations");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!(tenant, error = %e, "Destination lookup task failed");
                return Vec::new();
            }
        };

        let mut tasks = JoinSet::new();
        for destination in destinations {
            let this = self.clone();
            tasks.spawn_blocking(move || {
                let result = this.reconcile_destination(tenant, &destination);
                (destination.id, result)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((destination, Err(e))) => {
                    tracing::warn!(tenant, destination, error = %e, "Destination sync failed");
                }
                Err(e) => tracing::error!(tenant, error = %e, "Destination sync task panicked"),
            }
        }
        reports
    }
}

/// The running sync engine: dispatcher task plus the scheduling handle.
pub struct SyncEngine {
    scheduler: SyncScheduler,
    catalog: Arc<SyncCatalog>,
    resolver: Arc<dyn BackendResolver>,
    dispatcher: JoinHandle<()>,
}

impl SyncEngine {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(
        catalog: Arc<SyncCatalog>,
        resolver: Arc<dyn BackendResolver>,
        policy: RetryPolicy,
    ) -> Self {
        let (scheduler, queue) = sync_queue();
        let reconciler = Arc::new(Reconciler::new(catalog.clone(), resolver.clone(), policy));
        let dispatcher = tokio::spawn(dispatch(queue, scheduler.clone(), move |tenant| {
            let reconciler = reconciler.clone();
            async move {
                reconciler.reconcile_tenant(tenant).await;
            }
        }));
        tracing::info!("Started sync engine");
        Self {
            scheduler,
            catalog,
            resolver,
            dispatcher,
        }
    }

    pub fn scheduler(&self) -> SyncScheduler {
        self.scheduler.clone()
    }

    /// Queue a sync for `tenant` without waiting.
    pub fn schedule(&self, tenant: TenantId) -> bool {
        self.scheduler.schedule(tenant)
    }

    pub fn catalog(&self) -> &Arc<SyncCatalog> {
        &self.catalog
    }

    /// Parse a destination config and probe it with its backend. Blocks on
    /// the network.
    pub fn validate_destination(&self, kind: &str, config: &Value) -> Result<DestinationConfig> {
        let typed = DestinationConfig::parse(kind, config)?;
        let backend = self.resolver.resolve(&typed)?;
        if !backend.validate() {
            return Err(Error::InvalidConfig(format!("{kind} destination is not reachable")));
        }
        Ok(typed)
    }

    /// Validate, store and schedule a first sync for a new destination.
    pub fn create_destination(
        &self,
        tenant: TenantId,
        name: &str,
        kind: &str,
        config: &Value,
    ) -> Result<SyncDestination> {
        let typed = self.validate_destination(kind, config)?;
        let destination = self.catalog.create_destination(tenant, name, &typed)?;
        self.schedule(tenant);
        Ok(destination)
    }

    pub fn save_destination(
        &self,
        tenant: TenantId,
        id: i64,
        name: &str,
        kind: &str,
        config: &Value,
    ) -> Result<SyncDestination> {
        let typed = self.validate_destination(kind, config)?;
        let destination = self.catalog.save_destination(tenant, id, name, &typed)?;
        self.schedule(tenant);
        Ok(destination)
    }

    /// Soft-delete a destination and schedule the sync that unwinds it.
    pub fn delete_destination(&self, tenant: TenantId, id: i64) -> Result<()> {
        self.catalog.delete_destination(tenant, id)?;
        self.schedule(tenant);
        Ok(())
    }

    /// Stop dispatching. Reconciliations already running finish on the
    /// blocking pool.
    pub async fn shutdown(self) {
        self.dispatcher.abort();
        let _ = self.dispatcher.await;
        tracing::info!("Stopped sync engine");
    }
}

/// Drain the queue, running at most one sync per tenant at a time. A
/// signal for a tenant that is already running is remembered and re-queued
/// when the run finishes.
async fn dispatch<F, Fut>(mut queue: SyncQueue, scheduler: SyncScheduler, run: F)
where
    F: Fn(TenantId) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut running: HashMap<TenantId, bool> = HashMap::new();
    let mut tasks: JoinSet<TenantId> = JoinSet::new();

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(tenant) = next else { break };
                if let Some(rerun) = running.get_mut(&tenant) {
                    tracing::debug!(tenant, "Sync already running, deferring");
                    *rerun = true;
                    continue;
                }
                running.insert(tenant, false);
                let sync = tokio::spawn(run(tenant));
                // The outer task always yields the tenant, even when the run panics.
                tasks.spawn(async move {
                    if let Err(e) = sync.await {
                        tracing::error!(tenant, error = %e, "Tenant sync task failed");
                    }
                    tenant
                });
            }
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                match done {
                    Ok(tenant) => {
                        if running.remove(&tenant) == Some(true) {
                            scheduler.schedule(tenant);
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Sync dispatch task failed"),
                }
            }
        }
    }
}
