//! Per-account database lifecycle.
//!
//! Every tenant owns one SQLite file under the data root plus a directory
//! tree for its media. Connections are opened and migrated on first use,
//! kept in a lock-protected map, and closed again once they have been idle
//! for longer than the sweep interval.

pub mod clock;
pub mod migrate;
mod schema;

use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
pub use clock::{Clock, ManualClock, SystemClock};
pub use migrate::MigrationOutcome;
pub use schema::{SHARED_MIGRATIONS, TENANT_MIGRATIONS};

/// Account id. Tenant 0 is the shared account store.
pub type TenantId = i64;

pub const SHARED_TENANT: TenantId = 0;

/// A live connection to one tenant's database.
///
/// Cloning is cheap; the underlying connection is closed once the store has
/// evicted it and the last clone is dropped, so a handle held by a caller
/// stays usable even if the sweeper runs in the meantime.
#[derive(Clone)]
pub struct TenantHandle {
    tenant: TenantId,
    conn: Arc<Mutex<Connection>>,
}

impl TenantHandle {
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Lock the connection for the duration of `f`. All reads and writes for
    /// a tenant go through this lock, so writes are serialized.
    pub fn with<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock()?;
        f(&mut conn)
    }
}

struct OpenHandle {
    handle: TenantHandle,
    last_used: DateTime<Utc>,
}

/// Options for opening tenant databases.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub data_root: PathBuf,
    pub idle_interval: Duration,
    pub busy_timeout: Duration,
}

impl StoreOptions {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            idle_interval: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct TenantStore {
    options: StoreOptions,
    clock: Arc<dyn Clock>,
    handles: Mutex<HashMap<TenantId, OpenHandle>>,
}

impl TenantStore {
    pub fn new(options: StoreOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: StoreOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            options,
            clock,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn data_root(&self) -> &Path {
        &self.options.data_root
    }

    pub fn idle_interval(&self) -> Duration {
        self.options.idle_interval
    }

    fn lock_handles(&self) -> Result<MutexGuard<'_, HashMap<TenantId, OpenHandle>>> {
        Ok(self.handles.lock()?)
    }

    /// Return a live handle for `tenant`, opening and migrating its database
    /// on first use. Every successful call refreshes the idle timer.
    pub fn acquire(&self, tenant: TenantId) -> Result<TenantHandle> {
        {
            let mut handles = self.lock_handles()?;
            if let Some(open) = handles.get_mut(&tenant) {
                open.last_used = self.clock.now();
                return Ok(open.handle.clone());
            }
        }

        // Opening happens outside the map lock so other tenants are not
        // held up by a slow open or migration.
        let (handle, outcome) = self.open(tenant)?;

        let handle = {
            let mut handles = self.lock_handles()?;
            let open = handles.entry(tenant).or_insert_with(|| OpenHandle {
                handle,
                last_used: self.clock.now(),
            });
            open.last_used = self.clock.now();
            open.handle.clone()
        };

        if tenant != SHARED_TENANT && outcome.applied() {
            self.record_schema_version(tenant, outcome.to)?;
        }

        Ok(handle)
    }

    fn open(&self, tenant: TenantId) -> Result<(TenantHandle, MigrationOutcome)> {
        std::fs::create_dir_all(&self.options.data_root)?;
        let path = self.db_path(tenant);
        tracing::info!(tenant, path = %path.display(), "Opening tenant database");

        let mut conn = Connection::open(&path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let steps = if tenant == SHARED_TENANT {
            SHARED_MIGRATIONS
        } else {
            TENANT_MIGRATIONS
        };
        let outcome = migrate::migrate(&mut conn, steps)?;
        if outcome.applied() {
            tracing::info!(tenant, from = outcome.from, to = outcome.to, "Migrated tenant schema");
        }

        let handle = TenantHandle {
            tenant,
            conn: Arc::new(Mutex::new(conn)),
        };
        Ok((handle, outcome))
    }

    /// Close every handle that has not been acquired within the idle
    /// interval. Returns the tenants that were closed.
    ///
    /// The liveness check and the removal happen under the same lock that
    /// `acquire` takes, so a handle cannot be evicted between being looked
    /// up and handed out.
    pub fn sweep_idle(&self) -> Result<Vec<TenantId>> {
        let now = self.clock.now();
        let idle = chrono::Duration::from_std(self.options.idle_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut handles = self.lock_handles()?;
        let expired: Vec<TenantId> = handles
            .iter()
            .filter(|(_, open)| now - open.last_used > idle)
            .map(|(tenant, _)| *tenant)
            .collect();
        for tenant in &expired {
            handles.remove(tenant);
            tracing::info!(tenant = *tenant, "Closing idle tenant database");
        }
        Ok(expired)
    }

    pub fn is_open(&self, tenant: TenantId) -> bool {
        self.lock_handles()
            .map(|handles| handles.contains_key(&tenant))
            .unwrap_or(false)
    }

    pub fn open_count(&self) -> usize {
        self.lock_handles().map(|handles| handles.len()).unwrap_or(0)
    }

    /// Drop every cached handle, e.g. at shutdown.
    pub fn close_all(&self) -> Result<()> {
        let mut handles = self.lock_handles()?;
        handles.clear();
        Ok(())
    }

    /// Start the repeating idle sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference, so it also stops on its own
    /// once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let interval = self.options.idle_interval;
        let store: Weak<TenantStore> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                match store.sweep_idle() {
                    Ok(closed) if !closed.is_empty() => {
                        tracing::debug!(closed = closed.len(), "Idle sweep closed handles");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Idle sweep failed"),
                }
            }
        });

        SweeperHandle { task }
    }

    // ========================================================================
    // Paths
    // ========================================================================

    pub fn db_path(&self, tenant: TenantId) -> PathBuf {
        self.options.data_root.join(format!("{}.db", tenant))
    }

    /// Root of a tenant's file tree: `<data-root>/<tenant>`.
    pub fn tenant_dir(&self, tenant: TenantId) -> PathBuf {
        self.options.data_root.join(tenant.to_string())
    }

    /// Staging area for in-flight uploads: `<data-root>/<tenant>/tmp`.
    pub fn staging_dir(&self, tenant: TenantId) -> PathBuf {
        self.tenant_dir(tenant).join("tmp")
    }

    /// Drop-in directory scanned by directory imports.
    pub fn upload_dir(&self, tenant: TenantId) -> PathBuf {
        self.tenant_dir(tenant).join("upload")
    }

    /// Directory holding one media item and its derived artifacts:
    /// `<data-root>/<tenant>/<YYYY-MM-DD>/<media-id>`.
    pub fn media_dir(&self, tenant: TenantId, created: NaiveDate, media_id: i64) -> PathBuf {
        self.tenant_dir(tenant)
            .join(created.format("%Y-%m-%d").to_string())
            .join(media_id.to_string())
    }

    pub fn media_path(&self, tenant: TenantId, created: NaiveDate, media_id: i64, name: &str) -> PathBuf {
        self.media_dir(tenant, created, media_id).join(name)
    }

    fn record_schema_version(&self, tenant: TenantId, version: usize) -> Result<()> {
        let shared = self.acquire(SHARED_TENANT)?;
        let updated = shared.with(|conn| {
            Ok(conn.execute(
                "UPDATE account SET schema_version = ? WHERE id = ?",
                rusqlite::params![version as i64, tenant],
            )?)
        })?;
        if updated == 0 {
            tracing::warn!(tenant, "Migrated a tenant with no account row");
        }
        Ok(())
    }
}

/// Owner of the background idle sweep. Dropping it leaves the sweep
/// running; call [`SweeperHandle::shutdown`] to stop it.
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn store_with_clock(root: &Path) -> (Arc<ManualClock>, TenantStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = TenantStore::with_clock(StoreOptions::new(root), clock.clone());
        (clock, store)
    }

    #[test]
    fn test_acquire_opens_and_migrates() {
        let dir = tempdir().unwrap();
        let (_, store) = store_with_clock(dir.path());

        let handle = store.acquire(7).unwrap();
        assert_eq!(handle.tenant(), 7);
        assert!(store.db_path(7).exists());

        let version = handle.with(|conn| migrate::current_version(conn)).unwrap();
        assert_eq!(version, TENANT_MIGRATIONS.len());
    }

    #[test]
    fn test_acquire_reuses_open_handle() {
        let dir = tempdir().unwrap();
        let (_, store) = store_with_clock(dir.path());

        let a = store.acquire(3).unwrap();
        let b = store.acquire(3).unwrap();
        assert!(Arc::ptr_eq(&a.conn, &b.conn));
        assert_eq!(store.open_count(), 2); // tenant 3 plus the shared store
    }

    #[test]
    fn test_idle_handles_are_closed_and_hot_ones_survive() {
        let dir = tempdir().unwrap();
        let (clock, store) = store_with_clock(dir.path());

        store.acquire(1).unwrap();
        store.acquire(2).unwrap();

        clock.advance(chrono::Duration::seconds(30));
        store.acquire(2).unwrap();
        clock.advance(chrono::Duration::seconds(40));

        let closed = store.sweep_idle().unwrap();
        assert!(closed.contains(&1));
        assert!(!store.is_open(1));
        assert!(store.is_open(2));
    }

    #[test]
    fn test_evicted_handle_stays_usable_by_holder() {
        let dir = tempdir().unwrap();
        let (clock, store) = store_with_clock(dir.path());

        let handle = store.acquire(4).unwrap();
        clock.advance(chrono::Duration::seconds(120));
        store.sweep_idle().unwrap();
        assert!(!store.is_open(4));

        let count: i64 = handle
            .with(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM media", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);

        // Reacquiring reopens a fresh handle.
        store.acquire(4).unwrap();
        assert!(store.is_open(4));
    }

    #[test]
    fn test_media_paths_are_deterministic() {
        let store = TenantStore::new(StoreOptions::new("/data"));
        let date = NaiveDate::from_ymd_opt(2023, 7, 9).unwrap();
        assert_eq!(
            store.media_path(5, date, 42, "beach.jpg"),
            PathBuf::from("/data/5/2023-07-09/42/beach.jpg")
        );
        assert_eq!(store.staging_dir(5), PathBuf::from("/data/5/tmp"));
        assert_eq!(store.db_path(0), PathBuf::from("/data/0.db"));
    }

    #[tokio::test]
    async fn test_sweeper_shuts_down() {
        let dir = tempdir().unwrap();
        let mut options = StoreOptions::new(dir.path());
        options.idle_interval = Duration::from_millis(20);
        let store = Arc::new(TenantStore::new(options));

        store.acquire(9).unwrap();
        let sweeper = store.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!store.is_open(9));

        sweeper.shutdown();
    }

    #[tokio::test]
    async fn test_sweeper_stops_with_store() {
        let dir = tempdir().unwrap();
        let mut options = StoreOptions::new(dir.path());
        options.idle_interval = Duration::from_millis(20);
        let store = Arc::new(TenantStore::new(options));

        let sweeper = store.spawn_sweeper();
        assert!(!sweeper.is_finished());

        drop(store);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sweeper.is_finished());
    }
}
