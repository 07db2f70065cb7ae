//! Sync destinations and the record of what has been mirrored where.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use super::backend::DestinationConfig;
use crate::error::{Error, Result};
use crate::store::{TenantId, TenantStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncDestination {
    pub id: i64,
    pub name: String,
    /// Type tag, e.g. `telegram`.
    pub kind: String,
    pub config: Value,
    pub deleted: Option<NaiveDateTime>,
}

impl SyncDestination {
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn typed_config(&self) -> Result<DestinationConfig> {
        DestinationConfig::parse(&self.kind, &self.config)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            config: row.get(3)?,
            deleted: row.get(4)?,
        })
    }
}

/// One media item mirrored to one destination. An empty `remote_ref`
/// marks an upload that failed permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncLink {
    pub id: i64,
    pub destination_id: i64,
    pub media_id: i64,
    pub remote_ref: String,
}

impl SyncLink {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            destination_id: row.get(1)?,
            media_id: row.get(2)?,
            remote_ref: row.get(3)?,
        })
    }
}

/// An active media item not yet mirrored to a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub media_id: i64,
    pub content_type: String,
    pub created: NaiveDateTime,
    pub path: PathBuf,
}

/// What a destination needs: uploads oldest first, and links to unwind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingWork {
    pub uploads: Vec<PendingUpload>,
    pub deletions: Vec<SyncLink>,
}

impl PendingWork {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.deletions.is_empty()
    }
}

/// Outcome of one remote operation, to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChange {
    Uploaded { media_id: i64, remote_ref: String },
    Removed { link_id: i64 },
}

const DESTINATION_COLUMNS: &str = "id, name, type, config, deleted";
const LINK_COLUMNS: &str = "id, location_id, media_id, meta";

pub struct SyncCatalog {
    stores: Arc<TenantStore>,
}

impl SyncCatalog {
    pub fn new(stores: Arc<TenantStore>) -> Self {
        Self { stores }
    }

    pub fn create_destination(
        &self,
        tenant: TenantId,
        name: &str,
        config: &DestinationConfig,
    ) -> Result<SyncDestination> {
        let value = config.to_value()?;
        let handle = self.stores.acquire(tenant)?;
        let id = handle.with(|conn| {
            conn.execute(
                "INSERT INTO sync_location (name, type, config) VALUES (?, ?, ?)",
                params![name, config.kind(), value],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(tenant, destination = id, kind = config.kind(), "Created sync destination");
        Ok(SyncDestination {
            id,
            name: name.to_string(),
            kind: config.kind().to_string(),
            config: value,
            deleted: None,
        })
    }

    /// Update name and configuration of a live destination.
    pub fn save_destination(
        &self,
        tenant: TenantId,
        id: i64,
        name: &str,
        config: &DestinationConfig,
    ) -> Result<SyncDestination> {
        let value = config.to_value()?;
        let handle = self.stores.acquire(tenant)?;
        let updated = handle.with(|conn| {
            Ok(conn.execute(
                "UPDATE sync_location SET name = ?, type = ?, config = ?
                 WHERE id = ? AND deleted IS NULL",
                params![name, config.kind(), value, id],
            )?)
        })?;
        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(SyncDestination {
            id,
            name: name.to_string(),
            kind: config.kind().to_string(),
            config: value,
            deleted: None,
        })
    }

    pub fn get_destination(&self, tenant: TenantId, id: i64) -> Result<SyncDestination> {
        let handle = self.stores.acquire(tenant)?;
        handle
            .with(|conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {DESTINATION_COLUMNS} FROM sync_location WHERE id = ?"),
                        [id],
                        SyncDestination::from_row,
                    )
                    .optional()?)
            })?
            .ok_or(Error::NotFound)
    }

    /// Live destinations, plus soft-deleted ones still being unwound when
    /// `include_deleted` is set.
    pub fn list_destinations(
        &self,
        tenant: TenantId,
        include_deleted: bool,
    ) -> Result<Vec<SyncDestination>> {
        let filter = if include_deleted { "" } else { "WHERE deleted IS NULL" };
        let handle = self.stores.acquire(tenant)?;
        handle.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DESTINATION_COLUMNS} FROM sync_location {filter} ORDER BY id"
            ))?;
            let destinations = stmt
                .query_map([], SyncDestination::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(destinations)
        })
    }

    /// Mark a destination deleted. The row itself goes once the engine has
    /// removed everything mirrored there.
    pub fn delete_destination(&self, tenant: TenantId, id: i64) -> Result<()> {
        let now = self.stores.clock().now_naive();
        let handle = self.stores.acquire(tenant)?;
        let exists = handle.with(|conn| {
            let exists: bool = conn
                .query_row("SELECT 1 FROM sync_location WHERE id = ?", [id], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            if exists {
                conn.execute(
                    "UPDATE sync_location SET deleted = ? WHERE id = ? AND deleted IS NULL",
                    params![now, id],
                )?;
            }
            Ok(exists)
        })?;
        if !exists {
            return Err(Error::NotFound);
        }
        tracing::info!(tenant, destination = id, "Marked sync destination deleted");
        Ok(())
    }

    pub fn links(&self, tenant: TenantId, destination_id: i64) -> Result<Vec<SyncLink>> {
        let handle = self.stores.acquire(tenant)?;
        handle.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LINK_COLUMNS} FROM sync_media WHERE location_id = ? ORDER BY id"
            ))?;
            let links = stmt
                .query_map([destination_id], SyncLink::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(links)
        })
    }

    /// Diff local media against the links of `destination`, read fresh from
    /// the database.
    pub fn pending_work(&self, tenant: TenantId, destination: &SyncDestination) -> Result<PendingWork> {
        let handle = self.stores.acquire(tenant)?;
        let (uploads, deletions) = handle.with(|conn| {
            let uploads = if destination.is_deleted() {
                Vec::new()
            } else {
                unlinked_media(conn, destination.id)?
            };
            let deletions = if destination.is_deleted() {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LINK_COLUMNS} FROM sync_media WHERE location_id = ? ORDER BY id"
                ))?;
                let links = stmt
                    .query_map([destination.id], SyncLink::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                links
            } else {
                let mut stmt = conn.prepare(
                    "SELECT s.id, s.location_id, s.media_id, s.meta
                     FROM sync_media s LEFT JOIN media m ON m.id = s.media_id
                     WHERE s.location_id = ? AND m.id IS NULL
                     ORDER BY s.id",
                )?;
                let links = stmt
                    .query_map([destination.id], SyncLink::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                links
            };
            Ok((uploads, deletions))
        })?;

        let uploads = uploads
            .into_iter()
            .map(|(media_id, name, content_type, created)| PendingUpload {
                path: self.stores.media_path(tenant, created.date(), media_id, &name),
                media_id,
                content_type,
                created,
            })
            .collect();

        Ok(PendingWork { uploads, deletions })
    }

    /// Record a batch of results in one transaction. When `destination` is
    /// soft-deleted and no links remain afterwards, its row is removed too.
    /// Returns whether the destination row was removed.
    pub fn apply_results(
        &self,
        tenant: TenantId,
        destination: &SyncDestination,
        changes: &[LinkChange],
    ) -> Result<bool> {
        let handle = self.stores.acquire(tenant)?;
        handle.with(|conn| {
            let tx = conn.transaction()?;
            for change in changes {
                match change {
                    LinkChange::Uploaded { media_id, remote_ref } => {
                        tx.execute(
                            "INSERT INTO sync_media (location_id, media_id, meta) VALUES (?, ?, ?)
                             ON CONFLICT(location_id, media_id) DO UPDATE SET meta = excluded.meta",
                            params![destination.id, media_id, remote_ref],
                        )?;
                    }
                    LinkChange::Removed { link_id } => {
                        tx.execute("DELETE FROM sync_media WHERE id = ?", [link_id])?;
                    }
                }
            }

            let mut removed = false;
            if destination.is_deleted() {
                let remaining: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM sync_media WHERE location_id = ?",
                    [destination.id],
                    |row| row.get(0),
                )?;
                if remaining == 0 {
                    tx.execute(
                        "DELETE FROM sync_location WHERE id = ? AND deleted IS NOT NULL",
                        [destination.id],
                    )?;
                    removed = true;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Active media not yet mirrored to a destination.
    pub fn backlog(&self, tenant: TenantId, destination_id: i64) -> Result<i64> {
        let handle = self.stores.acquire(tenant)?;
        handle.with(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM media m
                 WHERE m.deleted IS NULL AND NOT EXISTS (
                     SELECT 1 FROM sync_media s WHERE s.location_id = ? AND s.media_id = m.id
                 )",
                [destination_id],
                |row| row.get(0),
            )?)
        })
    }
}

fn unlinked_media(
    conn: &Connection,
    destination_id: i64,
) -> Result<Vec<(i64, String, String, NaiveDateTime)>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.name, m.content_type, m.created FROM media m
         WHERE m.deleted IS NULL AND NOT EXISTS (
             SELECT 1 FROM sync_media s WHERE s.location_id = ? AND s.media_id = m.id
         )
         ORDER BY m.created ASC, m.id ASC",
    )?;
    let rows = stmt
        .query_map([destination_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaStore;
    use crate::store::StoreOptions;
    use crate::sync::backend::TelegramConfig;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn telegram(channel: &str) -> DestinationConfig {
        DestinationConfig::Telegram(TelegramConfig {
            token: "t".into(),
            channel: channel.into(),
            api_base: None,
        })
    }

    fn day(d: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2021, 5, d).unwrap().and_hms_opt(0, 0, 0)
    }

    #[test]
    fn test_destination_lifecycle() {
        let dir = tempdir().unwrap();
        let catalog = SyncCatalog::new(Arc::new(TenantStore::new(StoreOptions::new(dir.path()))));

        let dest = catalog.create_destination(1, "backup", &telegram("@a")).unwrap();
        assert_eq!(dest.kind, "telegram");
        assert_eq!(dest.typed_config().unwrap(), telegram("@a"));

        let saved = catalog.save_destination(1, dest.id, "renamed", &telegram("@b")).unwrap();
        assert_eq!(catalog.get_destination(1, dest.id).unwrap(), saved);

        catalog.delete_destination(1, dest.id).unwrap();
        assert!(catalog.list_destinations(1, false).unwrap().is_empty());
        let all = catalog.list_destinations(1, true).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted());

        assert!(matches!(
            catalog.save_destination(1, dest.id, "x", &telegram("@c")),
            Err(Error::NotFound)
        ));
        assert!(matches!(catalog.delete_destination(1, 999), Err(Error::NotFound)));
    }

    #[test]
    fn test_pending_work_and_results() {
        let dir = tempdir().unwrap();
        let stores = Arc::new(TenantStore::new(StoreOptions::new(dir.path())));
        let media = MediaStore::new(stores.clone());
        let catalog = SyncCatalog::new(stores);

        let newer = media.ingest(1, "b.jpg", "image/jpeg", b"b", day(2)).unwrap();
        let older = media.ingest(1, "a.jpg", "image/jpeg", b"a", day(1)).unwrap();
        let hidden = media.ingest(1, "c.jpg", "image/jpeg", b"c", day(3)).unwrap();
        media.delete(1, &[hidden]).unwrap();

        let dest = catalog.create_destination(1, "backup", &telegram("@a")).unwrap();
        let work = catalog.pending_work(1, &dest).unwrap();
        let order: Vec<i64> = work.uploads.iter().map(|u| u.media_id).collect();
        assert_eq!(order, vec![older, newer]);
        assert!(work.uploads.iter().all(|u| u.path.is_file()));
        assert!(work.deletions.is_empty());
        assert_eq!(catalog.backlog(1, dest.id).unwrap(), 2);

        catalog
            .apply_results(
                1,
                &dest,
                &[
                    LinkChange::Uploaded { media_id: older, remote_ref: "10".into() },
                    LinkChange::Uploaded { media_id: newer, remote_ref: String::new() },
                ],
            )
            .unwrap();
        assert!(catalog.pending_work(1, &dest).unwrap().is_empty());
        assert_eq!(catalog.backlog(1, dest.id).unwrap(), 0);

        // Purging media leaves its link dangling, which becomes a deletion.
        media.delete(1, &[older]).unwrap();
        assert!(catalog.pending_work(1, &dest).unwrap().deletions.is_empty());
        media.delete(1, &[older]).unwrap();
        let work = catalog.pending_work(1, &dest).unwrap();
        assert_eq!(work.deletions.len(), 1);
        assert_eq!(work.deletions[0].remote_ref, "10");
    }

    #[test]
    fn test_deleted_destination_is_removed_once_unlinked() {
        let dir = tempdir().unwrap();
        let stores = Arc::new(TenantStore::new(StoreOptions::new(dir.path())));
        let media = MediaStore::new(stores.clone());
        let catalog = SyncCatalog::new(stores);

        let id = media.ingest(1, "a.jpg", "image/jpeg", b"a", None).unwrap();
        let dest = catalog.create_destination(1, "backup", &telegram("@a")).unwrap();
        catalog
            .apply_results(1, &dest, &[LinkChange::Uploaded { media_id: id, remote_ref: "5".into() }])
            .unwrap();

        catalog.delete_destination(1, dest.id).unwrap();
        let dest = catalog.get_destination(1, dest.id).unwrap();
        let work = catalog.pending_work(1, &dest).unwrap();
        assert!(work.uploads.is_empty());
        assert_eq!(work.deletions.len(), 1);

        // Nothing recorded yet: links remain, row stays.
        assert!(!catalog.apply_results(1, &dest, &[]).unwrap());
        let removed = catalog
            .apply_results(1, &dest, &[LinkChange::Removed { link_id: work.deletions[0].id }])
            .unwrap();
        assert!(removed);
        assert!(matches!(catalog.get_destination(1, dest.id), Err(Error::NotFound)));
    }
}
