//! Content-addressed media storage on top of [`TenantStore`].
//!
//! Bytes are hashed, staged under `<tenant>/tmp`, recorded in the tenant
//! database and only then moved to their final path, which is keyed by the
//! id the database assigned. A row therefore never points at a missing file,
//! and the staging area is emptied whatever the outcome.

pub mod import;
pub mod metadata;
pub mod timestamp;

use chrono::{NaiveDateTime, Utc};
use rayon::prelude::*;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::{TenantHandle, TenantId, TenantStore};
use metadata::{MetadataExtractor, NoMetadata};

pub use import::ImportReport;

pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Only `image/*` and `video/*` are accepted.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let lower = content_type.trim().to_ascii_lowercase();
        if lower.starts_with("image/") {
            Some(MediaKind::Image)
        } else if lower.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRecord {
    pub id: i64,
    pub name: String,
    pub public: bool,
    pub checksum: String,
    pub content_type: String,
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
    pub deleted: Option<NaiveDateTime>,
    pub size: i64,
    pub meta: Option<serde_json::Value>,
}

impl MediaRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            public: row.get(2)?,
            checksum: row.get(3)?,
            content_type: row.get(4)?,
            created: row.get(5)?,
            modified: row.get(6)?,
            deleted: row.get(7)?,
            size: row.get(8)?,
            meta: row.get(9)?,
        })
    }
}

const MEDIA_COLUMNS: &str =
    "id, name, public, checksum, content_type, created, modified, deleted, size, meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFilter {
    #[default]
    Active,
    Deleted,
}

impl MediaFilter {
    fn clause(self) -> &'static str {
        match self {
            MediaFilter::Active => "deleted IS NULL",
            MediaFilter::Deleted => "deleted IS NOT NULL",
        }
    }
}

/// One page of a listing. `total` counts every record matching the filter.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<MediaRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    /// At least one page, even for an empty listing.
    pub fn total_pages(&self) -> i64 {
        let size = i64::from(self.page_size.max(1));
        ((self.total + size - 1) / size).max(1)
    }
}

struct Stored {
    id: i64,
    duplicate: bool,
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub soft_deleted: usize,
    pub purged: usize,
}

pub struct MediaStore {
    stores: Arc<TenantStore>,
    extractor: Arc<dyn MetadataExtractor>,
    max_page_size: u32,
}

impl MediaStore {
    pub fn new(stores: Arc<TenantStore>) -> Self {
        Self {
            stores,
            extractor: Arc::new(NoMetadata),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_max_page_size(mut self, max: u32) -> Self {
        self.max_page_size = if max == 0 { DEFAULT_MAX_PAGE_SIZE } else { max };
        self
    }

    pub fn stores(&self) -> &Arc<TenantStore> {
        &self.stores
    }

    /// Store `bytes` for `tenant` and return the media id. Identical bytes
    /// already stored for the tenant return the existing id.
    pub fn ingest(
        &self,
        tenant: TenantId,
        name: &str,
        content_type: &str,
        bytes: &[u8],
        fallback: Option<NaiveDateTime>,
    ) -> Result<i64> {
        self.store(tenant, name, content_type, bytes, fallback)
            .map(|stored| stored.id)
    }

    fn store(
        &self,
        tenant: TenantId,
        name: &str,
        content_type: &str,
        bytes: &[u8],
        fallback: Option<NaiveDateTime>,
    ) -> Result<Stored> {
        let kind = MediaKind::from_content_type(content_type)
            .ok_or_else(|| Error::UnsupportedType(content_type.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::EmptyContent);
        }
        let name = leaf_name(name)?;
        let checksum = content_checksum(bytes);

        let handle = self.stores.acquire(tenant)?;
        if let Some(id) = handle.with(|conn| find_by_checksum(conn, &checksum))? {
            tracing::debug!(tenant, media_id = id, "Duplicate upload, returning existing id");
            return Ok(Stored { id, duplicate: true });
        }

        let staged = StagedFile::create(&self.stores.staging_dir(tenant), &name, bytes)?;
        let extracted = self.extractor.extract(kind, bytes, staged.path());
        let now = self.stores.clock().now_naive();
        let created = timestamp::resolve_created(fallback, extracted.taken_at, &name, now);

        let inserted = handle.with(|conn| {
            let result = conn.execute(
                "INSERT INTO media (name, checksum, content_type, created, modified, size, meta)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    name,
                    checksum,
                    content_type,
                    created,
                    now,
                    bytes.len() as i64,
                    extracted.meta
                ],
            );
            match result {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(e) if Error::is_constraint(&e) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        let Some(id) = inserted else {
            // Lost a race with a concurrent upload of the same bytes.
            let id = handle
                .with(|conn| find_by_checksum(conn, &checksum))?
                .ok_or(Error::NotFound)?;
            return Ok(Stored { id, duplicate: true });
        };

        let target_dir = self.stores.media_dir(tenant, created.date(), id);
        if let Err(e) = place_file(staged.path(), &target_dir, &name) {
            tracing::warn!(tenant, media_id = id, error = %e, "Failed to place media file, rolling back");
            if let Err(rollback) = handle
                .with(|conn| Ok(conn.execute("DELETE FROM media WHERE id = ?", [id])?))
            {
                tracing::error!(tenant, media_id = id, error = %rollback, "Rollback of media row failed");
            }
            if target_dir.is_dir() {
                if let Err(cleanup) = fs::remove_dir_all(&target_dir) {
                    tracing::warn!(tenant, media_id = id, error = %cleanup, "Could not remove partial media directory");
                }
            }
            return Err(e);
        }

        tracing::info!(tenant, media_id = id, name = %name, size = bytes.len(), "Stored media");
        Ok(Stored { id, duplicate: false })
    }

    /// List records newest first. `page` is 1-based; 0 means the first
    /// page. `page_size` of 0 or above the maximum is clamped to the maximum.
    pub fn list(&self, tenant: TenantId, page: u32, page_size: u32, filter: MediaFilter) -> Result<Page> {
        let page = page.max(1);
        let page_size = if page_size == 0 || page_size > self.max_page_size {
            self.max_page_size
        } else {
            page_size
        };
        let offset = i64::from(page - 1) * i64::from(page_size);

        let handle = self.stores.acquire(tenant)?;
        let (items, total) = handle.with(|conn| {
            let clause = filter.clause();
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM media WHERE {clause}"),
                [],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDIA_COLUMNS} FROM media WHERE {clause}
                 ORDER BY created DESC, id DESC LIMIT ? OFFSET ?"
            ))?;
            let items = stmt
                .query_map(params![page_size, offset], MediaRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((items, total))
        })?;

        Ok(Page { items, total, page, page_size })
    }

    pub fn get_by_id(&self, tenant: TenantId, id: i64) -> Result<MediaRecord> {
        let handle = self.stores.acquire(tenant)?;
        handle
            .with(|conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?"),
                        [id],
                        MediaRecord::from_row,
                    )
                    .optional()?)
            })?
            .ok_or(Error::NotFound)
    }

    /// Soft-delete active records and purge already deleted ones.
    ///
    /// Purged files are removed in parallel before their rows go; a file
    /// that is already missing is only logged.
    pub fn delete(&self, tenant: TenantId, ids: &[i64]) -> Result<DeleteSummary> {
        let handle = self.stores.acquire(tenant)?;
        let records = handle.with(|conn| records_by_ids(conn, ids))?;
        if records.is_empty() {
            return Err(Error::NotFound);
        }

        let (to_purge, to_soft_delete): (Vec<_>, Vec<_>) =
            records.into_iter().partition(MediaRecord::is_deleted);

        let now = self.stores.clock().now_naive();
        let soft_deleted = if to_soft_delete.is_empty() {
            0
        } else {
            handle.with(|conn| {
                let tx = conn.transaction()?;
                let mut changed = 0;
                for record in &to_soft_delete {
                    changed += tx.execute(
                        "UPDATE media SET deleted = ?, modified = ? WHERE id = ? AND deleted IS NULL",
                        params![now, now, record.id],
                    )?;
                }
                tx.commit()?;
                Ok(changed)
            })?
        };

        let purged = if to_purge.is_empty() {
            0
        } else {
            self.purge(tenant, &handle, &to_purge)?
        };

        tracing::info!(tenant, soft_deleted, purged, "Deleted media");
        Ok(DeleteSummary { soft_deleted, purged })
    }

    fn purge(
        &self,
        tenant: TenantId,
        handle: &TenantHandle,
        records: &[MediaRecord],
    ) -> Result<usize> {
        let dirs: Vec<PathBuf> = records
            .iter()
            .map(|r| self.stores.media_dir(tenant, r.created.date(), r.id))
            .collect();

        let removed = dirs
            .par_iter()
            .filter(|dir| match fs::remove_dir_all(dir) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(tenant, path = %dir.display(), error = %e, "Could not remove media directory");
                    false
                }
            })
            .count();
        if removed != dirs.len() {
            tracing::warn!(tenant, expected = dirs.len(), removed, "Purge removed fewer files than expected");
        }

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        handle.with(|conn| {
            Ok(conn.execute(
                &format!(
                    "DELETE FROM media WHERE deleted IS NOT NULL AND id IN ({})",
                    placeholders(ids.len())
                ),
                params_from_iter(ids.iter()),
            )?)
        })
    }

    /// Clear the soft-delete mark. Returns how many records were restored.
    pub fn restore(&self, tenant: TenantId, ids: &[i64]) -> Result<usize> {
        let handle = self.stores.acquire(tenant)?;
        let records = handle.with(|conn| records_by_ids(conn, ids))?;
        if records.is_empty() {
            return Err(Error::NotFound);
        }
        let deleted: Vec<i64> = records.iter().filter(|r| r.is_deleted()).map(|r| r.id).collect();
        if deleted.is_empty() {
            return Ok(0);
        }

        let now = self.stores.clock().now_naive();
        handle.with(|conn| {
            let tx = conn.transaction()?;
            let mut restored = 0;
            for id in &deleted {
                restored += tx.execute(
                    "UPDATE media SET deleted = NULL, modified = ? WHERE id = ?",
                    params![now, id],
                )?;
            }
            tx.commit()?;
            Ok(restored)
        })
    }

    /// Where the bytes of `record` live on disk.
    pub fn file_path(&self, tenant: TenantId, record: &MediaRecord) -> PathBuf {
        self.stores
            .media_path(tenant, record.created.date(), record.id, &record.name)
    }
}

/// Hex SHA-256 of the content.
pub fn content_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The final path component of a client-supplied name.
fn leaf_name(name: &str) -> Result<String> {
    let leaf = name.rsplit(&['/', '\\'][..]).next().unwrap_or_default().trim();
    if leaf.is_empty() || leaf == "." || leaf == ".." {
        return Err(Error::InvalidName);
    }
    Ok(leaf.to_string())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn find_by_checksum(conn: &Connection, checksum: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM media WHERE checksum = ?", [checksum], |row| row.get(0))
        .optional()?)
}

fn records_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<MediaRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDIA_COLUMNS} FROM media WHERE id IN ({})",
        placeholders(ids.len())
    ))?;
    let records = stmt
        .query_map(params_from_iter(ids.iter()), MediaRecord::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Move a staged file into its final directory. Falls back to a copy when
/// the rename crosses filesystems.
fn place_file(staged: &Path, target_dir: &Path, name: &str) -> Result<()> {
    fs::create_dir_all(target_dir)?;
    let target = target_dir.join(name);
    if fs::rename(staged, &target).is_err() {
        fs::copy(staged, &target)?;
    }
    Ok(())
}

/// An upload written to its own directory under the staging area. The
/// directory is removed on drop, whether or not the file was moved out.
struct StagedFile {
    dir: PathBuf,
    file: PathBuf,
}

impl StagedFile {
    fn create(staging_root: &Path, name: &str, bytes: &[u8]) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let unique = format!(
            "{}-{}-{}",
            Utc::now().timestamp_micros(),
            std::process::id(),
            seq
        );
        let dir = staging_root.join(unique);
        fs::create_dir_all(&dir)?;

        let staged = Self { file: dir.join(name), dir };
        fs::write(&staged.file, bytes)?;
        Ok(staged)
    }

    fn path(&self) -> &Path {
        &self.file
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.dir.display(), error = %e, "Failed to clean staging directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn media_store(root: &Path) -> MediaStore {
        MediaStore::new(Arc::new(TenantStore::new(StoreOptions::new(root))))
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn staged_entries(store: &MediaStore, tenant: TenantId) -> usize {
        match fs::read_dir(store.stores().staging_dir(tenant)) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    fn files_under(dir: &Path) -> usize {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_kind_from_content_type() {
        assert_eq!(MediaKind::from_content_type("image/jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_content_type("Video/MP4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_content_type("text/plain"), None);
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let first = store.ingest(1, "cat.jpg", "image/jpeg", b"meow", None).unwrap();
        let second = store.ingest(1, "other-name.jpg", "image/jpeg", b"meow", None).unwrap();
        assert_eq!(first, second);

        let tenant_dir = store.stores().tenant_dir(1);
        assert_eq!(files_under(&tenant_dir), 1);
        assert_eq!(staged_entries(&store, 1), 0);
    }

    #[test]
    fn test_same_bytes_in_different_tenants_are_separate() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        store.ingest(1, "a.jpg", "image/jpeg", b"same", None).unwrap();
        store.ingest(2, "a.jpg", "image/jpeg", b"same", None).unwrap();
        assert_eq!(files_under(&store.stores().tenant_dir(1)), 1);
        assert_eq!(files_under(&store.stores().tenant_dir(2)), 1);
    }

    #[test]
    fn test_ingest_rejects_bad_input_before_writing() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        assert!(matches!(
            store.ingest(1, "notes.txt", "text/plain", b"hello", None),
            Err(Error::UnsupportedType(_))
        ));
        assert!(matches!(
            store.ingest(1, "empty.jpg", "image/jpeg", b"", None),
            Err(Error::EmptyContent)
        ));
        assert!(matches!(
            store.ingest(1, "dir/", "image/jpeg", b"x", None),
            Err(Error::InvalidName)
        ));
        assert!(!store.stores().tenant_dir(1).exists());
    }

    #[test]
    fn test_file_lands_at_deterministic_path() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let id = store
            .ingest(3, "../../etc/beach.jpg", "image/jpeg", b"waves", Some(at(2023, 7, 9)))
            .unwrap();
        let record = store.get_by_id(3, id).unwrap();
        assert_eq!(record.name, "beach.jpg");
        assert_eq!(record.size, 5);
        assert_eq!(record.checksum, content_checksum(b"waves"));

        let expected = dir.path().join("3").join("2023-07-09").join(id.to_string()).join("beach.jpg");
        assert_eq!(store.file_path(3, &record), expected);
        assert_eq!(fs::read(expected).unwrap(), b"waves");
    }

    #[test]
    fn test_created_falls_back_to_name_pattern() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let id = store
            .ingest(1, "IMG_20190304_050607.jpg", "image/jpeg", b"x", None)
            .unwrap();
        let record = store.get_by_id(1, id).unwrap();
        assert_eq!(record.created.to_string(), "2019-03-04 05:06:07");
    }

    #[test]
    fn test_every_row_has_its_file() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        for i in 0..5u8 {
            store
                .ingest(1, &format!("p{i}.png"), "image/png", &[i, 1, 2], Some(at(2020, 1, 1 + u32::from(i))))
                .unwrap();
        }
        let page = store.list(1, 1, 50, MediaFilter::Active).unwrap();
        assert_eq!(page.items.len(), 5);
        for record in &page.items {
            assert!(store.file_path(1, record).is_file());
        }
    }

    #[test]
    fn test_failed_final_move_rolls_back_row() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());
        let created = at(2024, 3, 1);

        // A regular file where the first media directory would go.
        let blocker = store.stores().media_dir(1, created.date(), 1);
        fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        fs::write(&blocker, b"in the way").unwrap();

        let result = store.ingest(1, "x.jpg", "image/jpeg", b"pixels", Some(created));
        assert!(result.is_err());

        let page = store.list(1, 1, 10, MediaFilter::Active).unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(staged_entries(&store, 1), 0);

        // The same bytes can be stored once the path is free.
        fs::remove_file(&blocker).unwrap();
        let id = store.ingest(1, "x.jpg", "image/jpeg", b"pixels", Some(created)).unwrap();
        assert!(store.file_path(1, &store.get_by_id(1, id).unwrap()).is_file());
    }

    #[test]
    fn test_failed_copy_leaves_no_partial_files() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());
        let created = at(2024, 3, 1);

        // A non-empty directory at the final file path makes both the rename
        // and the copy fallback fail after the media directory exists.
        let target_dir = store.stores().media_dir(1, created.date(), 1);
        fs::create_dir_all(target_dir.join("x.jpg")).unwrap();
        fs::write(target_dir.join("x.jpg").join("partial"), b"half").unwrap();

        let result = store.ingest(1, "x.jpg", "image/jpeg", b"pixels", Some(created));
        assert!(result.is_err());
        assert!(!target_dir.exists());
        assert_eq!(store.list(1, 1, 10, MediaFilter::Active).unwrap().total, 0);
        assert_eq!(staged_entries(&store, 1), 0);
    }

    #[test]
    fn test_pagination() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let base = at(2022, 1, 1);
        for i in 0..45i64 {
            store
                .ingest(
                    1,
                    &format!("{i}.jpg"),
                    "image/jpeg",
                    format!("content {i}").as_bytes(),
                    Some(base + chrono::Duration::minutes(i)),
                )
                .unwrap();
        }

        let page = store.list(1, 2, 20, MediaFilter::Active).unwrap();
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages(), 3);
        // Newest first: page 2 starts with the 21st newest.
        assert_eq!(page.items[0].name, "24.jpg");

        let last = store.list(1, 3, 20, MediaFilter::Active).unwrap();
        assert_eq!(last.items.len(), 5);

        let clamped = store.list(1, 0, 1000, MediaFilter::Active).unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.page_size, DEFAULT_MAX_PAGE_SIZE);
        assert_eq!(clamped.items.len(), 45);
    }

    #[test]
    fn test_delete_then_purge() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let keep = store.ingest(1, "keep.jpg", "image/jpeg", b"keep", None).unwrap();
        let gone = store.ingest(1, "gone.jpg", "image/jpeg", b"gone", None).unwrap();
        let path = store.file_path(1, &store.get_by_id(1, gone).unwrap());

        let summary = store.delete(1, &[gone]).unwrap();
        assert_eq!(summary, DeleteSummary { soft_deleted: 1, purged: 0 });
        assert!(path.is_file());
        assert!(store.get_by_id(1, gone).unwrap().is_deleted());

        let active = store.list(1, 1, 10, MediaFilter::Active).unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.items[0].id, keep);
        let deleted = store.list(1, 1, 10, MediaFilter::Deleted).unwrap();
        assert_eq!(deleted.total, 1);

        let summary = store.delete(1, &[gone]).unwrap();
        assert_eq!(summary, DeleteSummary { soft_deleted: 0, purged: 1 });
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        assert!(matches!(store.get_by_id(1, gone), Err(Error::NotFound)));
    }

    #[test]
    fn test_purge_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let id = store.ingest(1, "a.jpg", "image/jpeg", b"a", None).unwrap();
        let record = store.get_by_id(1, id).unwrap();
        store.delete(1, &[id]).unwrap();
        fs::remove_dir_all(store.file_path(1, &record).parent().unwrap()).unwrap();

        let summary = store.delete(1, &[id]).unwrap();
        assert_eq!(summary.purged, 1);
    }

    #[test]
    fn test_delete_unknown_ids_is_not_found() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        assert!(matches!(store.delete(1, &[10, 11]), Err(Error::NotFound)));
        assert!(matches!(store.delete(1, &[]), Err(Error::NotFound)));

        let id = store.ingest(1, "a.jpg", "image/jpeg", b"a", None).unwrap();
        let summary = store.delete(1, &[id, 999]).unwrap();
        assert_eq!(summary.soft_deleted, 1);
    }

    #[test]
    fn test_restore() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let id = store.ingest(1, "a.jpg", "image/jpeg", b"a", None).unwrap();
        store.delete(1, &[id]).unwrap();
        assert_eq!(store.restore(1, &[id]).unwrap(), 1);
        assert!(!store.get_by_id(1, id).unwrap().is_deleted());
        assert_eq!(store.restore(1, &[id]).unwrap(), 0);
        assert!(matches!(store.restore(1, &[42]), Err(Error::NotFound)));
    }

    #[test]
    fn test_empty_listing_has_one_page() {
        let dir = tempdir().unwrap();
        let store = media_store(dir.path());

        let page = store.list(1, 1, 20, MediaFilter::Active).unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages(), 1);
    }
}
