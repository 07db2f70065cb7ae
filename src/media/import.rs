//! Ingesting files that are already on disk.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{timestamp, MediaStore};
use crate::error::{Error, Result};
use crate::store::TenantId;

/// Content type for a file extension, or `None` when it is not media.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let content_type = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "3gp" => "video/3gpp",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        _ => return None,
    };
    Some(content_type)
}

/// Counts from a directory import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub failed: Vec<PathBuf>,
}

impl MediaStore {
    /// Ingest one file from disk. The timestamp embedded in its path, or
    /// else its modification time, is used as the creation timestamp.
    pub fn ingest_path(&self, tenant: TenantId, path: &Path) -> Result<i64> {
        self.ingest_file(tenant, path).map(|stored| stored.id)
    }

    fn ingest_file(&self, tenant: TenantId, path: &Path) -> Result<super::Stored> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or(Error::InvalidName)?;
        let content_type = content_type_for(path).ok_or_else(|| {
            Error::UnsupportedType(format!("unknown extension of {}", name))
        })?;
        let bytes = fs::read(path)?;
        self.store(tenant, &name, content_type, &bytes, timestamp::from_path(path))
    }

    /// Ingest every regular file below `dir`. Files are left in place.
    pub fn import_dir(&self, tenant: TenantId, dir: &Path) -> Result<ImportReport> {
        if !dir.is_dir() {
            return Err(Error::NotFound);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut report = ImportReport::default();
        for file in files {
            match self.ingest_file(tenant, &file) {
                Ok(stored) if stored.duplicate => report.duplicates += 1,
                Ok(stored) => {
                    tracing::debug!(tenant, media_id = stored.id, path = %file.display(), "Imported");
                    report.imported += 1;
                }
                Err(e) => {
                    tracing::warn!(tenant, path = %file.display(), error = %e, "Import failed");
                    report.failed.push(file);
                }
            }
        }

        tracing::info!(
            tenant,
            imported = report.imported,
            duplicates = report.duplicates,
            failed = report.failed.len(),
            "Directory import finished"
        );
        Ok(report)
    }

    /// Import the tenant's drop-in directory, `<data-root>/<tenant>/upload`.
    pub fn import_upload_dir(&self, tenant: TenantId) -> Result<ImportReport> {
        let dir = self.stores.upload_dir(tenant);
        if !dir.is_dir() {
            return Ok(ImportReport::default());
        }
        self.import_dir(tenant, &dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFilter;
    use crate::store::{StoreOptions, TenantStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/B.JPG")), Some("image/jpeg"));
        assert_eq!(content_type_for(Path::new("clip.mov")), Some("video/quicktime"));
        assert_eq!(content_type_for(Path::new("notes.txt")), None);
        assert_eq!(content_type_for(Path::new("README")), None);
    }

    #[test]
    fn test_ingest_path_uses_name_timestamp() {
        let data = tempdir().unwrap();
        let src = tempdir().unwrap();
        let store = MediaStore::new(Arc::new(TenantStore::new(StoreOptions::new(data.path()))));

        let file = src.path().join("IMG_20180102_030405.jpg");
        fs::write(&file, b"jpeg-ish").unwrap();

        let id = store.ingest_path(1, &file).unwrap();
        let record = store.get_by_id(1, id).unwrap();
        assert_eq!(record.created.to_string(), "2018-01-02 03:04:05");
        assert_eq!(record.content_type, "image/jpeg");
        assert!(file.exists());
    }

    #[test]
    fn test_import_upload_dir() {
        let data = tempdir().unwrap();
        let store = MediaStore::new(Arc::new(TenantStore::new(StoreOptions::new(data.path()))));

        let upload = store.stores().upload_dir(2);
        fs::create_dir_all(upload.join("2021-06-01")).unwrap();
        fs::write(upload.join("a.jpg"), b"a").unwrap();
        fs::write(upload.join("2021-06-01").join("b.mp4"), b"b").unwrap();
        fs::write(upload.join("copy-of-a.jpg"), b"a").unwrap();
        fs::write(upload.join("notes.txt"), b"not media").unwrap();

        let report = store.import_upload_dir(2).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed, vec![upload.join("notes.txt")]);

        let page = store.list(2, 1, 10, MediaFilter::Active).unwrap();
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_missing_upload_dir_is_empty_report() {
        let data = tempdir().unwrap();
        let store = MediaStore::new(Arc::new(TenantStore::new(StoreOptions::new(data.path()))));
        assert_eq!(store.import_upload_dir(5).unwrap(), ImportReport::default());
    }
}
